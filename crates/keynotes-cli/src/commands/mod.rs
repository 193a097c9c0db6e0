//! CLI command implementations.

pub mod settings;
pub mod sync;
pub mod vault;
