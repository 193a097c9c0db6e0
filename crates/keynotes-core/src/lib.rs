//! # keynotes-core
//!
//! Core types, configuration, and utilities for KeyNotes.
//!
//! This crate provides shared functionality used across all KeyNotes crates:
//!
//! - **Configuration**: Loading, validation, and persistence of the json5 config file
//! - **Secrets**: A zeroizing string type for passwords and tokens
//! - **Utilities**: Path resolution, ID generation, and environment handling

pub mod config;
pub mod env;
pub mod error;
pub mod id;
pub mod paths;
pub mod secret;

// Re-exports for convenience
pub use config::Config;
pub use error::ConfigError;
pub use secret::SecretString;
