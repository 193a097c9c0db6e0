//! # keynotes-vault
//!
//! Encrypted local vault for KeyNotes.
//!
//! Entries (notes, keys, passwords) live in an [`Envelope`] that is
//! serialized to JSON and encrypted under the master password before it is
//! written to [`Storage`]. Inside the envelope each entry's sensitive
//! fields are encrypted again individually.
//!
//! - [`VaultEngine`]: lock/unlock, entry CRUD, password rotation, import/export
//! - [`AutoLockMonitor`]: locks the vault after a period of inactivity
//! - [`FileStorage`]: durable per-key files with journaled batch commits

pub mod autolock;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod settings;
pub mod storage;
pub mod types;

pub use autolock::{AutoLockMonitor, AutoLockPolicy, LockDecision};
pub use crypto::{AesGcmCodec, Codec};
pub use engine::{LockReason, VaultEngine, VaultEvent};
pub use error::{Result, VaultError};
pub use settings::{AppSettings, SettingsStore};
pub use storage::{keys, FileStorage, MemoryStorage, Storage, WriteOp};
pub use types::{Entry, EntryBody, EntryFilter, EntryKind, Envelope};
