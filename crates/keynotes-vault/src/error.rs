//! Error types for the vault engine.

use thiserror::Error;

/// Errors that can occur during vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Vault is locked")]
    Locked,

    #[error("Wrong master password")]
    WrongPassword,

    #[error("Vault data is corrupt or was encrypted with a different password")]
    CorruptOrWrongPassword,

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Invalid password: {0}")]
    InvalidPassword(String),

    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    #[error("Invalid vault envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VaultError {
    /// Create a decryption error.
    pub fn decryption(message: impl Into<String>) -> Self {
        Self::Decryption(message.into())
    }

    /// Create an encryption error.
    pub fn encryption(message: impl Into<String>) -> Self {
        Self::Encryption(message.into())
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Whether the caller should prompt for the master password again.
    pub fn needs_password(&self) -> bool {
        matches!(
            self,
            Self::Locked | Self::WrongPassword | Self::CorruptOrWrongPassword
        )
    }
}

/// Convenience result alias for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
