//! Error types for remote sync.

use keynotes_vault::VaultError;
use thiserror::Error;

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Sync error types.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Remote service unreachable.
    #[error("Sync service unavailable: {0}")]
    Unavailable(String),

    /// No credentials stored for the sync account.
    #[error("Sync account is not connected")]
    NotConnected,

    /// Credentials rejected and could not be refreshed.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Non-success response from the API.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Push channel error: {0}")]
    Push(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    /// A queued operation was dropped after reaching the retry ceiling.
    #[error("Queued operation {id} dropped after {attempts} attempts")]
    QueueExhausted { id: String, attempts: u32 },
}

impl SyncError {
    /// Create an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Classify a transport failure; connect errors and timeouts mean the
    /// service is unreachable.
    pub(crate) fn transport(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            Self::Unavailable(e.to_string())
        } else {
            Self::Http(e)
        }
    }

    /// Whether a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Http(_) | Self::Push(_) => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Push(e.to_string())
    }
}
