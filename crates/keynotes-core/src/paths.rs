//! Path resolution utilities.

use crate::error::ConfigError;
use std::path::PathBuf;

/// Get the KeyNotes base directory (~/.keynotes).
pub fn base_dir() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or_else(|| {
        ConfigError::Validation("Could not determine home directory".to_string())
    })?;
    Ok(home.join(".keynotes"))
}

/// Get the main config file path (~/.keynotes/keynotes.json5).
pub fn config_file() -> Result<PathBuf, ConfigError> {
    Ok(base_dir()?.join("keynotes.json5"))
}

/// Get the default data directory holding the vault and its side files
/// (~/.keynotes/data).
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    Ok(base_dir()?.join("data"))
}

/// Expand tilde (~) in a path.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
