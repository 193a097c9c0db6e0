//! Environment variable handling.

use std::env;

/// Well-known environment variable names.
pub mod vars {
    /// Path to the config file.
    pub const CONFIG: &str = "KEYNOTES_CONFIG";
    /// Overrides `vault.data_dir`.
    pub const DATA_DIR: &str = "KEYNOTES_DATA_DIR";
    /// Overrides `sync.api_base`.
    pub const API_BASE: &str = "KEYNOTES_API_BASE";
    /// Overrides `sync.push_url`.
    pub const PUSH_URL: &str = "KEYNOTES_PUSH_URL";
    /// Master password for non-interactive use.
    pub const PASSWORD: &str = "KEYNOTES_PASSWORD";
}

/// Get an environment variable, returning None if not set or empty.
pub fn get_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}
