//! Configuration loading and persistence.

use super::{Config, LogLevel};
use crate::env;
use crate::error::ConfigError;
use crate::paths;
use std::fs;
use std::path::{Path, PathBuf};

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = paths::config_file()?;
        Self::load(&path)
    }

    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::Json5(e.to_string()))
    }

    /// Save configuration to a file path.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_json5()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write atomically
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Serialize to JSON5 string.
    pub fn to_json5(&self) -> Result<String, ConfigError> {
        // json5 doesn't have a serializer, so we use serde_json with pretty print
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validate the configuration, collecting all errors before returning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        // 1. API base must be an absolute http(s) URL
        match url::Url::parse(&self.sync.api_base) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => {}
            Ok(u) => errors.push(format!(
                "sync.api_base must use http or https, got '{}'",
                u.scheme()
            )),
            Err(e) => errors.push(format!(
                "sync.api_base '{}' is not a valid URL: {}",
                self.sync.api_base, e
            )),
        }

        // 2. Push URL, when present, must be a WebSocket URL
        if let Some(push) = &self.sync.push_url {
            match url::Url::parse(push) {
                Ok(u) if u.scheme() == "ws" || u.scheme() == "wss" => {}
                Ok(u) => errors.push(format!(
                    "sync.push_url must use ws or wss, got '{}'",
                    u.scheme()
                )),
                Err(e) => errors.push(format!(
                    "sync.push_url '{}' is not a valid URL: {}",
                    push, e
                )),
            }
        }

        // 3. Intervals
        if self.sync.sync_interval_secs == 0 {
            errors.push("sync.sync_interval_secs must be greater than 0".to_string());
        }
        if self.sync.heartbeat_interval_secs == 0 {
            errors.push("sync.heartbeat_interval_secs must be greater than 0".to_string());
        }
        if self.sync.request_timeout_secs == 0 {
            errors.push("sync.request_timeout_secs must be greater than 0".to_string());
        }

        // 4. Retry ceiling
        if self.sync.max_retries == 0 {
            errors.push("sync.max_retries must be at least 1".to_string());
        }

        // 5. OAuth credentials come in pairs
        if self.sync.client_id.is_some() != self.sync.client_secret.is_some() {
            errors.push(
                "sync.client_id and sync.client_secret must be set together".to_string(),
            );
        }

        // 6. Auto-lock mechanics
        if self.auto_lock.tick_secs == 0 {
            errors.push("auto_lock.tick_secs must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors.join("; ")))
        }
    }

    /// Load configuration from `path` (or the default path), falling back to
    /// defaults when no file exists, then apply environment overrides.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let loaded = match path {
            Some(p) => Self::load(p),
            None => Self::load_default(),
        };

        let mut config = match loaded {
            Ok(config) => config,
            Err(ConfigError::NotFound(missing)) => {
                tracing::debug!(path = %missing.display(), "no config file, using defaults");
                Self::default()
            }
            Err(e) => return Err(e),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `KEYNOTES_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Some(dir) = env::get_var(env::vars::DATA_DIR) {
            self.vault.data_dir = Some(paths::expand_tilde(&dir));
        }
        if let Some(base) = env::get_var(env::vars::API_BASE) {
            self.sync.api_base = base;
        }
        if let Some(push) = env::get_var(env::vars::PUSH_URL) {
            self.sync.push_url = Some(push);
        }
    }

    /// Resolve the data directory, falling back to `~/.keynotes/data`.
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.vault.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => paths::data_dir(),
        }
    }
}

/// Configuration builder for creating configs programmatically.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new config builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the data directory.
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.vault.data_dir = Some(dir.into());
        self
    }

    /// Set the sync API base URL.
    pub fn api_base(mut self, url: impl Into<String>) -> Self {
        self.config.sync.api_base = url.into();
        self
    }

    /// Set the push channel URL.
    pub fn push_url(mut self, url: impl Into<String>) -> Self {
        self.config.sync.push_url = Some(url.into());
        self
    }

    /// Set the polling interval.
    pub fn sync_interval_secs(mut self, secs: u64) -> Self {
        self.config.sync.sync_interval_secs = secs;
        self
    }

    /// Set the heartbeat interval.
    pub fn heartbeat_interval_secs(mut self, secs: u64) -> Self {
        self.config.sync.heartbeat_interval_secs = secs;
        self
    }

    /// Set the queue retry ceiling.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.sync.max_retries = retries;
        self
    }

    /// Set the log level.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.logging.level = level;
        self
    }

    /// Build the config.
    pub fn build(self) -> Config {
        self.config
    }

    /// Validate and build the config, returning an error if validation fails.
    pub fn build_validated(self) -> Result<Config, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
