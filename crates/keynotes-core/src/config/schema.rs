//! Configuration schema definitions.

use crate::secret::SecretString;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main KeyNotes configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Vault storage settings.
    #[serde(default)]
    pub vault: VaultConfig,

    /// Remote sync settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Auto-lock monitor settings.
    #[serde(default)]
    pub auto_lock: AutoLockConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Vault storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Directory holding the vault blob, verifier, settings and queue.
    /// Defaults to `~/.keynotes/data`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

/// Remote sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the sync API (no trailing slash).
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// WebSocket URL of the push channel. Polling only when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_url: Option<String>,

    /// OAuth client id used for the code exchange.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// OAuth client secret used for the code exchange.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<SecretString>,

    /// Fallback polling interval in seconds.
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    /// Heartbeat interval in seconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Replay attempts before a queued operation is dropped.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_api_base() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_sync_interval() -> u64 {
    300
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            push_url: None,
            client_id: None,
            client_secret: None,
            sync_interval_secs: default_sync_interval(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

/// Auto-lock monitor configuration.
///
/// The user-facing toggle and timeout live in the vault's app settings;
/// these are the monitor's mechanics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoLockConfig {
    /// How often the policy is evaluated, in seconds.
    #[serde(default = "default_tick")]
    pub tick_secs: u64,

    /// Minimum elapsed time since unlock/write before a lock may fire.
    #[serde(default = "default_grace")]
    pub grace_millis: u64,
}

fn default_tick() -> u64 {
    60
}

fn default_grace() -> u64 {
    1000
}

impl Default for AutoLockConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick(),
            grace_millis: default_grace(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}
