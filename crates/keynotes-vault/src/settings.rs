//! User-facing application settings.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::storage::{keys, Storage};

/// Settings the user toggles from the app, persisted as JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    /// Whether the auto-lock monitor may lock the vault.
    pub auto_lock: bool,
    /// Idle minutes before auto-lock.
    pub lock_timeout: u32,
    /// Whether remote sync is enabled.
    pub sync_enabled: bool,
    /// Whether the sync account is linked.
    #[serde(alias = "mixIdConnected")]
    pub connected: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            auto_lock: true,
            lock_timeout: 15,
            sync_enabled: false,
            connected: false,
        }
    }
}

impl AppSettings {
    /// Idle timeout as a duration.
    pub fn lock_timeout_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.lock_timeout))
    }

    /// Whether sync should run: enabled and linked.
    pub fn sync_active(&self) -> bool {
        self.sync_enabled && self.connected
    }
}

/// Loads and saves [`AppSettings`] under the `settings` key.
#[derive(Clone)]
pub struct SettingsStore {
    storage: Arc<dyn Storage>,
}

impl SettingsStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Load settings. Missing or unreadable settings yield the defaults.
    pub async fn load(&self) -> Result<AppSettings> {
        let Some(raw) = self.storage.get(keys::SETTINGS).await? else {
            return Ok(AppSettings::default());
        };
        match serde_json::from_str(&raw) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                warn!(error = %e, "stored settings are unreadable, using defaults");
                Ok(AppSettings::default())
            }
        }
    }

    pub async fn save(&self, settings: &AppSettings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        self.storage.set(keys::SETTINGS, &json).await
    }

    /// Load, modify and save in one step. Returns the new settings.
    pub async fn update(&self, f: impl FnOnce(&mut AppSettings)) -> Result<AppSettings> {
        let mut settings = self.load().await?;
        f(&mut settings);
        self.save(&settings).await?;
        Ok(settings)
    }
}
