//! Remote sync API contract and wire types.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;

/// Data type under which the encrypted vault is synced.
pub const VAULT_DATA_TYPE: &str = "vault";

/// Remote sync preferences (`GET sync/status`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    #[serde(default)]
    pub sync_settings: bool,
    #[serde(default)]
    pub sync_data: bool,
    #[serde(default)]
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Body of `PUT sync/preferences`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPreferences {
    pub sync_settings: bool,
    pub sync_data: bool,
}

/// Response of `GET sync/check-updates`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheck {
    #[serde(default)]
    pub has_updates: bool,
    #[serde(default)]
    pub updates: Updates,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Updates {
    #[serde(default)]
    pub data: HashMap<String, UpdateInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfo {
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl UpdateCheck {
    /// Remote modification time of `data_type`, if the server reports an
    /// update for it.
    pub fn update_for(&self, data_type: &str) -> Option<&UpdateInfo> {
        if !self.has_updates {
            return None;
        }
        self.updates.data.get(data_type)
    }
}

/// Response of `GET sync/data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPayload {
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub data_type: String,
}

/// Client metadata sent with heartbeats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub platform: String,
    pub client: String,
    pub version: String,
}

impl DeviceInfo {
    /// Describe the running process.
    pub fn current() -> Self {
        Self {
            platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            client: "keynotes".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Wrap an encrypted vault blob as a sync payload.
pub fn vault_payload(blob: &str) -> Value {
    json!({ "vault": blob })
}

/// Extract the encrypted vault blob from a sync payload.
pub fn vault_blob(data: &Value) -> Option<&str> {
    data.get("vault").and_then(Value::as_str)
}

/// Operations the sync coordinator needs from the remote service.
#[async_trait]
pub trait SyncApi: Send + Sync {
    async fn sync_status(&self) -> Result<SyncStatus>;

    async fn update_preferences(&self, preferences: &SyncPreferences) -> Result<()>;

    async fn upload_data(&self, data_type: &str, data: &Value) -> Result<()>;

    async fn download_data(&self, data_type: &str) -> Result<DataPayload>;

    async fn check_updates(&self, data_types: &[&str]) -> Result<UpdateCheck>;

    async fn heartbeat(&self, device: &DeviceInfo) -> Result<()>;
}
