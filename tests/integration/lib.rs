//! Shared fixtures for the KeyNotes integration tests.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keynotes_core::config::{ConfigBuilder, SyncConfig};
use keynotes_core::Config;
use keynotes_sync::api::{DataPayload, UpdateInfo, Updates};
use keynotes_sync::{
    DeviceInfo, OfflineQueue, Result, SyncApi, SyncCoordinator, SyncError, SyncPreferences,
    SyncStatus, UpdateCheck,
};
use keynotes_vault::{AppSettings, FileStorage, SettingsStore, Storage, VaultEngine};
use serde_json::Value;

/// Config whose data directory lives under `dir`.
pub fn test_config(dir: &Path) -> Config {
    ConfigBuilder::new().data_dir(dir.join("data")).build()
}

/// A device: file-backed storage, engine and settings under one directory.
pub struct Device {
    pub storage: Arc<dyn Storage>,
    pub engine: Arc<VaultEngine>,
    pub settings: SettingsStore,
}

impl Device {
    /// Open (or reopen) the device state stored in `dir`.
    pub async fn open(dir: &Path) -> Device {
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::open(dir).await.unwrap());
        Device {
            engine: Arc::new(VaultEngine::with_default_codec(storage.clone())),
            settings: SettingsStore::new(storage.clone()),
            storage,
        }
    }

    /// Turn sync on and mark the account linked.
    pub async fn enable_sync(&self) {
        self.settings
            .save(&AppSettings {
                sync_enabled: true,
                connected: true,
                ..AppSettings::default()
            })
            .await
            .unwrap();
    }

    /// Build a coordinator against `remote`, loading the persisted queue.
    pub async fn coordinator(&self, remote: Arc<RemoteService>) -> Arc<SyncCoordinator> {
        let config = SyncConfig::default();
        let queue = OfflineQueue::load(self.storage.clone(), config.max_retries)
            .await
            .unwrap();
        Arc::new(SyncCoordinator::new(
            remote,
            self.engine.clone(),
            Arc::new(queue),
            self.settings.clone(),
            &config,
        ))
    }
}

/// In-memory remote sync service shared by several devices.
///
/// Each upload replaces the stored snapshot and stamps it with the upload
/// time. While offline every call fails as unreachable.
#[derive(Default)]
pub struct RemoteService {
    online: AtomicBool,
    snapshot: Mutex<Option<(Value, DateTime<Utc>)>>,
    uploads: AtomicUsize,
    heartbeats: AtomicUsize,
}

impl RemoteService {
    pub fn new() -> Arc<Self> {
        let remote = Self::default();
        remote.online.store(true, Ordering::SeqCst);
        Arc::new(remote)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn heartbeats(&self) -> usize {
        self.heartbeats.load(Ordering::SeqCst)
    }

    /// The stored vault blob, if any.
    pub fn vault_blob(&self) -> Option<String> {
        let snapshot = self.snapshot.lock().unwrap();
        snapshot
            .as_ref()
            .and_then(|(data, _)| keynotes_sync::api::vault_blob(data).map(str::to_string))
    }

    fn check_online(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::Unavailable("remote offline".to_string()))
        }
    }
}

#[async_trait]
impl SyncApi for RemoteService {
    async fn sync_status(&self) -> Result<SyncStatus> {
        self.check_online()?;
        Ok(SyncStatus {
            sync_settings: false,
            sync_data: true,
            last_sync_at: self.snapshot.lock().unwrap().as_ref().map(|(_, at)| *at),
        })
    }

    async fn update_preferences(&self, _preferences: &SyncPreferences) -> Result<()> {
        self.check_online()
    }

    async fn upload_data(&self, _data_type: &str, data: &Value) -> Result<()> {
        self.check_online()?;
        *self.snapshot.lock().unwrap() = Some((data.clone(), Utc::now()));
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn download_data(&self, data_type: &str) -> Result<DataPayload> {
        self.check_online()?;
        let snapshot = self.snapshot.lock().unwrap().clone();
        let (data, _) = snapshot.ok_or_else(|| SyncError::api(404, "no data"))?;
        Ok(DataPayload {
            data,
            data_type: data_type.to_string(),
        })
    }

    async fn check_updates(&self, data_types: &[&str]) -> Result<UpdateCheck> {
        self.check_online()?;
        let snapshot = self.snapshot.lock().unwrap().clone();
        let Some((_, at)) = snapshot else {
            return Ok(UpdateCheck::default());
        };
        let data = data_types
            .iter()
            .map(|t| {
                (
                    t.to_string(),
                    UpdateInfo {
                        updated_at: Some(at),
                    },
                )
            })
            .collect();
        Ok(UpdateCheck {
            has_updates: true,
            updates: Updates { data },
        })
    }

    async fn heartbeat(&self, _device: &DeviceInfo) -> Result<()> {
        self.check_online()?;
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
