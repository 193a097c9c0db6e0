//! Keeps the encrypted vault in step with the remote service.
//!
//! The coordinator only ever moves the whole encrypted envelope as produced
//! by [`VaultEngine::export_vault`]; it never reads plaintext entries.
//! Remote snapshots newer than the last local upload are held as pending
//! until the user re-enters the master password.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use keynotes_core::config::SyncConfig;
use keynotes_vault::{SettingsStore, VaultEngine, VaultError, VaultEvent};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::{vault_blob, vault_payload, DeviceInfo, SyncApi, SyncPreferences, VAULT_DATA_TYPE};
use crate::error::Result;
use crate::push::{PushConnection, PushConnector, PushMessage};
use crate::queue::{OfflineQueue, OperationKind, ProcessReport, QueuedOperation};

/// Result of pushing something to the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Delivery failed; the operation was queued under this id.
    Queued(String),
    /// The vault is locked, nothing to send.
    SkippedLocked,
}

/// Why a sync pass did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Sync is off or the account is not linked in local settings.
    LocallyDisabled,
    /// The remote account has data sync turned off.
    RemotelyDisabled,
}

/// Summary of one [`SyncCoordinator::perform_sync`] pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncReport {
    Skipped(SkipReason),
    Completed {
        /// Timestamp of a newer remote snapshot that is now pending.
        remote_update: Option<DateTime<Utc>>,
        upload: Delivery,
        queue: ProcessReport,
    },
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Uploaded { at: DateTime<Utc> },
    Queued { id: String },
    RemoteUpdateAvailable { updated_at: DateTime<Utc> },
    RemoteApplied { updated_at: DateTime<Utc> },
    SyncFailed { reason: String },
}

#[derive(Debug, Clone)]
struct RemoteSnapshot {
    blob: String,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct SyncState {
    last_local_upload: Option<DateTime<Utc>>,
    pending_remote: Option<RemoteSnapshot>,
    last_sync: Option<DateTime<Utc>>,
    push_out: Option<mpsc::Sender<PushMessage>>,
}

async fn replay(api: &dyn SyncApi, op: &QueuedOperation) -> Result<()> {
    match op.kind {
        OperationKind::Data => {
            let data_type = op.data_type.as_deref().unwrap_or(VAULT_DATA_TYPE);
            api.upload_data(data_type, &op.data).await
        }
        OperationKind::Settings => {
            let preferences: SyncPreferences = serde_json::from_value(op.data.clone())?;
            api.update_preferences(&preferences).await
        }
    }
}

/// Periodic and event-driven sync of the encrypted vault.
pub struct SyncCoordinator {
    api: Arc<dyn SyncApi>,
    engine: Arc<VaultEngine>,
    queue: Arc<OfflineQueue>,
    settings: SettingsStore,
    push: Option<Arc<dyn PushConnector>>,
    device: DeviceInfo,
    sync_interval: Duration,
    heartbeat_interval: Duration,
    state: Mutex<SyncState>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncCoordinator {
    pub fn new(
        api: Arc<dyn SyncApi>,
        engine: Arc<VaultEngine>,
        queue: Arc<OfflineQueue>,
        settings: SettingsStore,
        config: &SyncConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            api,
            engine,
            queue,
            settings,
            push: None,
            device: DeviceInfo::current(),
            sync_interval: Duration::from_secs(config.sync_interval_secs.max(1)),
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs.max(1)),
            state: Mutex::new(SyncState::default()),
            events,
        }
    }

    /// Use a real-time push channel in addition to polling.
    pub fn with_push(mut self, connector: Arc<dyn PushConnector>) -> Self {
        self.push = Some(connector);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    pub async fn last_local_upload(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.last_local_upload
    }

    pub async fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.last_sync
    }

    /// Timestamp of the pending remote snapshot, if any.
    pub async fn pending_remote(&self) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .await
            .pending_remote
            .as_ref()
            .map(|s| s.updated_at)
    }

    /// One full pass: remote check, upload, queue drain.
    pub async fn perform_sync(&self) -> Result<SyncReport> {
        let settings = self.settings.load().await?;
        if !settings.sync_active() {
            debug!("sync disabled in settings, skipping");
            return Ok(SyncReport::Skipped(SkipReason::LocallyDisabled));
        }

        let status = self.api.sync_status().await?;
        if !status.sync_data {
            debug!("data sync disabled for this account, skipping");
            return Ok(SyncReport::Skipped(SkipReason::RemotelyDisabled));
        }

        let remote_update = match self.check_remote().await {
            Ok(update) => update,
            Err(e) => {
                warn!(error = %e, "failed to check for remote vault updates");
                None
            }
        };

        let upload = self.upload_vault().await?;
        let queue = self.drain_queue().await?;

        self.state.lock().await.last_sync = Some(Utc::now());
        info!(?upload, replayed = queue.replayed, dropped = queue.dropped.len(), "sync pass complete");

        Ok(SyncReport::Completed {
            remote_update,
            upload,
            queue,
        })
    }

    async fn check_remote(&self) -> Result<Option<DateTime<Utc>>> {
        let check = self.api.check_updates(&[VAULT_DATA_TYPE]).await?;
        let Some(info) = check.update_for(VAULT_DATA_TYPE) else {
            return Ok(None);
        };
        let remote_time = info.updated_at.unwrap_or(DateTime::<Utc>::MIN_UTC);

        let payload = self.api.download_data(VAULT_DATA_TYPE).await?;
        let Some(blob) = vault_blob(&payload.data) else {
            warn!("remote vault payload has no blob");
            return Ok(None);
        };

        Ok(self.consider_remote(blob, remote_time).await)
    }

    /// The newest local state: the later of the last upload and the last
    /// edit of the envelope. A locked engine contributes nothing.
    async fn local_time(&self) -> DateTime<Utc> {
        let edited = self.engine.last_edited().await.ok().flatten();
        let uploaded = self.state.lock().await.last_local_upload;
        edited.max(uploaded).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Newer-wins: hold `blob` as pending if it is strictly newer than the
    /// local state.
    async fn consider_remote(&self, blob: &str, remote_time: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local_time = self.local_time().await;
        let mut state = self.state.lock().await;
        if remote_time <= local_time {
            debug!(%remote_time, %local_time, "remote vault is not newer");
            return None;
        }

        state.pending_remote = Some(RemoteSnapshot {
            blob: blob.to_string(),
            updated_at: remote_time,
        });
        drop(state);

        info!(%remote_time, "newer remote vault available, password required to import");
        self.emit(SyncEvent::RemoteUpdateAvailable {
            updated_at: remote_time,
        });
        Some(remote_time)
    }

    /// Upload the encrypted vault, queueing it if the upload fails.
    pub async fn upload_vault(&self) -> Result<Delivery> {
        let blob = match self.engine.export_vault().await {
            Ok(blob) => blob,
            Err(VaultError::Locked) => {
                debug!("vault locked, skipping upload");
                return Ok(Delivery::SkippedLocked);
            }
            Err(e) => return Err(e.into()),
        };
        let payload = vault_payload(&blob);

        match self.api.upload_data(VAULT_DATA_TYPE, &payload).await {
            Ok(()) => {
                let now = Utc::now();
                let push_out = {
                    let mut state = self.state.lock().await;
                    state.last_local_upload = Some(now);
                    state.push_out.clone()
                };
                self.announce(push_out, payload).await;
                self.emit(SyncEvent::Uploaded { at: now });
                Ok(Delivery::Sent)
            }
            Err(e) => {
                warn!(error = %e, "vault upload failed, queueing for retry");
                let id = self
                    .queue
                    .enqueue(OperationKind::Data, payload, Some(VAULT_DATA_TYPE))
                    .await?;
                self.emit(SyncEvent::Queued { id: id.clone() });
                Ok(Delivery::Queued(id))
            }
        }
    }

    async fn announce(&self, push_out: Option<mpsc::Sender<PushMessage>>, payload: Value) {
        let Some(push_out) = push_out else {
            return;
        };
        let message = PushMessage::DataPush {
            data_type: VAULT_DATA_TYPE.to_string(),
            data: payload,
        };
        if push_out.send(message).await.is_err() {
            debug!("push channel gone, skipping announcement");
        }
    }

    /// Upload after a local change, if sync is active.
    async fn upload_if_active(&self) -> Result<Option<Delivery>> {
        if !self.settings.load().await?.sync_active() {
            return Ok(None);
        }
        Ok(Some(self.upload_vault().await?))
    }

    /// Replay queued operations against the API.
    pub async fn drain_queue(&self) -> Result<ProcessReport> {
        let api = Arc::clone(&self.api);
        self.queue
            .process(|op| {
                let api = Arc::clone(&api);
                async move { replay(api.as_ref(), &op).await }
            })
            .await
    }

    /// Send a heartbeat. Failures are logged and reported as `false`.
    pub async fn heartbeat(&self) -> bool {
        match self.api.heartbeat(&self.device).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "heartbeat failed");
                false
            }
        }
    }

    /// Apply the newer-wins rule to a push frame.
    pub async fn handle_push_message(&self, message: PushMessage) -> Option<DateTime<Utc>> {
        match message {
            PushMessage::DataUpdate {
                data_type,
                data,
                updated_at,
            } if data_type == VAULT_DATA_TYPE => {
                let Some(blob) = vault_blob(&data) else {
                    debug!("vault update without blob ignored");
                    return None;
                };
                let remote_time = updated_at.unwrap_or(DateTime::<Utc>::MIN_UTC);
                self.consider_remote(blob, remote_time).await
            }
            other => {
                debug!(?other, "ignoring push frame");
                None
            }
        }
    }

    /// Import the pending remote snapshot with the master password it was
    /// encrypted under. Returns `false` if nothing is pending, the local
    /// vault changed after the snapshot, or the password does not open it.
    ///
    /// Fails with [`VaultError::Locked`] while locked, since only an open
    /// vault shows when it was last edited.
    pub async fn apply_remote_update(&self, password: &str) -> Result<bool> {
        let Some(snapshot) = self.state.lock().await.pending_remote.clone() else {
            debug!("no pending remote update");
            return Ok(false);
        };
        if let Some(edited) = self.engine.last_edited().await? {
            if snapshot.updated_at <= edited {
                info!(
                    remote_time = %snapshot.updated_at,
                    %edited,
                    "local vault edited after the remote snapshot, discarding it"
                );
                self.state.lock().await.pending_remote = None;
                return Ok(false);
            }
        }

        if !self.engine.import_vault(&snapshot.blob, password).await? {
            warn!("pending remote update could not be opened with the given password");
            return Ok(false);
        }

        {
            let mut state = self.state.lock().await;
            state.pending_remote = None;
            state.last_local_upload = Some(snapshot.updated_at);
        }
        info!(updated_at = %snapshot.updated_at, "remote vault applied");
        self.emit(SyncEvent::RemoteApplied {
            updated_at: snapshot.updated_at,
        });
        Ok(true)
    }

    /// Push sync preferences, queueing them if the request fails.
    pub async fn update_preferences(&self, preferences: SyncPreferences) -> Result<Delivery> {
        match self.api.update_preferences(&preferences).await {
            Ok(()) => Ok(Delivery::Sent),
            Err(e) => {
                warn!(error = %e, "preference update failed, queueing for retry");
                let id = self
                    .queue
                    .enqueue(
                        OperationKind::Settings,
                        serde_json::to_value(preferences)?,
                        None,
                    )
                    .await?;
                self.emit(SyncEvent::Queued { id: id.clone() });
                Ok(Delivery::Queued(id))
            }
        }
    }

    async fn connect_push(&self) -> Option<PushConnection> {
        let connector = self.push.as_ref()?;
        match connector.connect().await {
            Ok(connection) => {
                self.state.lock().await.push_out = Some(connection.sender());
                Some(connection)
            }
            Err(e) => {
                warn!(error = %e, "push channel unavailable, polling only");
                None
            }
        }
    }

    async fn drop_push(&self) {
        self.state.lock().await.push_out = None;
    }

    /// Drive sync until `shutdown` flips to true.
    ///
    /// Runs an initial pass immediately, then polls on the sync interval,
    /// heartbeats on its own interval, reacts to push frames, and uploads
    /// after local vault changes.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut sync_tick = tokio::time::interval(self.sync_interval);
        sync_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat_tick = tokio::time::interval(self.heartbeat_interval);
        heartbeat_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat_tick.tick().await;

        let mut vault_events = self.engine.subscribe();
        let mut push = self.connect_push().await;

        info!(
            sync_interval = ?self.sync_interval,
            heartbeat_interval = ?self.heartbeat_interval,
            push = push.is_some(),
            "sync coordinator started"
        );

        loop {
            tokio::select! {
                _ = sync_tick.tick() => {
                    if self.push.is_some() && !push.as_ref().is_some_and(PushConnection::is_open) {
                        push = self.connect_push().await;
                    }
                    if let Err(e) = self.perform_sync().await {
                        warn!(error = %e, "sync pass failed");
                        self.emit(SyncEvent::SyncFailed { reason: e.to_string() });
                    }
                }
                _ = heartbeat_tick.tick() => {
                    self.heartbeat().await;
                }
                message = next_push(&mut push) => match message {
                    Some(message) => {
                        self.handle_push_message(message).await;
                    }
                    None => {
                        info!("push channel closed, falling back to polling");
                        push = None;
                        self.drop_push().await;
                    }
                },
                event = vault_events.recv() => match event {
                    Ok(event) if event.is_local_change() => {
                        if let Err(e) = self.upload_if_active().await {
                            warn!(error = %e, "upload after local change failed");
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed vault events, uploading current state");
                        if let Err(e) = self.upload_if_active().await {
                            warn!(error = %e, "upload after missed events failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.drop_push().await;
        info!("sync coordinator stopped");
    }
}

async fn next_push(push: &mut Option<PushConnection>) -> Option<PushMessage> {
    match push {
        Some(connection) => connection.recv().await,
        None => std::future::pending().await,
    }
}
