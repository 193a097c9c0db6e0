//! The vault engine: session state machine over encrypted storage.
//!
//! The engine is either locked or unlocked. While unlocked it holds the
//! master password and the decoded envelope; every mutation stages a new
//! envelope, persists it, and only then swaps it into the session. All
//! session access goes through a single async mutex, so unlock, writes,
//! password rotation and auto-lock never interleave.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use keynotes_core::SecretString;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use crate::crypto::{AesGcmCodec, Codec};
use crate::error::{Result, VaultError};
use crate::storage::{keys, Storage, WriteOp};
use crate::types::{Entry, EntryFilter, Envelope};

/// Why the vault was locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    Manual,
    AutoLock,
    /// A password change could not be persisted.
    RotationFailed,
    /// A vault encrypted under a different password was imported.
    Imported,
}

/// State changes broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultEvent {
    Unlocked,
    Locked { reason: LockReason },
    EntrySaved { id: String },
    EntryDeleted { id: String },
    PasswordChanged,
    Imported,
}

impl VaultEvent {
    /// Whether the persisted vault changed because of a local edit.
    pub fn is_local_change(&self) -> bool {
        matches!(
            self,
            Self::EntrySaved { .. } | Self::EntryDeleted { .. } | Self::PasswordChanged
        )
    }
}

struct ActiveSession {
    password: SecretString,
    envelope: Envelope,
    last_activity: DateTime<Utc>,
}

enum Session {
    Locked,
    Unlocked(ActiveSession),
}

impl Session {
    fn active(&mut self) -> Result<&mut ActiveSession> {
        match self {
            Self::Unlocked(active) => Ok(active),
            Self::Locked => Err(VaultError::Locked),
        }
    }

    fn is_unlocked(&self) -> bool {
        matches!(self, Self::Unlocked(_))
    }
}

fn millis(at: DateTime<Utc>) -> String {
    at.timestamp_millis().to_string()
}

fn require_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(VaultError::InvalidPassword(
            "password must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Encrypted, password-protected entry store.
pub struct VaultEngine {
    storage: Arc<dyn Storage>,
    codec: Arc<dyn Codec>,
    session: Mutex<Session>,
    events: broadcast::Sender<VaultEvent>,
}

impl VaultEngine {
    /// Create a locked engine over `storage`.
    pub fn new(storage: Arc<dyn Storage>, codec: Arc<dyn Codec>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            storage,
            codec,
            session: Mutex::new(Session::Locked),
            events,
        }
    }

    /// Create a locked engine using [`AesGcmCodec`].
    pub fn with_default_codec(storage: Arc<dyn Storage>) -> Self {
        Self::new(storage, Arc::new(AesGcmCodec::new()))
    }

    /// Subscribe to vault events.
    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: VaultEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Whether a vault has been initialized in storage.
    pub async fn has_vault(&self) -> Result<bool> {
        Ok(self.storage.get(keys::VERIFIER).await?.is_some())
    }

    pub async fn is_unlocked(&self) -> bool {
        self.session.lock().await.is_unlocked()
    }

    /// Time of the last unlock or successful write, `None` while locked.
    pub async fn last_activity(&self) -> Option<DateTime<Utc>> {
        match &*self.session.lock().await {
            Session::Unlocked(active) => Some(active.last_activity),
            Session::Locked => None,
        }
    }

    /// When the envelope was last changed, `None` if it is untouched
    /// since creation.
    pub async fn last_edited(&self) -> Result<Option<DateTime<Utc>>> {
        let mut session = self.session.lock().await;
        let envelope = &session.active()?.envelope;
        Ok((envelope.updated_at > envelope.created_at).then_some(envelope.updated_at))
    }

    fn seal_envelope(&self, envelope: &Envelope, password: &str) -> Result<String> {
        let json = serde_json::to_string(envelope)?;
        self.codec.encrypt(&json, password)
    }

    fn open_envelope(&self, blob: &str, password: &str) -> Result<Envelope> {
        let json = self.codec.decrypt(blob, password)?;
        let envelope: Envelope = serde_json::from_str(&json)?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Unlock with `password`, creating a new vault on first use.
    ///
    /// Returns `Ok(false)` if the password does not match the stored
    /// verifier. A matching password whose vault blob cannot be decrypted
    /// or parsed fails with [`VaultError::CorruptOrWrongPassword`].
    pub async fn unlock(&self, password: &str) -> Result<bool> {
        let mut session = self.session.lock().await;
        let now = Utc::now();

        let envelope = match self.storage.get(keys::VERIFIER).await? {
            None => {
                require_password(password)?;
                info!("no vault found, initializing a new one");
                let envelope = Envelope::new(self.codec.hash_password(password));
                let blob = self.seal_envelope(&envelope, password)?;
                self.storage
                    .commit(vec![
                        WriteOp::set(keys::VERIFIER, envelope.password_hash.clone()),
                        WriteOp::set(keys::VAULT, blob),
                        WriteOp::set(keys::LAST_UNLOCK, millis(now)),
                    ])
                    .await?;
                envelope
            }
            Some(verifier) => {
                if !self.codec.verify_password(password, verifier.trim()) {
                    warn!("unlock rejected: wrong master password");
                    return Ok(false);
                }

                let envelope = match self.storage.get(keys::VAULT).await? {
                    Some(blob) => self.open_envelope(&blob, password).map_err(|e| {
                        error!(error = %e, "vault blob could not be opened");
                        VaultError::CorruptOrWrongPassword
                    })?,
                    None => {
                        warn!("verifier present but vault blob missing, starting empty");
                        Envelope::new(verifier.trim())
                    }
                };
                self.storage.set(keys::LAST_UNLOCK, &millis(now)).await?;
                envelope
            }
        };

        info!(entries = envelope.entries.len(), "vault unlocked");
        *session = Session::Unlocked(ActiveSession {
            password: SecretString::new(password),
            envelope,
            last_activity: now,
        });
        drop(session);

        self.emit(VaultEvent::Unlocked);
        Ok(true)
    }

    /// Lock the vault. Idempotent.
    pub async fn lock(&self) {
        self.lock_with_reason(LockReason::Manual).await;
    }

    /// Lock the vault, recording why.
    pub async fn lock_with_reason(&self, reason: LockReason) {
        let mut session = self.session.lock().await;
        let was_unlocked = session.is_unlocked();
        *session = Session::Locked;
        self.forget_last_unlock().await;
        drop(session);

        if was_unlocked {
            info!(?reason, "vault locked");
            self.emit(VaultEvent::Locked { reason });
        }
    }

    /// Lock if unlocked and `should_lock(last_activity)` holds, evaluated
    /// under the session lock. Returns whether the vault was locked.
    pub async fn lock_if<F>(&self, reason: LockReason, should_lock: F) -> bool
    where
        F: FnOnce(DateTime<Utc>) -> bool,
    {
        let mut session = self.session.lock().await;
        let last_activity = match &*session {
            Session::Unlocked(active) => active.last_activity,
            Session::Locked => return false,
        };
        if !should_lock(last_activity) {
            return false;
        }

        *session = Session::Locked;
        self.forget_last_unlock().await;
        drop(session);

        info!(?reason, "vault locked");
        self.emit(VaultEvent::Locked { reason });
        true
    }

    async fn forget_last_unlock(&self) {
        if let Err(e) = self.storage.remove(keys::LAST_UNLOCK).await {
            warn!(error = %e, "failed to clear last unlock time");
        }
    }

    /// All entries, decrypted, in insertion order.
    pub async fn get_entries(&self) -> Result<Vec<Entry>> {
        let mut session = self.session.lock().await;
        let active = session.active()?;
        let password = active.password.expose_secret();
        active
            .envelope
            .entries
            .iter()
            .map(|e| e.open(&*self.codec, password))
            .collect()
    }

    /// One entry, decrypted.
    pub async fn get_entry(&self, id: &str) -> Result<Option<Entry>> {
        let mut session = self.session.lock().await;
        let active = session.active()?;
        active
            .envelope
            .get(id)
            .map(|e| e.open(&*self.codec, active.password.expose_secret()))
            .transpose()
    }

    /// Decrypted entries matching `filter`.
    pub async fn find_entries(&self, filter: &EntryFilter) -> Result<Vec<Entry>> {
        Ok(filter.apply(self.get_entries().await?))
    }

    /// Insert or replace an entry by id and persist.
    ///
    /// Sensitive fields are encrypted before storage. The entry's own
    /// timestamps are kept as given; the envelope's are bumped.
    pub async fn save_entry(&self, entry: Entry) -> Result<()> {
        let mut session = self.session.lock().await;
        let active = session.active()?;

        let sealed = entry.seal(&*self.codec, active.password.expose_secret())?;
        sealed.validate()?;

        let mut staged = active.envelope.clone();
        staged.upsert(sealed);
        staged.touch();

        let now = self
            .persist(&staged, active.password.expose_secret(), Vec::new())
            .await?;
        active.envelope = staged;
        active.last_activity = now;
        drop(session);

        debug!(id = %entry.id, "entry saved");
        self.emit(VaultEvent::EntrySaved { id: entry.id });
        Ok(())
    }

    /// Remove an entry by id. Absent ids are a no-op.
    pub async fn delete_entry(&self, id: &str) -> Result<()> {
        let mut session = self.session.lock().await;
        let active = session.active()?;

        let mut staged = active.envelope.clone();
        if !staged.remove(id) {
            debug!(id, "delete of unknown entry ignored");
            return Ok(());
        }
        staged.touch();

        let now = self
            .persist(&staged, active.password.expose_secret(), Vec::new())
            .await?;
        active.envelope = staged;
        active.last_activity = now;
        drop(session);

        debug!(id, "entry deleted");
        self.emit(VaultEvent::EntryDeleted { id: id.to_string() });
        Ok(())
    }

    /// Write the sealed envelope plus `extra` ops in one commit. Returns the
    /// timestamp recorded as last activity.
    async fn persist(
        &self,
        envelope: &Envelope,
        password: &str,
        mut extra: Vec<WriteOp>,
    ) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        let blob = self.seal_envelope(envelope, password)?;
        let mut batch = vec![
            WriteOp::set(keys::VAULT, blob),
            WriteOp::set(keys::LAST_UNLOCK, millis(now)),
        ];
        batch.append(&mut extra);
        self.storage.commit(batch).await?;
        Ok(now)
    }

    /// Re-encrypt everything under `new_password`.
    ///
    /// Returns `Ok(false)` if `old_password` is wrong. If the new state
    /// cannot be persisted the vault is locked and the error returned.
    /// The rotation is a single storage commit, so storage afterwards
    /// opens under exactly one of the two passwords.
    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<bool> {
        let mut session = self.session.lock().await;
        let active = session.active()?;
        require_password(new_password)?;

        let verified = match self.storage.get(keys::VERIFIER).await? {
            Some(verifier) => self.codec.verify_password(old_password, verifier.trim()),
            None => false,
        };
        if !verified || !active.password.matches(old_password) {
            warn!("password change rejected: wrong current password");
            return Ok(false);
        }

        let codec = &*self.codec;
        let mut staged = active.envelope.clone();
        staged.entries = active
            .envelope
            .entries
            .iter()
            .map(|e| e.open(codec, old_password)?.seal(codec, new_password))
            .collect::<Result<Vec<_>>>()?;
        staged.password_hash = codec.hash_password(new_password);
        staged.touch();

        let rotated = self
            .persist(
                &staged,
                new_password,
                vec![WriteOp::set(keys::VERIFIER, staged.password_hash.clone())],
            )
            .await;

        match rotated {
            Ok(now) => {
                active.password = SecretString::new(new_password);
                active.envelope = staged;
                active.last_activity = now;
                drop(session);

                info!("master password changed");
                self.emit(VaultEvent::PasswordChanged);
                Ok(true)
            }
            Err(e) => {
                error!(error = %e, "password change could not be persisted, locking vault");
                *session = Session::Locked;
                self.forget_last_unlock().await;
                drop(session);

                self.emit(VaultEvent::Locked {
                    reason: LockReason::RotationFailed,
                });
                Err(e)
            }
        }
    }

    /// The envelope encrypted under the active password.
    pub async fn export_vault(&self) -> Result<String> {
        let mut session = self.session.lock().await;
        let active = session.active()?;
        self.seal_envelope(&active.envelope, active.password.expose_secret())
    }

    /// Replace the stored vault with `blob`, encrypted under `password`.
    ///
    /// Returns `Ok(false)` without touching storage if the blob cannot be
    /// opened with `password` or its embedded verifier does not match.
    /// If the vault is unlocked under the same password the session picks
    /// up the new entries; if it is unlocked under a different one it is
    /// locked, since the active password no longer opens storage.
    pub async fn import_vault(&self, blob: &str, password: &str) -> Result<bool> {
        let envelope = match self.open_envelope(blob, password) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "import rejected: blob could not be opened");
                return Ok(false);
            }
        };
        if !self.codec.verify_password(password, &envelope.password_hash) {
            warn!("import rejected: embedded verifier does not match");
            return Ok(false);
        }
        let verifier = self.codec.hash_password(password);

        let mut session = self.session.lock().await;
        let relock = match &mut *session {
            Session::Unlocked(active) if active.password.matches(password) => {
                let mut staged = envelope;
                staged.touch();
                let now = self
                    .persist(&staged, password, vec![WriteOp::set(keys::VERIFIER, verifier)])
                    .await?;
                active.envelope = staged;
                active.last_activity = now;
                false
            }
            Session::Unlocked(_) => {
                self.storage
                    .commit(vec![
                        WriteOp::set(keys::VAULT, blob),
                        WriteOp::set(keys::VERIFIER, verifier),
                        WriteOp::remove(keys::LAST_UNLOCK),
                    ])
                    .await?;
                true
            }
            Session::Locked => {
                self.storage
                    .commit(vec![
                        WriteOp::set(keys::VAULT, blob),
                        WriteOp::set(keys::VERIFIER, verifier),
                    ])
                    .await?;
                false
            }
        };
        if relock {
            *session = Session::Locked;
        }
        drop(session);

        info!("vault imported");
        if relock {
            self.emit(VaultEvent::Locked {
                reason: LockReason::Imported,
            });
        }
        self.emit(VaultEvent::Imported);
        Ok(true)
    }
}
