//! Key-value persistence for vault state.
//!
//! Defines the [`Storage`] trait and two backends: [`FileStorage`], which
//! keeps one file per key under a data directory, and [`MemoryStorage`] for
//! tests and ephemeral use.
//!
//! Multi-key writes go through [`Storage::commit`]. The file backend first
//! writes the whole batch to a journal, applies it, and then deletes the
//! journal. A journal left behind by a crash is replayed on the next open.
//! One left behind by a failed apply is replayed before the next access,
//! which fails for as long as the replay does, so a batch is never
//! observed half-applied.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Result, VaultError};

/// Well-known storage keys.
pub mod keys {
    /// Hex verifier of the master password.
    pub const VERIFIER: &str = "master-password-hash";
    /// Encrypted vault envelope.
    pub const VAULT: &str = "vault";
    /// JSON app settings.
    pub const SETTINGS: &str = "settings";
    /// Epoch milliseconds of the last unlock or write.
    pub const LAST_UNLOCK: &str = "last-unlock-time";
    /// JSON list of pending sync operations.
    pub const OFFLINE_QUEUE: &str = "offline-queue";
    /// JSON access/refresh token pair for the sync service.
    pub const AUTH_TOKENS: &str = "auth-tokens";
}

/// Maximum allowed length for a key.
const MAX_KEY_LEN: usize = 128;

const JOURNAL_FILE: &str = ".journal";

/// One write in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum WriteOp {
    Set { key: String, value: String },
    Remove { key: String },
}

impl WriteOp {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn remove(key: impl Into<String>) -> Self {
        Self::Remove { key: key.into() }
    }

    fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::Remove { key } => key,
        }
    }
}

/// Async string key-value store.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read a value, `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a single value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value. Absent keys are not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Apply a batch of writes all-or-nothing.
    async fn commit(&self, batch: Vec<WriteOp>) -> Result<()>;
}

/// Validate that a key contains only safe characters.
///
/// Allowed: ASCII alphanumeric, underscore, hyphen. Max length 128.
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(VaultError::storage("key must not be empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(VaultError::storage(format!(
            "key exceeds maximum length of {MAX_KEY_LEN} characters"
        )));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(VaultError::storage(format!(
            "key contains invalid characters (allowed: alphanumeric, underscore, hyphen): {key}"
        )));
    }
    Ok(())
}

/// Write `data` to `path` via a synced temp file and rename, mode 0600 on Unix.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp, perms).await?;
    }

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// A directory-backed store: one file per key.
pub struct FileStorage {
    dir: PathBuf,
    /// A commit failed midway and its journal still needs replaying.
    unsettled: AtomicBool,
}

impl FileStorage {
    /// Open (creating if needed) a store rooted at `dir`, replaying any
    /// journal left by an interrupted commit.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let storage = Self {
            dir: dir.into(),
            unsettled: AtomicBool::new(false),
        };
        storage.ensure_dir().await?;
        storage.recover().await?;
        Ok(storage)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ensure the directory exists with restrictive permissions.
    async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            tokio::fs::set_permissions(&self.dir, perms).await?;
        }

        Ok(())
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.dat"))
    }

    fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    async fn recover(&self) -> Result<()> {
        let journal = self.journal_path();
        let data = match tokio::fs::read_to_string(&journal).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<Vec<WriteOp>>(&data) {
            Ok(batch) => {
                info!(ops = batch.len(), "replaying interrupted storage commit");
                self.apply(&batch).await?;
            }
            Err(e) => {
                // The journal is renamed into place whole, so this only
                // happens if someone edited it by hand.
                warn!(error = %e, "discarding unreadable storage journal");
            }
        }

        tokio::fs::remove_file(&journal).await?;
        Ok(())
    }

    /// Finish a commit that failed midway before touching any key.
    async fn settle(&self) -> Result<()> {
        if !self.unsettled.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.recover().await?;
        self.unsettled.store(false, Ordering::SeqCst);
        info!("completed interrupted storage commit");
        Ok(())
    }

    async fn apply(&self, batch: &[WriteOp]) -> Result<()> {
        for op in batch {
            match op {
                WriteOp::Set { key, value } => {
                    write_atomic(&self.key_path(key), value.as_bytes()).await?;
                }
                WriteOp::Remove { key } => self.remove_file(key).await?,
            }
        }
        Ok(())
    }

    async fn remove_file(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.key_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        self.settle().await?;
        match tokio::fs::read_to_string(self.key_path(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        self.settle().await?;
        debug!(key, bytes = value.len(), "writing storage key");
        write_atomic(&self.key_path(key), value.as_bytes()).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.settle().await?;
        debug!(key, "removing storage key");
        self.remove_file(key).await
    }

    async fn commit(&self, batch: Vec<WriteOp>) -> Result<()> {
        for op in &batch {
            validate_key(op.key())?;
        }
        if batch.is_empty() {
            return Ok(());
        }
        self.settle().await?;

        let journal = self.journal_path();
        write_atomic(&journal, &serde_json::to_vec(&batch)?).await?;
        if let Err(e) = self.apply(&batch).await {
            warn!(error = %e, "storage commit failed midway, replaying journal");
            if let Err(retry) = self.recover().await {
                warn!(error = %retry, "journal replay failed, storage unavailable until it succeeds");
                self.unsettled.store(true, Ordering::SeqCst);
                return Err(e);
            }
        } else {
            tokio::fs::remove_file(&journal).await?;
        }

        debug!(ops = batch.len(), "committed storage batch");
        Ok(())
    }
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStorage {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.values.write().await.remove(key);
        Ok(())
    }

    async fn commit(&self, batch: Vec<WriteOp>) -> Result<()> {
        for op in &batch {
            validate_key(op.key())?;
        }
        let mut values = self.values.write().await;
        for op in batch {
            match op {
                WriteOp::Set { key, value } => {
                    values.insert(key, value);
                }
                WriteOp::Remove { key } => {
                    values.remove(&key);
                }
            }
        }
        Ok(())
    }
}
