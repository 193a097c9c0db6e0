//! Durable outbox for sync operations that could not be delivered.

use std::future::Future;
use std::sync::Arc;

use keynotes_vault::{keys, Storage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::error::{Result, SyncError};

/// What a queued operation replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// A sync preferences update.
    Settings,
    /// A data upload.
    Data,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Settings => "settings",
            Self::Data => "data",
        }
    }
}

/// A pending sync operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    pub data: Value,
    /// Enqueue time, epoch milliseconds.
    pub timestamp: i64,
    pub retries: u32,
}

/// Outcome of one [`OfflineQueue::process`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// Operations replayed successfully and removed.
    pub replayed: usize,
    /// Operations that failed and stay queued.
    pub retried: usize,
    /// Ids dropped after reaching the retry ceiling.
    pub dropped: Vec<String>,
}

/// FIFO outbox with a bounded retry count, persisted after every change.
pub struct OfflineQueue {
    storage: Arc<dyn Storage>,
    ops: Mutex<Vec<QueuedOperation>>,
    max_retries: u32,
}

impl OfflineQueue {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Load the persisted queue. An unreadable queue starts empty.
    pub async fn load(storage: Arc<dyn Storage>, max_retries: u32) -> Result<Self> {
        let ops = match storage.get(keys::OFFLINE_QUEUE).await? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                error!(error = %e, "offline queue is unreadable, starting empty");
                Vec::new()
            }),
            None => Vec::new(),
        };

        Ok(Self {
            storage,
            ops: Mutex::new(ops),
            max_retries: max_retries.max(1),
        })
    }

    async fn persist(&self, ops: &[QueuedOperation]) -> Result<()> {
        let json = serde_json::to_string(ops)?;
        self.storage.set(keys::OFFLINE_QUEUE, &json).await?;
        Ok(())
    }

    /// Append an operation and persist. Returns its id.
    pub async fn enqueue(
        &self,
        kind: OperationKind,
        data: Value,
        data_type: Option<&str>,
    ) -> Result<String> {
        let id = keynotes_core::id::prefixed_timestamp_id(kind.as_str());
        let op = QueuedOperation {
            id: id.clone(),
            kind,
            data_type: data_type.map(str::to_string),
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
            retries: 0,
        };

        let mut ops = self.ops.lock().await;
        ops.push(op);
        self.persist(&ops).await?;

        debug!(id = %id, kind = kind.as_str(), "queued sync operation");
        Ok(id)
    }

    /// Replay every operation queued at call time, in order.
    ///
    /// Successes are removed. A failure bumps the retry counter; an
    /// operation that reaches the ceiling is dropped. Operations enqueued
    /// while this runs wait for the next pass.
    pub async fn process<F, Fut>(&self, mut replay: F) -> Result<ProcessReport>
    where
        F: FnMut(QueuedOperation) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let snapshot = self.ops.lock().await.clone();
        let mut report = ProcessReport::default();

        for op in snapshot {
            let outcome = replay(op.clone()).await;

            let mut ops = self.ops.lock().await;
            let Some(pos) = ops.iter().position(|o| o.id == op.id) else {
                // Removed while we were replaying it.
                continue;
            };

            match outcome {
                Ok(()) => {
                    ops.remove(pos);
                    report.replayed += 1;
                    debug!(id = %op.id, "queued operation replayed");
                }
                Err(e) => {
                    ops[pos].retries += 1;
                    let attempts = ops[pos].retries;
                    if attempts >= self.max_retries {
                        ops.remove(pos);
                        let dropped = SyncError::QueueExhausted {
                            id: op.id.clone(),
                            attempts,
                        };
                        warn!(error = %dropped, last_error = %e, "dropping queued operation");
                        report.dropped.push(op.id);
                    } else {
                        warn!(id = %op.id, attempts, error = %e, "queued operation failed, will retry");
                        report.retried += 1;
                    }
                }
            }
            self.persist(&ops).await?;
        }

        Ok(report)
    }

    /// Remove an operation by id. Returns whether it was queued.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let mut ops = self.ops.lock().await;
        let before = ops.len();
        ops.retain(|o| o.id != id);
        if ops.len() == before {
            return Ok(false);
        }
        self.persist(&ops).await?;
        Ok(true)
    }

    pub async fn clear(&self) -> Result<()> {
        let mut ops = self.ops.lock().await;
        ops.clear();
        self.persist(&ops).await
    }

    /// Copy of the queued operations, oldest first.
    pub async fn snapshot(&self) -> Vec<QueuedOperation> {
        self.ops.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.ops.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ops.lock().await.is_empty()
    }
}
