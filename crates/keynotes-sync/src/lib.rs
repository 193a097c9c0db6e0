//! Remote sync for KeyNotes.
//!
//! The vault is synced as a single encrypted blob. This crate provides the
//! HTTP client for the sync service, a durable offline queue for uploads
//! that fail, an optional WebSocket push channel, and the coordinator that
//! ties them together.

pub mod api;
pub mod client;
pub mod coordinator;
pub mod error;
pub mod push;
pub mod queue;

pub use api::{DeviceInfo, SyncApi, SyncPreferences, SyncStatus, UpdateCheck, VAULT_DATA_TYPE};
pub use client::{AuthTokens, HttpSyncClient, TokenStore};
pub use coordinator::{Delivery, SkipReason, SyncCoordinator, SyncEvent, SyncReport};
pub use error::{Result, SyncError};
pub use push::{PushConnection, PushConnector, PushMessage, WsPushConnector};
pub use queue::{OfflineQueue, OperationKind, ProcessReport, QueuedOperation};
