//! Idle auto-lock.
//!
//! [`AutoLockPolicy`] is a pure decision over settings and timestamps;
//! [`AutoLockMonitor`] evaluates it on a timer against a live engine.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use keynotes_core::config::AutoLockConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::{LockReason, VaultEngine};
use crate::error::Result;
use crate::settings::{AppSettings, SettingsStore};

/// Outcome of one auto-lock evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockDecision {
    /// Auto-lock is turned off in settings.
    Disabled,
    /// The vault is already locked.
    AlreadyLocked,
    /// Activity happened within the grace period.
    WithinGrace,
    /// The idle timeout has not elapsed yet.
    Idle,
    Lock,
}

/// When an idle vault should be locked.
#[derive(Debug, Clone, Copy)]
pub struct AutoLockPolicy {
    /// Minimum time since last activity before any lock.
    pub grace: chrono::Duration,
}

impl Default for AutoLockPolicy {
    fn default() -> Self {
        Self {
            grace: chrono::Duration::seconds(1),
        }
    }
}

impl AutoLockPolicy {
    pub fn from_config(config: &AutoLockConfig) -> Self {
        let grace_millis = i64::try_from(config.grace_millis).unwrap_or(i64::MAX);
        Self {
            grace: chrono::Duration::milliseconds(grace_millis),
        }
    }

    pub fn evaluate(
        &self,
        settings: &AppSettings,
        last_activity: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> LockDecision {
        if !settings.auto_lock {
            return LockDecision::Disabled;
        }
        let Some(last_activity) = last_activity else {
            return LockDecision::AlreadyLocked;
        };

        let idle = now - last_activity;
        if idle < self.grace {
            LockDecision::WithinGrace
        } else if idle > settings.lock_timeout_duration() {
            LockDecision::Lock
        } else {
            LockDecision::Idle
        }
    }
}

/// Periodically locks an idle vault.
pub struct AutoLockMonitor {
    engine: Arc<VaultEngine>,
    settings: SettingsStore,
    policy: AutoLockPolicy,
    tick: Duration,
}

impl AutoLockMonitor {
    pub fn new(engine: Arc<VaultEngine>, settings: SettingsStore, config: &AutoLockConfig) -> Self {
        Self {
            engine,
            settings,
            policy: AutoLockPolicy::from_config(config),
            tick: Duration::from_secs(config.tick_secs.max(1)),
        }
    }

    /// Evaluate once as of `now`, locking if due.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<LockDecision> {
        let settings = self.settings.load().await?;
        let mut decision = LockDecision::AlreadyLocked;

        // Decide under the session lock so a concurrent write can't slip
        // between the check and the lock.
        let locked = self
            .engine
            .lock_if(LockReason::AutoLock, |last_activity| {
                decision = self.policy.evaluate(&settings, Some(last_activity), now);
                decision == LockDecision::Lock
            })
            .await;

        if locked {
            info!(timeout_minutes = settings.lock_timeout, "vault auto-locked after inactivity");
        } else {
            debug!(?decision, "auto-lock check");
        }
        Ok(decision)
    }

    pub async fn tick(&self) -> Result<LockDecision> {
        self.tick_at(Utc::now()).await
    }

    /// Run on the configured interval until `shutdown` flips to true.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.tick().await {
                            warn!(error = %e, "auto-lock check failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("auto-lock monitor stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}
