//! Remote sync commands.

use std::sync::Arc;

use clap::Args;
use keynotes_core::{Config, SecretString};
use keynotes_sync::{
    Delivery, HttpSyncClient, OfflineQueue, SyncApi, SyncCoordinator, SyncEvent, SyncReport,
    WsPushConnector,
};
use keynotes_vault::{AutoLockMonitor, VaultEvent};
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::context::{prompt_password, App};

/// Sync command arguments.
#[derive(Args)]
pub struct SyncArgs {
    #[command(subcommand)]
    pub command: SyncCommand,
}

#[derive(clap::Subcommand)]
pub enum SyncCommand {
    /// Show local and remote sync state
    Status,

    /// Run one sync pass
    Now,

    /// Keep syncing until interrupted or the vault locks
    Run,

    /// Show queued operations
    Queue {
        /// Drop all queued operations
        #[arg(long)]
        clear: bool,
    },

    /// Link the sync account with an OAuth authorization code
    Login {
        /// Authorization code
        #[arg(long)]
        code: String,

        /// Redirect URI used when requesting the code
        #[arg(long)]
        redirect_uri: Option<String>,
    },

    /// Unlink the sync account
    Logout,
}

struct SyncStack {
    client: Arc<HttpSyncClient>,
    coordinator: Arc<SyncCoordinator>,
}

async fn build(app: &App) -> anyhow::Result<SyncStack> {
    let sync = &app.config.sync;
    let client = Arc::new(HttpSyncClient::new(sync, app.storage.clone())?);
    let queue = Arc::new(OfflineQueue::load(app.storage.clone(), sync.max_retries).await?);

    let api: Arc<dyn SyncApi> = client.clone();
    let mut coordinator = SyncCoordinator::new(
        api,
        app.engine.clone(),
        queue,
        app.settings.clone(),
        sync,
    );
    if let Some(url) = &sync.push_url {
        coordinator = coordinator.with_push(Arc::new(WsPushConnector::new(url, client.clone())));
    }

    Ok(SyncStack {
        client,
        coordinator: Arc::new(coordinator),
    })
}

/// Run the sync command.
pub async fn run(config: &Config, args: SyncArgs) -> anyhow::Result<()> {
    let app = App::open(config).await?;
    let stack = build(&app).await?;

    match args.command {
        SyncCommand::Status => status(&app, &stack).await,
        SyncCommand::Now => now(&app, &stack).await,
        SyncCommand::Run => run_forever(&app, &stack).await,
        SyncCommand::Queue { clear } => queue(&stack, clear).await,
        SyncCommand::Login { code, redirect_uri } => {
            stack
                .client
                .exchange_code(&code, redirect_uri.as_deref())
                .await?;
            let settings = app.settings.update(|s| s.connected = true).await?;
            println!("Sync account linked.");
            if !settings.sync_enabled {
                println!("  Tip: run 'keynotes settings set sync-enabled true' to start syncing.");
            }
            Ok(())
        }
        SyncCommand::Logout => {
            stack.client.disconnect().await?;
            app.settings.update(|s| s.connected = false).await?;
            println!("Sync account unlinked.");
            Ok(())
        }
    }
}

async fn status(app: &App, stack: &SyncStack) -> anyhow::Result<()> {
    let settings = app.settings.load().await?;
    let linked = stack.client.is_connected().await?;

    println!("Sync enabled:   {}", settings.sync_enabled);
    println!("Account linked: {}", linked && settings.connected);
    println!("API:            {}", stack.client.api_base());
    println!("Queued:         {}", stack.coordinator.queue().len().await);

    if linked {
        match stack.client.sync_status().await {
            Ok(remote) => {
                println!("Remote data:    {}", remote.sync_data);
                println!("Remote settings:{}", remote.sync_settings);
                if let Some(at) = remote.last_sync_at {
                    println!("Last sync:      {}", at.to_rfc3339());
                }
            }
            Err(e) => println!("Remote:         unavailable ({e})"),
        }
    }
    Ok(())
}

async fn now(app: &App, stack: &SyncStack) -> anyhow::Result<()> {
    let password = app.unlock().await?;
    let report = stack.coordinator.perform_sync().await;

    let result = match report {
        Ok(report) => {
            print_report(&report);
            if stack.coordinator.pending_remote().await.is_some() {
                apply_pending(stack, &password).await
            } else {
                Ok(())
            }
        }
        Err(e) => Err(e.into()),
    };

    app.engine.lock().await;
    result
}

/// Apply a pending remote snapshot, trying the current master password
/// before asking for the one it was encrypted under.
async fn apply_pending(stack: &SyncStack, password: &SecretString) -> anyhow::Result<()> {
    if stack
        .coordinator
        .apply_remote_update(password.expose_secret())
        .await?
    {
        println!("Applied newer vault from the remote service.");
        return Ok(());
    }
    if stack.coordinator.pending_remote().await.is_none() {
        println!("Local vault was edited after the remote snapshot; kept local.");
        return Ok(());
    }

    let remote_password = prompt_password("Master password of the remote vault: ")?;
    if stack
        .coordinator
        .apply_remote_update(remote_password.expose_secret())
        .await?
    {
        println!("Applied newer vault from the remote service. Unlock with its password from now on.");
        Ok(())
    } else {
        anyhow::bail!("The remote vault could not be opened with that password")
    }
}

fn print_report(report: &SyncReport) {
    match report {
        SyncReport::Skipped(reason) => println!("Sync skipped: {reason:?}"),
        SyncReport::Completed {
            remote_update,
            upload,
            queue,
        } => {
            match upload {
                Delivery::Sent => println!("Vault uploaded."),
                Delivery::Queued(id) => println!("Upload failed, queued as {id}."),
                Delivery::SkippedLocked => println!("Vault locked, nothing uploaded."),
            }
            if queue.replayed > 0 || queue.retried > 0 || !queue.dropped.is_empty() {
                println!(
                    "Queue: {} replayed, {} retried, {} dropped.",
                    queue.replayed,
                    queue.retried,
                    queue.dropped.len()
                );
            }
            if let Some(at) = remote_update {
                println!("Newer remote vault from {}.", at.to_rfc3339());
            }
        }
    }
}

async fn run_forever(app: &App, stack: &SyncStack) -> anyhow::Result<()> {
    let password = app.unlock().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = Arc::new(AutoLockMonitor::new(
        app.engine.clone(),
        app.settings.clone(),
        &app.config.auto_lock,
    ));
    let mut vault_events = app.engine.subscribe();
    let mut sync_events = stack.coordinator.subscribe();
    let lock_task = monitor.spawn(shutdown_rx.clone());
    let sync_task = tokio::spawn(Arc::clone(&stack.coordinator).run(shutdown_rx));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    println!("Syncing. Press Ctrl-C to stop.");
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            event = vault_events.recv() => match event {
                Ok(VaultEvent::Locked { reason }) => {
                    println!("Vault locked ({reason:?}), stopping.");
                    break;
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            event = sync_events.recv() => match event {
                Ok(SyncEvent::RemoteUpdateAvailable { updated_at }) => {
                    match stack.coordinator.apply_remote_update(password.expose_secret()).await {
                        Ok(true) => println!("Applied remote vault from {}.", updated_at.to_rfc3339()),
                        Ok(false) => {
                            if stack.coordinator.pending_remote().await.is_none() {
                                println!("Local vault was edited after the remote snapshot; kept local.");
                            } else {
                                println!(
                                    "Newer remote vault uses a different password; run 'keynotes sync now' to apply it."
                                );
                            }
                        }
                        Err(e) => warn!(error = %e, "failed to apply remote vault"),
                    }
                }
                Ok(SyncEvent::Queued { id }) => println!("Upload failed, queued as {id}."),
                Ok(SyncEvent::SyncFailed { reason }) => println!("Sync failed: {reason}"),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = sync_task.await {
        warn!(error = %e, "sync task ended abnormally");
    }
    if let Err(e) = lock_task.await {
        warn!(error = %e, "auto-lock task ended abnormally");
    }
    app.engine.lock().await;
    Ok(())
}

async fn queue(stack: &SyncStack, clear: bool) -> anyhow::Result<()> {
    let queue = stack.coordinator.queue();
    if clear {
        let count = queue.len().await;
        queue.clear().await?;
        println!("Dropped {count} queued operation(s).");
        return Ok(());
    }

    let ops = queue.snapshot().await;
    if ops.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    println!("{:<40} {:<10} {:<8} {:<8} {}", "ID", "TYPE", "DATA", "RETRIES", "QUEUED");
    println!("{}", "-".repeat(96));
    for op in &ops {
        let queued = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(op.timestamp)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "{:<40} {:<10} {:<8} {:<8} {}",
            op.id,
            op.kind.as_str(),
            op.data_type.as_deref().unwrap_or("-"),
            op.retries,
            queued
        );
    }
    Ok(())
}
