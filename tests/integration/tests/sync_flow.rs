//! Sync coordinator against a shared in-memory remote, with file-backed
//! device state.

use keynotes_integration_tests::{Device, RemoteService};
use keynotes_sync::{Delivery, OperationKind, SyncReport};
use keynotes_vault::Entry;
use tempfile::TempDir;

#[tokio::test]
async fn test_queued_upload_survives_restart() {
    let dir = TempDir::new().unwrap();
    let remote = RemoteService::new();
    remote.set_online(false);

    {
        let device = Device::open(dir.path()).await;
        device.enable_sync().await;
        device.engine.unlock("pw").await.unwrap();
        device
            .engine
            .save_entry(Entry::note("offline", "written on a plane"))
            .await
            .unwrap();

        let coordinator = device.coordinator(remote.clone()).await;
        let delivery = coordinator.upload_vault().await.unwrap();
        assert!(matches!(delivery, Delivery::Queued(_)));
        assert!(coordinator.perform_sync().await.is_err());
    }

    // Restart: the queued upload is still there.
    let device = Device::open(dir.path()).await;
    device.engine.unlock("pw").await.unwrap();
    let coordinator = device.coordinator(remote.clone()).await;
    let queued = coordinator.queue().snapshot().await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].kind, OperationKind::Data);
    assert_eq!(queued[0].data_type.as_deref(), Some("vault"));

    remote.set_online(true);
    let report = coordinator.drain_queue().await.unwrap();
    assert_eq!(report.replayed, 1);
    assert!(coordinator.queue().is_empty().await);

    // What arrived is the encrypted vault, readable with the password.
    let blob = remote.vault_blob().unwrap();
    assert!(!blob.contains("written on a plane"));
    let other = TempDir::new().unwrap();
    let reader = Device::open(other.path()).await;
    assert!(reader.engine.import_vault(&blob, "pw").await.unwrap());
    reader.engine.unlock("pw").await.unwrap();
    assert_eq!(reader.engine.get_entries().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_queue_gives_up_after_three_attempts() {
    let dir = TempDir::new().unwrap();
    let remote = RemoteService::new();
    remote.set_online(false);

    let device = Device::open(dir.path()).await;
    device.engine.unlock("pw").await.unwrap();
    let coordinator = device.coordinator(remote.clone()).await;
    let Delivery::Queued(id) = coordinator.upload_vault().await.unwrap() else {
        panic!("expected the upload to be queued");
    };

    assert_eq!(coordinator.drain_queue().await.unwrap().retried, 1);
    assert_eq!(coordinator.drain_queue().await.unwrap().retried, 1);
    let last = coordinator.drain_queue().await.unwrap();
    assert_eq!(last.dropped, vec![id]);
    assert!(coordinator.queue().is_empty().await);

    remote.set_online(true);
    let after = coordinator.drain_queue().await.unwrap();
    assert_eq!(after.replayed, 0);
    assert_eq!(remote.uploads(), 0);

    // Dropped for good, also after a restart.
    let reopened = Device::open(dir.path()).await;
    let coordinator = reopened.coordinator(remote).await;
    assert!(coordinator.queue().is_empty().await);
}

#[tokio::test]
async fn test_newer_remote_vault_reaches_second_device() {
    let a_dir = TempDir::new().unwrap();
    let b_dir = TempDir::new().unwrap();
    let remote = RemoteService::new();

    let a = Device::open(a_dir.path()).await;
    a.enable_sync().await;
    a.engine.unlock("shared").await.unwrap();
    let entry = Entry::password("Bank", Some("me".to_string()), "1234", None);
    a.engine.save_entry(entry.clone()).await.unwrap();
    let a_sync = a.coordinator(remote.clone()).await;
    let report = a_sync.perform_sync().await.unwrap();
    assert!(matches!(
        report,
        SyncReport::Completed {
            upload: Delivery::Sent,
            ..
        }
    ));

    let b = Device::open(b_dir.path()).await;
    b.enable_sync().await;
    b.engine.unlock("shared").await.unwrap();
    let b_sync = b.coordinator(remote.clone()).await;
    let report = b_sync.perform_sync().await.unwrap();
    let SyncReport::Completed { remote_update, .. } = report else {
        panic!("expected a completed pass, got {report:?}");
    };
    assert!(remote_update.is_some());

    // Nothing is applied until the password is supplied.
    assert!(b.engine.get_entries().await.unwrap().is_empty());
    assert!(b_sync.apply_remote_update("shared").await.unwrap());
    assert_eq!(b.engine.get_entries().await.unwrap(), vec![entry.clone()]);

    // The applied state is durable on device b.
    b.engine.lock().await;
    let b_again = Device::open(b_dir.path()).await;
    b_again.engine.unlock("shared").await.unwrap();
    assert_eq!(b_again.engine.get_entries().await.unwrap(), vec![entry]);
}

#[tokio::test]
async fn test_unsynced_edit_survives_sync_after_restart() {
    let dir = TempDir::new().unwrap();
    let remote = RemoteService::new();

    {
        let device = Device::open(dir.path()).await;
        device.enable_sync().await;
        device.engine.unlock("pw").await.unwrap();
        device.engine.save_entry(Entry::note("A", "synced")).await.unwrap();
        let coordinator = device.coordinator(remote.clone()).await;
        coordinator.perform_sync().await.unwrap();
        device.engine.lock().await;
    }
    assert_eq!(remote.uploads(), 1);

    // A later session edits the vault without syncing.
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    {
        let device = Device::open(dir.path()).await;
        device.engine.unlock("pw").await.unwrap();
        device.engine.save_entry(Entry::note("B", "local only")).await.unwrap();
        device.engine.lock().await;
    }

    let device = Device::open(dir.path()).await;
    device.engine.unlock("pw").await.unwrap();
    let coordinator = device.coordinator(remote.clone()).await;
    let report = coordinator.perform_sync().await.unwrap();
    assert!(matches!(
        report,
        SyncReport::Completed {
            remote_update: None,
            upload: Delivery::Sent,
            ..
        }
    ));
    assert!(!coordinator.apply_remote_update("pw").await.unwrap());

    let mut titles: Vec<String> = device
        .engine
        .get_entries()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.title)
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["A", "B"]);

    // The remote now carries the local edit.
    let other = TempDir::new().unwrap();
    let reader = Device::open(other.path()).await;
    assert!(reader
        .engine
        .import_vault(&remote.vault_blob().unwrap(), "pw")
        .await
        .unwrap());
    reader.engine.unlock("pw").await.unwrap();
    assert_eq!(reader.engine.get_entries().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_sync_is_skipped_when_disabled() {
    let dir = TempDir::new().unwrap();
    let remote = RemoteService::new();
    let device = Device::open(dir.path()).await;
    device.engine.unlock("pw").await.unwrap();

    let coordinator = device.coordinator(remote.clone()).await;
    let report = coordinator.perform_sync().await.unwrap();
    assert!(matches!(report, SyncReport::Skipped(_)));
    assert_eq!(remote.uploads(), 0);

    // Heartbeats are independent of the sync toggle and never fail hard.
    assert!(coordinator.heartbeat().await);
    remote.set_online(false);
    assert!(!coordinator.heartbeat().await);
    assert_eq!(remote.heartbeats(), 1);
}
