//! Vault engine behavior against on-disk storage.
//!
//! Each test reopens the storage directory with a fresh engine where it
//! matters, so the assertions cover what survives a process restart.

use keynotes_integration_tests::Device;
use keynotes_vault::{keys, Entry, EntryBody, EntryKind, VaultError};
use tempfile::TempDir;

#[tokio::test]
async fn test_mail_entry_survives_lock_and_restart() {
    let dir = TempDir::new().unwrap();
    let device = Device::open(dir.path()).await;

    assert!(device.engine.unlock("correct-horse").await.unwrap());
    assert!(device.engine.get_entries().await.unwrap().is_empty());

    let entry = Entry::password(
        "Mail",
        Some("a@b.com".to_string()),
        "s3cr3t",
        Some("https://mail.example".to_string()),
    );
    device.engine.save_entry(entry.clone()).await.unwrap();
    device.engine.lock().await;
    assert!(!device.engine.is_unlocked().await);
    assert!(matches!(
        device.engine.get_entries().await,
        Err(VaultError::Locked)
    ));

    assert!(device.engine.unlock("correct-horse").await.unwrap());
    let entries = device.engine.get_entries().await.unwrap();
    assert_eq!(entries, vec![entry.clone()]);
    match &entries[0].body {
        EntryBody::Password { password, .. } => assert_eq!(password, "s3cr3t"),
        other => panic!("unexpected body: {other:?}"),
    }
    device.engine.lock().await;

    // A new process sees the same vault.
    let reopened = Device::open(dir.path()).await;
    assert!(!reopened.engine.unlock("wrong").await.unwrap());
    assert!(reopened.engine.unlock("correct-horse").await.unwrap());
    assert_eq!(reopened.engine.get_entries().await.unwrap(), vec![entry]);
}

#[tokio::test]
async fn test_secrets_are_not_stored_in_clear() {
    let dir = TempDir::new().unwrap();
    let device = Device::open(dir.path()).await;
    device.engine.unlock("pw").await.unwrap();
    device
        .engine
        .save_entry(Entry::note("diary", "very private words"))
        .await
        .unwrap();

    for file in std::fs::read_dir(dir.path()).unwrap() {
        let contents = std::fs::read(file.unwrap().path()).unwrap();
        let text = String::from_utf8_lossy(&contents);
        assert!(!text.contains("very private words"));
        assert!(!text.contains("diary"));
    }
}

#[tokio::test]
async fn test_password_rotation_persists() {
    let dir = TempDir::new().unwrap();
    let device = Device::open(dir.path()).await;
    device.engine.unlock("old-pw").await.unwrap();
    device
        .engine
        .save_entry(Entry::note("n", "body").with_tag("t"))
        .await
        .unwrap();
    device
        .engine
        .save_entry(Entry::key("deploy", "PRIVATE KEY"))
        .await
        .unwrap();
    let before = device.engine.get_entries().await.unwrap();

    assert!(!device
        .engine
        .change_password("not-old", "new-pw")
        .await
        .unwrap());
    assert!(device.engine.change_password("old-pw", "new-pw").await.unwrap());
    device.engine.lock().await;

    let reopened = Device::open(dir.path()).await;
    assert!(!reopened.engine.unlock("old-pw").await.unwrap());
    assert!(reopened.engine.unlock("new-pw").await.unwrap());
    assert_eq!(reopened.engine.get_entries().await.unwrap(), before);
}

#[tokio::test]
async fn test_rotation_interrupted_by_write_failure_never_mixes_passwords() {
    let dir = TempDir::new().unwrap();
    let device = Device::open(dir.path()).await;
    device.engine.unlock("old-pw").await.unwrap();
    let entry = Entry::note("n", "body");
    device.engine.save_entry(entry.clone()).await.unwrap();

    // The vault blob is written first in the rotation batch; the unlock
    // time after it cannot be.
    let blocked = dir.path().join(format!("{}.dat", keys::LAST_UNLOCK));
    std::fs::remove_file(&blocked).unwrap();
    std::fs::create_dir(&blocked).unwrap();
    std::fs::write(blocked.join("occupied"), "x").unwrap();

    assert!(device
        .engine
        .change_password("old-pw", "new-pw")
        .await
        .is_err());
    assert!(!device.engine.is_unlocked().await);

    // Storage refuses to answer rather than pairing a new blob with the
    // old verifier.
    assert!(device.engine.unlock("old-pw").await.is_err());
    assert!(!device.engine.is_unlocked().await);

    std::fs::remove_dir_all(&blocked).unwrap();
    assert!(!device.engine.unlock("old-pw").await.unwrap());
    assert!(device.engine.unlock("new-pw").await.unwrap());
    assert_eq!(device.engine.get_entries().await.unwrap(), vec![entry]);
}

#[tokio::test]
async fn test_delete_and_filter() {
    let dir = TempDir::new().unwrap();
    let device = Device::open(dir.path()).await;
    device.engine.unlock("pw").await.unwrap();

    let keep = Entry::password("GitHub", None, "x", None).with_tag("work");
    let gone = Entry::note("scratch", "y");
    device.engine.save_entry(keep.clone()).await.unwrap();
    device.engine.save_entry(gone.clone()).await.unwrap();

    device.engine.delete_entry(&gone.id).await.unwrap();
    device.engine.delete_entry(&gone.id).await.unwrap();
    device.engine.delete_entry("never-existed").await.unwrap();

    let entries = device.engine.get_entries().await.unwrap();
    assert_eq!(entries, vec![keep.clone()]);

    let filter = keynotes_vault::EntryFilter {
        kind: Some(EntryKind::Password),
        tag: Some("work".to_string()),
        query: Some("git".to_string()),
    };
    assert_eq!(device.engine.find_entries(&filter).await.unwrap(), vec![keep]);
}

#[tokio::test]
async fn test_export_import_between_devices() {
    let a_dir = TempDir::new().unwrap();
    let b_dir = TempDir::new().unwrap();
    let a = Device::open(a_dir.path()).await;
    let b = Device::open(b_dir.path()).await;

    a.engine.unlock("shared").await.unwrap();
    let entry = Entry::note("from a", "hello");
    a.engine.save_entry(entry.clone()).await.unwrap();
    let blob = a.engine.export_vault().await.unwrap();

    assert!(!b.engine.import_vault(&blob, "wrong").await.unwrap());
    assert!(!b.engine.has_vault().await.unwrap());

    assert!(b.engine.import_vault(&blob, "shared").await.unwrap());
    assert!(!b.engine.is_unlocked().await);
    assert!(b.engine.unlock("shared").await.unwrap());
    assert_eq!(b.engine.get_entries().await.unwrap(), vec![entry]);
}
