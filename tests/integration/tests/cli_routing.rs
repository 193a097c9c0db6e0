//! CLI routing integration tests.
//!
//! Commands are parsed with the real argument tree and run against a
//! temporary data directory through the library entry point.

use clap::Parser;
use keynotes_cli::{run, Cli};
use keynotes_integration_tests::{test_config, Device};
use keynotes_vault::{EntryKind, VaultError};
use tempfile::TempDir;

const PASSWORD: &str = "cli-test-password";

fn cli(args: &[&str]) -> Cli {
    let mut argv = vec!["keynotes"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap()
}

#[tokio::test]
async fn test_version_runs() {
    let dir = TempDir::new().unwrap();
    run(cli(&["version"]), test_config(dir.path())).await.unwrap();
}

#[tokio::test]
async fn test_settings_set_persists() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());

    run(cli(&["settings", "set", "lock-timeout", "7"]), config.clone())
        .await
        .unwrap();
    run(cli(&["settings", "set", "auto-lock", "off"]), config.clone())
        .await
        .unwrap();
    run(cli(&["settings", "show"]), config.clone()).await.unwrap();

    let device = Device::open(&config.data_dir().unwrap()).await;
    let settings = device.settings.load().await.unwrap();
    assert_eq!(settings.lock_timeout, 7);
    assert!(!settings.auto_lock);

    let bad = run(cli(&["settings", "set", "lock-timeout", "never"]), config).await;
    assert!(bad.is_err());
}

#[tokio::test]
async fn test_sync_queue_and_login_without_credentials() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());

    run(cli(&["sync", "queue"]), config.clone()).await.unwrap();
    run(cli(&["sync", "queue", "--clear"]), config.clone())
        .await
        .unwrap();

    // No OAuth client configured: refused before any request is made.
    let login = run(cli(&["sync", "login", "--code", "abc"]), config).await;
    assert!(login.is_err());
}

#[tokio::test]
async fn test_vault_commands_end_to_end() {
    std::env::set_var(keynotes_core::env::vars::PASSWORD, PASSWORD);
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());

    run(cli(&["init"]), config.clone()).await.unwrap();
    assert!(run(cli(&["init"]), config.clone()).await.is_err());

    run(
        cli(&[
            "add", "password", "Mail", "--username", "a@b.com", "--password", "s3cr3t", "--tag",
            "personal",
        ]),
        config.clone(),
    )
    .await
    .unwrap();
    run(
        cli(&["add", "note", "todo", "--content", "buy milk"]),
        config.clone(),
    )
    .await
    .unwrap();
    run(cli(&["list", "--kind", "note"]), config.clone())
        .await
        .unwrap();

    let device = Device::open(&config.data_dir().unwrap()).await;
    device.engine.unlock(PASSWORD).await.unwrap();
    let entries = device.engine.get_entries().await.unwrap();
    device.engine.lock().await;
    assert_eq!(entries.len(), 2);
    let mail = entries
        .iter()
        .find(|e| e.kind() == EntryKind::Password)
        .unwrap();
    assert!(mail.tags.contains("personal"));

    run(cli(&["show", &mail.id]), config.clone()).await.unwrap();
    assert!(run(cli(&["show", "missing-id"]), config.clone())
        .await
        .is_err());

    let export = dir.path().join("vault.export");
    run(
        cli(&["export", "--output", export.to_str().unwrap()]),
        config.clone(),
    )
    .await
    .unwrap();

    run(cli(&["delete", &mail.id]), config.clone()).await.unwrap();
    device.engine.unlock(PASSWORD).await.unwrap();
    assert_eq!(device.engine.get_entries().await.unwrap().len(), 1);
    device.engine.lock().await;

    // Importing the export restores the deleted entry.
    run(cli(&["import", export.to_str().unwrap()]), config.clone())
        .await
        .unwrap();
    let reopened = Device::open(&config.data_dir().unwrap()).await;
    reopened.engine.unlock(PASSWORD).await.unwrap();
    assert_eq!(reopened.engine.get_entries().await.unwrap().len(), 2);

    // A vault under another password is refused with a typed error.
    let other = TempDir::new().unwrap();
    let other_config = test_config(other.path());
    let foreign = Device::open(&other_config.data_dir().unwrap()).await;
    foreign.engine.unlock("someone-else").await.unwrap();
    foreign.engine.lock().await;
    let err = run(cli(&["list"]), other_config).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<VaultError>(),
        Some(VaultError::WrongPassword)
    ));
}
