//! Config save/load roundtrip integration tests.

use keynotes_core::config::{ConfigBuilder, LogFormat, LogLevel};
use keynotes_core::{Config, ConfigError, SecretString};
use std::path::Path;
use tempfile::TempDir;

#[test]
fn test_config_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("keynotes.json5");

    let config = Config::default();
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.sync.api_base, config.sync.api_base);
    assert_eq!(loaded.sync.sync_interval_secs, 300);
    assert_eq!(loaded.sync.heartbeat_interval_secs, 30);
    assert_eq!(loaded.sync.max_retries, 3);
    assert_eq!(loaded.auto_lock.tick_secs, 60);
    assert_eq!(loaded.auto_lock.grace_millis, 1000);
    assert!(loaded.validate().is_ok());
}

#[test]
fn test_config_modify_and_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("keynotes.json5");

    let mut config = ConfigBuilder::new()
        .data_dir(dir.path().join("vault"))
        .api_base("https://sync.example.com/api")
        .push_url("wss://sync.example.com/ws")
        .sync_interval_secs(60)
        .log_level(LogLevel::Debug)
        .build_validated()
        .unwrap();
    config.sync.client_id = Some("desktop".to_string());
    config.sync.client_secret = Some(SecretString::new("shh"));
    config.logging.format = LogFormat::Json;
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.data_dir().unwrap(), dir.path().join("vault"));
    assert_eq!(loaded.sync.api_base, "https://sync.example.com/api");
    assert_eq!(loaded.sync.push_url.as_deref(), Some("wss://sync.example.com/ws"));
    assert_eq!(loaded.sync.sync_interval_secs, 60);
    assert_eq!(loaded.sync.client_id.as_deref(), Some("desktop"));
    assert_eq!(
        loaded.sync.client_secret.as_ref().map(|s| s.expose_secret()),
        Some("shh")
    );
    assert_eq!(loaded.logging.level, LogLevel::Debug);
    assert_eq!(loaded.logging.format, LogFormat::Json);
}

#[test]
fn test_config_parse_json5() {
    let config = Config::parse(
        r#"{
            // comments and trailing commas are fine
            sync: { api_base: "https://a.example/api", max_retries: 5, },
            auto_lock: { tick_secs: 10 },
        }"#,
    )
    .unwrap();
    assert_eq!(config.sync.api_base, "https://a.example/api");
    assert_eq!(config.sync.max_retries, 5);
    assert_eq!(config.sync.heartbeat_interval_secs, 30);
    assert_eq!(config.auto_lock.tick_secs, 10);
    assert_eq!(config.auto_lock.grace_millis, 1000);
}

#[test]
fn test_config_validation_collects_errors() {
    let mut config = Config::default();
    config.sync.api_base = "ftp://nope".to_string();
    config.sync.max_retries = 0;
    config.sync.client_id = Some("only-id".to_string());

    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains("api_base"));
    assert!(err.contains("max_retries"));
    assert!(err.contains("client_secret"));
}

#[test]
fn test_config_load_nonexistent() {
    let result = Config::load(Path::new("/nonexistent/keynotes.json5"));
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}

#[test]
fn test_config_parse_invalid() {
    assert!(Config::parse("not valid json").is_err());
}
