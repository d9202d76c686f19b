use crate::config::ForwarderConfig;
use crate::forwarder::RetryPolicy;
use crate::Error;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_default_config() {
    let config = ForwarderConfig::default();
    assert_eq!(config.retry_attempts, 5);
    assert_eq!(config.retry_delay_ms, 5_000);
    assert_eq!(config.search_timeout_ms, 5_000);
    assert_eq!(config.search_interval_ms, 10_000);
    assert_eq!(config.retry_policy(), RetryPolicy::default());
}

#[test]
fn test_save_and_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("forwarder.json");

    let config = ForwarderConfig {
        retry_attempts: 3,
        retry_delay_ms: 250,
        ..ForwarderConfig::default()
    };
    config.save(&path).unwrap();

    let loaded = ForwarderConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_load_missing_file_gives_defaults() {
    let dir = tempdir().unwrap();
    let loaded = ForwarderConfig::load(dir.path().join("absent.json")).unwrap();
    assert_eq!(loaded, ForwarderConfig::default());
}

#[test]
fn test_load_empty_file_gives_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("forwarder.json");
    std::fs::write(&path, "  \n").unwrap();
    assert_eq!(ForwarderConfig::load(&path).unwrap(), ForwarderConfig::default());
}

#[test]
fn test_load_partial_file_fills_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("forwarder.json");
    std::fs::write(&path, r#"{ "retry_attempts": 2 }"#).unwrap();

    let loaded = ForwarderConfig::load(&path).unwrap();
    assert_eq!(loaded.retry_attempts, 2);
    assert_eq!(loaded.retry_delay_ms, 5_000);
    assert_eq!(loaded.search_interval_ms, 10_000);
}

#[test]
fn test_load_invalid_json_is_config_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("forwarder.json");
    std::fs::write(&path, "{ not json").unwrap();

    let result = ForwarderConfig::load(&path);
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_retry_policy_from_config() {
    let config = ForwarderConfig {
        retry_attempts: 7,
        retry_delay_ms: 1_500,
        ..ForwarderConfig::default()
    };
    let policy = config.retry_policy();
    assert_eq!(policy.max_attempts, 7);
    assert_eq!(policy.delay, Duration::from_millis(1_500));
}
