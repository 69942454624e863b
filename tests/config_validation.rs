//! Integration tests for configuration validation

#![allow(clippy::expect_used)]

use remoting_protocol::config::RemotingConfig;
use std::time::Duration;

#[test]
fn test_default_config_validates() {
    let config = RemotingConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_invalid_server_address() {
    let mut config = RemotingConfig::default();
    config.server.address = "invalid_address".to_string();

    let errors = config.validate();
    assert!(!errors.is_empty(), "Should have validation errors");
    assert!(errors.iter().any(|e| e.contains("Invalid server address")));
}

#[test]
fn test_empty_server_address() {
    let mut config = RemotingConfig::default();
    config.server.address = String::new();

    let errors = config.validate();
    assert!(!errors.is_empty());
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_zero_async_permits() {
    let mut config = RemotingConfig::default();
    config.server.async_permits = 0;

    let errors = config.validate();
    assert!(!errors.is_empty());
    assert!(errors
        .iter()
        .any(|e| e.contains("Async permit count must be greater than 0")));
}

#[test]
fn test_excessive_async_permits() {
    let mut config = RemotingConfig::default();
    config.server.async_permits = 2_000_000;

    let errors = config.validate();
    assert!(!errors.is_empty());
    assert!(errors.iter().any(|e| e.contains("Async permit count too large")));
}

#[test]
fn test_short_idle_timeout() {
    let mut config = RemotingConfig::default();
    config.server.max_idle = Duration::from_millis(50);

    let errors = config.validate();
    assert!(!errors.is_empty());
    assert!(errors.iter().any(|e| e.contains("Idle timeout too short")));
}

#[test]
fn test_short_connect_timeout() {
    let mut config = RemotingConfig::default();
    config.client.connect_timeout = Duration::from_millis(10);

    let errors = config.validate();
    assert!(!errors.is_empty());
    assert!(errors
        .iter()
        .any(|e| e.contains("Connect timeout too short")));
}

#[test]
fn test_validate_strict_rejects_bad_config() {
    let mut config = RemotingConfig::default();
    config.client.address = String::new();

    assert!(config.validate_strict().is_err());
}

#[test]
fn test_example_config_roundtrips() {
    let example = RemotingConfig::example_config();
    let parsed = RemotingConfig::from_toml(&example).expect("example config must parse");
    assert!(parsed.validate().is_empty());
}

#[test]
fn test_toml_overrides_defaults() {
    let config = RemotingConfig::from_toml(
        r#"
        [server]
        address = "0.0.0.0:9100"
        backlog = 256
        async_permits = 16
        oneway_permits = 32
        callback_concurrency = 2
        max_idle = 30000
        enable_tls = false

        [client]
        address = "127.0.0.1:9100"
        connect_timeout = 1500
        async_permits = 100
        oneway_permits = 100
        callback_concurrency = 2
        max_idle = 30000
        enable_tls = false
        "#,
    )
    .expect("config must parse");

    assert_eq!(config.server.address, "0.0.0.0:9100");
    assert_eq!(config.server.async_permits, 16);
    assert_eq!(config.client.connect_timeout, Duration::from_millis(1500));
    assert!(config.validate().is_empty());
}
