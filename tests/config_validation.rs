//! Integration tests for configuration validation

#![allow(clippy::expect_used)]

use realm_core::config::{CoreConfig, LoggingConfig, PacketConfig, ServerConfig};
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = CoreConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_invalid_server_address() {
    let mut config = CoreConfig::default();
    config.server.address = "not-an-ip".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid server address")));
}

#[test]
fn test_empty_server_address() {
    let mut config = CoreConfig::default();
    config.server.address = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_zero_max_connections() {
    let config = CoreConfig::default_with_overrides(|c| {
        c.server.max_connections = 0;
        c.server.max_connections_per_ip = 0;
    });
    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Max connections must be greater than 0")));
}

#[test]
fn test_per_ip_limit_above_total() {
    let config = CoreConfig::default_with_overrides(|c| {
        c.server.max_connections = 4;
        c.server.max_connections_per_ip = 10;
    });
    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Per-IP connection limit")));
}

#[test]
fn test_receive_buffer_bounds() {
    let mut server = ServerConfig {
        recv_buffer_size: 16,
        ..ServerConfig::default()
    };
    assert!(server.validate().iter().any(|e| e.contains("too small")));

    server.recv_buffer_size = 4 * 1024 * 1024;
    assert!(server.validate().iter().any(|e| e.contains("too large")));
}

#[test]
fn test_zero_send_queue_depth() {
    let server = ServerConfig {
        send_queue_depth: 0,
        ..ServerConfig::default()
    };
    assert!(server
        .validate()
        .iter()
        .any(|e| e.contains("Send queue depth")));
}

#[test]
fn test_excessive_durations() {
    let server = ServerConfig {
        accept_backoff: Duration::from_secs(30),
        shutdown_grace: Duration::from_secs(120),
        ..ServerConfig::default()
    };
    let errors = server.validate();
    assert!(errors.iter().any(|e| e.contains("Accept backoff too long")));
    assert!(errors.iter().any(|e| e.contains("grace period too long")));
}

#[test]
fn test_packet_buffer_capacity_bounds() {
    let packet = PacketConfig {
        buffer_capacity: 8,
        ..PacketConfig::default()
    };
    assert!(packet.validate().iter().any(|e| e.contains("too small")));

    let packet = PacketConfig {
        buffer_capacity: 1 << 20,
        ..PacketConfig::default()
    };
    assert!(packet
        .validate()
        .iter()
        .any(|e| e.contains("exceeds the largest message")));
}

#[test]
fn test_empty_app_name() {
    let logging = LoggingConfig {
        app_name: String::new(),
        ..LoggingConfig::default()
    };
    assert!(logging.validate().iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_validate_strict_collects_errors() {
    let config = CoreConfig::default_with_overrides(|c| {
        c.server.address = String::new();
        c.logging.app_name = String::new();
    });
    let err = config.validate_strict().expect_err("should fail");
    let message = err.to_string();
    assert!(message.contains("Server address cannot be empty"));
    assert!(message.contains("Application name cannot be empty"));
}

#[test]
fn test_toml_overrides_and_durations() {
    let config = CoreConfig::from_toml(
        r#"
        [server]
        port = 9100
        max_connections = 32
        max_connections_per_ip = 2
        accept_backoff = 250

        [logging]
        log_level = "debug"
        json_format = true
        "#,
    )
    .expect("parse");

    assert_eq!(config.server.port, 9100);
    assert_eq!(config.server.max_connections, 32);
    assert_eq!(config.server.max_connections_per_ip, 2);
    assert_eq!(config.server.accept_backoff, Duration::from_millis(250));
    assert_eq!(config.server.address, "0.0.0.0");
    assert_eq!(config.logging.log_level, Level::DEBUG);
    assert!(config.logging.json_format);
    assert!(config.validate().is_empty());
}

#[test]
fn test_invalid_toml_is_config_error() {
    let err = CoreConfig::from_toml("[server]\nport = \"eighty\"").expect_err("type mismatch");
    assert!(err.to_string().contains("Failed to parse TOML"));
}

#[test]
fn test_save_and_load_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("realm.toml");

    let config = CoreConfig::default_with_overrides(|c| {
        c.server.port = 6000;
        c.packet.pool_buffers = 3;
    });
    config.save_to_file(&path).expect("save");

    let loaded = CoreConfig::from_file(&path).expect("load");
    assert_eq!(loaded.server.port, 6000);
    assert_eq!(loaded.packet.pool_buffers, 3);
    assert_eq!(loaded.server.shutdown_grace, config.server.shutdown_grace);
}

#[test]
fn test_missing_file_is_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = CoreConfig::from_file(dir.path().join("absent.toml")).expect_err("missing");
    assert!(err.to_string().contains("Failed to read config file"));
}
