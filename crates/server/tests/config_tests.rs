//! Integration tests for configuration parsing
//!
//! Tests server configuration parsing, including:
//! - Minimal and full config files
//! - Defaults for omitted fields and sections
//! - Invalid configuration handling
//! - Save/load through the filesystem

use server::config::{ServerConfig, load_config};
use server::ServerOptions;
use std::time::Duration;
use tempfile::tempdir;

const MINIMAL_SERVER_CONFIG: &str = r#"
[server]
log_level = "info"
"#;

const FULL_SERVER_CONFIG: &str = r#"
[server]
bind_addr = "127.0.0.1:13240"
log_level = "debug"
verbose = true

[device]
present_pulse_ms = 250
reset_pulse_ms = 20
loopback = false
"#;

fn parse(content: &str) -> ServerConfig {
    toml::from_str(content).unwrap()
}

#[test]
fn test_minimal_config_uses_defaults() {
    let config = parse(MINIMAL_SERVER_CONFIG);
    assert_eq!(config, ServerConfig::default());
    assert!(config.validate().is_ok());
}

#[test]
fn test_empty_config_uses_defaults() {
    let config = parse("");
    assert_eq!(config.server.bind_addr, "0.0.0.0:3240");
    assert!(config.device.loopback);
}

#[test]
fn test_full_config() {
    let config = parse(FULL_SERVER_CONFIG);
    assert!(config.validate().is_ok());
    assert_eq!(config.server.log_level, "debug");
    assert!(config.server.verbose);
    assert!(!config.device.loopback);

    let options = ServerOptions::from_config(&config).unwrap();
    assert_eq!(options.bind_addr, "127.0.0.1:13240".parse().unwrap());
    assert_eq!(options.present_pulse, Duration::from_millis(250));
    assert_eq!(options.reset_pulse, Duration::from_millis(20));
    assert!(options.verbose);
}

#[test]
fn test_wrong_type_is_rejected() {
    let result: Result<ServerConfig, _> = toml::from_str("[device]\nloopback = \"yes\"\n");
    assert!(result.is_err());
}

#[test]
fn test_load_rejects_invalid_values() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("server.toml");
    std::fs::write(&path, "[server]\nlog_level = \"loud\"\n").unwrap();

    let err = ServerConfig::load(Some(path)).unwrap_err();
    assert!(format!("{:#}", err).contains("Invalid log level"));
}

#[test]
fn test_load_missing_file_fails() {
    let dir = tempdir().unwrap();
    assert!(ServerConfig::load(Some(dir.path().join("absent.toml"))).is_err());
}

#[test]
fn test_save_and_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("server.toml");

    let mut config = ServerConfig::default();
    config.server.bind_addr = "127.0.0.1:5000".to_string();
    config.device.reset_pulse_ms = 75;
    config.save(&path).unwrap();

    let loaded = load_config(path.to_str().unwrap()).unwrap();
    assert_eq!(loaded, config);
}
