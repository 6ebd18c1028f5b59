use ssp::config::*;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_default_config() {
    let config = AppConfig::default();
    assert_eq!(config.server.bind_address, "0.0.0.0");
    assert_eq!(config.server.port, 443);
    assert_eq!(config.server.peek_timeout(), Duration::from_secs(5));
    assert_eq!(config.server.max_hello_bytes, 65536);
    assert_eq!(config.server.max_connections, 10_000);
    assert!(!config.stats.enabled);
    assert_eq!(config.stats.path, "/health");
    assert_eq!(config.logging.level, "info");
    assert!(config.logging.rotation);
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_from_toml() {
    let toml_content = r#"
[server]
bind_address = "127.0.0.1"
port = 8443
peek_timeout_ms = 2500

[stats]
enabled = true
port = 9191

[logging]
level = "debug"
json = true
"#;

    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(toml_content.as_bytes()).unwrap();

    let config = AppConfig::from_file(temp_file.path()).unwrap();
    assert_eq!(config.server.bind_addr(), "127.0.0.1:8443");
    assert_eq!(config.server.peek_timeout(), Duration::from_millis(2500));
    // Unset fields keep their defaults
    assert_eq!(config.server.max_connections, 10_000);
    assert!(config.stats.enabled);
    assert_eq!(config.stats.port, 9191);
    assert_eq!(config.stats.bind_address, "127.0.0.1");
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json);
    assert!(config.validate().is_ok());
}

#[test]
fn test_invalid_toml_is_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[server\nport = ").unwrap();
    assert!(AppConfig::from_file(temp_file.path()).is_err());
}

#[test]
fn test_load_or_default_missing_file() {
    let config = AppConfig::load_or_default("/nonexistent/ssp/config.toml");
    assert_eq!(config.server.port, 443);
}

#[test]
fn test_port_override() {
    let mut config = AppConfig::default();
    config.apply_port_override(Some("8443")).unwrap();
    assert_eq!(config.server.port, 8443);

    config.apply_port_override(None).unwrap();
    config.apply_port_override(Some("  ")).unwrap();
    assert_eq!(config.server.port, 8443);

    assert!(config.apply_port_override(Some("https")).is_err());
    assert!(config.apply_port_override(Some("70000")).is_err());
}

#[test]
fn test_validate_rejects_bad_values() {
    let mut config = AppConfig::default();
    config.server.port = 0;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.server.peek_timeout_ms = 0;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.server.max_hello_bytes = 100;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.server.max_connections = 0;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.stats.enabled = true;
    config.stats.path = "health".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_rejects_stats_on_proxy_address() {
    let mut config = AppConfig::default();
    config.stats.enabled = true;
    config.stats.bind_address = config.server.bind_address.clone();
    config.stats.port = config.server.port;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("conflicts"));

    // Disabled stats never conflict
    config.stats.enabled = false;
    assert!(config.validate().is_ok());
}
