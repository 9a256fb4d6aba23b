//! Configuration file tests
//!
//! Run with: `cargo test -p driver --test config_tests`

use driver::config::{DriverConfig, load_config};
use protocol::KeyCode;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("driver.toml");

    let mut config = DriverConfig::default();
    config.driver.max_files = 4;
    config.keypad.delete_key = "D".to_string();
    config.display.write_timeout_ms = 250;
    config.save(&path).unwrap();

    let loaded = DriverConfig::load(Some(path)).unwrap();
    assert_eq!(loaded.driver.max_files, 4);
    assert_eq!(loaded.session_options().unwrap().delete_key, KeyCode(b'D'));
    assert_eq!(
        loaded.transport_options().write_timeout,
        Duration::from_millis(250)
    );
}

#[test]
fn test_load_custom_device() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("driver.toml");
    fs::write(
        &path,
        r#"
[driver]
log_level = "debug"

[device]
vendor_id = "0x1209"
product_id = "0x0001"
interface = 1
"#,
    )
    .unwrap();

    let config = load_config(path.to_str().unwrap()).unwrap();
    let settings = config.host_settings().unwrap();
    assert_eq!(config.driver.log_level, "debug");
    assert_eq!(settings.vendor_id, 0x1209);
    assert_eq!(settings.product_id, 0x0001);
    assert_eq!(settings.interface, 1);
    assert_eq!(config.driver.max_files, 20);
}

#[test]
fn test_load_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("driver.toml");
    fs::write(
        &path,
        r#"
[device]
vendor_id = "04d8"
"#,
    )
    .unwrap();

    let err = DriverConfig::load(Some(path)).unwrap_err();
    assert!(format!("{:#}", err).contains("vendor_id"));
}

#[test]
fn test_load_rejects_malformed_toml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("driver.toml");
    fs::write(&path, "[driver\nlog_level = ").unwrap();

    assert!(DriverConfig::load(Some(path)).is_err());
}

#[test]
fn test_load_missing_file() {
    let dir = TempDir::new().unwrap();
    assert!(DriverConfig::load(Some(dir.path().join("absent.toml"))).is_err());
}
