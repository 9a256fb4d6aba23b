//! Driver configuration management

use crate::registry::DEFAULT_MAX_FILES;
use crate::session::SessionOptions;
use crate::usb::{HostSettings, TransportOptions};
use anyhow::{Context, Result, anyhow};
use protocol::{DEFAULT_DELETE_KEY, KeyCode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default)]
    pub driver: DriverSettings,
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub keypad: KeypadSettings,
    #[serde(default)]
    pub display: DisplaySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSettings {
    #[serde(default = "DriverSettings::default_log_level")]
    pub log_level: String,
    /// Number of minor numbers handed out to attached devices
    #[serde(default = "DriverSettings::default_max_files")]
    pub max_files: u32,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            max_files: Self::default_max_files(),
        }
    }
}

impl DriverSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_max_files() -> u32 {
        DEFAULT_MAX_FILES
    }
}

/// Which USB device to bind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Vendor ID, hex with `0x` prefix
    #[serde(default = "DeviceSettings::default_vendor_id")]
    pub vendor_id: String,
    /// Product ID, hex with `0x` prefix
    #[serde(default = "DeviceSettings::default_product_id")]
    pub product_id: String,
    #[serde(default)]
    pub interface: u8,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            vendor_id: Self::default_vendor_id(),
            product_id: Self::default_product_id(),
            interface: 0,
        }
    }
}

impl DeviceSettings {
    fn default_vendor_id() -> String {
        "0x04d8".to_string()
    }

    fn default_product_id() -> String {
        "0x00bd".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeypadSettings {
    /// Key that erases the previous character instead of being echoed
    #[serde(default = "KeypadSettings::default_delete_key")]
    pub delete_key: String,
    /// How long one interrupt IN read waits before polling again
    #[serde(default = "KeypadSettings::default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for KeypadSettings {
    fn default() -> Self {
        Self {
            delete_key: Self::default_delete_key(),
            poll_interval_ms: Self::default_poll_interval(),
        }
    }
}

impl KeypadSettings {
    fn default_delete_key() -> String {
        char::from(DEFAULT_DELETE_KEY.0).to_string()
    }

    fn default_poll_interval() -> u64 {
        250
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplaySettings {
    /// Bulk OUT timeout
    #[serde(default = "DisplaySettings::default_write_timeout")]
    pub write_timeout_ms: u64,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            write_timeout_ms: Self::default_write_timeout(),
        }
    }
}

impl DisplaySettings {
    fn default_write_timeout() -> u64 {
        1000
    }
}

impl DriverConfig {
    /// Load configuration from file
    ///
    /// Without an explicit path, the user config directory and then
    /// `/etc/botodisp/driver.toml` are tried.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/botodisp/driver.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: DriverConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("botodisp").join("driver.toml")
        } else {
            PathBuf::from(".config/botodisp/driver.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.driver.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.driver.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.driver.max_files == 0 {
            return Err(anyhow!("max_files must be greater than 0"));
        }

        Self::parse_hex_id(&self.device.vendor_id, "vendor_id")?;
        Self::parse_hex_id(&self.device.product_id, "product_id")?;
        Self::parse_delete_key(&self.keypad.delete_key)?;

        if self.keypad.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be greater than 0"));
        }

        Ok(())
    }

    /// Parse a hex ID such as `0x04d8`
    fn parse_hex_id(id: &str, name: &str) -> Result<u16> {
        let Some(hex_part) = id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) else {
            return Err(anyhow!(
                "Invalid {} '{}', must start with '0x' (e.g., '0x04d8')",
                name,
                id
            ));
        };

        if hex_part.is_empty() || hex_part.len() > 4 {
            return Err(anyhow!(
                "Invalid {} '{}', hex part must be 1-4 digits",
                name,
                id
            ));
        }

        u16::from_str_radix(hex_part, 16)
            .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))
    }

    fn parse_delete_key(key: &str) -> Result<KeyCode> {
        match key.as_bytes() {
            [byte] if byte.is_ascii() => Ok(KeyCode(*byte)),
            _ => Err(anyhow!(
                "Invalid delete_key '{}', must be a single ASCII character",
                key
            )),
        }
    }

    pub fn session_options(&self) -> Result<SessionOptions> {
        Ok(SessionOptions {
            delete_key: Self::parse_delete_key(&self.keypad.delete_key)?,
        })
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            write_timeout: Duration::from_millis(self.display.write_timeout_ms),
            poll_interval: Duration::from_millis(self.keypad.poll_interval_ms),
        }
    }

    pub fn host_settings(&self) -> Result<HostSettings> {
        Ok(HostSettings {
            vendor_id: Self::parse_hex_id(&self.device.vendor_id, "vendor_id")?,
            product_id: Self::parse_hex_id(&self.device.product_id, "product_id")?,
            interface: self.device.interface,
            transport: self.transport_options(),
        })
    }
}

/// Load configuration from a path that may start with `~`
pub fn load_config(path: &str) -> Result<DriverConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    DriverConfig::load(Some(path_buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DriverConfig::default();
        assert_eq!(config.driver.log_level, "info");
        assert_eq!(config.driver.max_files, 20);
        assert_eq!(config.keypad.delete_key, "F");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_host_settings() {
        let settings = DriverConfig::default().host_settings().unwrap();
        assert_eq!(settings.vendor_id, 0x04d8);
        assert_eq!(settings.product_id, 0x00bd);
        assert_eq!(settings.interface, 0);
        assert_eq!(settings.transport.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_parse_hex_id() {
        assert_eq!(DriverConfig::parse_hex_id("0x04d8", "VID").unwrap(), 0x04d8);
        assert_eq!(DriverConfig::parse_hex_id("0XBD", "PID").unwrap(), 0xbd);
        assert!(DriverConfig::parse_hex_id("04d8", "VID").is_err());
        assert!(DriverConfig::parse_hex_id("0x", "VID").is_err());
        assert!(DriverConfig::parse_hex_id("0x12345", "VID").is_err());
        assert!(DriverConfig::parse_hex_id("0xGHIJ", "VID").is_err());
    }

    #[test]
    fn test_delete_key_validation() {
        let mut config = DriverConfig::default();
        config.keypad.delete_key = "D".to_string();
        assert_eq!(config.session_options().unwrap().delete_key, KeyCode(b'D'));

        config.keypad.delete_key = "DEL".to_string();
        assert!(config.validate().is_err());

        config.keypad.delete_key = "é".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = DriverConfig::default();
        config.driver.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = DriverConfig::default();
        config.driver.max_files = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: DriverConfig = toml::from_str(
            r#"
            [keypad]
            delete_key = "C"
            "#,
        )
        .unwrap();
        assert_eq!(config.keypad.delete_key, "C");
        assert_eq!(config.keypad.poll_interval_ms, 250);
        assert_eq!(config.device.vendor_id, "0x04d8");
        assert_eq!(config.display.write_timeout_ms, 1000);
    }
}
