//! Configuration management
//!
//! Handles application settings, preferences, and the on-disk config file.
//! Files may be TOML or JSON, chosen by extension; missing keys fall back
//! to their defaults.

use crate::error::{ConfigError, SettingsError, SettingsResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// USB vendor ids of common USB-to-serial bridges
///
/// QinHeng (CH340), FTDI, Silicon Labs (CP210x), Prolific.
pub const DEFAULT_VENDOR_IDS: [u16; 4] = [0x1a86, 0x0403, 0x10c4, 0x067b];

/// Serial link settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Previously authorized port; tried before any discovery
    pub port: Option<String>,
    /// Baud rate
    pub baud_rate: u32,
    /// USB vendor ids accepted when discovering a port
    pub vendor_ids: Vec<u16>,
    /// Upper bound on waiting for the read loop during disconnect
    pub disconnect_timeout_ms: u64,
    /// Size of each device read
    pub read_chunk_size: usize,
    /// Connect at startup
    pub auto_connect: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115200,
            vendor_ids: DEFAULT_VENDOR_IDS.to_vec(),
            disconnect_timeout_ms: 5000,
            read_chunk_size: 1024,
            auto_connect: true,
        }
    }
}

/// Tracked command settings
///
/// The timeouts here apply only until the controller reports its own
/// values in a settings snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    /// Timeout for ordinary commands
    pub default_timeout_ms: u64,
    /// Timeout for homing-class commands
    pub homing_timeout_ms: u64,
    /// Slack added on top of either timeout
    pub timeout_buffer_ms: u64,
    /// Largest correlation id before wrapping back to 1
    pub id_ceiling: u32,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: 10000,
            homing_timeout_ms: 10000,
            timeout_buffer_ms: 1000,
            id_ceiling: 999_999,
        }
    }
}

/// Debug log settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Number of entries kept
    pub capacity: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            capacity: laserdeck_core::DEFAULT_LOG_CAPACITY,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial link
    pub connection: ConnectionSettings,
    /// Tracked commands
    pub commands: CommandSettings,
    /// Debug log
    pub log: LogSettings,
}

enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> SettingsResult<Format> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        other => Err(ConfigError::UnsupportedFormat(other.unwrap_or("").to_string()).into()),
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config file location (`<config dir>/laserdeck/config.toml`)
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("laserdeck").join("config.toml"))
            .ok_or_else(|| {
                SettingsError::ConfigDirectory("could not determine config directory".to_string())
            })
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = format_of(path)?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::LoadError(format!("{}: {}", path.display(), e)))?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load config from `path`, or defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match format_of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SettingsError::ConfigDirectory(e.to_string()))?;
            }
        }

        std::fs::write(path, content)
            .map_err(|e| SettingsError::SaveError(format!("{}: {}", path.display(), e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let connection = &self.connection;
        if connection.baud_rate == 0 {
            return Err(ConfigError::out_of_range(
                "connection.baud_rate",
                connection.baud_rate,
            ));
        }
        if connection.disconnect_timeout_ms == 0 {
            return Err(ConfigError::out_of_range(
                "connection.disconnect_timeout_ms",
                connection.disconnect_timeout_ms,
            ));
        }
        if connection.read_chunk_size == 0 {
            return Err(ConfigError::out_of_range(
                "connection.read_chunk_size",
                connection.read_chunk_size,
            ));
        }
        if matches!(&connection.port, Some(port) if port.trim().is_empty()) {
            return Err(ConfigError::out_of_range("connection.port", "\"\""));
        }

        let commands = &self.commands;
        if commands.default_timeout_ms == 0 {
            return Err(ConfigError::out_of_range(
                "commands.default_timeout_ms",
                commands.default_timeout_ms,
            ));
        }
        if commands.homing_timeout_ms == 0 {
            return Err(ConfigError::out_of_range(
                "commands.homing_timeout_ms",
                commands.homing_timeout_ms,
            ));
        }
        if commands.id_ceiling < 2 {
            return Err(ConfigError::out_of_range(
                "commands.id_ceiling",
                commands.id_ceiling,
            ));
        }

        if self.log.capacity == 0 {
            return Err(ConfigError::out_of_range("log.capacity", self.log.capacity));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.connection.baud_rate, 115200);
        assert_eq!(config.connection.vendor_ids, vec![0x1a86, 0x0403, 0x10c4, 0x067b]);
        assert_eq!(config.connection.disconnect_timeout_ms, 5000);
        assert_eq!(config.commands.timeout_buffer_ms, 1000);
        assert_eq!(config.commands.id_ceiling, 999_999);
        assert_eq!(config.log.capacity, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        config.connection.baud_rate = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValueOutOfRange { ref key, .. }) if key == "connection.baud_rate"
        ));

        let mut config = Config::default();
        config.commands.id_ceiling = 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.connection.port = Some("  ".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [connection]
            port = "/dev/ttyUSB0"

            [commands]
            homing_timeout_ms = 30000
            "#,
        )
        .expect("parse");

        assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.connection.baud_rate, 115200);
        assert_eq!(config.commands.homing_timeout_ms, 30000);
        assert_eq!(config.commands.default_timeout_ms, 10000);
    }

    #[test]
    fn test_default_path_file_name() {
        if let Ok(path) = Config::default_path() {
            assert!(path.ends_with("laserdeck/config.toml"));
        }
    }
}
