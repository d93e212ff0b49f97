//! LaserDeck Settings Crate
//!
//! Application configuration: which serial port to use, how long tracked
//! commands may stay in flight, and how much traffic the debug log keeps.

pub mod config;
pub mod error;

pub use config::{CommandSettings, Config, ConnectionSettings, LogSettings, DEFAULT_VENDOR_IDS};
pub use error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
