//! # LaserDeck
//!
//! Control panel core for GRBL/FluidNC laser controllers reached over a
//! USB serial link. The controller speaks newline-delimited JSON; this
//! workspace owns the link to it:
//! - Device acquisition and the connection lifecycle
//! - Framing of the inbound byte stream
//! - Outbound encoding with correlation ids
//! - Dispatch of inbound messages into shared models
//! - Acknowledgment tracking with per-command timeouts
//!
//! ## Architecture
//!
//! 1. **laserdeck-core** - Errors, models, traffic log, event bus
//! 2. **laserdeck-settings** - Application configuration
//! 3. **laserdeck-communication** - Devices, protocol, link, tracker, service
//! 4. **laserdeck** - This crate: logging setup and a headless console

pub mod console;

pub use laserdeck_communication::{
    list_ports, LoopbackDevice, LoopbackProvider, OutgoingCommand, RelaysPatch, SerialDevice,
    SerialDeviceProvider, SerialPortInfo, SerialService,
};
pub use laserdeck_core::{
    AppEvent, ConnectionError, ConnectionState, ControllerModel, Error, EventBus, LogEntry,
    Notification, Result, Severity,
};
pub use laserdeck_settings::Config;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration
///
/// Honors `RUST_LOG`; INFO is always enabled.
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_names(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
