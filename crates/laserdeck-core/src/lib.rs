//! # LaserDeck Core
//!
//! Core types shared by every LaserDeck crate: the error taxonomy, the
//! connection state, the controller models fed by inbound messages, the
//! bounded traffic log, and the event bus.

pub mod data;
pub mod error;
pub mod event_bus;
pub mod log;

pub use data::{
    AlarmState, ConnectionState, ControllerModel, ControllerSettings, LaserState, MachineStatus,
    Merge, Position, PositionKind, SettingsModel, Telemetry,
};

pub use error::{CommandError, ConnectionError, Error, ProtocolError, Result};

pub use event_bus::{
    AppEvent, CommandEvent, ConnectionEvent, EventBus, EventCategory, EventFilter, MachineEvent,
    Notification, Notifications, SettingsEvent, Severity, SubscriptionId,
};

pub use log::{LogBuffer, LogEntry, LogKind, DEFAULT_LOG_CAPACITY};
