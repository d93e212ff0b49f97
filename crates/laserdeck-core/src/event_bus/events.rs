//! Event type definitions for the event bus.
//!
//! Events are organized by category and are cloneable and serializable
//! so collaborators can log or replay them.

use serde::{Deserialize, Serialize};

use crate::data::{AlarmState, ConnectionState, LaserState};

/// Root event enum for all application events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AppEvent {
    /// Serial link lifecycle
    Connection(ConnectionEvent),
    /// Motion controller state
    Machine(MachineEvent),
    /// Tracked command lifecycle
    Command(CommandEvent),
    /// Controller configuration
    Settings(SettingsEvent),
    /// User-visible notification
    Notification(Notification),
}

impl AppEvent {
    /// Get the category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            AppEvent::Connection(_) => EventCategory::Connection,
            AppEvent::Machine(_) => EventCategory::Machine,
            AppEvent::Command(_) => EventCategory::Command,
            AppEvent::Settings(_) => EventCategory::Settings,
            AppEvent::Notification(_) => EventCategory::Notification,
        }
    }

    /// Get a short description of this event for logging
    pub fn description(&self) -> String {
        match self {
            AppEvent::Connection(e) => e.description(),
            AppEvent::Machine(e) => e.description(),
            AppEvent::Command(e) => e.description(),
            AppEvent::Settings(e) => e.description(),
            AppEvent::Notification(n) => format!("{}: {}", n.title, n.message),
        }
    }
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Serial link events.
    Connection,
    /// Motion controller events.
    Machine,
    /// Tracked command events.
    Command,
    /// Controller configuration events.
    Settings,
    /// User-visible notifications.
    Notification,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::Connection => write!(f, "Connection"),
            EventCategory::Machine => write!(f, "Machine"),
            EventCategory::Command => write!(f, "Command"),
            EventCategory::Settings => write!(f, "Settings"),
            EventCategory::Notification => write!(f, "Notification"),
        }
    }
}

/// Serial link events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Connection state changed.
    StateChanged {
        /// Previous state.
        old: ConnectionState,
        /// New state.
        new: ConnectionState,
    },
    /// A device was opened.
    Opened {
        /// Device name.
        port: String,
    },
    /// A connect attempt failed.
    ConnectFailed {
        /// Error text.
        error: String,
    },
    /// The read loop did not release the device in time and it was force-closed.
    ForcedClose {
        /// Device name.
        port: String,
    },
}

impl ConnectionEvent {
    fn description(&self) -> String {
        match self {
            ConnectionEvent::StateChanged { old, new } => format!("Link: {} -> {}", old, new),
            ConnectionEvent::Opened { port } => format!("Opened {}", port),
            ConnectionEvent::ConnectFailed { error } => format!("Connect failed: {}", error),
            ConnectionEvent::ForcedClose { port } => format!("Force-closed {}", port),
        }
    }
}

/// Motion controller events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MachineEvent {
    /// Run state changed.
    StateChanged {
        /// Previous state.
        old: LaserState,
        /// New state.
        new: LaserState,
    },
    /// Alarm changed.
    AlarmChanged {
        /// New alarm.
        alarm: AlarmState,
    },
    /// Informational line from the controller.
    ControllerMessage {
        /// The message text.
        message: String,
    },
    /// Telemetry snapshot refreshed.
    TelemetryUpdated,
}

impl MachineEvent {
    fn description(&self) -> String {
        match self {
            MachineEvent::StateChanged { old, new } => format!("State: {} -> {}", old, new),
            MachineEvent::AlarmChanged { alarm } => format!("Alarm: {}", alarm),
            MachineEvent::ControllerMessage { message } => format!("Controller: {}", message),
            MachineEvent::TelemetryUpdated => "Telemetry updated".to_string(),
        }
    }
}

/// Tracked command events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CommandEvent {
    /// A command is awaiting acknowledgment.
    Tracked {
        /// Correlation id.
        id: u32,
        /// Command text.
        command: String,
    },
    /// The controller acknowledged a command.
    Acknowledged {
        /// Correlation id.
        id: u32,
        /// Whether the command succeeded.
        success: bool,
    },
    /// No acknowledgment arrived in time.
    TimedOut {
        /// Correlation id.
        id: u32,
        /// Command text.
        command: String,
    },
    /// The pending set went from empty to non-empty or back.
    PendingChanged {
        /// Whether anything is in flight.
        has_pending: bool,
    },
}

impl CommandEvent {
    fn description(&self) -> String {
        match self {
            CommandEvent::Tracked { id, command } => format!("Tracking #{}: {}", id, command),
            CommandEvent::Acknowledged { id, success } => {
                format!("Ack #{}: {}", id, if *success { "ok" } else { "failed" })
            }
            CommandEvent::TimedOut { id, command } => format!("Timeout #{}: {}", id, command),
            CommandEvent::PendingChanged { has_pending } => {
                format!("Pending commands: {}", has_pending)
            }
        }
    }
}

/// Controller configuration events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SettingsEvent {
    /// A snapshot was merged into the local model.
    Loaded,
}

impl SettingsEvent {
    fn description(&self) -> String {
        match self {
            SettingsEvent::Loaded => "Settings loaded".to_string(),
        }
    }
}

/// Visual weight of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Success,
    Danger,
    Warning,
    Info,
}

/// A user-visible notification (toast)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub severity: Severity,
}

impl Notification {
    /// Create a notification
    pub fn new(title: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity,
        }
    }

    /// Create a danger notification
    pub fn danger(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(title, message, Severity::Danger)
    }
}
