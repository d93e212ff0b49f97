//! Data models shared between the link layer and its collaborators
//!
//! This module provides:
//! - Connection state of the serial link
//! - Motion controller status (state, alarm, positions, feed)
//! - Sensor and relay telemetry
//! - The controller configuration tree and its merge rules
//! - [`ControllerModel`], the bundle handed to the dispatcher and the UI

pub mod machine;
pub mod settings;
pub mod telemetry;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub use machine::{
    ActiveAccessories, ActivePins, AlarmState, BufferState, LaserState, MachineStatus,
    PositionKind,
};
pub use settings::{
    BedControlMode, BedSettings, ControllerSettings, CoolingProbes, GrblSettings, Merge,
    OtaSettings, ProbeRange, ProbeSettings, RelaySettings, SettingsModel,
};
pub use telemetry::{
    Alerts, Cooling, FlameSensorStatus, LidState, RelayStates, Telemetry, UartStatus,
};

/// Health of the serial link
///
/// Owned by the connection manager; everyone else only observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No transport open (initial, or after teardown)
    #[default]
    Disconnected,
    /// Transport open and read loop running
    Connected,
    /// Last operation failed; see the stored error text
    Error,
}

impl ConnectionState {
    /// Check if a transport is open
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Error => write!(f, "Error"),
        }
    }
}

/// Cartesian position in millimeters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    /// Create a new position
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X{:.3} Y{:.3} Z{:.3}", self.x, self.y, self.z)
    }
}

/// Shared models updated from inbound messages
///
/// Cloning is cheap; every clone points at the same models.
#[derive(Debug, Clone, Default)]
pub struct ControllerModel {
    /// Motion controller status
    pub machine: Arc<RwLock<MachineStatus>>,
    /// Sensors and relays
    pub telemetry: Arc<RwLock<Telemetry>>,
    /// Controller configuration
    pub settings: Arc<RwLock<SettingsModel>>,
}

impl ControllerModel {
    /// Create empty models
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the machine status
    pub fn machine_status(&self) -> MachineStatus {
        self.machine.read().clone()
    }

    /// Snapshot of the telemetry
    pub fn telemetry_snapshot(&self) -> Telemetry {
        self.telemetry.read().clone()
    }

    /// Whether a settings snapshot has been received
    pub fn settings_loaded(&self) -> bool {
        self.settings.read().loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_default() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Error.is_connected());
    }

    #[test]
    fn test_model_clones_share_state() {
        let model = ControllerModel::new();
        let other = model.clone();
        other.machine.write().state = LaserState::Run;
        assert_eq!(model.machine_status().state, LaserState::Run);
    }
}
