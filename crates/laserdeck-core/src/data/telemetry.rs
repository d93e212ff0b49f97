//! Sensor and relay telemetry pushed by the controller's status reports

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lid position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LidState {
    #[default]
    Unknown,
    Opened,
    Closed,
}

impl fmt::Display for LidState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LidState::Unknown => write!(f, "Unknown"),
            LidState::Opened => write!(f, "Opened"),
            LidState::Closed => write!(f, "Closed"),
        }
    }
}

/// Flame sensor reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FlameSensorStatus {
    #[default]
    Unknown,
    Ok,
    Triggered,
}

impl fmt::Display for FlameSensorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlameSensorStatus::Unknown => write!(f, "Unknown"),
            FlameSensorStatus::Ok => write!(f, "OK"),
            FlameSensorStatus::Triggered => write!(f, "Triggered"),
        }
    }
}

/// State of the controller's secondary UART link to the motion firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UartStatus {
    #[default]
    Unknown,
    Connected,
    Disconnected,
    Error,
}

impl UartStatus {
    /// Map a reported link code; unmapped codes are `Unknown`
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => UartStatus::Connected,
            2 => UartStatus::Disconnected,
            3 => UartStatus::Error,
            _ => UartStatus::Unknown,
        }
    }
}

impl fmt::Display for UartStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UartStatus::Unknown => write!(f, "Unknown"),
            UartStatus::Connected => write!(f, "Connected"),
            UartStatus::Disconnected => write!(f, "Disconnected"),
            UartStatus::Error => write!(f, "Error"),
        }
    }
}

/// Coolant loop readings
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Cooling {
    /// Inlet flow (l/min)
    pub input_flow: f64,
    /// Outlet flow (l/min)
    pub output_flow: f64,
    /// Inlet temperature (°C)
    pub input_temperature: f64,
    /// Outlet temperature (°C)
    pub output_temperature: f64,
}

/// Alert flags raised by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Alerts {
    pub cooling: bool,
    pub lids: bool,
    pub flame_sensor: bool,
}

/// Relay outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelayStates {
    pub interlock: bool,
    pub alarm: bool,
    pub lights: bool,
    pub accessory: bool,
    pub air_assist: bool,
}

/// Latest telemetry snapshot
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Telemetry {
    pub cooling: Cooling,
    pub alerts: Alerts,
    pub front_lid: LidState,
    pub back_lid: LidState,
    pub flame_sensor: FlameSensorStatus,
    pub uart: UartStatus,
    pub relays: RelayStates,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uart_code_map() {
        assert_eq!(UartStatus::from_code(0), UartStatus::Unknown);
        assert_eq!(UartStatus::from_code(1), UartStatus::Connected);
        assert_eq!(UartStatus::from_code(2), UartStatus::Disconnected);
        assert_eq!(UartStatus::from_code(3), UartStatus::Error);
        assert_eq!(UartStatus::from_code(42), UartStatus::Unknown);
    }

    #[test]
    fn test_defaults_are_unknown() {
        let telemetry = Telemetry::default();
        assert_eq!(telemetry.front_lid, LidState::Unknown);
        assert_eq!(telemetry.flame_sensor, FlameSensorStatus::Unknown);
        assert_eq!(telemetry.uart, UartStatus::Unknown);
        assert!(!telemetry.relays.interlock);
    }
}
