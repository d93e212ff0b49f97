//! Motion controller state: run state, alarm, positions, feed, pins
//!
//! Codes reported by the firmware are mapped through fixed tables. Codes
//! outside a table degrade to the `Unknown` sentinel instead of failing.

use super::Position;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Run state of the motion controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LaserState {
    /// Ready for commands
    Idle,
    /// Executing a program
    Run,
    /// Feed hold in progress
    Hold,
    /// Feed hold finished, awaiting resume
    HoldComplete,
    /// Jogging
    Jog,
    /// Alarm lock
    Alarm,
    /// Safety door open
    Door,
    /// Door opened while holding
    DoorHold,
    /// Resuming after door close
    DoorResume,
    /// Restarting after door
    DoorRestart,
    /// Check (dry-run) mode
    Check,
    /// Homing cycle
    Home,
    /// Sleep mode
    Sleep,
    /// Not reported yet, or an unmapped code
    #[default]
    Unknown,
}

impl LaserState {
    /// Map a firmware state code
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => LaserState::Idle,
            2 => LaserState::Run,
            3 => LaserState::Hold,
            4 => LaserState::HoldComplete,
            5 => LaserState::Jog,
            6 => LaserState::Alarm,
            7 => LaserState::Door,
            8 => LaserState::DoorHold,
            9 => LaserState::DoorResume,
            10 => LaserState::DoorRestart,
            11 => LaserState::Check,
            12 => LaserState::Home,
            13 => LaserState::Sleep,
            _ => LaserState::Unknown,
        }
    }

    /// Whether the machine is moving or about to
    pub fn is_moving(&self) -> bool {
        matches!(self, LaserState::Run | LaserState::Jog | LaserState::Home)
    }
}

impl fmt::Display for LaserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LaserState::Idle => "Idle",
            LaserState::Run => "Run",
            LaserState::Hold => "Hold",
            LaserState::HoldComplete => "Hold Complete",
            LaserState::Jog => "Jog",
            LaserState::Alarm => "Alarm",
            LaserState::Door => "Door",
            LaserState::DoorHold => "Door Hold",
            LaserState::DoorResume => "Door Resume",
            LaserState::DoorRestart => "Door Restart",
            LaserState::Check => "Check",
            LaserState::Home => "Home",
            LaserState::Sleep => "Sleep",
            LaserState::Unknown => "Unknown",
        };
        write!(f, "{}", label)
    }
}

/// Alarm reported by the motion controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AlarmState {
    /// No alarm active
    NoAlarm,
    /// Hard limit switch triggered
    HardLimit,
    /// Soft limit exceeded
    SoftLimit,
    /// Reset during a cycle
    AbortCycle,
    /// Probe not in the expected initial state
    ProbeFailInitial,
    /// Probe did not make contact
    ProbeFailContact,
    /// Reset during homing
    HomingFailReset,
    /// Door opened during homing
    HomingFailDoor,
    /// Pull-off failed to clear the switch
    FailPulloff,
    /// Switch not found during approach
    HomingFailApproach,
    /// Spindle control failure
    SpindleControl,
    /// Control pin asserted at startup
    ControlPin,
    /// Ambiguous limit switch
    AmbiguousSwitch,
    /// Hard stop
    HardStop,
    /// Machine has not been homed
    Unhomed,
    /// Initialization failure
    Init,
    /// Not reported yet, or an unmapped code
    #[default]
    Unknown,
}

impl AlarmState {
    /// Map a firmware alarm code
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => AlarmState::NoAlarm,
            1 => AlarmState::HardLimit,
            2 => AlarmState::SoftLimit,
            3 => AlarmState::AbortCycle,
            4 => AlarmState::ProbeFailInitial,
            5 => AlarmState::ProbeFailContact,
            6 => AlarmState::HomingFailReset,
            7 => AlarmState::HomingFailDoor,
            8 => AlarmState::FailPulloff,
            9 => AlarmState::HomingFailApproach,
            10 => AlarmState::SpindleControl,
            11 => AlarmState::ControlPin,
            12 => AlarmState::AmbiguousSwitch,
            13 => AlarmState::HardStop,
            14 => AlarmState::Unhomed,
            15 => AlarmState::Init,
            _ => AlarmState::Unknown,
        }
    }

    /// Whether an actual alarm is active
    pub fn is_active(&self) -> bool {
        !matches!(self, AlarmState::NoAlarm | AlarmState::Unknown)
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AlarmState::NoAlarm => "No Alarm",
            AlarmState::HardLimit => "Hard limit",
            AlarmState::SoftLimit => "Soft limit",
            AlarmState::AbortCycle => "Abort cycle",
            AlarmState::ProbeFailInitial => "Probe fail initial",
            AlarmState::ProbeFailContact => "Probe fail contact",
            AlarmState::HomingFailReset => "Homing fail reset",
            AlarmState::HomingFailDoor => "Homing fail door",
            AlarmState::FailPulloff => "Fail pulloff",
            AlarmState::HomingFailApproach => "Homing fail approach",
            AlarmState::SpindleControl => "Spindle control",
            AlarmState::ControlPin => "Control pin",
            AlarmState::AmbiguousSwitch => "Ambiguous switch",
            AlarmState::HardStop => "Hard stop",
            AlarmState::Unhomed => "Unhomed",
            AlarmState::Init => "Init",
            AlarmState::Unknown => "Unknown",
        };
        write!(f, "{}", label)
    }
}

/// Which of the three reported positions to update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionKind {
    /// Work coordinates
    Work,
    /// Machine coordinates
    Machine,
    /// Work coordinate offset
    Offset,
}

/// Planner and serial receive buffer availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BufferState {
    /// Free planner blocks
    pub planned_blocks_available: u32,
    /// Free bytes in the serial receive buffer
    pub rx_bytes_available: u32,
}

/// Input pins currently asserted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActivePins {
    pub x: bool,
    pub y: bool,
    pub z: bool,
    /// Probe
    pub probe: bool,
    /// Door
    pub door: bool,
    /// Hold
    pub hold: bool,
    /// Soft reset
    pub reset: bool,
    /// Cycle start
    pub start: bool,
}

/// Accessory outputs currently driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActiveAccessories {
    pub spindle_cw: bool,
    pub spindle_ccw: bool,
    pub flood_coolant: bool,
    pub mist_coolant: bool,
}

/// Last known motion controller status
///
/// Reports are partial; every field keeps its previous value until a
/// report carrying it arrives.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MachineStatus {
    /// Run state
    pub state: LaserState,
    /// Active alarm
    pub alarm: AlarmState,
    /// Work position
    pub work_position: Position,
    /// Machine position
    pub machine_position: Position,
    /// Work coordinate offset
    pub work_offset: Position,
    /// Current feed rate
    pub feed_rate: f64,
    /// Current spindle (laser power) value
    pub spindle_speed: f64,
    /// Line number being executed
    pub line_number: Option<u32>,
    /// Buffer availability
    pub buffer: Option<BufferState>,
    /// Asserted pins
    pub active_pins: ActivePins,
    /// Driven accessories
    pub active_accessories: ActiveAccessories,
}

impl MachineStatus {
    /// Replace one of the reported positions
    pub fn set_position(&mut self, kind: PositionKind, position: Position) {
        match kind {
            PositionKind::Work => self.work_position = position,
            PositionKind::Machine => self.machine_position = position,
            PositionKind::Offset => self.work_offset = position,
        }
    }
}
