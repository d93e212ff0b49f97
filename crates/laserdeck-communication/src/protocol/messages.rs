//! Wire vocabulary
//!
//! Inbound frames are `{"t": <type>, "p": <payload>}` and outbound frames
//! are `{"a": <action>, "p": <payload>}`. Both tags are small integers, so
//! the envelopes are decoded in two steps: first the tag, then the payload
//! shape that tag selects.

use laserdeck_core::{ControllerSettings, ProtocolError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inbound message tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IncomingMessageType {
    StatusReport = 0,
    ControllerReport = 1,
    ControllerLog = 2,
    CommandAck = 3,
    SettingsSnapshot = 4,
}

impl IncomingMessageType {
    /// Map a wire tag
    pub fn from_tag(tag: i64) -> Option<Self> {
        match tag {
            0 => Some(Self::StatusReport),
            1 => Some(Self::ControllerReport),
            2 => Some(Self::ControllerLog),
            3 => Some(Self::CommandAck),
            4 => Some(Self::SettingsSnapshot),
            _ => None,
        }
    }
}

impl fmt::Display for IncomingMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StatusReport => write!(f, "StatusReport"),
            Self::ControllerReport => write!(f, "ControllerReport"),
            Self::ControllerLog => write!(f, "ControllerLog"),
            Self::CommandAck => write!(f, "CommandAck"),
            Self::SettingsSnapshot => write!(f, "SettingsSnapshot"),
        }
    }
}

/// Outbound action tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutgoingMessageType {
    Action = 0,
    SettingsSet = 1,
    SettingsGet = 2,
    StatusGet = 3,
    RelaysSet = 4,
}

impl OutgoingMessageType {
    /// Map a wire tag
    pub fn from_tag(tag: i64) -> Option<Self> {
        match tag {
            0 => Some(Self::Action),
            1 => Some(Self::SettingsSet),
            2 => Some(Self::SettingsGet),
            3 => Some(Self::StatusGet),
            4 => Some(Self::RelaysSet),
            _ => None,
        }
    }

    /// The wire tag
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for OutgoingMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Action => write!(f, "Action"),
            Self::SettingsSet => write!(f, "SettingsSet"),
            Self::SettingsGet => write!(f, "SettingsGet"),
            Self::StatusGet => write!(f, "StatusGet"),
            Self::RelaysSet => write!(f, "RelaysSet"),
        }
    }
}

/// Inlet/outlet pair of one cooling quantity
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InOut {
    #[serde(rename = "in")]
    pub input: f64,
    #[serde(rename = "out")]
    pub output: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoolingSensors {
    pub flow: InOut,
    pub temp: InOut,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LidSensors {
    /// "opened" or "closed"
    pub front: String,
    pub back: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Sensors {
    pub cooling: CoolingSensors,
    pub lids: LidSensors,
    /// "triggered" or "ok"
    pub flame_sensor: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertFlags {
    pub cooling: bool,
    pub lids: bool,
    pub flame_sensor: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayFlags {
    pub interlock: bool,
    pub alarm: bool,
    pub lights: bool,
    pub accessory: bool,
    pub air_assist: bool,
}

/// Sensor and relay snapshot
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusReport {
    pub sensors: Sensors,
    pub alerts: AlertFlags,
    pub relays: RelayFlags,
    /// Secondary UART link code
    pub uart: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WirePosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireBuffer {
    pub planned_buffer_available_blocks: u32,
    pub rx_buffer_available_bytes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WireFeed {
    pub rate: Option<f64>,
    pub spindle_speed: Option<f64>,
}

/// Pin letters as reported by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WirePins {
    pub x: bool,
    pub y: bool,
    pub z: bool,
    /// Probe
    pub p: bool,
    /// Door
    pub d: bool,
    /// Hold
    pub h: bool,
    /// Reset
    pub r: bool,
    /// Start
    pub s: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WireAccessories {
    pub spindle_cw: bool,
    pub spindle_ccw: bool,
    pub flood_coolant: bool,
    pub mist_coolant: bool,
}

/// Motion controller snapshot; any subset of fields may be present
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerReport {
    pub state: Option<i64>,
    pub alarm: Option<i64>,
    pub w_pos: Option<WirePosition>,
    pub m_pos: Option<WirePosition>,
    pub wco: Option<WirePosition>,
    pub buffer: Option<WireBuffer>,
    pub feed: Option<WireFeed>,
    pub line_number: Option<u32>,
    pub active_pins: Option<WirePins>,
    pub active_accessories: Option<WireAccessories>,
}

/// Human readable line from the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerLog {
    pub message: String,
}

/// Acknowledgment of a tracked command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAck {
    pub id: u32,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    StatusReport(StatusReport),
    ControllerReport(ControllerReport),
    ControllerLog(ControllerLog),
    CommandAck(CommandAck),
    SettingsSnapshot(ControllerSettings),
}

#[derive(Deserialize)]
struct RawInbound {
    t: i64,
    #[serde(default)]
    p: serde_json::Value,
}

fn decode_payload<T: DeserializeOwned>(
    kind: impl fmt::Display,
    payload: serde_json::Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|e| ProtocolError::InvalidPayload {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

impl InboundMessage {
    /// Decode one frame (without its newline)
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let raw: RawInbound =
            serde_json::from_str(line).map_err(|e| ProtocolError::MalformedFrame {
                reason: e.to_string(),
            })?;
        let kind = IncomingMessageType::from_tag(raw.t)
            .ok_or(ProtocolError::UnknownMessageType { tag: raw.t })?;

        Ok(match kind {
            IncomingMessageType::StatusReport => Self::StatusReport(decode_payload(kind, raw.p)?),
            IncomingMessageType::ControllerReport => {
                Self::ControllerReport(decode_payload(kind, raw.p)?)
            }
            IncomingMessageType::ControllerLog => Self::ControllerLog(decode_payload(kind, raw.p)?),
            IncomingMessageType::CommandAck => Self::CommandAck(decode_payload(kind, raw.p)?),
            IncomingMessageType::SettingsSnapshot => {
                Self::SettingsSnapshot(decode_payload(kind, raw.p)?)
            }
        })
    }

    /// The message tag
    pub fn kind(&self) -> IncomingMessageType {
        match self {
            Self::StatusReport(_) => IncomingMessageType::StatusReport,
            Self::ControllerReport(_) => IncomingMessageType::ControllerReport,
            Self::ControllerLog(_) => IncomingMessageType::ControllerLog,
            Self::CommandAck(_) => IncomingMessageType::CommandAck,
            Self::SettingsSnapshot(_) => IncomingMessageType::SettingsSnapshot,
        }
    }
}

/// Relays to switch; absent relays keep their state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaysPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interlock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alarm: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lights: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessory: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub air_assist: Option<bool>,
}

impl RelaysPatch {
    /// Patch switching a single relay by wire name
    pub fn single(name: &str, on: bool) -> Option<Self> {
        let mut patch = Self::default();
        let slot = match name {
            "interlock" => &mut patch.interlock,
            "alarm" => &mut patch.alarm,
            "lights" => &mut patch.lights,
            "accessory" => &mut patch.accessory,
            "air_assist" => &mut patch.air_assist,
            _ => return None,
        };
        *slot = Some(on);
        Some(patch)
    }
}

/// A request as composed by a caller, before an id is assigned
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingCommand {
    /// Raw firmware command line
    Action { message: String },
    /// Partial settings tree to apply
    SettingsSet(ControllerSettings),
    SettingsGet,
    StatusGet,
    RelaysSet(RelaysPatch),
}

impl OutgoingCommand {
    /// Shorthand for an Action command
    pub fn action(message: impl Into<String>) -> Self {
        Self::Action {
            message: message.into(),
        }
    }

    /// The action tag
    pub fn kind(&self) -> OutgoingMessageType {
        match self {
            Self::Action { .. } => OutgoingMessageType::Action,
            Self::SettingsSet(_) => OutgoingMessageType::SettingsSet,
            Self::SettingsGet => OutgoingMessageType::SettingsGet,
            Self::StatusGet => OutgoingMessageType::StatusGet,
            Self::RelaysSet(_) => OutgoingMessageType::RelaysSet,
        }
    }
}

/// Payload of an Action frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
struct EmptyPayload {}

/// A fully composed outbound message, as written to the wire
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingMessage {
    Action(ActionPayload),
    SettingsSet(ControllerSettings),
    SettingsGet,
    StatusGet,
    RelaysSet(RelaysPatch),
}

#[derive(Serialize)]
struct Envelope<'a, P: Serialize> {
    a: u8,
    p: &'a P,
}

#[derive(Deserialize)]
struct RawOutbound {
    a: i64,
    #[serde(default)]
    p: serde_json::Value,
}

impl OutgoingMessage {
    /// The action tag
    pub fn kind(&self) -> OutgoingMessageType {
        match self {
            Self::Action(_) => OutgoingMessageType::Action,
            Self::SettingsSet(_) => OutgoingMessageType::SettingsSet,
            Self::SettingsGet => OutgoingMessageType::SettingsGet,
            Self::StatusGet => OutgoingMessageType::StatusGet,
            Self::RelaysSet(_) => OutgoingMessageType::RelaysSet,
        }
    }

    /// The correlation id, if one was assigned
    pub fn id(&self) -> Option<u32> {
        match self {
            Self::Action(payload) => payload.id,
            _ => None,
        }
    }

    /// Serialize as one newline-terminated frame
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        let a = self.kind().tag();
        let json = match self {
            Self::Action(p) => serde_json::to_string(&Envelope { a, p }),
            Self::SettingsSet(p) => serde_json::to_string(&Envelope { a, p }),
            Self::SettingsGet | Self::StatusGet => serde_json::to_string(&Envelope {
                a,
                p: &EmptyPayload {},
            }),
            Self::RelaysSet(p) => serde_json::to_string(&Envelope { a, p }),
        }
        .map_err(|e| ProtocolError::Encode {
            reason: e.to_string(),
        })?;
        Ok(json + "\n")
    }

    /// Decode one outbound frame (without its newline), as the controller would
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let raw: RawOutbound =
            serde_json::from_str(line).map_err(|e| ProtocolError::MalformedFrame {
                reason: e.to_string(),
            })?;
        let kind = OutgoingMessageType::from_tag(raw.a)
            .ok_or(ProtocolError::UnknownMessageType { tag: raw.a })?;

        Ok(match kind {
            OutgoingMessageType::Action => Self::Action(decode_payload(kind, raw.p)?),
            OutgoingMessageType::SettingsSet => Self::SettingsSet(decode_payload(kind, raw.p)?),
            OutgoingMessageType::SettingsGet => {
                decode_payload::<EmptyPayload>(kind, raw.p)?;
                Self::SettingsGet
            }
            OutgoingMessageType::StatusGet => {
                decode_payload::<EmptyPayload>(kind, raw.p)?;
                Self::StatusGet
            }
            OutgoingMessageType::RelaysSet => Self::RelaysSet(decode_payload(kind, raw.p)?),
        })
    }
}
