//! Wire protocol: message vocabulary and newline framing

pub mod framer;
pub mod messages;

pub use framer::{Frame, Framer, MAX_LINE_LEN};
pub use messages::{
    ActionPayload, AlertFlags, CommandAck, ControllerLog, ControllerReport, InboundMessage,
    IncomingMessageType, OutgoingCommand, OutgoingMessage, OutgoingMessageType, RelayFlags,
    RelaysPatch, Sensors, StatusReport, WireAccessories, WireBuffer, WireFeed, WirePins,
    WirePosition,
};
