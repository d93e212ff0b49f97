//! # LaserDeck Communication
//!
//! The serial link to the laser controller: device acquisition and
//! lifecycle, newline-delimited JSON framing, inbound message routing, and
//! correlation of outgoing commands with their acknowledgments.
//!
//! [`SerialService`] assembles every piece once and is the only type most
//! callers need.

pub mod communication;
pub mod connection;
pub mod dispatcher;
pub mod encoder;
pub mod link;
pub mod protocol;
pub mod service;
pub mod tracker;

pub use communication::{
    loopback::{LoopbackDevice, LoopbackPeer, LoopbackProvider},
    serial::{list_ports, SerialDevice, SerialDeviceProvider, SerialPortInfo},
    Device, DeviceProvider, DeviceReader, DeviceWriter,
};
pub use connection::ConnectionManager;
pub use dispatcher::Dispatcher;
pub use encoder::{CorrelationIds, OutboundEncoder};
pub use link::Link;
pub use protocol::{
    CommandAck, ControllerLog, ControllerReport, Frame, Framer, InboundMessage,
    IncomingMessageType, OutgoingCommand, OutgoingMessage, OutgoingMessageType, RelaysPatch,
    StatusReport,
};
pub use service::SerialService;
pub use tracker::{AckSink, CommandTimeouts, CommandTracker};
