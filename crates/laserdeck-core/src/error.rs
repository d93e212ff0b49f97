//! Error handling for LaserDeck
//!
//! Provides error types for every layer of the controller link:
//! - Connection errors (device acquisition, open, read, write)
//! - Protocol errors (framing and payload decoding)
//! - Command errors (rejections and timeouts of tracked commands)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Connection error type
///
/// Represents failures of the physical link: acquiring a device,
/// opening it, and moving bytes across it. All of them are recoverable
/// by a fresh connect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// No previously authorized device and none could be requested
    #[error("No compatible serial port found")]
    NoDeviceAvailable,

    /// Acquisition was attempted but failed (user declined, enumeration failed)
    #[error("Failed to acquire a device: {reason}")]
    AcquisitionFailed {
        /// The reason acquisition failed.
        reason: String,
    },

    /// The device reports it is already open
    #[error("Port already open: {port}")]
    AlreadyOpen {
        /// The name of the port.
        port: String,
    },

    /// Failed to open the device
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// No transport is currently open
    #[error("Not connected to serial port")]
    NotConnected,

    /// Writing to the device failed
    #[error("Write failed: {reason}")]
    WriteFailed {
        /// The reason the write failed.
        reason: String,
    },

    /// Reading from the device failed
    #[error("Read failed: {reason}")]
    ReadFailed {
        /// The reason the read failed.
        reason: String,
    },

    /// The read loop did not release the device in time
    #[error("Disconnect timed out after {timeout_ms}ms")]
    DisconnectTimeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Generic connection error
    #[error("Connection error: {message}")]
    Other {
        /// The error message.
        message: String,
    },
}

/// Protocol error type
///
/// Raised while turning frames into messages or messages into frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame is not a valid JSON envelope
    #[error("Malformed frame: {reason}")]
    MalformedFrame {
        /// The reason decoding failed.
        reason: String,
    },

    /// The envelope carries a tag outside the known vocabulary
    #[error("Unknown message type: {tag}")]
    UnknownMessageType {
        /// The unknown tag.
        tag: i64,
    },

    /// The payload does not match the shape its tag requires
    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload {
        /// The message kind being decoded.
        kind: String,
        /// The reason the payload is invalid.
        reason: String,
    },

    /// An outgoing message could not be serialized
    #[error("Failed to encode message: {reason}")]
    Encode {
        /// The reason encoding failed.
        reason: String,
    },
}

/// Command error type
///
/// Outcomes of tracked commands that did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The controller acknowledged with `success: false`
    #[error("Command {id} rejected: {reason}")]
    Rejected {
        /// The correlation id.
        id: u32,
        /// The reason reported by the controller.
        reason: String,
    },

    /// No acknowledgment arrived in time
    #[error("Command \"{command}\" timed out")]
    Timeout {
        /// The correlation id.
        id: u32,
        /// The original command text.
        command: String,
    },

    /// The command never made it onto the wire
    #[error("Failed to send command: {reason}")]
    SendFailed {
        /// The reason sending failed.
        reason: String,
    },
}

/// Main error type for LaserDeck
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Command error
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Command(CommandError::Timeout { .. })
                | Error::Connection(ConnectionError::DisconnectTimeout { .. })
        )
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a protocol error
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }

    /// Check if this is a command error
    pub fn is_command_error(&self) -> bool {
        matches!(self, Error::Command(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::FailedToOpen {
            port: "/dev/ttyUSB0".to_string(),
            reason: "busy".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to open port /dev/ttyUSB0: busy");
        assert_eq!(
            ConnectionError::NoDeviceAvailable.to_string(),
            "No compatible serial port found"
        );
    }

    #[test]
    fn test_command_error_display() {
        let err = CommandError::Timeout {
            id: 7,
            command: "$H".to_string(),
        };
        assert_eq!(err.to_string(), "Command \"$H\" timed out");
    }

    #[test]
    fn test_error_conversion_and_predicates() {
        let err: Error = ConnectionError::NotConnected.into();
        assert!(err.is_connection_error());
        assert!(!err.is_timeout());

        let err: Error = CommandError::Timeout {
            id: 1,
            command: "G0".to_string(),
        }
        .into();
        assert!(err.is_timeout());
        assert!(err.is_command_error());

        let err: Error = ProtocolError::UnknownMessageType { tag: 9 }.into();
        assert!(err.is_protocol_error());
        assert_eq!(err.to_string(), "Unknown message type: 9");
    }
}
