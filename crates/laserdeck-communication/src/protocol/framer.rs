//! Newline framing
//!
//! Turns an arbitrarily chunked byte stream into decoded frames in arrival
//! order. The only state is the unterminated tail of the stream, which is
//! kept until the next chunk completes it.

use super::messages::InboundMessage;
use laserdeck_core::ProtocolError;

/// Longest unterminated line kept before it is thrown away
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// One complete line of input
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// The line decoded into a message
    Message {
        raw: String,
        message: InboundMessage,
    },
    /// The line could not be decoded
    Malformed { raw: String, error: ProtocolError },
}

impl Frame {
    /// The line text, without its terminator
    pub fn raw(&self) -> &str {
        match self {
            Frame::Message { raw, .. } | Frame::Malformed { raw, .. } => raw,
        }
    }
}

/// Accumulates bytes and splits them into frames
#[derive(Debug, Default)]
pub struct Framer {
    buffer: Vec<u8>,
    /// Dropping the rest of an oversized line
    discarding: bool,
}

impl Framer {
    /// Create an empty framer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if self.discarding {
                self.discarding = false;
                self.buffer.clear();
                continue;
            }

            self.buffer.extend_from_slice(head);
            let line = std::mem::take(&mut self.buffer);
            if line.len() > MAX_LINE_LEN {
                tracing::warn!("Dropping {} byte line", line.len());
                continue;
            }
            if let Some(frame) = Self::decode_line(&line) {
                frames.push(frame);
            }
        }

        if !self.discarding {
            self.buffer.extend_from_slice(rest);
            if self.buffer.len() > MAX_LINE_LEN {
                tracing::warn!(
                    "No line terminator in {} bytes, discarding until the next one",
                    self.buffer.len()
                );
                self.buffer.clear();
                self.discarding = true;
            }
        }

        frames
    }

    /// Forget any partial line
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }

    /// Bytes waiting for a terminator
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    fn decode_line(line: &[u8]) -> Option<Frame> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        let text = match std::str::from_utf8(line) {
            Ok(text) => text,
            Err(e) => {
                return Some(Frame::Malformed {
                    raw: String::from_utf8_lossy(line).into_owned(),
                    error: ProtocolError::MalformedFrame {
                        reason: e.to_string(),
                    },
                })
            }
        };

        if text.trim().is_empty() {
            return None;
        }

        let raw = text.to_string();
        Some(match InboundMessage::decode(text) {
            Ok(message) => Frame::Message { raw, message },
            Err(error) => Frame::Malformed { raw, error },
        })
    }
}
