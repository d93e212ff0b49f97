//! Outbound encoding
//!
//! Composes outgoing commands into wire messages, assigning correlation
//! ids to Action commands, and writes them through the [`Link`].

use crate::link::Link;
use crate::protocol::{ActionPayload, OutgoingCommand, OutgoingMessage};
use laserdeck_core::{Error, LogKind};
use parking_lot::Mutex;
use std::sync::Arc;

/// Correlation id counter
///
/// Yields 1, 2, ... up to `ceiling`, then starts again at 1. Zero is never
/// produced.
#[derive(Debug, Clone)]
pub struct CorrelationIds {
    next: u32,
    ceiling: u32,
}

impl CorrelationIds {
    pub fn new(ceiling: u32) -> Self {
        Self {
            next: 1,
            ceiling: ceiling.max(1),
        }
    }

    /// Take the next id
    pub fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next = if id >= self.ceiling { 1 } else { id + 1 };
        id
    }
}

/// Turns commands into frames on the wire
#[derive(Debug)]
pub struct OutboundEncoder {
    link: Arc<Link>,
    ids: Mutex<CorrelationIds>,
}

impl OutboundEncoder {
    pub fn new(link: Arc<Link>, id_ceiling: u32) -> Self {
        Self {
            link,
            ids: Mutex::new(CorrelationIds::new(id_ceiling)),
        }
    }

    /// Compose `command` into a message, assigning an id to Action commands
    pub fn prepare(&self, command: OutgoingCommand) -> OutgoingMessage {
        match command {
            OutgoingCommand::Action { message } => OutgoingMessage::Action(ActionPayload {
                message,
                id: Some(self.ids.lock().next_id()),
            }),
            OutgoingCommand::SettingsSet(settings) => OutgoingMessage::SettingsSet(settings),
            OutgoingCommand::SettingsGet => OutgoingMessage::SettingsGet,
            OutgoingCommand::StatusGet => OutgoingMessage::StatusGet,
            OutgoingCommand::RelaysSet(relays) => OutgoingMessage::RelaysSet(relays),
        }
    }

    /// Write an already composed message
    pub async fn transmit(&self, message: &OutgoingMessage) -> Result<(), Error> {
        let line = message.to_line()?;
        self.link.write_all(line.as_bytes()).await?;

        let sent = line.trim_end_matches('\n');
        tracing::debug!("TX: {}", sent);
        self.link.log().push(LogKind::Tx, sent);
        Ok(())
    }

    /// Compose and write `command`, returning the message as sent
    pub async fn send(&self, command: OutgoingCommand) -> Result<OutgoingMessage, Error> {
        let message = self.prepare(command);
        self.transmit(&message).await?;
        Ok(message)
    }
}
