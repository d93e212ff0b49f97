//! Shared link state
//!
//! The [`Link`] holds what the write path and the connection lifecycle
//! both touch: the device writer of the current session, the connection
//! state, the last error text, the traffic log and the event bus. Only the
//! connection manager installs or removes the writer; everyone else writes
//! through it.
//!
//! Each installed writer carries its own cancellation token. Removing or
//! replacing it cancels the token, so a write stuck on a peer that stopped
//! reading fails instead of holding the next session hostage.

use crate::communication::DeviceWriter;
use laserdeck_core::{
    AppEvent, ConnectionError, ConnectionEvent, ConnectionState, EventBus, LogBuffer, LogKind,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

/// The writer of one connection session
struct SessionWriter {
    io: AsyncMutex<DeviceWriter>,
    closed: CancellationToken,
}

impl SessionWriter {
    fn new(writer: DeviceWriter) -> Self {
        Self {
            io: AsyncMutex::new(writer),
            closed: CancellationToken::new(),
        }
    }
}

pub struct Link {
    writer: Mutex<Option<Arc<SessionWriter>>>,
    state: watch::Sender<ConnectionState>,
    last_error: RwLock<Option<String>>,
    log: Arc<LogBuffer>,
    events: Arc<EventBus>,
}

impl Link {
    pub fn new(log: Arc<LogBuffer>, events: Arc<EventBus>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            writer: Mutex::new(None),
            state,
            last_error: RwLock::new(None),
            log,
            events,
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Move to `new`, publishing the transition if it is one
    pub fn set_state(&self, new: ConnectionState) {
        let mut old = new;
        let changed = self.state.send_if_modified(|current| {
            old = *current;
            if *current == new {
                return false;
            }
            *current = new;
            true
        });

        if changed {
            tracing::info!("Connection state: {} -> {}", old, new);
            self.events
                .publish(AppEvent::Connection(ConnectionEvent::StateChanged { old, new }));
        }
    }

    /// Record a failure: Error state, stored text, and an error log entry
    pub fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{}", message);
        self.log.push(LogKind::Error, message.clone());
        *self.last_error.write() = Some(message);
        self.set_state(ConnectionState::Error);
    }

    /// Text of the last recorded failure
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn clear_error(&self) {
        *self.last_error.write() = None;
    }

    pub fn log(&self) -> &Arc<LogBuffer> {
        &self.log
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Make `writer` the device writer, failing writes still on the old one
    pub fn install_writer(&self, writer: DeviceWriter) {
        let previous = self.writer.lock().replace(Arc::new(SessionWriter::new(writer)));
        if let Some(previous) = previous {
            previous.closed.cancel();
        }
    }

    fn detach_writer(&self) -> Option<Arc<SessionWriter>> {
        let session = self.writer.lock().take()?;
        session.closed.cancel();
        Some(session)
    }

    /// Remove the device writer and shut it down
    ///
    /// A write in progress is failed first, so this never waits on a
    /// peer that stopped reading.
    pub async fn clear_writer(&self) {
        if let Some(session) = self.detach_writer() {
            session.io.lock().await.shutdown().await.ok();
        }
    }

    /// Remove the device writer without shutting it down
    ///
    /// The writer is dropped once a write in progress has observed the
    /// cancellation.
    pub fn abandon_writer(&self) {
        self.detach_writer();
    }

    /// Whether a writer is installed
    pub fn has_writer(&self) -> bool {
        self.writer.lock().is_some()
    }

    /// Write `bytes` as one uninterrupted unit
    ///
    /// Concurrent callers are serialized, so frames never interleave. A
    /// failed write is recorded before it is returned. A write cut short
    /// because the session ended reports `NotConnected` and records nothing.
    pub async fn write_all(&self, bytes: &[u8]) -> Result<(), ConnectionError> {
        let session = self
            .writer
            .lock()
            .clone()
            .ok_or(ConnectionError::NotConnected)?;

        let result = tokio::select! {
            biased;
            _ = session.closed.cancelled() => return Err(ConnectionError::NotConnected),
            result = async {
                let mut writer = session.io.lock().await;
                writer.write_all(bytes).await?;
                writer.flush().await
            } => result,
        };

        result.map_err(|e| {
            let err = ConnectionError::WriteFailed {
                reason: e.to_string(),
            };
            self.record_error(err.to_string());
            err
        })
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("state", &self.state())
            .field("last_error", &self.last_error())
            .finish()
    }
}
