//! Serial service facade
//!
//! [`SerialService`] builds the whole link once: log, event bus, models,
//! encoder, tracker, dispatcher and connection manager, each handed its
//! collaborators at construction. Nothing is looked up globally.

use crate::communication::DeviceProvider;
use crate::connection::ConnectionManager;
use crate::dispatcher::Dispatcher;
use crate::encoder::OutboundEncoder;
use crate::link::Link;
use crate::protocol::{OutgoingCommand, OutgoingMessage};
use crate::tracker::{CommandTimeouts, CommandTracker};
use laserdeck_core::{
    ConnectionError, ConnectionState, ControllerModel, Error, EventBus, LogBuffer, LogEntry,
};
use laserdeck_settings::Config;
use std::sync::Arc;
use tokio::sync::watch;

/// Public entry point to the controller link
pub struct SerialService {
    link: Arc<Link>,
    encoder: Arc<OutboundEncoder>,
    tracker: CommandTracker,
    connection: ConnectionManager,
    model: ControllerModel,
}

impl SerialService {
    /// Build the service with its own event bus
    pub fn new(config: &Config, provider: Arc<dyn DeviceProvider>) -> Self {
        Self::with_event_bus(config, provider, Arc::new(EventBus::new()))
    }

    /// Build the service publishing on `events`
    pub fn with_event_bus(
        config: &Config,
        provider: Arc<dyn DeviceProvider>,
        events: Arc<EventBus>,
    ) -> Self {
        let log = Arc::new(LogBuffer::new(config.log.capacity));
        let model = ControllerModel::new();
        let link = Arc::new(Link::new(log.clone(), events.clone()));
        let encoder = Arc::new(OutboundEncoder::new(
            link.clone(),
            config.commands.id_ceiling,
        ));
        let tracker = CommandTracker::new(
            encoder.clone(),
            model.settings.clone(),
            CommandTimeouts::from(&config.commands),
            events.clone(),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            model.clone(),
            Arc::new(tracker.clone()),
            log,
            events,
        ));
        let connection = ConnectionManager::new(
            provider,
            link.clone(),
            encoder.clone(),
            dispatcher,
            config.connection.clone(),
        );

        Self {
            link,
            encoder,
            tracker,
            connection,
            model,
        }
    }

    /// Connect, replacing any current session
    pub async fn connect(&self, suppress_errors: bool) -> Result<(), ConnectionError> {
        self.connection.connect(suppress_errors).await
    }

    /// Disconnect; safe to call at any time
    pub async fn disconnect(&self) {
        self.connection.disconnect().await
    }

    /// Send one command, returning it as sent (with its id, if any)
    ///
    /// Action commands sent this way are not tracked.
    pub async fn send_command(&self, command: OutgoingCommand) -> Result<OutgoingMessage, Error> {
        self.encoder.send(command).await
    }

    /// Send an Action command and track its acknowledgment
    ///
    /// Failures are reported as notifications, never returned.
    pub async fn send_tracked_command(&self, command: &str, is_priority: bool) -> Option<u32> {
        self.tracker.send_tracked(command, is_priority).await
    }

    /// Feed an acknowledgment to the tracker
    pub fn acknowledge(&self, id: u32, success: bool, error: Option<String>) {
        self.tracker.acknowledge(id, success, error);
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.link.watch_state()
    }

    /// Text of the last connection failure
    pub fn last_error(&self) -> Option<String> {
        self.link.last_error()
    }

    /// Traffic log, oldest first
    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.link.log().entries()
    }

    pub fn log(&self) -> &Arc<LogBuffer> {
        self.link.log()
    }

    pub fn has_pending_commands(&self) -> bool {
        self.tracker.has_pending()
    }

    pub fn watch_pending(&self) -> watch::Receiver<bool> {
        self.tracker.watch_pending()
    }

    pub fn tracker(&self) -> &CommandTracker {
        &self.tracker
    }

    /// Models fed by inbound messages
    pub fn model(&self) -> &ControllerModel {
        &self.model
    }

    pub fn events(&self) -> &Arc<EventBus> {
        self.link.events()
    }

    /// Name of the connected device
    pub async fn port(&self) -> Option<String> {
        self.connection.port().await
    }
}
