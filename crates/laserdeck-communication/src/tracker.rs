//! Command tracking
//!
//! Every tracked command waits for exactly one of two outcomes: an
//! acknowledgment from the controller or its timer firing. Both paths
//! retire the entry under the same lock, and whichever comes second finds
//! nothing to do. That is the only guarantee against a double
//! notification, so every path that removes an entry goes through
//! [`Pending::remove`].

use crate::encoder::OutboundEncoder;
use crate::protocol::OutgoingCommand;
use laserdeck_core::{
    AppEvent, CommandError, CommandEvent, EventBus, Notification, SettingsModel,
};
use laserdeck_settings::CommandSettings;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Receives command acknowledgments
///
/// The dispatcher depends on this rather than on the tracker itself.
pub trait AckSink: Send + Sync {
    fn acknowledge(&self, id: u32, success: bool, error: Option<String>);
}

/// Timeouts used until the controller reports its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTimeouts {
    pub default_ms: u64,
    pub homing_ms: u64,
    /// Added to either timeout; the controller's deadline is soft
    pub buffer_ms: u64,
}

impl Default for CommandTimeouts {
    fn default() -> Self {
        Self::from(&CommandSettings::default())
    }
}

impl From<&CommandSettings> for CommandTimeouts {
    fn from(settings: &CommandSettings) -> Self {
        Self {
            default_ms: settings.default_timeout_ms,
            homing_ms: settings.homing_timeout_ms,
            buffer_ms: settings.timeout_buffer_ms,
        }
    }
}

#[derive(Debug)]
struct PendingCommand {
    /// Distinguishes reuses of the same id after wraparound
    generation: u64,
    /// Unannounced entries are still being written and stay invisible
    announced: bool,
    issued_at: Instant,
    timer: JoinHandle<()>,
    is_priority: bool,
    command: String,
}

#[derive(Debug, Default)]
struct Pending {
    commands: HashMap<u32, PendingCommand>,
    next_generation: u64,
}

impl Pending {
    fn remove(&mut self, id: u32, generation: Option<u64>) -> Option<PendingCommand> {
        match self.commands.get(&id) {
            Some(entry) if generation.is_none_or(|g| g == entry.generation) => {
                self.commands.remove(&id)
            }
            _ => None,
        }
    }

    fn visible(&self) -> impl Iterator<Item = (&u32, &PendingCommand)> {
        self.commands.iter().filter(|(_, entry)| entry.announced)
    }
}

struct TrackerInner {
    pending: Mutex<Pending>,
    has_pending: watch::Sender<bool>,
    settings: Arc<RwLock<SettingsModel>>,
    timeouts: CommandTimeouts,
    events: Arc<EventBus>,
}

impl TrackerInner {
    /// Publish whether any announced entry remains; called with the lock held
    fn sync_has_pending(&self, pending: &Pending) -> Option<bool> {
        let now = pending.visible().next().is_some();
        self.has_pending
            .send_if_modified(|value| {
                let changed = *value != now;
                *value = now;
                changed
            })
            .then_some(now)
    }

    fn publish_pending_change(&self, change: Option<bool>) {
        if let Some(has_pending) = change {
            self.events
                .publish(AppEvent::Command(CommandEvent::PendingChanged { has_pending }));
        }
    }

    fn expire(&self, id: u32, generation: u64) {
        let (entry, change) = {
            let mut pending = self.pending.lock();
            let Some(entry) = pending.remove(id, Some(generation)) else {
                return;
            };
            let change = self.sync_has_pending(&pending);
            (entry, change)
        };
        self.publish_pending_change(change);

        tracing::warn!(
            "Command {} ({}) timed out after {:?}",
            id,
            entry.command,
            entry.issued_at.elapsed()
        );
        self.events
            .publish(AppEvent::Command(CommandEvent::TimedOut {
                id,
                command: entry.command.clone(),
            }));
        let error = CommandError::Timeout {
            id,
            command: entry.command,
        };
        self.events
            .notify(Notification::danger("Command Timeout", error.to_string()));
    }
}

/// Correlates tracked commands with their acknowledgments
#[derive(Clone)]
pub struct CommandTracker {
    inner: Arc<TrackerInner>,
    encoder: Arc<OutboundEncoder>,
}

impl CommandTracker {
    pub fn new(
        encoder: Arc<OutboundEncoder>,
        settings: Arc<RwLock<SettingsModel>>,
        timeouts: CommandTimeouts,
        events: Arc<EventBus>,
    ) -> Self {
        let (has_pending, _) = watch::channel(false);
        Self {
            inner: Arc::new(TrackerInner {
                pending: Mutex::new(Pending::default()),
                has_pending,
                settings,
                timeouts,
                events,
            }),
            encoder,
        }
    }

    /// How long a command may stay unacknowledged
    ///
    /// Uses the controller's reported timeouts when a settings snapshot
    /// has provided them.
    pub fn timeout_for(&self, is_priority: bool) -> Duration {
        let settings = self.inner.settings.read();
        let timeouts = &self.inner.timeouts;
        let base = if is_priority {
            settings.homing_timeout_ms().unwrap_or(timeouts.homing_ms)
        } else {
            settings.default_timeout_ms().unwrap_or(timeouts.default_ms)
        };
        Duration::from_millis(base.saturating_add(timeouts.buffer_ms))
    }

    /// Start waiting for the acknowledgment of `id`
    pub fn track(&self, id: u32, command: impl Into<String>, is_priority: bool) {
        let command = command.into();
        let generation = self.register(id, &command, is_priority);
        self.announce(id, generation, command);
    }

    /// Insert a pending entry and arm its timer without telling anyone
    ///
    /// The entry already accepts acknowledgments. Returns its generation.
    fn register(&self, id: u32, command: &str, is_priority: bool) -> u64 {
        let timeout = self.timeout_for(is_priority);
        let deadline = Instant::now() + timeout;

        let mut pending = self.inner.pending.lock();
        let generation = pending.next_generation;
        pending.next_generation += 1;

        let weak: Weak<TrackerInner> = Arc::downgrade(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire(id, generation);
            }
        });

        let entry = PendingCommand {
            generation,
            announced: false,
            issued_at: Instant::now(),
            timer,
            is_priority,
            command: command.to_string(),
        };
        if let Some(previous) = pending.commands.insert(id, entry) {
            tracing::warn!("Command id {} reused while still pending", id);
            previous.timer.abort();
        }

        tracing::debug!(
            "Tracking command {} ({}), timeout {:?}{}",
            id,
            command,
            timeout,
            if is_priority { ", priority" } else { "" }
        );
        generation
    }

    /// Make a registered entry visible and publish it
    fn announce(&self, id: u32, generation: u64, command: String) {
        let change = {
            let mut pending = self.inner.pending.lock();
            match pending.commands.get_mut(&id) {
                Some(entry) if entry.generation == generation => entry.announced = true,
                // Already resolved by an ack that beat the write's return
                _ => return,
            }
            self.inner.sync_has_pending(&pending)
        };
        self.inner.publish_pending_change(change);
        self.inner
            .events
            .publish(AppEvent::Command(CommandEvent::Tracked { id, command }));
    }

    /// Resolve `id`; unknown or already retired ids are ignored
    pub fn acknowledge(&self, id: u32, success: bool, error: Option<String>) {
        let (entry, change) = {
            let mut pending = self.inner.pending.lock();
            let Some(entry) = pending.remove(id, None) else {
                tracing::debug!("Ignoring ack for command {} that is not pending", id);
                return;
            };
            entry.timer.abort();
            let change = self.inner.sync_has_pending(&pending);
            (entry, change)
        };
        self.inner.publish_pending_change(change);

        tracing::debug!(
            "Command {} ({}) acknowledged after {:?}: {}",
            id,
            entry.command,
            entry.issued_at.elapsed(),
            if success { "ok" } else { "failed" }
        );
        self.inner
            .events
            .publish(AppEvent::Command(CommandEvent::Acknowledged { id, success }));

        if !success {
            let reason = error.unwrap_or_else(|| "Unknown error".to_string());
            self.inner.events.notify(Notification::danger(
                "Command Failed",
                format!("Grbl command failed: {}", reason),
            ));
        }
    }

    /// Send `command` as an Action and track it
    ///
    /// Never fails: a command that cannot be sent raises a notification
    /// and is never seen as pending. Returns the correlation id on success.
    pub async fn send_tracked(&self, command: &str, is_priority: bool) -> Option<u32> {
        let message = self.encoder.prepare(OutgoingCommand::action(command));
        let id = message.id()?;

        // Registered before the write so an immediate ack cannot be missed
        let generation = self.register(id, command, is_priority);

        match self.encoder.transmit(&message).await {
            Ok(()) => {
                self.announce(id, generation, command.to_string());
                Some(id)
            }
            Err(e) => {
                if let Some(entry) = self.inner.pending.lock().remove(id, Some(generation)) {
                    entry.timer.abort();
                }
                let error = CommandError::SendFailed {
                    reason: e.to_string(),
                };
                self.inner
                    .events
                    .notify(Notification::danger("Command Failed", error.to_string()));
                None
            }
        }
    }

    /// Whether any command awaits acknowledgment
    pub fn has_pending(&self) -> bool {
        *self.inner.has_pending.borrow()
    }

    /// Receiver notified whenever [`has_pending`](Self::has_pending) flips
    pub fn watch_pending(&self) -> watch::Receiver<bool> {
        self.inner.has_pending.subscribe()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().visible().count()
    }

    pub fn is_pending(&self, id: u32) -> bool {
        self.inner
            .pending
            .lock()
            .visible()
            .any(|(pending_id, _)| *pending_id == id)
    }

    /// Whether `id` is pending as a priority-class command
    pub fn is_priority(&self, id: u32) -> Option<bool> {
        self.inner
            .pending
            .lock()
            .visible()
            .find(|(pending_id, _)| **pending_id == id)
            .map(|(_, entry)| entry.is_priority)
    }
}

impl AckSink for CommandTracker {
    fn acknowledge(&self, id: u32, success: bool, error: Option<String>) {
        CommandTracker::acknowledge(self, id, success, error);
    }
}

impl std::fmt::Debug for CommandTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandTracker")
            .field("pending", &self.pending_count())
            .field("timeouts", &self.inner.timeouts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Link;
    use laserdeck_core::{EventCategory, EventFilter, LogBuffer, Severity};

    fn tracker() -> (CommandTracker, Arc<Mutex<Vec<Notification>>>) {
        let events = Arc::new(EventBus::new());
        let link = Arc::new(Link::new(Arc::new(LogBuffer::default()), events.clone()));
        let encoder = Arc::new(OutboundEncoder::new(link, 999_999));
        let tracker = CommandTracker::new(
            encoder,
            Arc::new(RwLock::new(SettingsModel::default())),
            CommandTimeouts {
                default_ms: 1000,
                homing_ms: 5000,
                buffer_ms: 1000,
            },
            events.clone(),
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        events.subscribe(
            EventFilter::Categories(vec![EventCategory::Notification]),
            move |event| {
                if let AppEvent::Notification(n) = event {
                    sink.lock().push(n);
                }
            },
        );
        (tracker, seen)
    }

    #[test]
    fn test_timeout_for_uses_fallbacks() {
        let (tracker, _) = tracker();
        assert_eq!(tracker.timeout_for(false), Duration::from_millis(2000));
        assert_eq!(tracker.timeout_for(true), Duration::from_millis(6000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_ack_notifies() {
        let (tracker, seen) = tracker();
        tracker.track(3, "G0 X5", false);
        tracker.acknowledge(3, false, Some("error:22".to_string()));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].title, "Command Failed");
        assert_eq!(seen[0].message, "Grbl command failed: error:22");
        assert_eq!(seen[0].severity, Severity::Danger);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_ack_without_text() {
        let (tracker, seen) = tracker();
        tracker.track(4, "$X", false);
        tracker.acknowledge(4, false, None);
        assert_eq!(seen.lock()[0].message, "Grbl command failed: Unknown error");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reused_id_replaces_entry() {
        let (tracker, _) = tracker();
        tracker.track(9, "first", false);
        tracker.track(9, "second", true);
        assert_eq!(tracker.pending_count(), 1);
        assert_eq!(tracker.is_priority(9), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_tracked_while_disconnected() {
        let (tracker, seen) = tracker();
        assert_eq!(tracker.send_tracked("$H", true).await, None);
        assert!(!tracker.has_pending());
        assert_eq!(tracker.pending_count(), 0);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0].message,
            "Failed to send command: Not connected to serial port"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsent_command_is_never_announced() {
        let (tracker, _) = tracker();
        let command_events = Arc::new(Mutex::new(Vec::new()));
        let sink = command_events.clone();
        tracker.inner.events.subscribe(
            EventFilter::Categories(vec![EventCategory::Command]),
            move |event| sink.lock().push(event),
        );
        let mut watch = tracker.watch_pending();

        assert_eq!(tracker.send_tracked("G0 X1", false).await, None);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(command_events.lock().is_empty());
        assert!(!watch.has_changed().expect("sender alive"));
        assert!(!tracker.is_pending(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_before_announce_is_not_republished() {
        let (tracker, _) = tracker();
        let generation = tracker.register(7, "$H", true);
        assert!(!tracker.has_pending());
        assert!(!tracker.is_pending(7));

        tracker.acknowledge(7, true, None);
        tracker.announce(7, generation, "$H".to_string());
        assert!(!tracker.has_pending());
        assert_eq!(tracker.pending_count(), 0);
    }
}
