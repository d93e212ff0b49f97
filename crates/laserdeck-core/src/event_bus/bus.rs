//! The session event bus
//!
//! Every component of a session publishes here: the link its state
//! transitions, the tracker the command lifecycle, the dispatcher what the
//! controller reports. Notifications are the one kind of event meant for a
//! person, so the bus gives them their own entry points: [`EventBus::notify`]
//! raises one, [`EventBus::on_notification`] and [`EventBus::notifications`]
//! observe them, and the most recent one is kept for late observers.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::events::{AppEvent, EventCategory, Notification, Severity};

/// Broadcast capacity used by [`EventBus::new`]
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Handle returned by the subscribe calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Which events a handler wants
#[derive(Debug, Clone, Default)]
pub enum EventFilter {
    #[default]
    All,
    Categories(Vec<EventCategory>),
}

impl EventFilter {
    pub fn matches(&self, event: &AppEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Categories(categories) => categories.contains(&event.category()),
        }
    }
}

type Handler = Box<dyn Fn(&AppEvent) + Send + Sync>;

/// Publish/subscribe hub for one session
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
    handlers: RwLock<HashMap<SubscriptionId, (EventFilter, Handler)>>,
    last_notification: Mutex<Option<Notification>>,
    notification_count: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Bus whose async receivers may fall `capacity` events behind
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            handlers: RwLock::new(HashMap::new()),
            last_notification: Mutex::new(None),
            notification_count: AtomicU64::new(0),
        }
    }

    /// Deliver `event` to every matching handler, then to async receivers
    ///
    /// Handlers run on the publishing thread, in no particular order.
    /// Returns how many observers saw the event; zero is not an error.
    pub fn publish(&self, event: AppEvent) -> usize {
        let mut delivered = 0;
        for (filter, handler) in self.handlers.read().values() {
            if filter.matches(&event) {
                handler(&event);
                delivered += 1;
            }
        }
        delivered + self.sender.send(event).unwrap_or(0)
    }

    /// Raise a user-visible notification
    pub fn notify(&self, notification: Notification) {
        match notification.severity {
            Severity::Danger | Severity::Warning => {
                tracing::warn!("{}: {}", notification.title, notification.message)
            }
            Severity::Success | Severity::Info => {
                tracing::info!("{}: {}", notification.title, notification.message)
            }
        }
        *self.last_notification.lock() = Some(notification.clone());
        self.notification_count.fetch_add(1, Ordering::Relaxed);

        if self.publish(AppEvent::Notification(notification)) == 0 {
            tracing::debug!("Notification raised with nobody watching");
        }
    }

    /// The most recent notification raised on this bus
    pub fn last_notification(&self) -> Option<Notification> {
        self.last_notification.lock().clone()
    }

    /// How many notifications have been raised on this bus
    pub fn notification_count(&self) -> u64 {
        self.notification_count.load(Ordering::Relaxed)
    }

    /// Call `handler` for every event `filter` accepts
    ///
    /// The handler runs on the publishing thread and must not block.
    pub fn subscribe<F>(&self, filter: EventFilter, handler: F) -> SubscriptionId
    where
        F: Fn(AppEvent) + Send + Sync + 'static,
    {
        self.register(filter, Box::new(move |event: &AppEvent| handler(event.clone())))
    }

    /// Call `handler` for every notification raised from now on
    pub fn on_notification<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.register(
            EventFilter::Categories(vec![EventCategory::Notification]),
            Box::new(move |event: &AppEvent| {
                if let AppEvent::Notification(notification) = event {
                    handler(notification);
                }
            }),
        )
    }

    fn register(&self, filter: EventFilter, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        self.handlers.write().insert(id, (filter, handler));
        tracing::debug!("Subscription {} added", id);
        id
    }

    /// Returns false if `id` was not subscribed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.handlers.write().remove(&id).is_some();
        if removed {
            tracing::debug!("Subscription {} removed", id);
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Every event published from now on, for an async task
    pub fn receiver(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    /// Notifications raised from now on, for an async task
    pub fn notifications(&self) -> Notifications {
        Notifications {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("notifications", &self.notification_count())
            .finish()
    }
}

/// Async stream of notifications, see [`EventBus::notifications`]
#[derive(Debug)]
pub struct Notifications {
    receiver: broadcast::Receiver<AppEvent>,
}

impl Notifications {
    /// Wait for the next notification; `None` once the bus is gone
    ///
    /// A consumer that falls behind loses the oldest events and carries on.
    pub async fn next(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.recv().await {
                Ok(AppEvent::Notification(notification)) => return Some(notification),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Notification consumer skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ConnectionState;
    use crate::event_bus::events::{CommandEvent, ConnectionEvent};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn state_changed() -> AppEvent {
        AppEvent::Connection(ConnectionEvent::StateChanged {
            old: ConnectionState::Disconnected,
            new: ConnectionState::Connected,
        })
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let bus = EventBus::new();
        let id = bus.subscribe(EventFilter::All, |_| {});
        let toast = bus.on_notification(|_| {});
        assert_eq!(bus.subscriber_count(), 2);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert!(bus.unsubscribe(toast));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_publish_counts_observers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(state_changed()), 0);

        bus.subscribe(EventFilter::Categories(vec![EventCategory::Connection]), |_| {});
        bus.subscribe(EventFilter::Categories(vec![EventCategory::Command]), |_| {});
        let _receiver = bus.receiver();
        assert_eq!(bus.publish(state_changed()), 2);
    }

    #[test]
    fn test_notify_without_observers_is_kept() {
        let bus = EventBus::new();
        bus.notify(Notification::danger("Command Failed", "nobody listens"));

        assert_eq!(bus.notification_count(), 1);
        let last = bus.last_notification().expect("kept");
        assert_eq!(last.title, "Command Failed");
        assert_eq!(last.severity, Severity::Danger);
    }

    #[test]
    fn test_on_notification_sees_only_notifications() {
        let bus = EventBus::new();
        let titles = Arc::new(Mutex::new(Vec::new()));
        let sink = titles.clone();
        bus.on_notification(move |n| sink.lock().push(n.title.clone()));

        let connection_events = Arc::new(AtomicUsize::new(0));
        let counter = connection_events.clone();
        bus.subscribe(
            EventFilter::Categories(vec![EventCategory::Connection]),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        bus.publish(state_changed());
        bus.notify(Notification::new("Connected", "loop0", Severity::Success));
        bus.publish(AppEvent::Command(CommandEvent::PendingChanged { has_pending: true }));
        bus.notify(Notification::danger("Command Timeout", "$H"));

        assert_eq!(*titles.lock(), vec!["Connected", "Command Timeout"]);
        assert_eq!(connection_events.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_notification_stream_skips_other_events() {
        let bus = EventBus::new();
        let mut notifications = bus.notifications();

        bus.publish(state_changed());
        bus.publish(AppEvent::Command(CommandEvent::Acknowledged { id: 1, success: true }));
        bus.notify(Notification::danger("Controller Error", "error:9"));

        let n = notifications.next().await.expect("notification");
        assert_eq!(n.message, "error:9");
    }

    #[tokio::test]
    async fn test_lagging_notification_stream_recovers() {
        let bus = EventBus::with_capacity(2);
        let mut notifications = bus.notifications();

        for id in 0..5 {
            bus.publish(AppEvent::Command(CommandEvent::Acknowledged { id, success: true }));
        }
        bus.notify(Notification::danger("Command Failed", "late"));

        let n = notifications.next().await.expect("notification");
        assert_eq!(n.title, "Command Failed");
    }

    #[tokio::test]
    async fn test_notification_stream_ends_with_bus() {
        let bus = EventBus::new();
        let mut notifications = bus.notifications();
        drop(bus);
        assert!(notifications.next().await.is_none());
    }
}
