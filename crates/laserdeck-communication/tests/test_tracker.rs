use laserdeck_communication::{CommandTimeouts, CommandTracker, Link, OutboundEncoder};
use laserdeck_core::data::GrblSettings;
use laserdeck_core::{
    ControllerModel, ControllerSettings, EventBus, EventCategory, EventFilter, LogBuffer,
    Notification,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};

const TIMEOUTS: CommandTimeouts = CommandTimeouts {
    default_ms: 1000,
    homing_ms: 5000,
    buffer_ms: 1000,
};

struct Harness {
    tracker: CommandTracker,
    link: Arc<Link>,
    model: ControllerModel,
    notifications: Arc<Mutex<Vec<Notification>>>,
}

impl Harness {
    fn new() -> Self {
        let events = Arc::new(EventBus::new());
        let notifications = Arc::new(Mutex::new(Vec::new()));
        let sink = notifications.clone();
        events.subscribe(
            EventFilter::Categories(vec![EventCategory::Notification]),
            move |event| {
                if let laserdeck_core::AppEvent::Notification(n) = event {
                    sink.lock().push(n);
                }
            },
        );

        let model = ControllerModel::new();
        let link = Arc::new(Link::new(Arc::new(LogBuffer::default()), events.clone()));
        let encoder = Arc::new(OutboundEncoder::new(link.clone(), 999_999));
        let tracker = CommandTracker::new(encoder, model.settings.clone(), TIMEOUTS, events);

        Self {
            tracker,
            link,
            model,
            notifications,
        }
    }

    /// Attach an in-memory writer; the returned end sees what was sent
    async fn attach(&self) -> BufReader<DuplexStream> {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        self.link.install_writer(Box::new(ours));
        BufReader::new(theirs)
    }

    fn titles(&self) -> Vec<String> {
        self.notifications
            .lock()
            .iter()
            .map(|n| n.title.clone())
            .collect()
    }
}

async fn settle(duration: Duration) {
    tokio::time::sleep(duration).await;
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_ack_before_deadline_cancels_timeout() {
    let h = Harness::new();
    h.tracker.track(7, "G0 X10", false);

    settle(Duration::from_millis(500)).await;
    h.tracker.acknowledge(7, true, None);
    assert!(!h.tracker.has_pending());

    settle(Duration::from_millis(1000)).await;
    assert!(h.titles().is_empty());

    // Well past the original deadline
    settle(Duration::from_secs(10)).await;
    assert!(h.titles().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_regular_command_times_out() {
    let h = Harness::new();
    h.tracker.track(3, "G1 X5", false);

    settle(Duration::from_millis(1990)).await;
    assert!(h.tracker.is_pending(3));
    assert!(h.titles().is_empty());

    settle(Duration::from_millis(20)).await;
    assert!(!h.tracker.is_pending(3));
    assert!(!h.tracker.has_pending());

    let notes = h.notifications.lock().clone();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].title, "Command Timeout");
    assert!(notes[0].message.contains("G1 X5"));
}

#[tokio::test(start_paused = true)]
async fn test_priority_command_uses_homing_timeout() {
    let h = Harness::new();
    h.tracker.track(1, "$H", true);
    assert_eq!(h.tracker.is_priority(1), Some(true));

    settle(Duration::from_millis(2000)).await;
    assert!(h.tracker.is_pending(1));
    assert!(h.titles().is_empty());

    settle(Duration::from_millis(4010)).await;
    assert!(!h.tracker.is_pending(1));
    assert_eq!(h.titles(), vec!["Command Timeout".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_late_ack_after_timeout_is_ignored() {
    let h = Harness::new();
    h.tracker.track(9, "M3 S100", false);

    settle(Duration::from_millis(2100)).await;
    assert_eq!(h.titles(), vec!["Command Timeout".to_string()]);

    h.tracker.acknowledge(9, false, Some("too late".to_string()));
    assert_eq!(h.titles().len(), 1);
    assert!(!h.tracker.has_pending());
}

#[tokio::test(start_paused = true)]
async fn test_failed_ack_raises_one_notification() {
    let h = Harness::new();
    h.tracker.track(4, "G0 Z-1", false);
    h.tracker.acknowledge(4, false, None);
    h.tracker.acknowledge(4, false, None);

    settle(Duration::from_secs(5)).await;
    let notes = h.notifications.lock().clone();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].title, "Command Failed");
    assert_eq!(notes[0].message, "Grbl command failed: Unknown error");
}

#[tokio::test(start_paused = true)]
async fn test_has_pending_follows_the_pending_set() {
    let h = Harness::new();
    let mut watch = h.tracker.watch_pending();
    assert!(!*watch.borrow());

    h.tracker.track(1, "a", false);
    h.tracker.track(2, "b", false);
    h.tracker.track(3, "c", true);
    assert!(watch.has_changed().unwrap_or(false));
    assert!(*watch.borrow_and_update());
    assert_eq!(h.tracker.pending_count(), 3);

    h.tracker.acknowledge(2, true, None);
    h.tracker.acknowledge(42, true, None);
    assert!(h.tracker.has_pending());
    assert!(!watch.has_changed().unwrap_or(true));

    h.tracker.acknowledge(1, true, None);
    h.tracker.acknowledge(3, true, None);
    assert!(!h.tracker.has_pending());
    assert!(!*watch.borrow_and_update());
    assert!(h.titles().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_controller_timeouts_take_precedence() {
    let h = Harness::new();
    assert_eq!(h.tracker.timeout_for(false), Duration::from_millis(2000));
    assert_eq!(h.tracker.timeout_for(true), Duration::from_millis(6000));

    h.model.settings.write().apply_snapshot(ControllerSettings {
        grbl: Some(GrblSettings {
            default_timeout_ms: Some(300),
            ..Default::default()
        }),
        ..Default::default()
    });

    assert_eq!(h.tracker.timeout_for(false), Duration::from_millis(1300));
    assert_eq!(h.tracker.timeout_for(true), Duration::from_millis(6000));
}

#[tokio::test(start_paused = true)]
async fn test_send_tracked_writes_action_with_id() {
    let h = Harness::new();
    let mut wire = h.attach().await;

    let id = h.tracker.send_tracked("$H", true).await.expect("id");
    assert_eq!(id, 1);
    assert!(h.tracker.is_pending(id));

    let mut line = String::new();
    wire.read_line(&mut line).await.expect("read");
    assert_eq!(line, "{\"a\":0,\"p\":{\"message\":\"$H\",\"id\":1}}\n");

    h.tracker.acknowledge(id, true, None);
    assert!(!h.tracker.has_pending());
}

#[tokio::test(start_paused = true)]
async fn test_send_tracked_without_link_reports_failure() {
    let h = Harness::new();

    assert_eq!(h.tracker.send_tracked("G0 X1", false).await, None);
    assert!(!h.tracker.has_pending());

    let notes = h.notifications.lock().clone();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].title, "Command Failed");
    assert_eq!(
        notes[0].message,
        "Failed to send command: Not connected to serial port"
    );

    // Nothing left behind to time out later
    settle(Duration::from_secs(10)).await;
    assert_eq!(h.titles().len(), 1);
}
