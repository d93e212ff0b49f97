use laserdeck_communication::{AckSink, Dispatcher, Framer, InboundMessage};
use laserdeck_core::data::{FlameSensorStatus, LidState, UartStatus};
use laserdeck_core::{
    AlarmState, AppEvent, ControllerModel, EventBus, LaserState, LogBuffer, LogKind,
    MachineEvent, Notification, Position, Severity,
};
use parking_lot::Mutex;
use std::sync::Arc;

struct NoAcks;

impl AckSink for NoAcks {
    fn acknowledge(&self, _id: u32, _success: bool, _error: Option<String>) {}
}

struct Harness {
    dispatcher: Dispatcher,
    model: ControllerModel,
    log: Arc<LogBuffer>,
    events: Arc<Mutex<Vec<AppEvent>>>,
}

impl Harness {
    fn new() -> Self {
        let bus = Arc::new(EventBus::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        bus.subscribe(Default::default(), move |event| sink.lock().push(event));

        let model = ControllerModel::new();
        let log = Arc::new(LogBuffer::default());
        let dispatcher = Dispatcher::new(model.clone(), Arc::new(NoAcks), log.clone(), bus);
        Self {
            dispatcher,
            model,
            log,
            events,
        }
    }

    fn feed(&self, line: &str) {
        let message = InboundMessage::decode(line).expect("decode");
        self.dispatcher.dispatch(message);
    }

    fn notifications(&self) -> Vec<Notification> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                AppEvent::Notification(n) => Some(n.clone()),
                _ => None,
            })
            .collect()
    }
}

#[test]
fn test_partial_report_only_touches_present_fields() {
    let h = Harness::new();
    h.feed(r#"{"t":1,"p":{"state":1,"alarm":0,"w_pos":{"x":1.0,"y":2.0,"z":3.0},"feed":{"rate":1500.0,"spindle_speed":800.0},"line_number":12}}"#);
    let before = h.model.machine_status();
    assert_eq!(before.work_position, Position::new(1.0, 2.0, 3.0));

    h.feed(r#"{"t":1,"p":{"state":2}}"#);
    let after = h.model.machine_status();

    assert_ne!(after.state, before.state);
    assert_eq!(after.alarm, before.alarm);
    assert_eq!(after.work_position, before.work_position);
    assert_eq!(after.feed_rate, 1500.0);
    assert_eq!(after.spindle_speed, 800.0);
    assert_eq!(after.line_number, Some(12));
}

#[test]
fn test_state_change_is_published_once() {
    let h = Harness::new();
    h.feed(r#"{"t":1,"p":{"state":2}}"#);
    h.feed(r#"{"t":1,"p":{"state":2}}"#);

    let changes = h
        .events
        .lock()
        .iter()
        .filter(|e| matches!(e, AppEvent::Machine(MachineEvent::StateChanged { .. })))
        .count();
    assert_eq!(changes, 1);
}

#[test]
fn test_unknown_codes_map_to_unknown() {
    let h = Harness::new();
    h.feed(r#"{"t":1,"p":{"state":99,"alarm":-4}}"#);
    let status = h.model.machine_status();
    assert_eq!(status.state, LaserState::Unknown);
    assert_eq!(status.alarm, AlarmState::Unknown);

    h.feed(r#"{"t":0,"p":{"sensors":{"lids":{"front":"ajar","back":"closed"},"flame_sensor":"smoky"},"uart":42}}"#);
    let telemetry = h.model.telemetry_snapshot();
    assert_eq!(telemetry.front_lid, LidState::Unknown);
    assert_eq!(telemetry.back_lid, LidState::Closed);
    assert_eq!(telemetry.flame_sensor, FlameSensorStatus::Unknown);
    assert_eq!(telemetry.uart, UartStatus::Unknown);
}

#[test]
fn test_error_log_becomes_notification() {
    let h = Harness::new();
    h.feed(r#"{"t":2,"p":{"message":"error:22"}}"#);
    h.feed(r#"{"t":2,"p":{"message":"[MSG:Caution: Unlocked]"}}"#);

    let notes = h.notifications();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].title, "Controller Error");
    assert_eq!(notes[0].message, "22");
    assert_eq!(notes[0].severity, Severity::Danger);

    assert!(h.events.lock().iter().any(|e| matches!(
        e,
        AppEvent::Machine(MachineEvent::ControllerMessage { message }) if message == "[MSG:Caution: Unlocked]"
    )));
}

#[test]
fn test_settings_snapshots_merge() {
    let h = Harness::new();
    assert!(!h.model.settings_loaded());

    h.feed(r#"{"t":4,"p":{"grbl":{"jog_speed":2000,"default_timeout_ms":4000},"relays":{"alarm_behavior":1}}}"#);
    h.feed(r#"{"t":4,"p":{"grbl":{"jog_speed":2500}}}"#);

    assert!(h.model.settings_loaded());
    let settings = h.model.settings.read().settings.clone();
    let grbl = settings.grbl.expect("grbl");
    assert_eq!(grbl.jog_speed, Some(2500));
    assert_eq!(grbl.default_timeout_ms, Some(4000));
    assert_eq!(settings.relays.and_then(|r| r.alarm_behavior), Some(1));
}

#[test]
fn test_framed_stream_is_logged_in_order() {
    let h = Harness::new();
    let mut framer = Framer::new();
    let stream = b"{\"t\":2,\"p\":{\"message\":\"one\"}}\r\n{broken\n{\"t\":2,\"p\":{\"message\":\"two\"}}\n";

    for frame in framer.push(stream) {
        h.dispatcher.handle_frame(frame);
    }

    let rx: Vec<String> = h
        .log
        .entries_of(LogKind::Rx)
        .into_iter()
        .map(|e| e.text)
        .collect();
    assert_eq!(rx.len(), 2);
    assert!(rx[0].contains("one"));
    assert!(rx[1].contains("two"));
    assert_eq!(h.log.entries_of(LogKind::Debug).len(), 1);
}
