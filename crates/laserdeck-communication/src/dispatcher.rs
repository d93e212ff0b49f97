//! Inbound message routing
//!
//! Each decoded frame updates exactly the model its kind concerns. Frames
//! are handled one at a time, in arrival order, by the read loop.

use crate::protocol::{
    ControllerLog, ControllerReport, Frame, InboundMessage, StatusReport, WirePosition,
};
use crate::tracker::AckSink;
use laserdeck_core::data::{
    ActiveAccessories, ActivePins, BufferState, FlameSensorStatus, LidState, UartStatus,
};
use laserdeck_core::{
    AlarmState, AppEvent, ControllerModel, ControllerSettings, EventBus, LaserState, LogBuffer,
    LogKind, MachineEvent, Notification, Position, PositionKind, SettingsEvent,
};
use std::sync::Arc;

const ERROR_PREFIX: &str = "error:";

/// Text after a case-insensitive `error:` prefix, if there is one
fn strip_error_prefix(message: &str) -> Option<&str> {
    let head = message.get(..ERROR_PREFIX.len())?;
    head.eq_ignore_ascii_case(ERROR_PREFIX)
        .then(|| message[ERROR_PREFIX.len()..].trim())
}

fn lid_state(value: &str) -> LidState {
    match value {
        "opened" => LidState::Opened,
        "closed" => LidState::Closed,
        _ => LidState::Unknown,
    }
}

fn flame_status(value: &str) -> FlameSensorStatus {
    match value {
        "triggered" => FlameSensorStatus::Triggered,
        "ok" => FlameSensorStatus::Ok,
        _ => FlameSensorStatus::Unknown,
    }
}

impl From<WirePosition> for Position {
    fn from(p: WirePosition) -> Self {
        Position::new(p.x, p.y, p.z)
    }
}

/// Routes inbound messages to the models and the command tracker
pub struct Dispatcher {
    model: ControllerModel,
    acks: Arc<dyn AckSink>,
    log: Arc<LogBuffer>,
    events: Arc<EventBus>,
}

impl Dispatcher {
    pub fn new(
        model: ControllerModel,
        acks: Arc<dyn AckSink>,
        log: Arc<LogBuffer>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            model,
            acks,
            log,
            events,
        }
    }

    /// Log a frame and, if it decoded, dispatch its message
    pub fn handle_frame(&self, frame: Frame) {
        match frame {
            Frame::Message { raw, message } => {
                tracing::debug!("RX: {}", raw);
                self.log.push(LogKind::Rx, raw);
                self.dispatch(message);
            }
            Frame::Malformed { raw, error } => {
                tracing::warn!("Dropping frame: {} ({})", error, raw);
                self.log.push(LogKind::Debug, format!("{}: {}", error, raw));
            }
        }
    }

    /// Apply one decoded message
    pub fn dispatch(&self, message: InboundMessage) {
        match message {
            InboundMessage::StatusReport(report) => self.apply_status_report(report),
            InboundMessage::ControllerReport(report) => self.apply_controller_report(report),
            InboundMessage::ControllerLog(log) => self.handle_controller_log(log),
            InboundMessage::CommandAck(ack) => self.acks.acknowledge(ack.id, ack.success, ack.error),
            InboundMessage::SettingsSnapshot(settings) => self.apply_settings(settings),
        }
    }

    fn apply_status_report(&self, report: StatusReport) {
        {
            let mut telemetry = self.model.telemetry.write();
            let sensors = &report.sensors;

            telemetry.cooling.input_flow = sensors.cooling.flow.input;
            telemetry.cooling.output_flow = sensors.cooling.flow.output;
            telemetry.cooling.input_temperature = sensors.cooling.temp.input;
            telemetry.cooling.output_temperature = sensors.cooling.temp.output;

            telemetry.front_lid = lid_state(&sensors.lids.front);
            telemetry.back_lid = lid_state(&sensors.lids.back);
            telemetry.flame_sensor = flame_status(&sensors.flame_sensor);

            telemetry.alerts.cooling = report.alerts.cooling;
            telemetry.alerts.lids = report.alerts.lids;
            telemetry.alerts.flame_sensor = report.alerts.flame_sensor;

            telemetry.relays.interlock = report.relays.interlock;
            telemetry.relays.alarm = report.relays.alarm;
            telemetry.relays.lights = report.relays.lights;
            telemetry.relays.accessory = report.relays.accessory;
            telemetry.relays.air_assist = report.relays.air_assist;

            telemetry.uart = UartStatus::from_code(report.uart);
        }
        self.events
            .publish(AppEvent::Machine(MachineEvent::TelemetryUpdated));
    }

    fn apply_controller_report(&self, report: ControllerReport) {
        let mut transitions = Vec::new();
        {
            let mut machine = self.model.machine.write();

            if let Some(code) = report.state {
                let new = LaserState::from_code(code);
                if new != machine.state {
                    transitions.push(MachineEvent::StateChanged {
                        old: machine.state,
                        new,
                    });
                }
                machine.state = new;
            }

            if let Some(code) = report.alarm {
                let alarm = AlarmState::from_code(code);
                if alarm != machine.alarm {
                    transitions.push(MachineEvent::AlarmChanged { alarm });
                }
                machine.alarm = alarm;
            }

            if let Some(pos) = report.w_pos {
                machine.set_position(PositionKind::Work, pos.into());
            }
            if let Some(pos) = report.m_pos {
                machine.set_position(PositionKind::Machine, pos.into());
            }
            if let Some(pos) = report.wco {
                machine.set_position(PositionKind::Offset, pos.into());
            }

            if let Some(feed) = report.feed {
                if let Some(rate) = feed.rate {
                    machine.feed_rate = rate;
                }
                if let Some(speed) = feed.spindle_speed {
                    machine.spindle_speed = speed;
                }
            }

            if let Some(line) = report.line_number {
                machine.line_number = Some(line);
            }

            if let Some(buffer) = report.buffer {
                machine.buffer = Some(BufferState {
                    planned_blocks_available: buffer.planned_buffer_available_blocks,
                    rx_bytes_available: buffer.rx_buffer_available_bytes,
                });
            }

            if let Some(pins) = report.active_pins {
                machine.active_pins = ActivePins {
                    x: pins.x,
                    y: pins.y,
                    z: pins.z,
                    probe: pins.p,
                    door: pins.d,
                    hold: pins.h,
                    reset: pins.r,
                    start: pins.s,
                };
            }

            if let Some(acc) = report.active_accessories {
                machine.active_accessories = ActiveAccessories {
                    spindle_cw: acc.spindle_cw,
                    spindle_ccw: acc.spindle_ccw,
                    flood_coolant: acc.flood_coolant,
                    mist_coolant: acc.mist_coolant,
                };
            }
        }

        for event in transitions {
            tracing::info!("{:?}", event);
            self.events.publish(AppEvent::Machine(event));
        }
    }

    fn handle_controller_log(&self, log: ControllerLog) {
        match strip_error_prefix(&log.message) {
            Some(error) => {
                tracing::warn!("Controller error: {}", error);
                self.events
                    .notify(Notification::danger("Controller Error", error));
            }
            None => {
                tracing::info!("Controller: {}", log.message);
                self.events
                    .publish(AppEvent::Machine(MachineEvent::ControllerMessage {
                        message: log.message,
                    }));
            }
        }
    }

    fn apply_settings(&self, settings: ControllerSettings) {
        self.model.settings.write().apply_snapshot(settings);
        tracing::info!("Controller settings loaded");
        self.events
            .publish(AppEvent::Settings(SettingsEvent::Loaded));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingAcks(Mutex<Vec<(u32, bool, Option<String>)>>);

    impl AckSink for RecordingAcks {
        fn acknowledge(&self, id: u32, success: bool, error: Option<String>) {
            self.0.lock().push((id, success, error));
        }
    }

    fn dispatcher() -> (Dispatcher, ControllerModel, Arc<RecordingAcks>, Arc<LogBuffer>) {
        let model = ControllerModel::new();
        let acks = Arc::new(RecordingAcks::default());
        let log = Arc::new(LogBuffer::default());
        let dispatcher = Dispatcher::new(
            model.clone(),
            acks.clone(),
            log.clone(),
            Arc::new(EventBus::new()),
        );
        (dispatcher, model, acks, log)
    }

    #[test]
    fn test_error_prefix() {
        assert_eq!(strip_error_prefix("error:9"), Some("9"));
        assert_eq!(strip_error_prefix("ERROR: Soft limit"), Some("Soft limit"));
        assert_eq!(strip_error_prefix("Error:"), Some(""));
        assert_eq!(strip_error_prefix("[MSG:error: nested]"), None);
        assert_eq!(strip_error_prefix("err"), None);
        assert_eq!(strip_error_prefix("érror:x"), None);
    }

    #[test]
    fn test_ack_is_forwarded_verbatim() {
        let (dispatcher, _, acks, log) = dispatcher();
        let frame = Frame::Message {
            raw: r#"{"t":3,"p":{"id":5,"success":false,"error":"busy"}}"#.to_string(),
            message: InboundMessage::decode(r#"{"t":3,"p":{"id":5,"success":false,"error":"busy"}}"#)
                .expect("decode"),
        };
        dispatcher.handle_frame(frame);

        assert_eq!(
            acks.0.lock().as_slice(),
            &[(5, false, Some("busy".to_string()))]
        );
        assert_eq!(log.entries_of(LogKind::Rx).len(), 1);
    }

    #[test]
    fn test_status_report_updates_telemetry() {
        let (dispatcher, model, _, _) = dispatcher();
        let message = InboundMessage::decode(
            r#"{"t":0,"p":{"sensors":{"cooling":{"flow":{"in":3.1,"out":3.0},"temp":{"in":18.0,"out":22.5}},"lids":{"front":"closed","back":"opened"},"flame_sensor":"triggered"},"alerts":{"cooling":false,"lids":true,"flame_sensor":true},"relays":{"interlock":false,"alarm":true,"lights":true,"accessory":false,"air_assist":false},"uart":7}}"#,
        )
        .expect("decode");
        dispatcher.dispatch(message);

        let telemetry = model.telemetry_snapshot();
        assert_eq!(telemetry.cooling.input_flow, 3.1);
        assert_eq!(telemetry.cooling.output_temperature, 22.5);
        assert_eq!(telemetry.front_lid, LidState::Closed);
        assert_eq!(telemetry.back_lid, LidState::Opened);
        assert_eq!(telemetry.flame_sensor, FlameSensorStatus::Triggered);
        assert!(telemetry.alerts.flame_sensor);
        assert!(telemetry.relays.alarm);
        assert_eq!(telemetry.uart, UartStatus::Unknown);
    }

    #[test]
    fn test_malformed_frame_goes_to_debug_log() {
        let (dispatcher, _, acks, log) = dispatcher();
        dispatcher.handle_frame(Frame::Malformed {
            raw: "garbage".to_string(),
            error: laserdeck_core::ProtocolError::MalformedFrame {
                reason: "expected value".to_string(),
            },
        });

        assert!(acks.0.lock().is_empty());
        assert!(log.entries_of(LogKind::Rx).is_empty());
        let debug = log.entries_of(LogKind::Debug);
        assert_eq!(debug.len(), 1);
        assert!(debug[0].text.ends_with("garbage"));
    }
}
