//! Controller configuration tree
//!
//! Mirrors the configuration the controller pushes on request. Every leaf
//! is optional: snapshots and patches alike may carry any subset, and a
//! merge only overwrites what the incoming tree actually contains.

use serde::{Deserialize, Serialize};

/// Deep merge of a partial tree into an existing one
pub trait Merge {
    /// Overwrite every field present in `patch`, recursing into subtrees
    fn merge(&mut self, patch: Self);
}

fn merge_leaf<T>(target: &mut Option<T>, patch: Option<T>) {
    if patch.is_some() {
        *target = patch;
    }
}

fn merge_child<T: Merge + Default>(target: &mut Option<T>, patch: Option<T>) {
    if let Some(patch) = patch {
        target.get_or_insert_with(T::default).merge(patch);
    }
}

/// How the bed (Z table) is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BedControlMode {
    /// Through the motion firmware
    Grbl = 1,
    /// Directly by the controller's own stepper driver
    Stepper = 2,
}

impl BedControlMode {
    /// Map the wire code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(BedControlMode::Grbl),
            2 => Some(BedControlMode::Stepper),
            _ => None,
        }
    }
}

/// Alarm relay behavior bits
pub mod alarm_behavior {
    pub const ENABLE_WHEN_RUNNING: u32 = 1 << 0;
    pub const ENABLE_WHEN_NOT_IDLING: u32 = 1 << 1;
    pub const ENABLE_WHEN_FLAME_SENSOR_TRIGGERED: u32 = 1 << 2;
    pub const ENABLE_WHEN_COOLING_ISSUE: u32 = 1 << 3;
    pub const ENABLE_WHEN_LID_OPENED: u32 = 1 << 4;
}

/// Interlock relay behavior bits
pub mod interlock_behavior {
    pub const DISABLE_WHEN_LID_OPENED: u32 = 1 << 0;
    pub const DISABLE_WHEN_COOLING_ISSUE: u32 = 1 << 1;
    pub const DISABLE_WHEN_FLAME_SENSOR_TRIGGERED: u32 = 1 << 2;
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BedSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_mode: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screw_lead_um: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub microstep_multiplier: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps_per_revolution: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moving_speed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homing_speed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_distance_um: Option<u32>,
}

impl BedSettings {
    /// Decoded control mode, if reported and known
    pub fn control_mode(&self) -> Option<BedControlMode> {
        self.control_mode.and_then(BedControlMode::from_code)
    }
}

impl Merge for BedSettings {
    fn merge(&mut self, patch: Self) {
        merge_leaf(&mut self.control_mode, patch.control_mode);
        merge_leaf(&mut self.screw_lead_um, patch.screw_lead_um);
        merge_leaf(&mut self.microstep_multiplier, patch.microstep_multiplier);
        merge_leaf(&mut self.steps_per_revolution, patch.steps_per_revolution);
        merge_leaf(&mut self.moving_speed, patch.moving_speed);
        merge_leaf(&mut self.homing_speed, patch.homing_speed);
        merge_leaf(&mut self.backoff_distance_um, patch.backoff_distance_um);
    }
}

/// Accepted range for one probe
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeRange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl ProbeRange {
    /// Whether `value` lies inside the configured bounds
    pub fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }
}

impl Merge for ProbeRange {
    fn merge(&mut self, patch: Self) {
        merge_leaf(&mut self.min, patch.min);
        merge_leaf(&mut self.max, patch.max);
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoolingProbes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<ProbeRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp: Option<ProbeRange>,
}

impl Merge for CoolingProbes {
    fn merge(&mut self, patch: Self) {
        merge_child(&mut self.flow, patch.flow);
        merge_child(&mut self.temp, patch.temp);
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooling: Option<CoolingProbes>,
}

impl Merge for ProbeSettings {
    fn merge(&mut self, patch: Self) {
        merge_child(&mut self.cooling, patch.cooling);
    }
}

/// Over-the-air update credentials
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OtaSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Merge for OtaSettings {
    fn merge(&mut self, patch: Self) {
        merge_leaf(&mut self.login, patch.login);
        merge_leaf(&mut self.password, patch.password);
    }
}

/// Motion firmware link settings, including the command timeouts the
/// controller itself applies
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GrblSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jog_speed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homing_timeout_ms: Option<u64>,
}

impl Merge for GrblSettings {
    fn merge(&mut self, patch: Self) {
        merge_leaf(&mut self.jog_speed, patch.jog_speed);
        merge_leaf(&mut self.default_timeout_ms, patch.default_timeout_ms);
        merge_leaf(&mut self.homing_timeout_ms, patch.homing_timeout_ms);
    }
}

/// Relay automation bit masks (see [`alarm_behavior`] and [`interlock_behavior`])
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alarm_behavior: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interlock_behavior: Option<u32>,
}

impl Merge for RelaySettings {
    fn merge(&mut self, patch: Self) {
        merge_leaf(&mut self.alarm_behavior, patch.alarm_behavior);
        merge_leaf(&mut self.interlock_behavior, patch.interlock_behavior);
    }
}

/// The full controller configuration tree
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bed: Option<BedSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probes: Option<ProbeSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ota: Option<OtaSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grbl: Option<GrblSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relays: Option<RelaySettings>,
}

impl Merge for ControllerSettings {
    fn merge(&mut self, patch: Self) {
        merge_child(&mut self.bed, patch.bed);
        merge_child(&mut self.probes, patch.probes);
        merge_child(&mut self.ota, patch.ota);
        merge_child(&mut self.grbl, patch.grbl);
        merge_child(&mut self.relays, patch.relays);
    }
}

/// Local copy of the controller configuration
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SettingsModel {
    /// Merged configuration tree
    pub settings: ControllerSettings,
    /// Set once the first snapshot has been merged
    pub loaded: bool,
}

impl SettingsModel {
    /// Merge a snapshot and mark the model loaded
    pub fn apply_snapshot(&mut self, snapshot: ControllerSettings) {
        self.settings.merge(snapshot);
        self.loaded = true;
    }

    /// Command timeout reported by the controller
    pub fn default_timeout_ms(&self) -> Option<u64> {
        self.settings.grbl.as_ref()?.default_timeout_ms
    }

    /// Homing timeout reported by the controller
    pub fn homing_timeout_ms(&self) -> Option<u64> {
        self.settings.grbl.as_ref()?.homing_timeout_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_absent_fields() {
        let mut settings = ControllerSettings {
            grbl: Some(GrblSettings {
                jog_speed: Some(1000),
                default_timeout_ms: Some(2000),
                homing_timeout_ms: Some(30000),
            }),
            ..Default::default()
        };

        settings.merge(ControllerSettings {
            grbl: Some(GrblSettings {
                jog_speed: Some(1500),
                ..Default::default()
            }),
            ..Default::default()
        });

        let grbl = settings.grbl.expect("grbl subtree");
        assert_eq!(grbl.jog_speed, Some(1500));
        assert_eq!(grbl.default_timeout_ms, Some(2000));
        assert_eq!(grbl.homing_timeout_ms, Some(30000));
    }

    #[test]
    fn test_merge_creates_missing_subtrees() {
        let mut settings = ControllerSettings::default();
        settings.merge(ControllerSettings {
            probes: Some(ProbeSettings {
                cooling: Some(CoolingProbes {
                    flow: Some(ProbeRange {
                        min: Some(1.0),
                        max: Some(3.2),
                    }),
                    temp: None,
                }),
            }),
            ..Default::default()
        });

        let flow = settings
            .probes
            .and_then(|p| p.cooling)
            .and_then(|c| c.flow)
            .expect("flow range");
        assert_eq!(flow.min, Some(1.0));
        assert!(flow.contains(2.0));
        assert!(!flow.contains(4.0));
    }

    #[test]
    fn test_snapshot_marks_loaded() {
        let mut model = SettingsModel::default();
        assert!(!model.loaded);
        assert_eq!(model.homing_timeout_ms(), None);

        model.apply_snapshot(ControllerSettings {
            grbl: Some(GrblSettings {
                homing_timeout_ms: Some(5000),
                ..Default::default()
            }),
            ..Default::default()
        });

        assert!(model.loaded);
        assert_eq!(model.homing_timeout_ms(), Some(5000));
        assert_eq!(model.default_timeout_ms(), None);
    }

    #[test]
    fn test_partial_tree_serializes_sparse() {
        let patch = ControllerSettings {
            relays: Some(RelaySettings {
                alarm_behavior: Some(
                    alarm_behavior::ENABLE_WHEN_RUNNING | alarm_behavior::ENABLE_WHEN_LID_OPENED,
                ),
                interlock_behavior: None,
            }),
            ..Default::default()
        };
        let json = serde_json::to_string(&patch).expect("serialize");
        assert_eq!(json, r#"{"relays":{"alarm_behavior":17}}"#);
    }

    #[test]
    fn test_bed_control_mode() {
        let bed = BedSettings {
            control_mode: Some(2),
            ..Default::default()
        };
        assert_eq!(bed.control_mode(), Some(BedControlMode::Stepper));
        assert_eq!(BedControlMode::from_code(7), None);
    }
}
