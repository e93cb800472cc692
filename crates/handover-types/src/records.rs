//! Values handed to metric sinks and observers.
//!
//! The controller never interprets [`ParticipantContext`]; it is attached to
//! every record so rows from different blocks and participants can share one
//! table.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::phase::{EyeTrackingRole, Phase};

/// Independent variables of the trial block currently running.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantContext {
    /// Participant identifier (e.g. `P07`).
    pub participant_id: String,
    /// Trial-block identifier (configuration section name).
    pub block: String,
    /// How the take-over request interrupts the secondary task.
    pub interruption_method: String,
    /// Secondary task type.
    pub task_type: String,
    /// Secondary task difficulty setting.
    pub task_setting: String,
    /// Traffic-complexity label.
    pub traffic: String,
}

impl ParticipantContext {
    /// Column names shared by every record table, in order.
    pub const COLUMNS: [&'static str; 5] = [
        "ParticipantID",
        "InterruptionMethod",
        "TaskType",
        "TaskSetting",
        "Traffic",
    ];

    /// Values for [`ParticipantContext::COLUMNS`], in order.
    pub fn columns(&self) -> [&str; 5] {
        [
            &self.participant_id,
            &self.interruption_method,
            &self.task_type,
            &self.task_setting,
            &self.traffic,
        ]
    }
}

/// Raw vehicle measurements read from the simulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleTelemetry {
    /// Brake pedal, normalized 0..=1.
    pub brake: f64,
    /// Throttle pedal, normalized 0..=1.
    pub throttle: f64,
    /// Steering wheel angle in degrees.
    pub steering_angle_deg: f64,
    /// Ego speed in km/h.
    pub speed_kmh: f64,
    /// Lane identifier of the nearest waypoint.
    pub lane_id: i32,
    /// Distance from the lane centre in metres.
    pub lane_offset_m: f64,
}

/// One driving-performance measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrivingSample {
    /// Wall-clock time the measurement was taken.
    pub recorded_at: NaiveDateTime,
    /// The measurement.
    pub telemetry: VehicleTelemetry,
}

/// One eye-tracker measurement, already converted to system time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EyeSample {
    /// System time of the measurement.
    pub captured_at: NaiveDateTime,
    /// Right pupil diameter in millimetres, if both eyes were seen.
    #[serde(default)]
    pub right_pupil_mm: Option<f64>,
    /// Left pupil diameter in millimetres, if both eyes were seen.
    #[serde(default)]
    pub left_pupil_mm: Option<f64>,
    /// Blink event type (`onset`, `offset`), if one occurred.
    #[serde(default)]
    pub blink: Option<String>,
}

/// Entry timestamps for the phases persisted at the end of a trial.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTimestamps {
    /// Entered [`Phase::Autopilot`].
    pub autopilot: Option<NaiveDateTime>,
    /// Entered [`Phase::PreAlertAutopilot`].
    pub pre_alert_autopilot: Option<NaiveDateTime>,
    /// Entered [`Phase::TakeOver`].
    pub take_over: Option<NaiveDateTime>,
    /// Entered [`Phase::TakeOverManual`].
    pub take_over_manual: Option<NaiveDateTime>,
    /// Entered [`Phase::ResumedAutopilot`].
    pub resumed_autopilot: Option<NaiveDateTime>,
    /// Entered [`Phase::TrialOver`].
    pub trial_over: Option<NaiveDateTime>,
}

impl PhaseTimestamps {
    /// Record the entry time for `phase`. Phases without a column are ignored.
    pub const fn set(&mut self, phase: Phase, at: NaiveDateTime) {
        match phase {
            Phase::Autopilot => self.autopilot = Some(at),
            Phase::PreAlertAutopilot => self.pre_alert_autopilot = Some(at),
            Phase::TakeOver => self.take_over = Some(at),
            Phase::TakeOverManual => self.take_over_manual = Some(at),
            Phase::ResumedAutopilot => self.resumed_autopilot = Some(at),
            Phase::TrialOver => self.trial_over = Some(at),
            Phase::Unknown | Phase::ManualDrive => {}
        }
    }

    /// Entry time recorded for `phase`.
    pub const fn get(&self, phase: Phase) -> Option<NaiveDateTime> {
        match phase {
            Phase::Autopilot => self.autopilot,
            Phase::PreAlertAutopilot => self.pre_alert_autopilot,
            Phase::TakeOver => self.take_over,
            Phase::TakeOverManual => self.take_over_manual,
            Phase::ResumedAutopilot => self.resumed_autopilot,
            Phase::TrialOver => self.trial_over,
            Phase::Unknown | Phase::ManualDrive => None,
        }
    }

    /// Entry times in [`Phase::RECORDED`] order.
    pub fn in_column_order(&self) -> [Option<NaiveDateTime>; 6] {
        Phase::RECORDED.map(|phase| self.get(phase))
    }
}

/// Read-only view of the trial state after a tick, for observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialSnapshot {
    /// Tick counter (1 = first tick of the trial).
    pub tick: u64,
    /// Authoritative phase.
    pub phase: Phase,
    /// Phase before the most recent transition.
    pub previous_phase: Phase,
    /// When the current phase was entered, as reported by its source.
    pub phase_entered_at: Option<NaiveDateTime>,
    /// Driving-performance logging requested.
    pub driving_logging: bool,
    /// Eye-tracking logging requested.
    pub eye_logging: bool,
    /// Current eye-tracking role.
    pub eye_role: EyeTrackingRole,
    /// Measured reaction time in milliseconds, once known.
    pub reaction_time_ms: Option<u64>,
}
