//! CSV-backed metric sinks.
//!
//! ```text
//! <data_dir>/
//!   DrivingData/   braking_input, throttle_input, steering_angles,
//!                  lane_offset, speed, reaction_time
//!   EyeData/       eye_diameter, eye_blinks
//!   IntervalData/  interval_timestamps
//! ```

use std::path::Path;
use std::time::Duration;

use chrono::NaiveDateTime;
use handover_core::collaborators::{CollaboratorError, DrivingPerformanceSink, EyeTrackingSink};
use handover_types::{
    DrivingSample, EyeSample, EyeTrackingRole, ParticipantContext, PhaseTimestamps,
    format_timestamp,
};
use tracing::warn;

use crate::csv::{CsvTable, RecordError};

impl From<RecordError> for CollaboratorError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::Io { source } => Self::Io { source },
            other @ RecordError::HeaderMismatch { .. } => Self::Failed {
                operation: "record flush".to_owned(),
                message: other.to_string(),
            },
        }
    }
}

/// Flush every table, returning the first failure after trying them all.
fn flush_all<'a>(tables: impl IntoIterator<Item = &'a mut CsvTable>) -> Result<(), RecordError> {
    let mut first_error = None;
    for table in tables {
        if let Err(err) = table.flush() {
            warn!(path = %table.path().display(), %err, "Table flush failed");
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}

fn optional_timestamp(at: Option<NaiveDateTime>) -> String {
    at.as_ref().map(format_timestamp).unwrap_or_default()
}

/// Driving-performance recorder writing the `DrivingData` and
/// `IntervalData` tables.
#[derive(Debug, Clone)]
pub struct CsvDrivingSink {
    braking: CsvTable,
    throttle: CsvTable,
    steering: CsvTable,
    lane_offset: CsvTable,
    speed: CsvTable,
    reaction_time: CsvTable,
    intervals: CsvTable,
}

impl CsvDrivingSink {
    /// Tables rooted at `data_dir`. Nothing is created until the first flush.
    pub fn new(data_dir: &Path) -> Self {
        let driving = data_dir.join("DrivingData");
        let table = |name: &str, columns: &[&str]| {
            CsvTable::new(driving.join(format!("{name}.csv")), columns)
        };
        Self {
            braking: table("braking_input", &["Timestamp", "BrakingInput"]),
            throttle: table("throttle_input", &["Timestamp", "AccelerationInput"]),
            steering: table("steering_angles", &["Timestamp", "SteeringAngle"]),
            lane_offset: table("lane_offset", &["Timestamp", "LaneID", "LaneOffset"]),
            speed: table("speed", &["Timestamp", "Speed"]),
            reaction_time: table("reaction_time", &["Timestamp", "ReactionTime"]),
            intervals: CsvTable::new(
                data_dir.join("IntervalData").join("interval_timestamps.csv"),
                &[
                    "Autopilot",
                    "PreAlertAutopilot",
                    "TakeOver",
                    "TakeOverManual",
                    "ResumedAutopilot",
                    "TrialOver",
                ],
            ),
        }
    }

    /// Rows buffered across all tables.
    pub fn pending(&self) -> usize {
        self.tables().iter().map(|t| t.pending()).sum()
    }

    const fn tables(&self) -> [&CsvTable; 7] {
        [
            &self.braking,
            &self.throttle,
            &self.steering,
            &self.lane_offset,
            &self.speed,
            &self.reaction_time,
            &self.intervals,
        ]
    }
}

impl DrivingPerformanceSink for CsvDrivingSink {
    fn record(&mut self, context: &ParticipantContext, sample: &DrivingSample) -> Result<(), CollaboratorError> {
        let at = format_timestamp(&sample.recorded_at);
        let t = &sample.telemetry;
        self.braking.push_row(context, [at.clone(), t.brake.to_string()]);
        self.throttle.push_row(context, [at.clone(), t.throttle.to_string()]);
        self.steering
            .push_row(context, [at.clone(), t.steering_angle_deg.to_string()]);
        self.lane_offset.push_row(
            context,
            [at.clone(), t.lane_id.to_string(), t.lane_offset_m.to_string()],
        );
        self.speed.push_row(context, [at, t.speed_kmh.to_string()]);
        Ok(())
    }

    fn record_reaction_time(
        &mut self,
        context: &ParticipantContext,
        measured_at: NaiveDateTime,
        elapsed: Duration,
    ) -> Result<(), CollaboratorError> {
        self.reaction_time.push_row(
            context,
            [format_timestamp(&measured_at), elapsed.as_secs_f64().to_string()],
        );
        Ok(())
    }

    fn record_phase_intervals(
        &mut self,
        context: &ParticipantContext,
        timestamps: &PhaseTimestamps,
    ) -> Result<(), CollaboratorError> {
        self.intervals
            .push_row(context, timestamps.in_column_order().map(optional_timestamp));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), CollaboratorError> {
        flush_all([
            &mut self.braking,
            &mut self.throttle,
            &mut self.steering,
            &mut self.lane_offset,
            &mut self.speed,
            &mut self.reaction_time,
            &mut self.intervals,
        ])?;
        Ok(())
    }
}

/// Eye-tracking recorder writing the `EyeData` tables.
///
/// A pupil row is written only when both diameters are present; a blink row
/// only when the sample carries a blink.
#[derive(Debug, Clone)]
pub struct CsvEyeSink {
    diameter: CsvTable,
    blinks: CsvTable,
}

impl CsvEyeSink {
    /// Tables rooted at `data_dir`.
    pub fn new(data_dir: &Path) -> Self {
        let eye = data_dir.join("EyeData");
        Self {
            diameter: CsvTable::new(
                eye.join("eye_diameter.csv"),
                &["Timestamp", "Role", "RightEyeDiameter", "LeftEyeDiameter"],
            ),
            blinks: CsvTable::new(eye.join("eye_blinks.csv"), &["Timestamp", "Role", "BlinkType"]),
        }
    }

    /// Rows buffered across both tables.
    pub fn pending(&self) -> usize {
        self.diameter.pending().saturating_add(self.blinks.pending())
    }
}

impl EyeTrackingSink for CsvEyeSink {
    fn record(
        &mut self,
        context: &ParticipantContext,
        role: EyeTrackingRole,
        sample: &EyeSample,
    ) -> Result<(), CollaboratorError> {
        let at = format_timestamp(&sample.captured_at);
        if let (Some(right), Some(left)) = (sample.right_pupil_mm, sample.left_pupil_mm) {
            self.diameter.push_row(
                context,
                [at.clone(), role.as_str().to_owned(), right.to_string(), left.to_string()],
            );
        }
        if let Some(blink) = &sample.blink {
            self.blinks
                .push_row(context, [at, role.as_str().to_owned(), blink.clone()]);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), CollaboratorError> {
        flush_all([&mut self.diameter, &mut self.blinks])?;
        Ok(())
    }
}

/// Recorder that drops everything, for blocks run with
/// `LogPerformance="False"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

impl DrivingPerformanceSink for DiscardSink {
    fn record(&mut self, _context: &ParticipantContext, _sample: &DrivingSample) -> Result<(), CollaboratorError> {
        Ok(())
    }

    fn record_reaction_time(
        &mut self,
        _context: &ParticipantContext,
        _measured_at: NaiveDateTime,
        _elapsed: Duration,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }

    fn record_phase_intervals(
        &mut self,
        _context: &ParticipantContext,
        _timestamps: &PhaseTimestamps,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }

    fn flush(&mut self) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

impl EyeTrackingSink for DiscardSink {
    fn record(
        &mut self,
        _context: &ParticipantContext,
        _role: EyeTrackingRole,
        _sample: &EyeSample,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }

    fn flush(&mut self) -> Result<(), CollaboratorError> {
        Ok(())
    }
}
