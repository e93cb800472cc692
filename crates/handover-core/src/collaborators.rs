//! Interfaces to everything outside the tick loop.
//!
//! The engine never talks to the simulator, the recorders or the eye tracker
//! directly. It calls these traits, which the binary implements over NATS and
//! CSV files and the tests implement with in-memory fakes.

use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use handover_types::{
    DrivingSample, EyeSample, EyeTrackingRole, ParticipantContext, PhaseTimestamps,
    VehicleTelemetry, wall_clock_now,
};

/// Failure of an external collaborator.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    /// A file or socket operation failed.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The collaborator did not answer in time.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// What was being attempted.
        operation: String,
        /// The deadline in milliseconds.
        timeout_ms: u64,
    },

    /// The collaborator is gone and will not come back.
    #[error("{what} is closed")]
    Closed {
        /// The collaborator that closed.
        what: String,
    },

    /// The collaborator answered with an error or an unusable value.
    #[error("{operation} failed: {message}")]
    Failed {
        /// What was being attempted.
        operation: String,
        /// Description of the error.
        message: String,
    },
}

/// Paces the tick loop on the simulator's frames.
pub trait FrameSource {
    /// Block until the simulator advances one frame.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if no frame can arrive any more.
    fn wait_for_frame(&mut self) -> Result<(), CollaboratorError>;
}

/// Actuation and measurement of the ego vehicle.
pub trait VehicleControl {
    /// Turn the autopilot on or off under traffic-manager `profile`.
    fn set_autopilot(&mut self, enabled: bool, profile: u16) -> Result<(), CollaboratorError>;

    /// Allow or forbid automatic lane changes.
    fn set_lane_change_enabled(&mut self, enabled: bool) -> Result<(), CollaboratorError>;

    /// Percentage below (positive) or above (negative) the speed limit the
    /// autopilot drives at.
    fn set_speed_difference_percent(&mut self, percent: f64) -> Result<(), CollaboratorError>;

    /// Percentage of other vehicles collision avoidance ignores.
    fn set_collision_avoidance_ignore_percent(&mut self, percent: f64) -> Result<(), CollaboratorError>;

    /// Posted speed limit at the ego vehicle, in km/h.
    fn speed_limit(&mut self) -> Result<f64, CollaboratorError>;

    /// Current pedal, steering, speed and lane measurements.
    fn telemetry(&mut self) -> Result<VehicleTelemetry, CollaboratorError>;
}

/// Recorder for driving-performance data.
pub trait DrivingPerformanceSink {
    /// Buffer one measurement.
    fn record(&mut self, context: &ParticipantContext, sample: &DrivingSample) -> Result<(), CollaboratorError>;

    /// Buffer the measured take-over reaction time.
    fn record_reaction_time(
        &mut self,
        context: &ParticipantContext,
        measured_at: NaiveDateTime,
        elapsed: Duration,
    ) -> Result<(), CollaboratorError>;

    /// Persist the phase-entry timestamps of a finished trial as one row.
    fn record_phase_intervals(
        &mut self,
        context: &ParticipantContext,
        timestamps: &PhaseTimestamps,
    ) -> Result<(), CollaboratorError>;

    /// Write everything buffered so far.
    fn flush(&mut self) -> Result<(), CollaboratorError>;
}

/// Source of eye-tracker measurements.
pub trait EyeTracker {
    /// The newest sample since the last call, if any.
    fn next_sample(&mut self) -> Result<Option<EyeSample>, CollaboratorError>;
}

/// Recorder for eye-tracking data.
pub trait EyeTrackingSink {
    /// Buffer one measurement taken under `role`.
    fn record(
        &mut self,
        context: &ParticipantContext,
        role: EyeTrackingRole,
        sample: &EyeSample,
    ) -> Result<(), CollaboratorError>;

    /// Write everything buffered so far.
    fn flush(&mut self) -> Result<(), CollaboratorError>;
}

/// Time as seen by the tick loop.
pub trait Clock {
    /// Monotonic instant, for measuring durations.
    fn monotonic(&self) -> Instant;

    /// Local wall-clock time, for timestamps.
    fn wall_clock(&self) -> NaiveDateTime;
}

/// The host's clocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn monotonic(&self) -> Instant {
        Instant::now()
    }

    fn wall_clock(&self) -> NaiveDateTime {
        wall_clock_now()
    }
}

/// An eye tracker that never produces samples.
///
/// Used when a trial runs without the eye-tracker bridge.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisconnectedEyeTracker;

impl EyeTracker for DisconnectedEyeTracker {
    fn next_sample(&mut self) -> Result<Option<EyeSample>, CollaboratorError> {
        Ok(None)
    }
}
