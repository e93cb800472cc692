//! Trial state owned by the tick loop.
//!
//! [`TrialState`] has exactly one writer: [`run_tick`] and the entry actions
//! it dispatches. Everything else sees a [`TrialSnapshot`].
//!
//! [`run_tick`]: crate::tick::run_tick

use std::time::Duration;

use chrono::NaiveDateTime;
use handover_types::{EyeTrackingRole, Phase, PhaseTimestamps, TrialSnapshot};

use crate::stopwatch::Stopwatch;

/// Violations of the trial's internal consistency. Always fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsistencyError {
    /// The reaction-time stopwatch was stopped while idle.
    #[error("reaction-time stopwatch stopped while idle")]
    StopwatchIdle,

    /// The measured reaction time was zero or negative.
    #[error("reaction time must be strictly positive")]
    NonPositiveElapsed,

    /// Driving-performance and interleaving eye-tracking logging were both
    /// requested.
    #[error("driving-performance and interleaving eye-tracking logging both active in {phase}")]
    ConflictingLogging {
        /// Phase in which the conflict was detected.
        phase: Phase,
    },
}

/// Which recorders are requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoggingFlags {
    /// Driving-performance sampling is active.
    pub driving: bool,
    /// Eye-tracking sampling is active.
    pub eye: bool,
    /// Role attached to eye-tracking samples.
    pub eye_role: EyeTrackingRole,
}

impl LoggingFlags {
    /// Fails if driving-performance and interleaving eye-tracking logging are
    /// both on.
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError::ConflictingLogging`].
    pub const fn ensure_exclusive(self, phase: Phase) -> Result<(), ConsistencyError> {
        if self.driving && self.eye && matches!(self.eye_role, EyeTrackingRole::Interleaving) {
            return Err(ConsistencyError::ConflictingLogging { phase });
        }
        Ok(())
    }
}

/// The controller's view of one trial.
#[derive(Debug, Clone, Default)]
pub struct TrialState {
    tick: u64,
    current: Phase,
    previous: Phase,
    phase_entered_at: Option<NaiveDateTime>,
    pub(crate) flags: LoggingFlags,
    pub(crate) stopwatch: Stopwatch,
    pub(crate) timestamps: PhaseTimestamps,
    pub(crate) reaction_time: Option<Duration>,
}

impl TrialState {
    /// A fresh trial in [`Phase::Unknown`] with every recorder off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard everything and start over in [`Phase::Unknown`].
    ///
    /// This is the only way the phase ever moves backwards.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Number of ticks that polled the channels.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Authoritative phase.
    pub const fn current(&self) -> Phase {
        self.current
    }

    /// Phase before the most recent transition.
    pub const fn previous(&self) -> Phase {
        self.previous
    }

    /// When the current phase was entered, per its source report.
    pub const fn phase_entered_at(&self) -> Option<NaiveDateTime> {
        self.phase_entered_at
    }

    /// Requested recorders.
    pub const fn flags(&self) -> LoggingFlags {
        self.flags
    }

    /// Entry timestamps recorded so far.
    pub const fn timestamps(&self) -> &PhaseTimestamps {
        &self.timestamps
    }

    /// Reaction time, once the participant has taken over.
    pub const fn reaction_time(&self) -> Option<Duration> {
        self.reaction_time
    }

    /// Whether the trial has finished.
    pub const fn is_over(&self) -> bool {
        self.current.is_terminal()
    }

    /// Read-only copy for observers.
    pub fn snapshot(&self) -> TrialSnapshot {
        TrialSnapshot {
            tick: self.tick,
            phase: self.current,
            previous_phase: self.previous,
            phase_entered_at: self.phase_entered_at,
            driving_logging: self.flags.driving,
            eye_logging: self.flags.eye,
            eye_role: self.flags.eye_role,
            reaction_time_ms: self
                .reaction_time
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        }
    }

    pub(crate) const fn begin_tick(&mut self) -> u64 {
        self.tick = self.tick.saturating_add(1);
        self.tick
    }

    pub(crate) const fn enter(&mut self, phase: Phase, at: NaiveDateTime) {
        self.previous = self.current;
        self.current = phase;
        self.phase_entered_at = Some(at);
        self.timestamps.set(phase, at);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 21)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    #[test]
    fn new_state_is_unknown_and_quiet() {
        let state = TrialState::new();
        assert_eq!(state.current(), Phase::Unknown);
        assert_eq!(state.flags(), LoggingFlags::default());
        assert!(!state.is_over());
    }

    #[test]
    fn enter_tracks_previous_and_timestamp() {
        let mut state = TrialState::new();
        state.enter(Phase::Autopilot, at());
        state.enter(Phase::TakeOver, at());
        assert_eq!(state.previous(), Phase::Autopilot);
        assert_eq!(state.current(), Phase::TakeOver);
        assert_eq!(state.timestamps().take_over, Some(at()));
    }

    #[test]
    fn reset_returns_to_unknown() {
        let mut state = TrialState::new();
        state.begin_tick();
        state.enter(Phase::TrialOver, at());
        assert!(state.is_over());
        state.reset();
        assert_eq!(state.current(), Phase::Unknown);
        assert_eq!(state.tick(), 0);
    }

    #[test]
    fn interleaving_with_driving_conflicts() {
        let flags = LoggingFlags {
            driving: true,
            eye: true,
            eye_role: EyeTrackingRole::Interleaving,
        };
        assert!(flags.ensure_exclusive(Phase::TakeOver).is_err());

        let ok = LoggingFlags {
            eye_role: EyeTrackingRole::DrivingPerformance,
            ..flags
        };
        assert!(ok.ensure_exclusive(Phase::TakeOver).is_ok());
    }

    #[test]
    fn snapshot_reports_reaction_time_in_millis() {
        let mut state = TrialState::new();
        state.reaction_time = Some(Duration::from_millis(1250));
        assert_eq!(state.snapshot().reaction_time_ms, Some(1250));
    }
}
