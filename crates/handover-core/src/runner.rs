//! Trial loop runner.
//!
//! [`run_trial`] drives [`run_tick`] until the trial reaches `TrialOver`,
//! handing a [`TrialSnapshot`] to a [`TickCallback`] after every tick. The
//! loop has no other exit: it ends when the trial ends or a tick fails.
//!
//! [`run_tick`]: crate::tick::run_tick

use std::time::Duration;

use handover_types::{Phase, PhaseTimestamps, TrialSnapshot};
use tracing::{error, info, warn};

use crate::collaborators::CollaboratorError;
use crate::state::TrialState;
use crate::tick::{self, TickError, TickSummary, TrialIo, TrialSettings};

/// Errors that can occur during the trial run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A tick execution failed.
    #[error("tick error: {source}")]
    Tick {
        /// The underlying tick error.
        #[from]
        source: TickError,
    },
}

/// Result of a completed trial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialResult {
    /// Phase the trial ended in.
    pub final_phase: Phase,
    /// Total number of ticks that polled the channels.
    pub total_ticks: u64,
    /// Phase-entry timestamps.
    pub timestamps: PhaseTimestamps,
    /// Measured take-over reaction time.
    pub reaction_time: Option<Duration>,
    /// Non-fatal problems surfaced over the whole trial.
    pub warnings: u64,
}

/// Callback invoked after each tick completes.
///
/// Implementations publish the snapshot for monitoring. A failing callback
/// is logged and never stops the trial.
pub trait TickCallback {
    /// Called after a tick completes successfully.
    fn on_tick(&mut self, summary: &TickSummary, snapshot: &TrialSnapshot) -> Result<(), CollaboratorError>;
}

/// A no-op tick callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCallback;

impl TickCallback for NoOpCallback {
    fn on_tick(&mut self, _summary: &TickSummary, _snapshot: &TrialSnapshot) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Run ticks until the trial is over.
///
/// # Errors
///
/// Returns [`RunnerError`] if a tick fails. Consistency violations are
/// logged at `error` before returning.
pub fn run_trial(
    state: &mut TrialState,
    io: &mut TrialIo<'_>,
    settings: &TrialSettings,
    callback: &mut dyn TickCallback,
) -> Result<TrialResult, RunnerError> {
    let mut warnings: u64 = 0;

    info!(
        participant = %settings.participant.participant_id,
        block = %settings.participant.block,
        phase = ?state.current(),
        "Trial starting"
    );

    loop {
        let summary = match tick::run_tick(state, io, settings) {
            Ok(summary) => summary,
            Err(err) => {
                error!(tick = state.tick(), phase = ?state.current(), %err, "Trial aborted");
                return Err(err.into());
            }
        };
        warnings = warnings.saturating_add(u64::from(summary.warnings));

        if let Err(err) = callback.on_tick(&summary, &state.snapshot()) {
            warn!(tick = summary.tick, %err, "Tick callback failed");
            warnings = warnings.saturating_add(1);
        }

        if summary.stop {
            return Ok(TrialResult {
                final_phase: state.current(),
                total_ticks: state.tick(),
                timestamps: *state.timestamps(),
                reaction_time: state.reaction_time(),
                warnings,
            });
        }
    }
}

/// Log the trial end.
pub fn log_trial_end(result: &TrialResult) {
    info!(
        final_phase = ?result.final_phase,
        total_ticks = result.total_ticks,
        reaction_time_ms = result
            .reaction_time
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        warnings = result.warnings,
        "Trial ended"
    );
}
