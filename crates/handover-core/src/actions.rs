//! Phase entry actions.
//!
//! | Phase entered      | Effect                                                         |
//! |--------------------|----------------------------------------------------------------|
//! | `Autopilot`        | eye tracking on (interleaving), driving performance off        |
//! | `PreAlertAutopilot`| timestamp only                                                 |
//! | `TakeOver`         | stopwatch start, eye role driving-performance, driving on      |
//! | `TakeOverManual`   | stopwatch stop, reaction time recorded                         |
//! | `ResumedAutopilot` | driving flushed and off, eye role interleaving, autopilot back |
//! | `TrialOver`        | interval row, autopilot off, eye tracking flushed and off      |
//!
//! Every entered phase also records its entry timestamp, which
//! [`TrialState`] does as part of the transition.
//!
//! Only consistency violations fail an entry. Recorder and control-surface
//! failures are logged and counted; the remaining effects still run.

use chrono::NaiveDateTime;
use handover_types::{EyeTrackingRole, Phase};
use tracing::{info, warn};

use crate::collaborators::{CollaboratorError, VehicleControl};
use crate::config::VehicleConfig;
use crate::state::{ConsistencyError, TrialState};
use crate::tick::{TrialIo, TrialSettings};

/// What entering a phase did besides mutating the state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryOutcome {
    /// The trial reached its terminal phase; the loop should stop.
    pub finished: bool,
    /// Non-fatal collaborator failures surfaced while entering.
    pub failures: u32,
}

impl EntryOutcome {
    fn surface(&mut self, phase: Phase, operation: &str, result: Result<(), CollaboratorError>) {
        if let Err(err) = result {
            warn!(?phase, operation, %err, "Entry action failed");
            self.failures = self.failures.saturating_add(1);
        }
    }
}

/// Run the entry actions for `phase`, which the trial entered at `entered_at`.
///
/// Must be called exactly once per transition, after [`TrialState`] has
/// moved to `phase`.
///
/// # Errors
///
/// Returns [`ConsistencyError`] if the reaction-time stopwatch is misused.
pub fn enter_phase(
    phase: Phase,
    entered_at: NaiveDateTime,
    state: &mut TrialState,
    io: &mut TrialIo<'_>,
    settings: &TrialSettings,
) -> Result<EntryOutcome, ConsistencyError> {
    let mut outcome = EntryOutcome::default();
    let context = &settings.participant;

    match phase {
        Phase::Unknown | Phase::ManualDrive | Phase::PreAlertAutopilot => {}

        Phase::Autopilot => {
            state.flags.eye = true;
            state.flags.eye_role = EyeTrackingRole::Interleaving;
            state.flags.driving = false;
        }

        Phase::TakeOver => {
            state.stopwatch.start(io.clock.monotonic());
            state.flags.eye_role = EyeTrackingRole::DrivingPerformance;
            state.flags.driving = true;
        }

        Phase::TakeOverManual => {
            let elapsed = state.stopwatch.stop(io.clock.monotonic())?;
            state.reaction_time = Some(elapsed);
            info!(
                reaction_time_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "Reaction time measured"
            );
            let result = io
                .driving
                .record_reaction_time(context, io.clock.wall_clock(), elapsed);
            outcome.surface(phase, "record reaction time", result);
        }

        Phase::ResumedAutopilot => {
            state.flags.driving = false;
            outcome.surface(phase, "flush driving performance", io.driving.flush());
            state.flags.eye_role = EyeTrackingRole::Interleaving;
            resume_autopilot(io.vehicle, &settings.vehicle, &mut outcome);
        }

        Phase::TrialOver => {
            let result = io.driving.record_phase_intervals(context, &state.timestamps);
            outcome.surface(phase, "record phase intervals", result);
            state.flags.driving = false;
            outcome.surface(phase, "flush driving performance", io.driving.flush());

            let result = io
                .vehicle
                .set_autopilot(false, settings.vehicle.traffic_manager_port);
            outcome.surface(phase, "disable autopilot", result);

            state.flags.eye = false;
            outcome.surface(phase, "flush eye tracking", io.eye.flush());
            outcome.finished = true;
        }
    }

    info!(
        ?phase,
        entered_at = %handover_types::format_timestamp(&entered_at),
        driving = state.flags.driving,
        eye = state.flags.eye,
        eye_role = %state.flags.eye_role,
        "Phase entered"
    );
    Ok(outcome)
}

/// Hand the vehicle back to the traffic manager with the resume settings.
fn resume_autopilot(vehicle: &mut dyn VehicleControl, config: &VehicleConfig, outcome: &mut EntryOutcome) {
    let phase = Phase::ResumedAutopilot;

    outcome.surface(
        phase,
        "set lane change",
        vehicle.set_lane_change_enabled(config.resume_lane_change),
    );

    let result = resume_speed_difference(vehicle, config)
        .and_then(|percent| vehicle.set_speed_difference_percent(percent));
    outcome.surface(phase, "set speed difference", result);

    outcome.surface(
        phase,
        "set collision avoidance",
        vehicle.set_collision_avoidance_ignore_percent(config.resume_ignore_vehicles_percent),
    );

    outcome.surface(
        phase,
        "enable autopilot",
        vehicle.set_autopilot(true, config.traffic_manager_port),
    );
}

/// Speed difference for the resume target, relative to the posted limit.
///
/// Without a configured target the vehicle follows the limit exactly.
pub fn resume_speed_difference(
    vehicle: &mut dyn VehicleControl,
    config: &VehicleConfig,
) -> Result<f64, CollaboratorError> {
    let Some(target) = config.resume_target_speed_kmh else {
        return Ok(0.0);
    };
    let limit = vehicle.speed_limit()?;
    if limit <= 0.0 || !limit.is_finite() {
        return Err(CollaboratorError::Failed {
            operation: "read speed limit".to_owned(),
            message: format!("unusable speed limit {limit}"),
        });
    }
    Ok((limit - target) / limit * 100.0)
}
