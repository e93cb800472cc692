//! One controller tick.
//!
//! Each tick runs these steps in order:
//!
//! 1. **Terminal check** -- a finished trial polls nothing and reports stop.
//! 2. **Frame** -- wait for the simulator to advance one frame. A wait that
//!    times out ends the tick early without stopping the trial.
//! 3. **Poll** -- take at most one report from each status channel. A miss,
//!    a closed channel or a malformed message all count as no report.
//! 4. **Merge** -- [`reconcile`] the reports against the current phase and
//!    forward an accepted scenario phase to the simulator.
//! 5. **Enter** -- on a phase change, move the state and run the entry
//!    actions for the new phase.
//! 6. **Check** -- driving-performance and interleaving logging must not
//!    both be active.
//! 7. **Sample** -- feed the active recorders. Skipped on the tick that ends
//!    the trial.
//!
//! Only consistency violations and a closed frame source fail the tick.
//!
//! [`reconcile`]: crate::reconcile::reconcile

use std::time::Duration;

use handover_types::{
    DrivingSample, Origin, ParticipantContext, Phase, StatusMessage, StatusReport,
};
use tracing::{debug, info, warn};

use crate::actions;
use crate::channel::{ChannelError, StatusPublisher, StatusSubscriber};
use crate::collaborators::{
    Clock, CollaboratorError, DrivingPerformanceSink, EyeTracker, EyeTrackingSink, FrameSource,
    VehicleControl,
};
use crate::config::{ControllerConfig, VehicleConfig};
use crate::reconcile::reconcile;
use crate::state::{ConsistencyError, TrialState};

/// Errors that end the trial.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// The trial's internal consistency was violated.
    #[error("consistency violation: {source}")]
    Consistency {
        /// The violated rule.
        #[from]
        source: ConsistencyError,
    },

    /// The frame source is gone for good.
    #[error("frame source failed: {source}")]
    Frame {
        /// The underlying collaborator error.
        source: CollaboratorError,
    },
}

/// The collaborators a tick talks to.
///
/// Built by the caller for the duration of one trial; nothing here is
/// global, so tests substitute fakes for every field.
pub struct TrialIo<'a> {
    /// Simulator frame signal.
    pub frames: &'a mut dyn FrameSource,
    /// Simulator status channel.
    pub simulator: &'a mut dyn StatusSubscriber,
    /// Scenario-script status channel.
    pub scenario: &'a mut dyn StatusSubscriber,
    /// Controller status channel toward the simulator.
    pub controller: &'a mut dyn StatusPublisher,
    /// Ego-vehicle control surface.
    pub vehicle: &'a mut dyn VehicleControl,
    /// Driving-performance recorder.
    pub driving: &'a mut dyn DrivingPerformanceSink,
    /// Eye-tracker sample source.
    pub eye_tracker: &'a mut dyn EyeTracker,
    /// Eye-tracking recorder.
    pub eye: &'a mut dyn EyeTrackingSink,
    /// Time source.
    pub clock: &'a dyn Clock,
}

impl std::fmt::Debug for TrialIo<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrialIo").finish_non_exhaustive()
    }
}

/// Fixed inputs for one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialSettings {
    /// Attached to every record.
    pub participant: ParticipantContext,
    /// Control-surface settings for resuming automation.
    pub vehicle: VehicleConfig,
    /// Bounded wait for each status channel receive.
    pub poll_timeout: Duration,
}

impl TrialSettings {
    /// Settings for `participant` taken from the loaded configuration.
    pub fn from_config(config: &ControllerConfig, participant: ParticipantContext) -> Self {
        Self {
            participant,
            vehicle: config.vehicle.clone(),
            poll_timeout: config.timing.poll_timeout(),
        }
    }
}

/// Summary of a single tick's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    /// The tick number that was executed (unchanged if nothing was polled).
    pub tick: u64,
    /// Phase after the tick.
    pub phase: Phase,
    /// Whether the channels were polled.
    pub polled: bool,
    /// Whether the phase changed this tick.
    pub transitioned: bool,
    /// Producer whose report was accepted, if any.
    pub accepted: Option<Origin>,
    /// Whether a phase was forwarded on the controller channel.
    pub republished: bool,
    /// Whether a driving-performance sample was recorded.
    pub driving_sampled: bool,
    /// Whether an eye-tracking sample was recorded.
    pub eye_sampled: bool,
    /// Non-fatal problems surfaced during the tick.
    pub warnings: u32,
    /// The trial is over; the loop must stop.
    pub stop: bool,
}

impl TickSummary {
    const fn idle(tick: u64, phase: Phase) -> Self {
        Self {
            tick,
            phase,
            polled: false,
            transitioned: false,
            accepted: None,
            republished: false,
            driving_sampled: false,
            eye_sampled: false,
            warnings: 0,
            stop: true,
        }
    }

    const fn warn(&mut self) {
        self.warnings = self.warnings.saturating_add(1);
    }
}

/// Execute one tick of the controller.
///
/// # Errors
///
/// Returns [`TickError::Consistency`] on a fatal consistency violation and
/// [`TickError::Frame`] if the frame source fails.
pub fn run_tick(
    state: &mut TrialState,
    io: &mut TrialIo<'_>,
    settings: &TrialSettings,
) -> Result<TickSummary, TickError> {
    // --- Terminal check ---
    if state.is_over() {
        return Ok(TickSummary::idle(state.tick(), state.current()));
    }

    // --- Frame ---
    match io.frames.wait_for_frame() {
        Ok(()) => {}
        Err(CollaboratorError::Timeout {
            operation,
            timeout_ms,
        }) => {
            warn!(
                tick = state.tick(),
                phase = ?state.current(),
                operation = %operation,
                timeout_ms,
                "No frame yet, still waiting"
            );
            let mut summary = TickSummary {
                stop: false,
                ..TickSummary::idle(state.tick(), state.current())
            };
            summary.warn();
            return Ok(summary);
        }
        Err(source) => return Err(TickError::Frame { source }),
    }
    let tick = state.begin_tick();

    let mut summary = TickSummary {
        polled: true,
        stop: false,
        ..TickSummary::idle(tick, state.current())
    };

    // --- Poll ---
    let simulator = poll(io.simulator, Origin::Simulator, settings.poll_timeout, &mut summary);
    let scenario = poll(io.scenario, Origin::ScenarioScript, settings.poll_timeout, &mut summary);

    // --- Merge ---
    let now = io.clock.wall_clock();
    let merged = reconcile(state.current(), simulator, scenario, now);
    summary.accepted = merged.accepted.map(|report| report.origin);

    if let Some(report) = merged.republish() {
        let message = StatusMessage::new(Origin::Controller, report.phase, &now);
        match io.controller.publish(&message) {
            Ok(()) => summary.republished = true,
            Err(err) => {
                warn!(tick, phase = ?report.phase, %err, "Republish failed");
                summary.warn();
            }
        }
    }

    // --- Enter ---
    if merged.changed() {
        let next = merged.next_phase();
        let entered_at = merged.source_timestamp().unwrap_or(now);
        info!(tick, from = ?state.current(), to = ?next, source = ?summary.accepted, "Phase transition");
        state.enter(next, entered_at);
        summary.transitioned = true;
        summary.phase = next;

        let outcome = actions::enter_phase(next, entered_at, state, io, settings)?;
        summary.warnings = summary.warnings.saturating_add(outcome.failures);
        summary.stop = outcome.finished;
    }

    // --- Check ---
    state.flags().ensure_exclusive(state.current())?;

    // --- Sample ---
    if !summary.stop {
        sample(state, io, settings, &mut summary);
    }

    debug!(
        tick,
        phase = ?summary.phase,
        accepted = ?summary.accepted,
        warnings = summary.warnings,
        "Tick complete"
    );
    Ok(summary)
}

/// Take this tick's report from one channel, degrading every failure to a miss.
fn poll(
    channel: &mut dyn StatusSubscriber,
    origin: Origin,
    wait: Duration,
    summary: &mut TickSummary,
) -> Option<StatusReport> {
    let received = channel.try_receive_latest(wait).and_then(|message| {
        message
            .map(|message| StatusReport::from_message(origin, &message))
            .transpose()
            .map_err(|source| ChannelError::Malformed {
                channel: origin.to_string(),
                source,
            })
    });
    match received {
        Ok(Some(report)) => Some(report),
        Err(ChannelError::Malformed { source, .. }) => {
            warn!(tick = summary.tick, %origin, err = %source, "Malformed status message");
            summary.warn();
            None
        }
        Ok(None) => {
            debug!(tick = summary.tick, %origin, "No status message");
            None
        }
        Err(err) => {
            warn!(tick = summary.tick, %origin, %err, "Status channel error");
            summary.warn();
            None
        }
    }
}

/// Feed the recorders that are currently active.
fn sample(state: &TrialState, io: &mut TrialIo<'_>, settings: &TrialSettings, summary: &mut TickSummary) {
    let flags = state.flags();
    let context = &settings.participant;

    if flags.driving {
        let result = io.vehicle.telemetry().and_then(|telemetry| {
            let sample = DrivingSample {
                recorded_at: io.clock.wall_clock(),
                telemetry,
            };
            io.driving.record(context, &sample)
        });
        match result {
            Ok(()) => summary.driving_sampled = true,
            Err(err) => {
                warn!(tick = summary.tick, %err, "Driving-performance sample failed");
                summary.warn();
            }
        }
    }

    if flags.eye {
        let result = io.eye_tracker.next_sample().and_then(|sample| match sample {
            Some(sample) => io.eye.record(context, flags.eye_role, &sample).map(|()| true),
            None => Ok(false),
        });
        match result {
            Ok(recorded) => summary.eye_sampled = recorded,
            Err(err) => {
                warn!(tick = summary.tick, %err, "Eye-tracking sample failed");
                summary.warn();
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;
    use std::time::Instant;

    use chrono::{NaiveDate, NaiveDateTime};
    use handover_types::{EyeSample, EyeTrackingRole, PhaseTimestamps, VehicleTelemetry};

    use super::*;
    use crate::channel::{ChannelError, Mailbox};

    struct Frames(u32);

    impl FrameSource for Frames {
        fn wait_for_frame(&mut self) -> Result<(), CollaboratorError> {
            self.0 = self.0.saturating_add(1);
            Ok(())
        }
    }

    struct ClosedFrames;

    impl FrameSource for ClosedFrames {
        fn wait_for_frame(&mut self) -> Result<(), CollaboratorError> {
            Err(CollaboratorError::Closed {
                what: "frame source".to_owned(),
            })
        }
    }

    struct StalledFrames;

    impl FrameSource for StalledFrames {
        fn wait_for_frame(&mut self) -> Result<(), CollaboratorError> {
            Err(CollaboratorError::Timeout {
                operation: "frame wait".to_owned(),
                timeout_ms: 10_000,
            })
        }
    }

    struct Undecodable;

    impl StatusSubscriber for Undecodable {
        fn try_receive_latest(&mut self, _wait: Duration) -> Result<Option<StatusMessage>, ChannelError> {
            let source = StatusMessage::from_json(Origin::ScenarioScript, b"{").unwrap_err();
            Err(ChannelError::Malformed {
                channel: "trial.status.scenario".to_owned(),
                source,
            })
        }
    }

    struct Garbage;

    impl StatusSubscriber for Garbage {
        fn try_receive_latest(&mut self, _wait: Duration) -> Result<Option<StatusMessage>, ChannelError> {
            Ok(Some(StatusMessage {
                from: "carla".to_owned(),
                timestamp: "yesterday".to_owned(),
                vehicle_status: "Autopilot".to_owned(),
                time_data: None,
            }))
        }
    }

    #[derive(Default)]
    struct Vehicle {
        autopilot: Vec<bool>,
        telemetry_reads: u32,
    }

    impl VehicleControl for Vehicle {
        fn set_autopilot(&mut self, enabled: bool, _profile: u16) -> Result<(), CollaboratorError> {
            self.autopilot.push(enabled);
            Ok(())
        }
        fn set_lane_change_enabled(&mut self, _enabled: bool) -> Result<(), CollaboratorError> {
            Ok(())
        }
        fn set_speed_difference_percent(&mut self, _percent: f64) -> Result<(), CollaboratorError> {
            Ok(())
        }
        fn set_collision_avoidance_ignore_percent(&mut self, _percent: f64) -> Result<(), CollaboratorError> {
            Ok(())
        }
        fn speed_limit(&mut self) -> Result<f64, CollaboratorError> {
            Ok(50.0)
        }
        fn telemetry(&mut self) -> Result<VehicleTelemetry, CollaboratorError> {
            self.telemetry_reads = self.telemetry_reads.saturating_add(1);
            Ok(VehicleTelemetry::default())
        }
    }

    #[derive(Default)]
    struct Driving {
        samples: u32,
        flushes: u32,
    }

    impl DrivingPerformanceSink for Driving {
        fn record(&mut self, _c: &ParticipantContext, _s: &DrivingSample) -> Result<(), CollaboratorError> {
            self.samples = self.samples.saturating_add(1);
            Ok(())
        }
        fn record_reaction_time(
            &mut self,
            _c: &ParticipantContext,
            _at: NaiveDateTime,
            _elapsed: Duration,
        ) -> Result<(), CollaboratorError> {
            Ok(())
        }
        fn record_phase_intervals(
            &mut self,
            _c: &ParticipantContext,
            _t: &PhaseTimestamps,
        ) -> Result<(), CollaboratorError> {
            Ok(())
        }
        fn flush(&mut self) -> Result<(), CollaboratorError> {
            self.flushes = self.flushes.saturating_add(1);
            Ok(())
        }
    }

    struct Tracker;

    impl EyeTracker for Tracker {
        fn next_sample(&mut self) -> Result<Option<EyeSample>, CollaboratorError> {
            Ok(Some(EyeSample {
                captured_at: at(),
                right_pupil_mm: Some(3.1),
                left_pupil_mm: Some(3.2),
                blink: None,
            }))
        }
    }

    #[derive(Default)]
    struct Eye {
        roles: Vec<EyeTrackingRole>,
    }

    impl EyeTrackingSink for Eye {
        fn record(
            &mut self,
            _c: &ParticipantContext,
            role: EyeTrackingRole,
            _s: &EyeSample,
        ) -> Result<(), CollaboratorError> {
            self.roles.push(role);
            Ok(())
        }
        fn flush(&mut self) -> Result<(), CollaboratorError> {
            Ok(())
        }
    }

    struct StepClock {
        base: Instant,
        step_ms: Cell<u64>,
    }

    impl Clock for StepClock {
        fn monotonic(&self) -> Instant {
            let next = self.step_ms.get().saturating_add(100);
            self.step_ms.set(next);
            self.base.checked_add(Duration::from_millis(next)).unwrap()
        }
        fn wall_clock(&self) -> NaiveDateTime {
            at()
        }
    }

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 21)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap()
    }

    fn settings() -> TrialSettings {
        TrialSettings::from_config(&ControllerConfig::default(), ParticipantContext::default())
    }

    fn status(origin: Origin, phase: Phase) -> StatusMessage {
        StatusMessage::new(origin, phase, &at())
    }

    #[test]
    fn autopilot_from_simulator_starts_interleaving_eye_logging() {
        let mut frames = Frames(0);
        let sim: Mailbox<StatusMessage> = Mailbox::new();
        let mut sim_rx = sim.clone();
        let mut scen: Mailbox<StatusMessage> = Mailbox::new();
        let out: Mailbox<StatusMessage> = Mailbox::new();
        let mut out_tx = out.clone();
        let (mut vehicle, mut driving, mut tracker, mut eye) =
            (Vehicle::default(), Driving::default(), Tracker, Eye::default());
        let clock = StepClock { base: Instant::now(), step_ms: Cell::new(0) };
        let mut io = TrialIo {
            frames: &mut frames,
            simulator: &mut sim_rx,
            scenario: &mut scen,
            controller: &mut out_tx,
            vehicle: &mut vehicle,
            driving: &mut driving,
            eye_tracker: &mut tracker,
            eye: &mut eye,
            clock: &clock,
        };
        let mut state = TrialState::new();

        sim.post(status(Origin::Simulator, Phase::Autopilot));
        let summary = run_tick(&mut state, &mut io, &settings()).unwrap();

        assert_eq!(summary.phase, Phase::Autopilot);
        assert!(summary.transitioned);
        assert_eq!(summary.accepted, Some(Origin::Simulator));
        assert!(!summary.republished);
        assert!(summary.eye_sampled);
        assert!(!summary.driving_sampled);
        assert!(state.flags().eye);
        assert_eq!(state.flags().eye_role, EyeTrackingRole::Interleaving);
        assert!(out.take_latest(Duration::ZERO).is_none());
        drop(io);
        assert_eq!(eye.roles, vec![EyeTrackingRole::Interleaving]);
    }

    #[test]
    fn malformed_message_counts_as_miss() {
        let mut frames = Frames(0);
        let mut sim = Garbage;
        let mut scen: Mailbox<StatusMessage> = Mailbox::new();
        let mut out: Mailbox<StatusMessage> = Mailbox::new();
        let (mut vehicle, mut driving, mut tracker, mut eye) =
            (Vehicle::default(), Driving::default(), Tracker, Eye::default());
        let clock = StepClock { base: Instant::now(), step_ms: Cell::new(0) };
        let mut io = TrialIo {
            frames: &mut frames,
            simulator: &mut sim,
            scenario: &mut scen,
            controller: &mut out,
            vehicle: &mut vehicle,
            driving: &mut driving,
            eye_tracker: &mut tracker,
            eye: &mut eye,
            clock: &clock,
        };
        let mut state = TrialState::new();

        let summary = run_tick(&mut state, &mut io, &settings()).unwrap();
        assert_eq!(summary.phase, Phase::Unknown);
        assert_eq!(summary.warnings, 1);
        assert!(!summary.transitioned);
    }

    #[test]
    fn dead_frame_source_fails_the_tick() {
        let mut frames = ClosedFrames;
        let mut sim: Mailbox<StatusMessage> = Mailbox::new();
        let mut scen: Mailbox<StatusMessage> = Mailbox::new();
        let mut out: Mailbox<StatusMessage> = Mailbox::new();
        let (mut vehicle, mut driving, mut tracker, mut eye) =
            (Vehicle::default(), Driving::default(), Tracker, Eye::default());
        let clock = StepClock { base: Instant::now(), step_ms: Cell::new(0) };
        let mut io = TrialIo {
            frames: &mut frames,
            simulator: &mut sim,
            scenario: &mut scen,
            controller: &mut out,
            vehicle: &mut vehicle,
            driving: &mut driving,
            eye_tracker: &mut tracker,
            eye: &mut eye,
            clock: &clock,
        };
        let mut state = TrialState::new();

        let err = run_tick(&mut state, &mut io, &settings()).unwrap_err();
        assert!(matches!(err, TickError::Frame { .. }));
        assert_eq!(state.tick(), 0);
    }

    #[test]
    fn frame_timeout_is_an_idle_tick_not_a_failure() {
        let mut frames = StalledFrames;
        let mut sim: Mailbox<StatusMessage> = Mailbox::new();
        let scen: Mailbox<StatusMessage> = Mailbox::new();
        let mut scen_rx = scen.clone();
        let mut out: Mailbox<StatusMessage> = Mailbox::new();
        let (mut vehicle, mut driving, mut tracker, mut eye) =
            (Vehicle::default(), Driving::default(), Tracker, Eye::default());
        let clock = StepClock { base: Instant::now(), step_ms: Cell::new(0) };
        let mut io = TrialIo {
            frames: &mut frames,
            simulator: &mut sim,
            scenario: &mut scen_rx,
            controller: &mut out,
            vehicle: &mut vehicle,
            driving: &mut driving,
            eye_tracker: &mut tracker,
            eye: &mut eye,
            clock: &clock,
        };
        let mut state = TrialState::new();

        scen.post(status(Origin::ScenarioScript, Phase::Autopilot));
        let summary = run_tick(&mut state, &mut io, &settings()).unwrap();
        assert!(!summary.stop);
        assert!(!summary.polled);
        assert_eq!(summary.warnings, 1);
        assert_eq!(state.tick(), 0);
        assert_eq!(state.current(), Phase::Unknown);
        drop(io);
        assert!(scen.is_pending());
    }

    #[test]
    fn undecodable_payload_is_treated_as_malformed() {
        let mut frames = Frames(0);
        let mut sim: Mailbox<StatusMessage> = Mailbox::new();
        let mut scen = Undecodable;
        let mut out: Mailbox<StatusMessage> = Mailbox::new();
        let (mut vehicle, mut driving, mut tracker, mut eye) =
            (Vehicle::default(), Driving::default(), Tracker, Eye::default());
        let clock = StepClock { base: Instant::now(), step_ms: Cell::new(0) };
        let mut io = TrialIo {
            frames: &mut frames,
            simulator: &mut sim,
            scenario: &mut scen,
            controller: &mut out,
            vehicle: &mut vehicle,
            driving: &mut driving,
            eye_tracker: &mut tracker,
            eye: &mut eye,
            clock: &clock,
        };
        let mut state = TrialState::new();

        let summary = run_tick(&mut state, &mut io, &settings()).unwrap();
        assert!(summary.polled);
        assert_eq!(summary.warnings, 1);
        assert_eq!(summary.phase, Phase::Unknown);
    }

    #[test]
    fn trial_over_tick_stops_without_sampling_and_later_ticks_poll_nothing() {
        let mut frames = Frames(0);
        let mut sim: Mailbox<StatusMessage> = Mailbox::new();
        let scen: Mailbox<StatusMessage> = Mailbox::new();
        let mut out: Mailbox<StatusMessage> = Mailbox::new();
        let (mut vehicle, mut driving, mut tracker, mut eye) =
            (Vehicle::default(), Driving::default(), Tracker, Eye::default());
        let clock = StepClock { base: Instant::now(), step_ms: Cell::new(0) };
        let mut scen_rx = scen.clone();
        let mut io = TrialIo {
            frames: &mut frames,
            simulator: &mut sim,
            scenario: &mut scen_rx,
            controller: &mut out,
            vehicle: &mut vehicle,
            driving: &mut driving,
            eye_tracker: &mut tracker,
            eye: &mut eye,
            clock: &clock,
        };
        let mut state = TrialState::new();

        scen.post(status(Origin::ScenarioScript, Phase::TrialOver));
        let summary = run_tick(&mut state, &mut io, &settings()).unwrap();
        assert!(summary.stop);
        assert!(summary.republished);
        assert!(!summary.eye_sampled);

        scen.post(status(Origin::ScenarioScript, Phase::TrialOver));
        let after = run_tick(&mut state, &mut io, &settings()).unwrap();
        assert!(after.stop);
        assert!(!after.polled);
        drop(io);
        assert_eq!(frames.0, 1);
        assert!(scen.is_pending());
        assert_eq!(vehicle.autopilot, vec![false]);
        assert_eq!(driving.flushes, 1);
    }
}
