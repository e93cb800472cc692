//! One trial block: connect the collaborators and run the tick loop.
//!
//! The tick loop is synchronous and blocks on channel waits, so it runs on
//! the blocking pool while the NATS drain tasks keep running on the
//! runtime.

use std::path::Path;

use handover_core::collaborators::{DrivingPerformanceSink, EyeTrackingSink, SystemClock};
use handover_core::config::ControllerConfig;
use handover_core::runner::{self, TrialResult};
use handover_core::state::TrialState;
use handover_core::tick::{TrialIo, TrialSettings};
use handover_data::{CsvDrivingSink, CsvEyeSink, DiscardSink, ExperimentConfig};
use handover_types::Origin;
use tracing::info;

use crate::error::ControllerError;
use crate::nats::{
    NatsEyeTracker, NatsFrameSource, NatsStatusPublisher, NatsStatusSubscriber, SnapshotPublisher,
};
use crate::vehicle::NatsVehicle;

/// Every NATS-backed collaborator of one trial.
///
/// Dropping the links unsubscribes from every subject they hold.
#[derive(Debug)]
pub struct Links {
    simulator: NatsStatusSubscriber,
    scenario: NatsStatusSubscriber,
    controller: NatsStatusPublisher,
    frames: NatsFrameSource,
    vehicle: NatsVehicle,
    eye_tracker: NatsEyeTracker,
    snapshots: SnapshotPublisher,
}

impl Links {
    /// Subscribe and set up publishers on the subjects in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Nats`] if any subscription fails.
    pub async fn connect(client: &async_nats::Client, config: &ControllerConfig) -> Result<Self, ControllerError> {
        let transport = &config.transport;
        let timing = &config.timing;
        let links = Self {
            simulator: NatsStatusSubscriber::subscribe(client, &transport.simulator_subject, Origin::Simulator)
                .await?,
            scenario: NatsStatusSubscriber::subscribe(client, &transport.scenario_subject, Origin::ScenarioScript)
                .await?,
            controller: NatsStatusPublisher::new(client.clone(), &transport.controller_subject),
            frames: NatsFrameSource::subscribe(client, &transport.frame_subject, timing.frame_timeout())
                .await?,
            vehicle: NatsVehicle::new(client.clone(), transport, timing.control_timeout()),
            eye_tracker: NatsEyeTracker::subscribe(client, &transport.eye_subject).await?,
            snapshots: SnapshotPublisher::new(client.clone(), &transport.snapshot_subject),
        };
        info!(
            simulator = %transport.simulator_subject,
            scenario = %transport.scenario_subject,
            controller = %transport.controller_subject,
            "Status channels connected"
        );
        Ok(links)
    }
}

/// Run the controller loop for `block` until the trial is over.
///
/// # Errors
///
/// Returns [`ControllerError`] if the block is unknown, NATS setup fails, or
/// the tick loop aborts.
pub async fn run_block(
    client: &async_nats::Client,
    config: &ControllerConfig,
    experiment: &ExperimentConfig,
    block: &str,
) -> Result<TrialResult, ControllerError> {
    let participant = experiment.participant_context(block)?;
    let log_performance = experiment.log_performance();
    let mut links = Links::connect(client, config).await?;
    let settings = TrialSettings::from_config(config, participant);
    let data_dir = config.output.data_dir.clone();

    info!(
        block,
        log_performance,
        data_dir = %data_dir.display(),
        "Trial block starting"
    );

    tokio::task::spawn_blocking(move || drive(&mut links, &settings, &data_dir, log_performance))
        .await
        .map_err(|e| ControllerError::Task {
            message: e.to_string(),
        })?
}

/// The blocking part of [`run_block`].
fn drive(
    links: &mut Links,
    settings: &TrialSettings,
    data_dir: &Path,
    log_performance: bool,
) -> Result<TrialResult, ControllerError> {
    let mut csv_driving = CsvDrivingSink::new(data_dir);
    let mut csv_eye = CsvEyeSink::new(data_dir);
    let mut discard_driving = DiscardSink;
    let mut discard_eye = DiscardSink;
    let (driving, eye): (&mut dyn DrivingPerformanceSink, &mut dyn EyeTrackingSink) = if log_performance {
        (&mut csv_driving, &mut csv_eye)
    } else {
        (&mut discard_driving, &mut discard_eye)
    };

    let clock = SystemClock;
    let mut state = TrialState::new();
    let mut io = TrialIo {
        frames: &mut links.frames,
        simulator: &mut links.simulator,
        scenario: &mut links.scenario,
        controller: &mut links.controller,
        vehicle: &mut links.vehicle,
        driving,
        eye_tracker: &mut links.eye_tracker,
        eye,
        clock: &clock,
    };

    let result = runner::run_trial(&mut state, &mut io, settings, &mut links.snapshots)?;
    runner::log_trial_end(&result);
    Ok(result)
}
