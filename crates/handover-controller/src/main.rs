//! Experiment controller binary for take-over trials.
//!
//! Wires the NATS status channels, the vehicle-control bridge, the CSV
//! recorders and the experiment file into the tick loop from
//! `handover-core`.
//!
//! # Commands
//!
//! - `session --participant P01` -- copy the participant's experiment file
//!   into place and walk its trial blocks interactively.
//! - `trial --block Block1Trial1` -- run the controller loop once.
//! - `generate --count 18` -- write within-subject participant files.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from `handover-config.yaml`
//! 3. Connect to NATS (`session` and `trial` only)
//! 4. Run the command
//! 5. Log the result

mod cli;
mod error;
mod nats;
mod session;
mod trial;
mod vehicle;

use clap::Parser;
use handover_core::config::ControllerConfig;
use handover_data::{ExperimentConfig, generator};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, GenerateArgs, TrialArgs};
use crate::error::ControllerError;

/// Application entry point for the controller.
///
/// # Errors
///
/// Returns an error if configuration, NATS setup or the command fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("handover-controller starting");

    // 2. Load configuration.
    let config = ControllerConfig::load_or_default(&cli.config)?;
    info!(
        nats_url = %config.transport.nats_url,
        poll_timeout_ms = config.timing.poll_timeout_ms,
        traffic_manager_port = config.vehicle.traffic_manager_port,
        data_dir = %config.output.data_dir.display(),
        "Configuration loaded"
    );

    // 3-4. Run the command.
    match cli.command {
        Commands::Generate(args) => generate(&config, &args)?,
        Commands::Session(args) => {
            let client = connect(&config).await?;
            session::run_session(&client, &config, &args.participant).await?;
        }
        Commands::Trial(args) => {
            let client = connect(&config).await?;
            run_trial(&client, &config, &args).await?;
        }
    }

    // 5. Done.
    info!("handover-controller shutdown complete");
    Ok(())
}

/// Connect to the NATS server named in the configuration.
async fn connect(config: &ControllerConfig) -> Result<async_nats::Client, ControllerError> {
    let url = &config.transport.nats_url;
    info!(nats_url = %url, "Connecting to NATS");
    let client = async_nats::connect(url)
        .await
        .map_err(|e| ControllerError::Nats {
            message: format!("failed to connect to NATS at {url}: {e}"),
        })?;
    info!("NATS connected");
    Ok(client)
}

/// Run one block from the experiment file.
async fn run_trial(
    client: &async_nats::Client,
    config: &ControllerConfig,
    args: &TrialArgs,
) -> Result<(), ControllerError> {
    let path = args
        .experiment
        .as_ref()
        .unwrap_or(&config.session.experiment_config_path);
    let experiment = ExperimentConfig::load(path)?;
    let result = trial::run_block(client, config, &experiment, &args.block).await?;
    info!(
        block = %args.block,
        final_phase = ?result.final_phase,
        warnings = result.warnings,
        "Trial complete"
    );
    Ok(())
}

/// Write participant files.
fn generate(config: &ControllerConfig, args: &GenerateArgs) -> Result<(), ControllerError> {
    let dir = args
        .out
        .as_ref()
        .unwrap_or(&config.session.participant_config_dir);
    let written = generator::generate(dir, args.count, &args.traffic)?;
    info!(files = written.len(), dir = %dir.display(), "Participant files written");
    Ok(())
}
