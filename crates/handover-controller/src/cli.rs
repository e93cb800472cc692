//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Experiment controller for take-over trials.
#[derive(Parser, Debug)]
#[command(name = "handover-controller", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the YAML configuration file.
    #[arg(
        short,
        long,
        global = true,
        default_value = "handover-config.yaml",
        env = "HANDOVER_CONFIG"
    )]
    pub config: PathBuf,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Walk a participant's trial blocks interactively.
    Session(SessionArgs),

    /// Run the controller loop once for a single block.
    Trial(TrialArgs),

    /// Write within-subject participant files.
    Generate(GenerateArgs),
}

/// Arguments for `session`.
#[derive(Args, Debug)]
pub struct SessionArgs {
    /// Participant identifier, e.g. `P01`.
    #[arg(short, long)]
    pub participant: String,
}

/// Arguments for `trial`.
#[derive(Args, Debug)]
pub struct TrialArgs {
    /// Trial block (section name) to run.
    #[arg(short, long)]
    pub block: String,

    /// Experiment file to read instead of `session.experiment_config_path`.
    #[arg(short, long)]
    pub experiment: Option<PathBuf>,
}

/// Arguments for `generate`.
#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Number of participants.
    #[arg(short = 'n', long, default_value_t = 18)]
    pub count: usize,

    /// Output directory; defaults to `session.participant_config_dir`.
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Traffic-complexity label written into every experimental block.
    #[arg(short, long, default_value = "1RV")]
    pub traffic: String,
}
