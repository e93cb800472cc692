//! Configuration loading and typed config structures for the trial controller.
//!
//! The canonical configuration lives in `handover-config.yaml` at the project
//! root. Every field has a default, so a missing file or an empty document
//! yields a runnable controller pointed at a local NATS server.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level controller configuration.
///
/// Mirrors the structure of `handover-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ControllerConfig {
    /// NATS connection and subject names.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Channel waits and control-request deadlines.
    #[serde(default)]
    pub timing: TimingConfig,

    /// Vehicle-control settings applied on phase entry.
    #[serde(default)]
    pub vehicle: VehicleConfig,

    /// Experiment-file locations and the scenario-runner command.
    #[serde(default)]
    pub session: SessionConfig,

    /// Where record tables are written.
    #[serde(default)]
    pub output: OutputConfig,
}

impl ControllerConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `NATS_URL` overrides `transport.nats_url`
    /// - `HANDOVER_DATA_DIR` overrides `output.data_dir`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns any error from [`ControllerConfig::from_file`] for a file
    /// that exists but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::from_file(path);
        }
        info!(path = %path.display(), "Config file not found, using defaults");
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.transport.apply_env_overrides();
        self.output.apply_env_overrides();
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// NATS connection and subject names.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransportConfig {
    /// NATS server URL.
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Subject the simulator publishes its status on.
    #[serde(default = "default_simulator_subject")]
    pub simulator_subject: String,

    /// Subject the scenario script publishes its status on.
    #[serde(default = "default_scenario_subject")]
    pub scenario_subject: String,

    /// Subject the controller republishes accepted phases on.
    #[serde(default = "default_controller_subject")]
    pub controller_subject: String,

    /// Subject carrying the simulator's per-frame tick signal.
    #[serde(default = "default_frame_subject")]
    pub frame_subject: String,

    /// Prefix for vehicle-control commands and queries
    /// (`<prefix>.autopilot`, `<prefix>.speed_limit`, ...).
    #[serde(default = "default_vehicle_subject_prefix")]
    pub vehicle_subject_prefix: String,

    /// Subject the eye-tracker bridge publishes samples on.
    #[serde(default = "default_eye_subject")]
    pub eye_subject: String,

    /// Subject trial snapshots are published on for monitoring.
    #[serde(default = "default_snapshot_subject")]
    pub snapshot_subject: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            nats_url: default_nats_url(),
            simulator_subject: default_simulator_subject(),
            scenario_subject: default_scenario_subject(),
            controller_subject: default_controller_subject(),
            frame_subject: default_frame_subject(),
            vehicle_subject_prefix: default_vehicle_subject_prefix(),
            eye_subject: default_eye_subject(),
            snapshot_subject: default_snapshot_subject(),
        }
    }
}

impl TransportConfig {
    /// Apply `NATS_URL` if set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("NATS_URL") {
            self.nats_url = val;
        }
    }

    /// Full subject for a vehicle command or query named `leaf`.
    pub fn vehicle_subject(&self, leaf: &str) -> String {
        format!("{}.{leaf}", self.vehicle_subject_prefix)
    }
}

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Channel waits and control-request deadlines.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimingConfig {
    /// Bounded wait for each status channel receive, in milliseconds.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Deadline for a vehicle-control request/reply, in milliseconds.
    #[serde(default = "default_control_timeout_ms")]
    pub control_timeout_ms: u64,

    /// How long to wait for the next simulator frame before giving up.
    #[serde(default = "default_frame_timeout_ms")]
    pub frame_timeout_ms: u64,

    /// Pause before asking the simulator to reload the world.
    #[serde(default = "default_reload_settle_ms")]
    pub reload_settle_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            control_timeout_ms: default_control_timeout_ms(),
            frame_timeout_ms: default_frame_timeout_ms(),
            reload_settle_ms: default_reload_settle_ms(),
        }
    }
}

impl TimingConfig {
    /// Status channel receive wait.
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Control request deadline.
    pub const fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    /// Frame wait deadline.
    pub const fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    /// Pause before a world reload.
    pub const fn reload_settle(&self) -> Duration {
        Duration::from_millis(self.reload_settle_ms)
    }
}

// ---------------------------------------------------------------------------
// Vehicle
// ---------------------------------------------------------------------------

/// Settings the controller applies when automation resumes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VehicleConfig {
    /// Traffic-manager port used as the autopilot profile.
    #[serde(default = "default_traffic_manager_port")]
    pub traffic_manager_port: u16,

    /// Target speed after automation resumes, in km/h. When unset the
    /// vehicle follows the posted limit (speed difference 0%).
    #[serde(default)]
    pub resume_target_speed_kmh: Option<f64>,

    /// Whether automatic lane changes stay enabled after resuming.
    #[serde(default)]
    pub resume_lane_change: bool,

    /// Percentage of other vehicles collision avoidance ignores after resuming.
    #[serde(default)]
    pub resume_ignore_vehicles_percent: f64,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            traffic_manager_port: default_traffic_manager_port(),
            resume_target_speed_kmh: None,
            resume_lane_change: false,
            resume_ignore_vehicles_percent: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Experiment-file locations and the scenario-runner command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionConfig {
    /// The experiment file the simulator side reads.
    #[serde(default = "default_experiment_config_path")]
    pub experiment_config_path: PathBuf,

    /// Directory holding per-participant experiment files
    /// (`ExperimentConfig_<participant>.ini`).
    #[serde(default = "default_participant_config_dir")]
    pub participant_config_dir: PathBuf,

    /// Working directory for the scenario-runner process.
    #[serde(default = "default_scenario_runner_dir")]
    pub scenario_runner_dir: PathBuf,

    /// Scenario-runner command line. `{traffic}` is replaced with the
    /// block's traffic label.
    #[serde(default = "default_scenario_command")]
    pub scenario_command: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            experiment_config_path: default_experiment_config_path(),
            participant_config_dir: default_participant_config_dir(),
            scenario_runner_dir: default_scenario_runner_dir(),
            scenario_command: default_scenario_command(),
        }
    }
}

impl SessionConfig {
    /// Path of the experiment file for `participant`.
    pub fn participant_file(&self, participant: &str) -> PathBuf {
        self.participant_config_dir
            .join(format!("ExperimentConfig_{participant}.ini"))
    }

    /// The scenario command with `{traffic}` substituted.
    pub fn scenario_command_for(&self, traffic: &str) -> Vec<String> {
        self.scenario_command
            .iter()
            .map(|arg| arg.replace("{traffic}", traffic))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Where record tables are written.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputConfig {
    /// Root directory for `DrivingData/`, `EyeData/`, `IntervalData/`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl OutputConfig {
    /// Apply `HANDOVER_DATA_DIR` if set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("HANDOVER_DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

fn default_nats_url() -> String {
    "nats://localhost:4222".to_owned()
}

fn default_simulator_subject() -> String {
    "trial.status.simulator".to_owned()
}

fn default_scenario_subject() -> String {
    "trial.status.scenario".to_owned()
}

fn default_controller_subject() -> String {
    "trial.status.controller".to_owned()
}

fn default_frame_subject() -> String {
    "trial.sim.frame".to_owned()
}

fn default_vehicle_subject_prefix() -> String {
    "trial.vehicle".to_owned()
}

fn default_eye_subject() -> String {
    "trial.eye.samples".to_owned()
}

fn default_snapshot_subject() -> String {
    "trial.status.snapshot".to_owned()
}

const fn default_poll_timeout_ms() -> u64 {
    1
}

const fn default_control_timeout_ms() -> u64 {
    2000
}

const fn default_frame_timeout_ms() -> u64 {
    10_000
}

const fn default_reload_settle_ms() -> u64 {
    3000
}

const fn default_traffic_manager_port() -> u16 {
    8005
}

fn default_experiment_config_path() -> PathBuf {
    PathBuf::from("ExperimentConfig.ini")
}

fn default_participant_config_dir() -> PathBuf {
    PathBuf::from("config_files")
}

fn default_scenario_runner_dir() -> PathBuf {
    PathBuf::from("../../../scenario_runner")
}

fn default_scenario_command() -> Vec<String> {
    [
        "python",
        "scenario_runner.py",
        "--route",
        "srunner/data/take_over_routes.xml",
        "srunner/data/traffic_complexity_{traffic}.json",
        "0",
        "--agent",
        "srunner/autoagents/npc_agent.py",
        "--timeout",
        "5",
        "--sync",
        "--output",
    ]
    .iter()
    .map(|s| (*s).to_owned())
    .collect()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}
