//! Error types for the controller binary.
//!
//! [`ControllerError`] is the top-level error type that wraps every failure
//! mode of the `session`, `trial` and `generate` commands.

/// Top-level error for the controller binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: handover_core::config::ConfigError,
    },

    /// Reading or updating the experiment file failed.
    #[error("experiment error: {source}")]
    Experiment {
        /// The underlying experiment-file error.
        #[from]
        source: handover_data::ExperimentError,
    },

    /// The trial loop aborted.
    #[error("runner error: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: handover_core::runner::RunnerError,
    },

    /// A simulator-side request failed outside the trial loop.
    #[error("simulator error: {source}")]
    Simulator {
        /// The underlying collaborator error.
        #[from]
        source: handover_core::collaborators::CollaboratorError,
    },

    /// NATS connection or subscription failed.
    #[error("NATS error: {message}")]
    Nats {
        /// Description of the NATS failure.
        message: String,
    },

    /// The scenario-runner process could not be started or waited on.
    #[error("scenario runner error: {message}")]
    ScenarioRunner {
        /// Description of the failure.
        message: String,
    },

    /// The blocking trial task panicked or was cancelled.
    #[error("trial task failed: {message}")]
    Task {
        /// Description of the join failure.
        message: String,
    },

    /// Reading the operator's prompt answer failed.
    #[error("prompt error: {source}")]
    Prompt {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}
