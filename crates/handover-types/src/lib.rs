//! Shared type definitions for the take-over trial controller.
//!
//! This crate is the single source of truth for the values exchanged
//! between the simulator, the scenario script, the experiment controller,
//! and the metric sinks.
//!
//! # Modules
//!
//! - [`phase`] -- The ordered trial phases, report origins, and eye-tracking
//!   roles.
//! - [`status`] -- The status message wire format and its parsed form.
//! - [`records`] -- Participant context, telemetry, eye samples, phase
//!   timestamps, and per-tick snapshots handed to sinks and observers.

pub mod phase;
pub mod records;
pub mod status;

// Re-export all public types at crate root for convenience.
pub use phase::{EyeTrackingRole, Origin, Phase, UnknownPhase};
pub use records::{
    DrivingSample, EyeSample, ParticipantContext, PhaseTimestamps, TrialSnapshot,
    VehicleTelemetry,
};
pub use status::{
    MalformedStatus, StatusMessage, StatusReport, TIMESTAMP_FORMAT, format_timestamp,
    parse_timestamp, wall_clock_now,
};
