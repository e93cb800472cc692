//! File-backed collaborators for the take-over trial controller.
//!
//! # Modules
//!
//! - [`ini`] -- Order-preserving INI documents.
//! - [`experiment`] -- The experiment configuration file: trial blocks,
//!   `CurrentBlock` updates, participant context.
//! - [`generator`] -- Within-subject participant file generation.
//! - [`csv`] -- Append-only CSV tables.
//! - [`sinks`] -- Driving-performance and eye-tracking recorders over CSV.

pub mod csv;
pub mod experiment;
pub mod generator;
pub mod ini;
pub mod sinks;

pub use csv::{CsvTable, RecordError};
pub use experiment::{ExperimentConfig, ExperimentError, TrialBlock, copy_config, set_current_block};
pub use ini::{IniDocument, IniError, IniSection};
pub use sinks::{CsvDrivingSink, CsvEyeSink, DiscardSink};
