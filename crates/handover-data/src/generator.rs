//! Within-subject participant file generation.
//!
//! Each participant drives the six conditions (n-back level x interruption
//! method) once. The order is a cyclic Latin square: participant `i` starts
//! at condition `i mod 6` and walks the list from there, so every condition
//! appears in every position equally often across six participants.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::experiment::{ExperimentError, GENERAL_SECTION};
use crate::ini::{IniDocument, IniError, quote};

/// Secondary task type used by every generated block.
pub const TASK_TYPE: &str = "VisualNBackTask";

/// One cell of the design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Condition {
    /// N-back level (`One`, `Two`).
    pub task_setting: &'static str,
    /// Take-over interruption method.
    pub interruption_method: &'static str,
}

/// The six conditions in canonical order.
pub const CONDITIONS: [Condition; 6] = [
    Condition { task_setting: "One", interruption_method: "Immediate" },
    Condition { task_setting: "Two", interruption_method: "Immediate" },
    Condition { task_setting: "One", interruption_method: "Negotiated" },
    Condition { task_setting: "Two", interruption_method: "Negotiated" },
    Condition { task_setting: "One", interruption_method: "Scheduled" },
    Condition { task_setting: "Two", interruption_method: "Scheduled" },
];

/// Condition order for the zero-based participant `index`.
pub fn condition_order(index: usize) -> [Condition; 6] {
    let mut order = CONDITIONS;
    order.rotate_left(index.checked_rem(CONDITIONS.len()).unwrap_or(0));
    order
}

/// Participant identifier for the zero-based `index` (`P01`, `P02`, ...).
pub fn participant_id(index: usize) -> String {
    format!("P{:02}", index.saturating_add(1))
}

/// The experiment file for the zero-based participant `index`.
///
/// Two practice blocks run without the scenario runner, followed by one
/// block per condition. `traffic` labels every experimental block.
pub fn participant_document(index: usize, traffic: &str) -> IniDocument {
    let mut doc = IniDocument::new();
    doc.set_raw(GENERAL_SECTION, "ParticipantID", quote(&participant_id(index)));
    doc.set_raw(GENERAL_SECTION, "LogPerformance", quote("True"));
    doc.set_raw(GENERAL_SECTION, "CurrentBlock", quote("Block0Trial1"));

    for (name, setting) in [("OneBackTestTrial", "One"), ("TwoBackTestTrial", "Two")] {
        doc.set_raw(name, "SkipSR", quote("True"));
        doc.set_raw(name, "NDRTTaskType", quote(TASK_TYPE));
        doc.set_raw(name, "TaskSetting", quote(setting));
        doc.set_raw(name, "InterruptionMethod", quote("Immediate"));
    }

    for (trial, condition) in (1..).zip(condition_order(index)) {
        let name = format!("Block1Trial{trial}");
        doc.set_raw(&name, "SkipSR", quote("False"));
        doc.set_raw(&name, "NDRTTaskType", quote(TASK_TYPE));
        doc.set_raw(&name, "TaskSetting", quote(condition.task_setting));
        doc.set_raw(&name, "InterruptionMethod", quote(condition.interruption_method));
        doc.set_raw(&name, "Traffic", quote(traffic));
    }
    doc
}

/// Write `ExperimentConfig_<id>.ini` for `count` participants into `dir`.
///
/// # Errors
///
/// Returns [`ExperimentError::Ini`] if the directory or a file cannot be
/// written.
pub fn generate(dir: &Path, count: usize, traffic: &str) -> Result<Vec<PathBuf>, ExperimentError> {
    fs::create_dir_all(dir).map_err(IniError::from)?;
    let mut written = Vec::with_capacity(count);
    for index in 0..count {
        let path = dir.join(format!("ExperimentConfig_{}.ini", participant_id(index)));
        participant_document(index, traffic).save(&path)?;
        written.push(path);
    }
    info!(dir = %dir.display(), count, traffic, "Participant files generated");
    Ok(written)
}
