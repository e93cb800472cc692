//! The experiment configuration file.
//!
//! ```ini
//! [General]
//! ParticipantID="P03"
//! LogPerformance="True"
//! CurrentBlock="Block1Trial2"
//!
//! [Block1Trial2]
//! SkipSR="False"
//! NDRTTaskType="VisualNBackTask"
//! TaskSetting="Two"
//! InterruptionMethod="Negotiated"
//! Traffic="3RV"
//! ```
//!
//! `[General]` comes first; every following section is a trial block. The
//! simulator reads `CurrentBlock` to decide which block it is running.

use std::path::{Path, PathBuf};

use handover_types::ParticipantContext;
use tracing::info;

use crate::ini::{IniDocument, IniError, IniSection};

/// Name of the section holding participant-wide settings.
pub const GENERAL_SECTION: &str = "General";

/// Errors raised while reading or updating an experiment file.
#[derive(Debug, thiserror::Error)]
pub enum ExperimentError {
    /// The INI layer failed.
    #[error("experiment file error: {source}")]
    Ini {
        /// The underlying INI error.
        #[from]
        source: IniError,
    },

    /// The first section is not `[General]`.
    #[error("experiment file must start with [{GENERAL_SECTION}]")]
    MissingGeneral,

    /// A required key is absent.
    #[error("[{section}] has no {key}")]
    MissingKey {
        /// The section searched.
        section: String,
        /// The missing key.
        key: String,
    },

    /// No trial block has that name.
    #[error("unknown trial block {name:?}")]
    UnknownBlock {
        /// The requested block.
        name: String,
    },

    /// Copying a participant file failed.
    #[error("failed to copy {} to {}: {source}", from.display(), to.display())]
    Copy {
        /// Source path.
        from: PathBuf,
        /// Destination path.
        to: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

/// One trial block's settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialBlock {
    /// Section name, e.g. `Block1Trial2`.
    pub name: String,
    /// Run the block without the scenario runner (`SkipSR`).
    pub skip_scenario_runner: bool,
    /// Secondary task type (`NDRTTaskType`).
    pub task_type: String,
    /// Secondary task setting (`TaskSetting`).
    pub task_setting: String,
    /// Take-over interruption method (`InterruptionMethod`).
    pub interruption_method: String,
    /// Traffic-complexity label (`Traffic`).
    pub traffic: String,
}

impl TrialBlock {
    fn from_section(section: &IniSection) -> Self {
        let text = |key: &str| section.value(key).unwrap_or_default().to_owned();
        Self {
            name: section.name().to_owned(),
            skip_scenario_runner: section
                .value("SkipSR")
                .is_some_and(|v| v.eq_ignore_ascii_case("true")),
            task_type: text("NDRTTaskType"),
            task_setting: text("TaskSetting"),
            interruption_method: text("InterruptionMethod"),
            traffic: text("Traffic"),
        }
    }
}

/// A parsed experiment file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentConfig {
    document: IniDocument,
}

impl ExperimentConfig {
    /// Load and validate the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::Ini`] if the file cannot be read or parsed
    /// and [`ExperimentError::MissingGeneral`] if it does not start with
    /// `[General]`.
    pub fn load(path: &Path) -> Result<Self, ExperimentError> {
        Self::from_document(IniDocument::load(path)?)
    }

    /// Validate an already parsed document.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::MissingGeneral`] if the first section is
    /// not `[General]`.
    pub fn from_document(document: IniDocument) -> Result<Self, ExperimentError> {
        match document.sections().first() {
            Some(first) if first.name() == GENERAL_SECTION => Ok(Self { document }),
            _ => Err(ExperimentError::MissingGeneral),
        }
    }

    /// The underlying document.
    pub const fn document(&self) -> &IniDocument {
        &self.document
    }

    fn general(&self, key: &str) -> Result<&str, ExperimentError> {
        self.document
            .value(GENERAL_SECTION, key)
            .ok_or_else(|| ExperimentError::MissingKey {
                section: GENERAL_SECTION.to_owned(),
                key: key.to_owned(),
            })
    }

    /// `ParticipantID` from `[General]`.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::MissingKey`] if it is absent.
    pub fn participant_id(&self) -> Result<&str, ExperimentError> {
        self.general("ParticipantID")
    }

    /// `LogPerformance` from `[General]`; absent means `false`.
    pub fn log_performance(&self) -> bool {
        self.general("LogPerformance")
            .is_ok_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// `CurrentBlock` from `[General]`, if set.
    pub fn current_block(&self) -> Option<&str> {
        self.general("CurrentBlock").ok()
    }

    /// Trial blocks in file order (every section after `[General]`).
    pub fn blocks(&self) -> Vec<TrialBlock> {
        self.document
            .sections()
            .iter()
            .skip(1)
            .map(TrialBlock::from_section)
            .collect()
    }

    /// The trial block called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::UnknownBlock`] if there is no such block.
    pub fn block(&self, name: &str) -> Result<TrialBlock, ExperimentError> {
        self.document
            .sections()
            .iter()
            .skip(1)
            .find(|s| s.name() == name)
            .map(TrialBlock::from_section)
            .ok_or_else(|| ExperimentError::UnknownBlock {
                name: name.to_owned(),
            })
    }

    /// The independent variables attached to every record of block `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::UnknownBlock`] or
    /// [`ExperimentError::MissingKey`] for `ParticipantID`.
    pub fn participant_context(&self, name: &str) -> Result<ParticipantContext, ExperimentError> {
        let block = self.block(name)?;
        Ok(ParticipantContext {
            participant_id: self.participant_id()?.to_owned(),
            block: block.name,
            interruption_method: block.interruption_method,
            task_type: block.task_type,
            task_setting: block.task_setting,
            traffic: block.traffic,
        })
    }
}

/// Rewrite `CurrentBlock` in the file at `path`.
///
/// The value is stored quoted. The top comment block, section order and key
/// case are preserved; entries are written as `key=value`.
///
/// # Errors
///
/// Returns [`ExperimentError`] if the file cannot be read, parsed or
/// written, or has no `[General]` section.
pub fn set_current_block(path: &Path, block: &str) -> Result<(), ExperimentError> {
    let mut document = IniDocument::load(path)?;
    document
        .set_quoted(GENERAL_SECTION, "CurrentBlock", block)
        .map_err(|err| match err {
            IniError::MissingSection { .. } => ExperimentError::MissingGeneral,
            other => ExperimentError::Ini { source: other },
        })?;
    document.save(path)?;
    info!(path = %path.display(), block, "Current block updated");
    Ok(())
}

/// Copy a participant's experiment file to where the simulator reads it.
///
/// # Errors
///
/// Returns [`ExperimentError::Copy`] if the copy fails.
pub fn copy_config(from: &Path, to: &Path) -> Result<(), ExperimentError> {
    std::fs::copy(from, to).map_err(|source| ExperimentError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })?;
    info!(from = %from.display(), to = %to.display(), "Experiment file copied");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    const FILE: &str = "\
# Participant P03
[General]
ParticipantID=\"P03\"
LogPerformance=\"True\"
CurrentBlock=\"Block0Trial1\"

[OneBackTestTrial]
SkipSR=\"True\"
NDRTTaskType=\"VisualNBackTask\"
TaskSetting=\"One\"
InterruptionMethod=\"Immediate\"

[Block1Trial1]
SkipSR=\"False\"
NDRTTaskType=\"VisualNBackTask\"
TaskSetting=\"Two\"
InterruptionMethod=\"Negotiated\"
Traffic=\"3RV\"
";

    fn write_sample(dir: &Path) -> PathBuf {
        let path = dir.join("ExperimentConfig.ini");
        std::fs::write(&path, FILE).unwrap();
        path
    }

    #[test]
    fn reads_general_and_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExperimentConfig::load(&write_sample(dir.path())).unwrap();
        assert_eq!(config.participant_id().unwrap(), "P03");
        assert!(config.log_performance());
        assert_eq!(config.current_block(), Some("Block0Trial1"));

        let blocks = config.blocks();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].skip_scenario_runner);
        assert!(!blocks[1].skip_scenario_runner);
        assert_eq!(blocks[1].traffic, "3RV");
        assert_eq!(blocks[0].traffic, "");
    }

    #[test]
    fn participant_context_for_block() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExperimentConfig::load(&write_sample(dir.path())).unwrap();
        let ctx = config.participant_context("Block1Trial1").unwrap();
        assert_eq!(ctx.participant_id, "P03");
        assert_eq!(ctx.block, "Block1Trial1");
        assert_eq!(ctx.interruption_method, "Negotiated");
        assert_eq!(ctx.task_setting, "Two");

        let err = config.participant_context("General").unwrap_err();
        assert!(matches!(err, ExperimentError::UnknownBlock { .. }));
    }

    #[test]
    fn current_block_update_preserves_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path());
        set_current_block(&path, "Block1Trial1").unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# Participant P03\n[General]\n"));
        assert!(text.contains("CurrentBlock=\"Block1Trial1\"\n"));
        let general_at = text.find("[General]").unwrap();
        let test_at = text.find("[OneBackTestTrial]").unwrap();
        let block_at = text.find("[Block1Trial1]").unwrap();
        assert!(general_at < test_at && test_at < block_at);

        let reloaded = ExperimentConfig::load(&path).unwrap();
        assert_eq!(reloaded.current_block(), Some("Block1Trial1"));
    }

    #[test]
    fn file_without_general_is_rejected() {
        let doc = IniDocument::parse("[Block1Trial1]\nSkipSR=\"False\"\n").unwrap();
        let err = ExperimentConfig::from_document(doc).unwrap_err();
        assert!(matches!(err, ExperimentError::MissingGeneral));
    }

    #[test]
    fn copy_reports_paths_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let from = write_sample(dir.path());
        let to = dir.path().join("copy.ini");
        copy_config(&from, &to).unwrap();
        assert_eq!(std::fs::read_to_string(&to).unwrap(), FILE);

        let missing = dir.path().join("ExperimentConfig_P99.ini");
        let err = copy_config(&missing, &to).unwrap_err();
        assert!(matches!(err, ExperimentError::Copy { .. }));
    }
}
