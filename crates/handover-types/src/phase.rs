//! Trial phases and the parties that report them.
//!
//! The phase list is totally ordered: a phase's position in
//! [`Phase::ORDERED`] is the only basis for deciding whether one phase comes
//! "later" than another. [`Phase::Unknown`] is always the earliest and is
//! what a missing report degrades to.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// A named step of the automation take-over trial protocol.
///
/// Serialized by variant name (`"TakeOverManual"`), which is also the
/// `vehicle_status` value on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// No information. Missing or timed-out reports are treated as this.
    #[default]
    Unknown,
    /// Participant drives manually before automation engages.
    ManualDrive,
    /// Automation is driving; the participant works on the secondary task.
    Autopilot,
    /// Automation is driving and the take-over alert is imminent.
    PreAlertAutopilot,
    /// Take-over request issued; the participant must take control.
    TakeOver,
    /// Participant has taken manual control after the request.
    TakeOverManual,
    /// Automation re-engaged after the manual segment.
    ResumedAutopilot,
    /// The trial is finished. Terminal.
    TrialOver,
}

impl Phase {
    /// Every phase in protocol order. The index of a phase in this array is
    /// its ordering index.
    pub const ORDERED: [Self; 8] = [
        Self::Unknown,
        Self::ManualDrive,
        Self::Autopilot,
        Self::PreAlertAutopilot,
        Self::TakeOver,
        Self::TakeOverManual,
        Self::ResumedAutopilot,
        Self::TrialOver,
    ];

    /// Phases whose entry timestamp is persisted in the interval table, in
    /// column order.
    pub const RECORDED: [Self; 6] = [
        Self::Autopilot,
        Self::PreAlertAutopilot,
        Self::TakeOver,
        Self::TakeOverManual,
        Self::ResumedAutopilot,
        Self::TrialOver,
    ];

    /// Position of this phase in the protocol order.
    pub const fn index(self) -> usize {
        match self {
            Self::Unknown => 0,
            Self::ManualDrive => 1,
            Self::Autopilot => 2,
            Self::PreAlertAutopilot => 3,
            Self::TakeOver => 4,
            Self::TakeOverManual => 5,
            Self::ResumedAutopilot => 6,
            Self::TrialOver => 7,
        }
    }

    /// Whether `self` is at or after `other` in protocol order.
    pub const fn is_at_or_after(self, other: Self) -> bool {
        self.index() >= other.index()
    }

    /// Whether this is the terminal phase.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::TrialOver)
    }

    /// The wire name of this phase.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::ManualDrive => "ManualDrive",
            Self::Autopilot => "Autopilot",
            Self::PreAlertAutopilot => "PreAlertAutopilot",
            Self::TakeOver => "TakeOver",
            Self::TakeOverManual => "TakeOverManual",
            Self::ResumedAutopilot => "ResumedAutopilot",
            Self::TrialOver => "TrialOver",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A phase name that is not part of the protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid vehicle status: {name}")]
pub struct UnknownPhase {
    /// The rejected name.
    pub name: String,
}

impl FromStr for Phase {
    type Err = UnknownPhase;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ORDERED
            .iter()
            .copied()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| UnknownPhase { name: s.to_owned() })
    }
}

// ---------------------------------------------------------------------------
// Origin
// ---------------------------------------------------------------------------

/// The process a status message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// The simulation server.
    Simulator,
    /// The scenario-control script.
    ScenarioScript,
    /// This experiment controller.
    Controller,
}

impl Origin {
    /// The `from` label used on the wire.
    pub const fn wire_label(self) -> &'static str {
        match self {
            Self::Simulator => "carla",
            Self::ScenarioScript => "scenario_runner",
            Self::Controller => "client",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_label())
    }
}

// ---------------------------------------------------------------------------
// Eye-tracking role
// ---------------------------------------------------------------------------

/// What the eye-tracking stream is being recorded for at a given moment.
///
/// The two roles are mutually exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EyeTrackingRole {
    /// Attention split between the secondary task and supervising automation.
    #[default]
    Interleaving,
    /// Attention during the manual take-over segment.
    DrivingPerformance,
}

impl EyeTrackingRole {
    /// Label written into eye-tracking records.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Interleaving => "interleaving",
            Self::DrivingPerformance => "driving-performance",
        }
    }
}

impl fmt::Display for EyeTrackingRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
