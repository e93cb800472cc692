//! Status message wire format.
//!
//! Every producer publishes the same JSON object:
//!
//! ```json
//! { "from": "carla", "timestamp": "21/03/2024 14:05:09.123", "vehicle_status": "Autopilot" }
//! ```
//!
//! [`StatusMessage`] is the raw wire shape. [`StatusReport`] is the parsed,
//! validated form consumed by the reconciliation engine. A message whose
//! phase name or timestamp does not parse is [`MalformedStatus`].

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::phase::{Origin, Phase, UnknownPhase};

/// Format of every timestamp exchanged on the status channels and written
/// into records: day/month/year, 24h clock, millisecond precision.
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S%.3f";

/// Parsing accepts any fractional-second precision.
const TIMESTAMP_PARSE_FORMAT: &str = "%d/%m/%Y %H:%M:%S%.f";

/// Current local wall-clock time.
pub fn wall_clock_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Render a timestamp in [`TIMESTAMP_FORMAT`].
pub fn format_timestamp(at: &NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a timestamp written in [`TIMESTAMP_FORMAT`].
///
/// # Errors
///
/// Returns the chrono parse error if `raw` does not match the format.
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_PARSE_FORMAT)
}

/// Raw status message as it travels on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// Sender label (`carla`, `scenario_runner`, `client`).
    pub from: String,
    /// Time the sender observed the phase, in [`TIMESTAMP_FORMAT`].
    pub timestamp: String,
    /// Phase name.
    pub vehicle_status: String,
    /// Extra timing payload some producers attach. Carried through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_data: Option<String>,
}

impl StatusMessage {
    /// Build an outbound message for `phase` observed at `at`.
    pub fn new(origin: Origin, phase: Phase, at: &NaiveDateTime) -> Self {
        Self {
            from: origin.wire_label().to_owned(),
            timestamp: format_timestamp(at),
            vehicle_status: phase.as_str().to_owned(),
            time_data: None,
        }
    }

    /// Decode a JSON payload received on `origin`'s channel.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedStatus::Payload`] if the bytes are not a status
    /// message.
    pub fn from_json(origin: Origin, payload: &[u8]) -> Result<Self, MalformedStatus> {
        serde_json::from_slice(payload).map_err(|e| MalformedStatus::Payload {
            origin,
            reason: e.to_string(),
        })
    }
}

/// A status message that could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedStatus {
    /// The `vehicle_status` field is not a protocol phase.
    #[error("{origin} sent an unknown phase: {source}")]
    Phase {
        /// Channel the message arrived on.
        origin: Origin,
        /// The underlying parse error.
        source: UnknownPhase,
    },

    /// The `timestamp` field is not in [`TIMESTAMP_FORMAT`].
    #[error("{origin} sent an unreadable timestamp {raw:?}")]
    Timestamp {
        /// Channel the message arrived on.
        origin: Origin,
        /// The rejected value.
        raw: String,
    },

    /// The payload is not a status message at all.
    #[error("{origin} sent an undecodable payload: {reason}")]
    Payload {
        /// Channel the message arrived on.
        origin: Origin,
        /// Decoder error text.
        reason: String,
    },
}

/// A validated phase report from one producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    /// Which producer the report belongs to.
    pub origin: Origin,
    /// Reported phase.
    pub phase: Phase,
    /// When the producer observed the phase.
    pub observed_at: NaiveDateTime,
}

impl StatusReport {
    /// Create a report directly (fakes, tests, synthesized misses).
    pub const fn new(origin: Origin, phase: Phase, observed_at: NaiveDateTime) -> Self {
        Self {
            origin,
            phase,
            observed_at,
        }
    }

    /// The report a missing message degrades to: [`Phase::Unknown`] at `now`.
    pub const fn missing(origin: Origin, now: NaiveDateTime) -> Self {
        Self::new(origin, Phase::Unknown, now)
    }

    /// Validate a wire message received on `origin`'s channel.
    ///
    /// The channel, not the `from` label, decides the origin: producers are
    /// identified by where they publish.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedStatus`] if the phase or timestamp does not parse.
    pub fn from_message(origin: Origin, message: &StatusMessage) -> Result<Self, MalformedStatus> {
        let phase = message
            .vehicle_status
            .parse::<Phase>()
            .map_err(|source| MalformedStatus::Phase { origin, source })?;
        let observed_at =
            parse_timestamp(&message.timestamp).map_err(|_err| MalformedStatus::Timestamp {
                origin,
                raw: message.timestamp.clone(),
            })?;
        Ok(Self::new(origin, phase, observed_at))
    }
}
