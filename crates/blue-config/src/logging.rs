//! Rendering of the protocol engine's `tracing` output.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How connection and listener events are written to stderr.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One flattened JSON object per event, fields such as `remote` and
    /// `correlation_id` at the top level.
    #[default]
    Json,
    /// Single-line text for terminals.
    Compact,
}

/// Error returned when text names no [`LogFormat`].
pub type LogFormatParseError = strum::ParseError;
