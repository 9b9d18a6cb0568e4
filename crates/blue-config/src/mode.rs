//! Dispatch execution model for connections.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How a connection executes handlers for inbound messages.
///
/// `Concurrent` spawns one short-lived worker per inbound request, response or
/// event. `Queued` appends decoded messages to an ordered queue that the owner
/// drains explicitly, giving deterministic single-threaded processing.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ProcessingMode {
    /// Handlers run on their own worker as soon as a message is decoded.
    #[default]
    Concurrent,
    /// Handlers run only when the owner drains the queue.
    Queued,
}

/// Errors encountered while parsing a [`ProcessingMode`] from text.
pub type ProcessingModeParseError = strum::ParseError;
