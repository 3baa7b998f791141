//! Failure strategies applied when a processor reports an error.

use crate::message::Disposition;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

/// What the component does with a message whose processing failed.
///
/// Names parse case-insensitively from their snake_case form
/// (`nack_exit`, `nack`, `ack`), which is how they appear in the environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, AsRefStr, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum FailStrategy {
    /// Reject the message and stop the component with the processing error.
    #[default]
    NackExit,
    /// Reject the message and keep consuming.
    Nack,
    /// Acknowledge the message anyway and keep consuming.
    Ack,
}

/// Whether the run loop keeps going after a message has been settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

impl FailStrategy {
    /// The disposition for a failed message and what the loop does next.
    pub fn on_failure(self) -> (Disposition, Flow) {
        match self {
            FailStrategy::NackExit => (Disposition::Nack, Flow::Exit),
            FailStrategy::Nack => (Disposition::Nack, Flow::Continue),
            FailStrategy::Ack => (Disposition::Ack, Flow::Continue),
        }
    }

    /// Get all strategy variants.
    pub fn all() -> impl Iterator<Item = Self> {
        Self::iter()
    }
}
