//! Message state machine.

use serde::{Deserialize, Serialize};

/// Message state.
///
/// State transitions:
/// - Pending -> Leased -> Acknowledged
/// - Pending -> Leased -> Pending (fail / lease expiry, receive budget left)
/// - Pending -> Leased -> DeadLettered (receive budget exhausted)
///
/// Acknowledged and DeadLettered records leave the queue right after the
/// transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageState {
    /// Waiting in its group.
    Pending,

    /// Held by exactly one worker until ack, fail or lease expiry.
    Leased,

    /// Processed successfully; removed.
    Acknowledged,

    /// Moved to the dead-letter store; removed.
    DeadLettered,
}

impl MessageState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageState::Acknowledged | MessageState::DeadLettered)
    }

    pub fn is_leased(self) -> bool {
        matches!(self, MessageState::Leased)
    }
}
