//! Session event types

use serde::{Deserialize, Serialize};

use crate::store::Conversation;

/// How an assistant turn ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The backend sent a finish signal (or the batch reply arrived)
    Finished,
    /// The transport closed without a finish signal
    Incomplete,
    /// The per-turn timeout elapsed first
    TimedOut,
    /// The turn was aborted through the session handle
    Cancelled,
    /// A decode error stopped consumption under the halt policy
    Halted,
    /// The transport failed
    Failed(String),
}

impl TurnOutcome {
    /// Whether the assistant turn is complete
    pub fn is_complete(&self) -> bool {
        matches!(self, TurnOutcome::Finished)
    }
}

/// Events emitted while a session processes submissions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A submission started
    TurnStart { generation: u64 },

    /// The conversation changed; carries the new snapshot
    Updated {
        generation: u64,
        conversation: Conversation,
    },

    /// A payload could not be decoded and was dropped
    DecodeError { generation: u64, message: String },

    /// Something non-fatal the user should know about
    Warning { generation: u64, message: String },

    /// The submission finished
    TurnEnd { generation: u64, outcome: TurnOutcome },

    /// Error occurred
    Error { message: String },
}

impl ChatEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::TurnEnd { .. } | ChatEvent::Error { .. })
    }
}
