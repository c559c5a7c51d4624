//! Conversation store: the transcript and the reducer that folds actions into it.

use oracle_wire::{Source, Turn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A change to the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Action {
    /// Append a turn at the end of the transcript
    AddTurn(Turn),
    /// Concatenate a fragment onto the last assistant turn's text
    AppendAssistantText(String),
    /// Append a citation to the last assistant turn's sources
    AppendAssistantSource(Source),
}

impl Action {
    /// Short name used in logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            Action::AddTurn(_) => "add_turn",
            Action::AppendAssistantText(_) => "append_assistant_text",
            Action::AppendAssistantSource(_) => "append_assistant_source",
        }
    }
}

/// An action that targets the last assistant turn found no such turn
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("cannot {action}: the conversation is empty")]
    EmptyConversation { action: &'static str },

    #[error("cannot {action}: turn {index} is a {role} turn, not an assistant turn")]
    NotAssistant {
        action: &'static str,
        index: usize,
        role: &'static str,
    },
}

/// The transcript: an ordered, append-only sequence of turns.
///
/// Only the last turn is ever modified, and only if it is an assistant turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    /// Create an empty conversation
    pub fn new() -> Self {
        Self::default()
    }

    /// All turns, oldest first
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Turn> {
        self.turns.iter()
    }

    /// Consume the conversation, returning its turns
    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }

    /// Total number of sources across all assistant turns
    pub fn sources_count(&self) -> usize {
        self.turns.iter().map(|t| t.sources().len()).sum()
    }

    /// Most recent source carrying `ordinal`
    pub fn find_source(&self, ordinal: usize) -> Option<&Source> {
        self.turns
            .iter()
            .rev()
            .flat_map(|t| t.sources().iter().rev())
            .find(|s| s.ordinal == ordinal)
    }

    /// Fold an action into the conversation, returning the new conversation.
    ///
    /// `self` is never modified. Appending to a conversation whose last turn
    /// is not an assistant turn is an error rather than a no-op.
    pub fn apply(&self, action: Action) -> Result<Conversation, StoreError> {
        let name = action.name();
        match action {
            Action::AddTurn(turn) => {
                let mut turns = self.turns.clone();
                turns.push(turn);
                Ok(Conversation { turns })
            }
            Action::AppendAssistantText(fragment) => self.with_last_assistant(name, |text, _| {
                text.push_str(&fragment);
            }),
            Action::AppendAssistantSource(source) => {
                self.with_last_assistant(name, |_, sources| {
                    sources.push(source);
                })
            }
        }
    }

    fn with_last_assistant(
        &self,
        action: &'static str,
        f: impl FnOnce(&mut String, &mut Vec<Source>),
    ) -> Result<Conversation, StoreError> {
        let index = match self.turns.len() {
            0 => return Err(StoreError::EmptyConversation { action }),
            n => n - 1,
        };

        let mut turns = self.turns.clone();
        match &mut turns[index] {
            Turn::Assistant(text, sources) => f(text, sources),
            other => {
                return Err(StoreError::NotAssistant {
                    action,
                    index,
                    role: other.role(),
                });
            }
        }
        Ok(Conversation { turns })
    }
}

impl From<Vec<Turn>> for Conversation {
    fn from(turns: Vec<Turn>) -> Self {
        Self { turns }
    }
}

impl<'a> IntoIterator for &'a Conversation {
    type Item = &'a Turn;
    type IntoIter = std::slice::Iter<'a, Turn>;

    fn into_iter(self) -> Self::IntoIter {
        self.turns.iter()
    }
}

/// Fold `action` into `conversation`. See [`Conversation::apply`].
pub fn apply(conversation: &Conversation, action: Action) -> Result<Conversation, StoreError> {
    conversation.apply(action)
}
