//! Transcript types shared with the oracle backend

use serde::{Deserialize, Serialize};

/// A citation attached to an assistant answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Citation number as referenced inline in the answer text (`[n]`)
    pub ordinal: usize,
    /// Rank of the document as returned by the backend
    pub index: i64,
    /// Display label
    pub citation: String,
    /// Link to the cited document
    pub url: String,
    /// Excerpt shown on hover
    pub origin_text: String,
}

impl Source {
    /// Create a new source record
    pub fn new(
        ordinal: usize,
        index: i64,
        citation: impl Into<String>,
        url: impl Into<String>,
        origin_text: impl Into<String>,
    ) -> Self {
        Self {
            ordinal,
            index,
            citation: citation.into(),
            url: url.into(),
            origin_text: origin_text.into(),
        }
    }

    /// In-page anchor id this source renders under
    pub fn anchor(&self) -> String {
        format!("citation_{}", self.ordinal)
    }
}

/// One entry in the transcript.
///
/// Serializes as `{"User": "text"}` or `{"Assistant": ["text", [sources]]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Turn {
    /// Literal text the human typed
    User(String),
    /// Accumulated answer text and its citations, in arrival order
    Assistant(String, Vec<Source>),
}

impl Turn {
    /// Create a user turn
    pub fn user(text: impl Into<String>) -> Self {
        Self::User(text.into())
    }

    /// Create an empty assistant placeholder
    pub fn assistant_empty() -> Self {
        Self::Assistant(String::new(), Vec::new())
    }

    /// Create an assistant turn with text and sources
    pub fn assistant(text: impl Into<String>, sources: Vec<Source>) -> Self {
        Self::Assistant(text.into(), sources)
    }

    /// Get the role as a string
    pub fn role(&self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::Assistant(..) => "assistant",
        }
    }

    /// Get the text of either variant
    pub fn text(&self) -> &str {
        match self {
            Self::User(text) | Self::Assistant(text, _) => text,
        }
    }

    /// Get the sources (empty for user turns)
    pub fn sources(&self) -> &[Source] {
        match self {
            Self::User(_) => &[],
            Self::Assistant(_, sources) => sources,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User(_))
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Self::Assistant(..))
    }
}
