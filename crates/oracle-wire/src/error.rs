//! Error types for oracle-wire

use thiserror::Error;

/// Result type alias using oracle-wire Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the oracle backend
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend answered with a non-success status
    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// A payload or response body could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether this error came from the network transport rather than the payload
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::Status { .. } | Error::Sse(_)
        )
    }
}

/// A single payload that failed to decode.
///
/// Decode errors are local to one payload: the stream they came from may still
/// carry valid payloads afterwards.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload is not valid JSON
    #[error("malformed JSON payload: {0}")]
    Malformed(String),

    /// The payload is valid JSON but not the expected shape
    #[error("unexpected payload shape: {0}")]
    Shape(String),
}

impl DecodeError {
    pub(crate) fn from_json(e: &serde_json::Error) -> Self {
        if e.is_syntax() || e.is_eof() {
            DecodeError::Malformed(e.to_string())
        } else {
            DecodeError::Shape(e.to_string())
        }
    }
}
