//! Error types for oracle-chat

use thiserror::Error;

use crate::store::StoreError;

/// Result type alias using oracle-chat Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a conversation
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the wire/transport layer
    #[error(transparent)]
    Wire(#[from] oracle_wire::Error),

    /// An action was routed to a turn that cannot take it
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A submission is already in flight
    #[error("A response is still streaming; wait for it or abort it first")]
    Busy,

    /// The submitted text was empty
    #[error("Nothing to send")]
    EmptyInput,
}

impl Error {
    /// Whether this error leaves the session usable for another submission
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Wire(e) => e.is_transport(),
            Error::Busy | Error::EmptyInput => true,
            Error::Store(_) => false,
        }
    }
}
