//! oracle-chat: Conversation store and streaming response assembly
//!
//! This crate folds the oracle's streamed answer fragments and citations into
//! an append-only transcript. The store is a pure reducer; the session drives
//! it from a transport, one in-flight turn at a time.

pub mod assembler;
pub mod error;
pub mod events;
pub mod handle;
pub mod session;
pub mod store;
pub mod transport;

#[cfg(test)]
mod proptests;

pub use assembler::{
    Assembled, Assembler, AssemblerState, AssemblerStats, DecodeErrorPolicy, Directive, assemble,
};
pub use error::{Error, Result};
pub use events::{ChatEvent, TurnOutcome};
pub use handle::SessionHandle;
pub use session::{ChatSession, SessionConfig, SubmitMode};
pub use store::{Action, Conversation, StoreError, apply};
pub use transport::{HttpTransport, Transport};
