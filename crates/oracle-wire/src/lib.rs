//! oracle-wire: Wire protocol for the oracle answering service
//!
//! This crate defines the transcript types exchanged with the oracle backend,
//! the versioned decoders for streamed payloads, and an HTTP/SSE client for the
//! streaming and batch conversation endpoints.

pub mod client;
pub mod error;
pub mod payload;
pub mod stream;
pub mod types;

pub use client::{ClientConfig, OracleClient, RequestEnvelope};
pub use error::{DecodeError, Error, Result};
pub use payload::{BatchReply, PayloadDecoder, PayloadPart, ProtocolVersion, StreamPayload};
pub use stream::{TransportEvent, TransportEventStream};
pub use types::*;
