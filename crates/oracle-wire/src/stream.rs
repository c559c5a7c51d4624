//! Transport-level event stream

use std::pin::Pin;

use tokio_stream::Stream;

use crate::error::Error;

/// Events produced by a transport while one assistant turn is in flight
#[derive(Debug)]
pub enum TransportEvent {
    /// Connection established
    Open,
    /// Raw `data` of one server event, not yet decoded
    Payload(String),
    /// The transport failed; no further events follow
    Failed(Error),
}

impl TransportEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransportEvent::Failed(_))
    }
}

/// A stream of transport events. The stream ending means the transport closed.
pub type TransportEventStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// Replay a pre-assembled array of raw payloads as a transport stream.
pub fn replay<I>(payloads: I) -> TransportEventStream
where
    I: IntoIterator<Item = String>,
    I::IntoIter: Send + 'static,
{
    Box::pin(futures::stream::iter(
        payloads.into_iter().map(TransportEvent::Payload),
    ))
}
