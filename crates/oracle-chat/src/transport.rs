//! Transport abstraction for talking to the oracle backend

use async_trait::async_trait;
use oracle_wire::{BatchReply, OracleClient, ProtocolVersion, Result, Turn, TransportEventStream};

/// Transport for one assistant turn.
///
/// `turns` is the full prior conversation plus the new user turn; it never
/// includes the empty assistant placeholder.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a streaming exchange
    async fn stream(&self, turns: &[Turn]) -> Result<TransportEventStream>;

    /// Run a batch exchange
    async fn exchange(&self, turns: &[Turn]) -> Result<BatchReply>;

    /// Payload shape this transport delivers
    fn protocol(&self) -> ProtocolVersion;
}

/// HTTP/SSE transport backed by [`OracleClient`]
pub struct HttpTransport {
    client: OracleClient,
}

impl HttpTransport {
    pub fn new(client: OracleClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &OracleClient {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn stream(&self, turns: &[Turn]) -> Result<TransportEventStream> {
        self.client.stream_conversation(turns)
    }

    async fn exchange(&self, turns: &[Turn]) -> Result<BatchReply> {
        self.client.conversation(turns).await
    }

    fn protocol(&self) -> ProtocolVersion {
        self.client.config().protocol
    }
}
