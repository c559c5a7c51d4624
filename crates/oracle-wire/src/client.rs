//! HTTP client for the oracle conversation endpoints

use std::time::Duration;

use async_stream::stream;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    payload::{BatchReply, ProtocolVersion},
    stream::{TransportEvent, TransportEventStream},
    types::Turn,
};

/// Default oracle deployment
pub const DEFAULT_BASE_URL: &str = "https://oracle-rs.semanticallyinvalid.net";

/// Streaming (SSE) endpoint path
pub const STREAMING_PATH: &str = "/streaming_conversation";

/// Batch endpoint path
pub const BATCH_PATH: &str = "/conversation";

/// How the transcript is wrapped in the request body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestEnvelope {
    /// A bare JSON array of turns
    #[default]
    Bare,
    /// `{"messages": [...]}`
    Wrapped,
}

impl RequestEnvelope {
    /// Parse a configuration value
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "bare" => Ok(RequestEnvelope::Bare),
            "wrapped" => Ok(RequestEnvelope::Wrapped),
            other => Err(Error::InvalidConfig(format!("unknown envelope: {other}"))),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the oracle deployment, without a trailing path
    pub base_url: String,
    /// Payload shape spoken by the backend
    pub protocol: ProtocolVersion,
    /// Request body shape
    pub envelope: RequestEnvelope,
    /// TCP connect timeout
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            protocol: ProtocolVersion::default(),
            envelope: RequestEnvelope::default(),
            connect_timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// Oracle API client
pub struct OracleClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl OracleClient {
    /// Create a new client
    pub fn new(config: ClientConfig) -> Result<Self> {
        if !(config.base_url.starts_with("http://") || config.base_url.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "base URL must be http(s): {:?}",
                config.base_url
            )));
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            config,
        })
    }

    /// Get the client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Full URL for an endpoint path
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Build the JSON request body for a transcript
    pub fn request_body(&self, turns: &[Turn]) -> serde_json::Value {
        match self.config.envelope {
            RequestEnvelope::Bare => serde_json::json!(turns),
            RequestEnvelope::Wrapped => serde_json::json!({ "messages": turns }),
        }
    }

    /// Open the streaming endpoint for a transcript ending in a user turn
    pub fn stream_conversation(&self, turns: &[Turn]) -> Result<TransportEventStream> {
        let url = self.endpoint(STREAMING_PATH);
        let body = self.request_body(turns);

        tracing::debug!("Opening event stream at {} ({} turns)", url, turns.len());

        let request_builder = self.client.post(&url).json(&body);
        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source)))
    }

    /// Call the batch endpoint and decode its reply
    pub async fn conversation(&self, turns: &[Turn]) -> Result<BatchReply> {
        let url = self.endpoint(BATCH_PATH);
        let body = self.request_body(turns);

        tracing::debug!("Posting {} turns to {}", turns.len(), url);

        let response = self.client.post(&url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        self.decode_reply(turns, &text)
    }

    /// Decode a batch reply to `turns`.
    ///
    /// Legacy sources in a single-turn reply are numbered after the ones
    /// already in `turns`, matching the streaming path.
    pub fn decode_reply(&self, turns: &[Turn], raw: &str) -> Result<BatchReply> {
        let sources_so_far = turns.iter().map(|t| t.sources().len()).sum();
        Ok(self.config.protocol.decode_reply(raw, sources_so_far)?)
    }
}

/// Adapt an SSE connection into transport events.
///
/// The event source reconnects on its own after errors; this stream closes it
/// instead, so a dropped connection ends the turn rather than replaying it.
fn create_stream(mut event_source: EventSource) -> impl futures::Stream<Item = TransportEvent> {
    stream! {
        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {
                    yield TransportEvent::Open;
                }
                Ok(Event::Message(msg)) => {
                    if msg.event != "message" {
                        tracing::trace!("Ignoring SSE event type {:?}", msg.event);
                        continue;
                    }
                    yield TransportEvent::Payload(msg.data);
                }
                Err(reqwest_eventsource::Error::StreamEnded) => {
                    break;
                }
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    let body = response.text().await.unwrap_or_default();
                    yield TransportEvent::Failed(Error::Status {
                        status: status.as_u16(),
                        body,
                    });
                    break;
                }
                Err(e) => {
                    yield TransportEvent::Failed(Error::Sse(e.to_string()));
                    break;
                }
            }
        }
        event_source.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Source;
    use serde_json::json;

    fn client_with(envelope: RequestEnvelope, base_url: &str) -> OracleClient {
        OracleClient::new(ClientConfig {
            base_url: base_url.to_string(),
            envelope,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        let client = client_with(RequestEnvelope::Bare, "http://localhost:5000/");
        assert_eq!(
            client.endpoint(STREAMING_PATH),
            "http://localhost:5000/streaming_conversation"
        );
        assert_eq!(client.endpoint(BATCH_PATH), "http://localhost:5000/conversation");
    }

    #[test]
    fn test_bare_request_body() {
        let client = client_with(RequestEnvelope::Bare, "http://localhost");
        let turns = vec![
            Turn::user("hi"),
            Turn::assistant("Hello", vec![Source::new(1, 7, "Doc", "http://x", "e")]),
            Turn::user("more"),
        ];
        let body = client.request_body(&turns);
        assert_eq!(body[0], json!({"User": "hi"}));
        assert_eq!(body[1]["Assistant"][0], json!("Hello"));
        assert_eq!(body[1]["Assistant"][1][0]["index"], json!(7));
        assert_eq!(body[2], json!({"User": "more"}));
    }

    #[test]
    fn test_wrapped_request_body() {
        let client = client_with(RequestEnvelope::Wrapped, "http://localhost");
        let body = client.request_body(&[Turn::user("hi")]);
        assert_eq!(body, json!({"messages": [{"User": "hi"}]}));
    }

    #[test]
    fn test_legacy_batch_reply_numbers_after_request_sources() {
        let client = OracleClient::new(ClientConfig {
            base_url: "http://localhost".into(),
            protocol: ProtocolVersion::Legacy,
            ..Default::default()
        })
        .unwrap();
        let turns = vec![
            Turn::user("a"),
            Turn::assistant("a [1]", vec![Source::new(1, 0, "A", "http://a", "")]),
            Turn::user("b"),
        ];

        let reply = client
            .decode_reply(&turns, r#"{"Assistant":["b [2]",[["B","http://b"]]]}"#)
            .unwrap();

        let BatchReply::Turn(turn) = reply else {
            panic!("expected single turn, got {:?}", reply);
        };
        assert_eq!(turn.sources()[0].ordinal, 2);
        assert_eq!(turn.sources()[0].index, 0);
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let result = OracleClient::new(ClientConfig {
            base_url: "localhost:5000".into(),
            ..Default::default()
        });
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_envelope_parse() {
        assert_eq!(RequestEnvelope::parse("Wrapped").unwrap(), RequestEnvelope::Wrapped);
        assert!(RequestEnvelope::parse("boxed").is_err());
    }
}
