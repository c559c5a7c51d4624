//! Versioned decoders for streamed payloads and batch replies
//!
//! The oracle backend has shipped two payload shapes. `Current` is canonical:
//!
//! ```json
//! { "content"?: string, "source"?: Source, "finished"?: string }
//! ```
//!
//! `Legacy` carries sources as `[label, url]` pairs and signals the end of a
//! turn by sending a payload with neither content nor source.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{DecodeError, Error},
    types::{Source, Turn},
};

/// Protocol generation spoken by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// Structured `Source` records and an explicit `finished` field
    #[default]
    Current,
    /// Tuple sources and an implicit finish signal
    Legacy,
}

impl ProtocolVersion {
    /// Name used in configuration files
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolVersion::Current => "current",
            ProtocolVersion::Legacy => "legacy",
        }
    }

    /// Create a fresh decoder for one assistant turn.
    ///
    /// `sources_so_far` is the number of sources already in the transcript; only
    /// the legacy decoder uses it, to number tuple sources after them.
    pub fn decoder(self, sources_so_far: usize) -> Box<dyn PayloadDecoder> {
        match self {
            ProtocolVersion::Current => Box::new(CurrentDecoder),
            ProtocolVersion::Legacy => Box::new(LegacyDecoder::with_ordinal_offset(sources_so_far)),
        }
    }

    /// Decode a batch endpoint reply.
    ///
    /// A legacy single-turn reply numbers its sources after `sources_so_far`,
    /// as the streaming decoder does. A full transcript is numbered from 1.
    pub fn decode_reply(self, raw: &str, sources_so_far: usize) -> Result<BatchReply, DecodeError> {
        let value = parse_value(raw)?;
        match self {
            ProtocolVersion::Current => match value {
                Value::Array(_) => Ok(BatchReply::Transcript(from_value(value)?)),
                Value::Object(_) => Ok(BatchReply::Turn(from_value(value)?)),
                other => Err(DecodeError::Shape(format!(
                    "expected a turn or an array of turns, got {}",
                    json_kind(&other)
                ))),
            },
            ProtocolVersion::Legacy => match value {
                Value::Array(_) => {
                    let mut ordinal = 0;
                    let turns: Vec<LegacyTurn> = from_value(value)?;
                    Ok(BatchReply::Transcript(
                        turns
                            .into_iter()
                            .map(|t| t.upgrade(&mut ordinal))
                            .collect(),
                    ))
                }
                Value::Object(_) => {
                    let mut ordinal = sources_so_far;
                    let turn: LegacyTurn = from_value(value)?;
                    Ok(BatchReply::Turn(turn.upgrade(&mut ordinal)))
                }
                other => Err(DecodeError::Shape(format!(
                    "expected a turn or an array of turns, got {}",
                    json_kind(&other)
                ))),
            },
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "current" | "v2" => Ok(ProtocolVersion::Current),
            "legacy" | "v1" => Ok(ProtocolVersion::Legacy),
            other => Err(Error::InvalidConfig(format!(
                "unknown protocol version: {other}"
            ))),
        }
    }
}

/// One decoded piece of a payload, in processing order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadPart {
    /// A fragment of answer text, appended verbatim
    Content(String),
    /// A citation record
    Source(Source),
    /// No more payloads will arrive for this turn
    Finished(String),
}

/// Decodes raw SSE `data` strings into payload parts.
///
/// A single payload may yield several parts; they are always returned in the
/// order content, source, finished.
pub trait PayloadDecoder: Send {
    /// The protocol generation this decoder understands
    fn version(&self) -> ProtocolVersion;

    /// Decode one raw payload
    fn decode(&mut self, raw: &str) -> Result<Vec<PayloadPart>, DecodeError>;
}

/// A streamed payload in the canonical shape
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<String>,
}

impl StreamPayload {
    /// Payload carrying a text fragment
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Payload carrying a single source
    pub fn source(source: Source) -> Self {
        Self {
            source: Some(source),
            ..Default::default()
        }
    }

    /// Payload carrying the finish signal
    pub fn finished(signal: impl Into<String>) -> Self {
        Self {
            finished: Some(signal.into()),
            ..Default::default()
        }
    }

    /// Encode as the JSON carried in an SSE `data` field
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Decoder for the canonical payload shape
#[derive(Debug, Default)]
pub struct CurrentDecoder;

impl PayloadDecoder for CurrentDecoder {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::Current
    }

    fn decode(&mut self, raw: &str) -> Result<Vec<PayloadPart>, DecodeError> {
        let value = parse_object(raw)?;
        let payload: StreamPayload = from_value(value)?;

        let mut parts = Vec::with_capacity(3);
        if let Some(content) = payload.content.filter(|c| !c.is_empty()) {
            parts.push(PayloadPart::Content(content));
        }
        if let Some(source) = payload.source {
            parts.push(PayloadPart::Source(source));
        }
        if let Some(signal) = payload.finished {
            parts.push(PayloadPart::Finished(signal));
        }
        Ok(parts)
    }
}

#[derive(Debug, Deserialize)]
struct LegacyPayload {
    #[serde(default)]
    #[allow(dead_code)]
    serial: Option<u64>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    source: Option<(String, String)>,
    #[serde(default)]
    finished: Option<String>,
}

/// Decoder for the tuple-source payload shape.
///
/// Tuple sources carry no ordinal or rank, so both are assigned from arrival
/// order: `index` is the 0-based arrival position and `ordinal` is
/// `ordinal_offset + index + 1`.
#[derive(Debug, Default)]
pub struct LegacyDecoder {
    sources_seen: usize,
    ordinal_offset: usize,
}

impl LegacyDecoder {
    /// Start ordinals after `offset` (the number of sources already in the transcript)
    pub fn with_ordinal_offset(offset: usize) -> Self {
        Self {
            sources_seen: 0,
            ordinal_offset: offset,
        }
    }

    fn upgrade_source(&mut self, (label, url): (String, String)) -> Source {
        let index = self.sources_seen;
        self.sources_seen += 1;
        Source {
            ordinal: self.ordinal_offset + index + 1,
            index: index as i64,
            citation: label,
            url,
            origin_text: String::new(),
        }
    }
}

impl PayloadDecoder for LegacyDecoder {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::Legacy
    }

    fn decode(&mut self, raw: &str) -> Result<Vec<PayloadPart>, DecodeError> {
        let trimmed = raw.trim();
        if trimmed == "[0]" || trimmed == "[DONE]" {
            return Ok(vec![PayloadPart::Finished(trimmed.to_string())]);
        }

        let value = parse_object(raw)?;
        let payload: LegacyPayload = from_value(value)?;

        let mut parts = Vec::with_capacity(3);
        if let Some(content) = payload.content.filter(|c| !c.is_empty()) {
            parts.push(PayloadPart::Content(content));
        }
        if let Some(pair) = payload.source {
            let source = self.upgrade_source(pair);
            parts.push(PayloadPart::Source(source));
        }
        match payload.finished {
            Some(signal) => parts.push(PayloadPart::Finished(signal)),
            // Neither content nor source: the legacy end-of-turn sentinel
            None if parts.is_empty() => parts.push(PayloadPart::Finished(String::new())),
            None => {}
        }
        Ok(parts)
    }
}

/// Reply from the batch conversation endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchReply {
    /// The full transcript, to be adopted wholesale
    Transcript(Vec<Turn>),
    /// A single assistant turn answering the last user turn
    Turn(Turn),
}

#[derive(Debug, Deserialize)]
enum LegacyTurn {
    User(String),
    Assistant(String, Vec<(String, String)>),
}

impl LegacyTurn {
    fn upgrade(self, ordinal: &mut usize) -> Turn {
        match self {
            LegacyTurn::User(text) => Turn::User(text),
            LegacyTurn::Assistant(text, pairs) => {
                let sources = pairs
                    .into_iter()
                    .enumerate()
                    .map(|(index, (label, url))| {
                        *ordinal += 1;
                        Source {
                            ordinal: *ordinal,
                            index: index as i64,
                            citation: label,
                            url,
                            origin_text: String::new(),
                        }
                    })
                    .collect();
                Turn::Assistant(text, sources)
            }
        }
    }
}

fn parse_value(raw: &str) -> Result<Value, DecodeError> {
    serde_json::from_str(raw).map_err(|e| DecodeError::from_json(&e))
}

fn parse_object(raw: &str) -> Result<Value, DecodeError> {
    let value = parse_value(raw)?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(DecodeError::Shape(format!(
            "expected a JSON object, got {}",
            json_kind(&value)
        )))
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(|e| DecodeError::Shape(e.to_string()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
