//! Stream assembler: turns raw payloads into reducer actions, in arrival order.

use oracle_wire::{DecodeError, PayloadDecoder, PayloadPart, ProtocolVersion};
use serde::{Deserialize, Serialize};

use crate::store::{Action, Conversation, StoreError};

/// What to do with a payload that fails to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeErrorPolicy {
    /// Drop the payload, report it, keep consuming
    #[default]
    Skip,
    /// Stop consuming; the partial answer is kept
    Halt,
}

/// One instruction produced by the assembler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Fold this action into the conversation
    Apply(Action),
    /// Close the transport; nothing more for this turn
    Finish { signal: String },
    /// The payload was dropped
    Reject(DecodeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    Streaming,
    Finished,
    Halted,
}

/// Counters for one assembled turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblerStats {
    pub fragments: usize,
    pub sources: usize,
    pub rejected: usize,
    /// Payloads that arrived after the turn was finished or halted
    pub ignored: usize,
}

/// Decodes the payloads of one assistant turn into directives.
///
/// Parts of a single payload come out in the order content, source, finish.
/// Once a finish signal is seen (or a decode error under [`DecodeErrorPolicy::Halt`]),
/// every later payload is ignored.
pub struct Assembler {
    decoder: Box<dyn PayloadDecoder>,
    policy: DecodeErrorPolicy,
    state: AssemblerState,
    stats: AssemblerStats,
}

impl Assembler {
    pub fn new(decoder: Box<dyn PayloadDecoder>, policy: DecodeErrorPolicy) -> Self {
        Self {
            decoder,
            policy,
            state: AssemblerState::Streaming,
            stats: AssemblerStats::default(),
        }
    }

    /// Assembler for `version`, numbering legacy sources after `sources_so_far`
    pub fn for_version(
        version: ProtocolVersion,
        sources_so_far: usize,
        policy: DecodeErrorPolicy,
    ) -> Self {
        Self::new(version.decoder(sources_so_far), policy)
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    pub fn policy(&self) -> DecodeErrorPolicy {
        self.policy
    }

    pub fn version(&self) -> ProtocolVersion {
        self.decoder.version()
    }

    /// Whether the turn has stopped accepting payloads
    pub fn is_done(&self) -> bool {
        self.state != AssemblerState::Streaming
    }

    /// Decode one raw payload
    pub fn feed(&mut self, raw: &str) -> Vec<Directive> {
        if self.is_done() {
            self.stats.ignored += 1;
            tracing::debug!("Ignoring payload after end of turn: {}", raw);
            return Vec::new();
        }

        let parts = match self.decoder.decode(raw) {
            Ok(parts) => parts,
            Err(e) => {
                self.stats.rejected += 1;
                tracing::warn!("Dropping undecodable payload: {}", e);
                if self.policy == DecodeErrorPolicy::Halt {
                    self.state = AssemblerState::Halted;
                }
                return vec![Directive::Reject(e)];
            }
        };

        let mut directives = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                PayloadPart::Content(fragment) => {
                    self.stats.fragments += 1;
                    directives.push(Directive::Apply(Action::AppendAssistantText(fragment)));
                }
                PayloadPart::Source(source) => {
                    self.stats.sources += 1;
                    directives.push(Directive::Apply(Action::AppendAssistantSource(source)));
                }
                PayloadPart::Finished(signal) => {
                    self.state = AssemblerState::Finished;
                    directives.push(Directive::Finish { signal });
                    break;
                }
            }
        }
        directives
    }
}

/// Result of assembling a pre-recorded payload sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembled {
    pub conversation: Conversation,
    pub state: AssemblerState,
    pub stats: AssemblerStats,
}

/// Fold a pre-recorded sequence of payloads into `conversation`.
///
/// `conversation` must already end with the assistant turn being filled.
/// Undecodable payloads are handled per `policy`; reducer failures abort.
pub fn assemble<I, S>(
    conversation: &Conversation,
    payloads: I,
    version: ProtocolVersion,
    policy: DecodeErrorPolicy,
) -> Result<Assembled, StoreError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut assembler = Assembler::for_version(version, conversation.sources_count(), policy);
    let mut conversation = conversation.clone();

    for raw in payloads {
        for directive in assembler.feed(raw.as_ref()) {
            if let Directive::Apply(action) = directive {
                conversation = conversation.apply(action)?;
            }
        }
        if assembler.is_done() {
            break;
        }
    }

    Ok(Assembled {
        conversation,
        state: assembler.state(),
        stats: assembler.stats(),
    })
}
