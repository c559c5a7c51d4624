//! Chat session: owns the conversation and drives one turn at a time

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use oracle_wire::{BatchReply, TransportEvent, TransportEventStream, Turn};
use serde::{Deserialize, Serialize};
use tokio::{sync::broadcast, time::Instant};

use crate::{
    assembler::{Assembler, AssemblerState, DecodeErrorPolicy, Directive},
    error::{Error, Result},
    events::{ChatEvent, TurnOutcome},
    handle::{SessionHandle, TurnGuard},
    store::{Action, Conversation},
    transport::Transport,
};

/// Which backend endpoint a submission uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitMode {
    /// Server-sent events, folded incrementally
    #[default]
    Streaming,
    /// One request, one reply
    Batch,
}

/// Session configuration
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub mode: SubmitMode,
    /// Give up on a turn that has not finished after this long
    pub turn_timeout: Option<Duration>,
    pub decode_errors: DecodeErrorPolicy,
}

/// A conversation with the oracle.
///
/// Every change to the conversation is broadcast to subscribers as a
/// [`ChatEvent::Updated`] snapshot.
pub struct ChatSession {
    config: SessionConfig,
    conversation: Conversation,
    transport: Arc<dyn Transport>,
    event_tx: broadcast::Sender<ChatEvent>,
    handle: SessionHandle,
}

impl ChatSession {
    /// Create a new session
    pub fn new(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            conversation: Conversation::new(),
            transport,
            event_tx,
            handle: SessionHandle::new(),
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.event_tx.subscribe()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn set_mode(&mut self, mode: SubmitMode) {
        self.config.mode = mode;
    }

    pub fn set_turn_timeout(&mut self, timeout: Option<Duration>) {
        self.config.turn_timeout = timeout;
    }

    /// Get a cloneable handle for aborting or observing the session from outside.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Abort the in-flight turn
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_busy(&self) -> bool {
        self.handle.is_busy()
    }

    /// Replace the conversation (e.g. to resume a saved transcript)
    pub fn set_conversation(&mut self, conversation: Conversation) -> Result<()> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        self.conversation = conversation;
        Ok(())
    }

    /// Start over with an empty conversation
    pub fn clear(&mut self) -> Result<()> {
        self.set_conversation(Conversation::new())
    }

    /// Submit a user message using the configured mode
    pub async fn submit(&mut self, text: &str) -> Result<TurnOutcome> {
        match self.config.mode {
            SubmitMode::Streaming => self.submit_streaming(text).await,
            SubmitMode::Batch => self.submit_batch(text).await,
        }
    }

    /// Submit a user message and fold the streamed answer
    pub async fn submit_streaming(&mut self, text: &str) -> Result<TurnOutcome> {
        let (guard, request) = self.begin_turn(text)?;
        let result = self.run_streaming(&guard, request).await;
        self.end_turn(guard.generation, result)
    }

    /// Submit a user message and adopt the batch reply
    pub async fn submit_batch(&mut self, text: &str) -> Result<TurnOutcome> {
        let (guard, request) = self.begin_turn(text)?;
        let result = self.run_batch(&guard, request).await;
        self.end_turn(guard.generation, result)
    }

    /// Claim the session, append the user turn and the empty assistant turn.
    ///
    /// Returns the request transcript: prior turns plus the new user turn.
    fn begin_turn(&mut self, text: &str) -> Result<(TurnGuard, Vec<Turn>)> {
        if text.trim().is_empty() {
            return Err(Error::EmptyInput);
        }
        let guard = self.handle.begin()?;
        let generation = guard.generation;
        self.emit(ChatEvent::TurnStart { generation });

        let user = Turn::user(text);
        let mut request = self.conversation.turns().to_vec();
        request.push(user.clone());

        self.conversation = self
            .conversation
            .apply(Action::AddTurn(user))?
            .apply(Action::AddTurn(Turn::assistant_empty()))?;
        self.publish(generation);

        tracing::debug!(
            "Turn {} started ({} turns in request)",
            generation,
            request.len()
        );
        Ok((guard, request))
    }

    fn end_turn(&self, generation: u64, result: Result<TurnOutcome>) -> Result<TurnOutcome> {
        match &result {
            Ok(outcome) => {
                tracing::debug!("Turn {} ended: {:?}", generation, outcome);
                self.emit(ChatEvent::TurnEnd {
                    generation,
                    outcome: outcome.clone(),
                });
            }
            Err(e) => {
                tracing::error!("Turn {} failed: {}", generation, e);
                self.emit(ChatEvent::Error {
                    message: e.to_string(),
                });
            }
        }
        result
    }

    async fn run_streaming(&mut self, guard: &TurnGuard, request: Vec<Turn>) -> Result<TurnOutcome> {
        let generation = guard.generation;
        let deadline = self.config.turn_timeout.map(|d| Instant::now() + d);

        let opened = tokio::select! {
            biased;
            _ = guard.cancel.cancelled() => return Ok(TurnOutcome::Cancelled),
            _ = deadline_elapsed(deadline) => return Ok(self.timed_out(generation)),
            opened = self.transport.stream(&request) => opened,
        };
        let mut stream: TransportEventStream = match opened {
            Ok(stream) => stream,
            Err(e) => return Ok(self.failed(generation, e)),
        };

        // Legacy sources are numbered after the ones already in the transcript
        let mut assembler = Assembler::for_version(
            self.transport.protocol(),
            self.conversation.sources_count(),
            self.config.decode_errors,
        );

        // Dropping the stream on exit closes the transport
        loop {
            let event = tokio::select! {
                biased;
                _ = guard.cancel.cancelled() => return Ok(TurnOutcome::Cancelled),
                _ = deadline_elapsed(deadline) => return Ok(self.timed_out(generation)),
                event = stream.next() => event,
            };

            match event {
                None => {
                    tracing::warn!("Transport closed before a finish signal");
                    self.emit(ChatEvent::Warning {
                        generation,
                        message: "Connection closed before the answer finished".into(),
                    });
                    return Ok(TurnOutcome::Incomplete);
                }
                Some(TransportEvent::Open) => {
                    tracing::debug!("Transport open for turn {}", generation);
                }
                Some(TransportEvent::Failed(e)) => return Ok(self.failed(generation, e)),
                Some(TransportEvent::Payload(data)) => {
                    if guard.is_stale() {
                        tracing::warn!("Discarding payload from stale turn {}", generation);
                        return Ok(TurnOutcome::Cancelled);
                    }
                    tracing::debug!("Payload: {}", data);
                    self.fold_payload(generation, &mut assembler, &data)?;

                    if assembler.is_done() {
                        tracing::debug!("Turn {} assembled: {:?}", generation, assembler.stats());
                    }
                    match assembler.state() {
                        AssemblerState::Streaming => {}
                        AssemblerState::Finished => return Ok(TurnOutcome::Finished),
                        AssemblerState::Halted => {
                            self.emit(ChatEvent::Warning {
                                generation,
                                message: "Stopped after an undecodable payload; keeping the partial answer".into(),
                            });
                            return Ok(TurnOutcome::Halted);
                        }
                    }
                }
            }
        }
    }

    /// Fold every directive of one payload before the next is read
    fn fold_payload(
        &mut self,
        generation: u64,
        assembler: &mut Assembler,
        data: &str,
    ) -> Result<()> {
        let mut changed = false;
        for directive in assembler.feed(data) {
            match directive {
                Directive::Apply(action) => {
                    self.conversation = self.conversation.apply(action)?;
                    changed = true;
                }
                Directive::Finish { signal } => {
                    tracing::debug!("Finish signal {:?} for turn {}", signal, generation);
                }
                Directive::Reject(e) => {
                    self.emit(ChatEvent::DecodeError {
                        generation,
                        message: e.to_string(),
                    });
                }
            }
        }
        if changed {
            self.publish(generation);
        }
        Ok(())
    }

    async fn run_batch(&mut self, guard: &TurnGuard, request: Vec<Turn>) -> Result<TurnOutcome> {
        let generation = guard.generation;
        let deadline = self.config.turn_timeout.map(|d| Instant::now() + d);

        let reply = tokio::select! {
            biased;
            _ = guard.cancel.cancelled() => return Ok(TurnOutcome::Cancelled),
            _ = deadline_elapsed(deadline) => return Ok(self.timed_out(generation)),
            reply = self.transport.exchange(&request) => reply,
        };

        if guard.is_stale() {
            tracing::warn!("Discarding reply from stale turn {}", generation);
            return Ok(TurnOutcome::Cancelled);
        }

        match reply {
            Ok(BatchReply::Transcript(turns)) => {
                self.conversation = Conversation::from(turns);
            }
            Ok(BatchReply::Turn(Turn::Assistant(text, sources))) => {
                let mut conversation = self.conversation.clone();
                if !text.is_empty() {
                    conversation = conversation.apply(Action::AppendAssistantText(text))?;
                }
                for source in sources {
                    conversation = conversation.apply(Action::AppendAssistantSource(source))?;
                }
                self.conversation = conversation;
            }
            Ok(BatchReply::Turn(Turn::User(_))) => {
                let message = "Batch reply was a user turn".to_string();
                self.emit(ChatEvent::DecodeError {
                    generation,
                    message: message.clone(),
                });
                return Ok(TurnOutcome::Failed(message));
            }
            Err(e) => return Ok(self.failed(generation, e)),
        }

        self.publish(generation);
        Ok(TurnOutcome::Finished)
    }

    fn timed_out(&self, generation: u64) -> TurnOutcome {
        let timeout = self.config.turn_timeout.unwrap_or_default();
        tracing::warn!("Turn {} timed out after {:?}", generation, timeout);
        self.emit(ChatEvent::Warning {
            generation,
            message: format!(
                "No answer within {:?}; keeping the partial answer",
                timeout
            ),
        });
        TurnOutcome::TimedOut
    }

    fn failed(&self, generation: u64, error: oracle_wire::Error) -> TurnOutcome {
        let message = error.to_string();
        tracing::warn!("Transport failed during turn {}: {}", generation, message);
        self.emit(ChatEvent::Error {
            message: message.clone(),
        });
        TurnOutcome::Failed(message)
    }

    fn publish(&self, generation: u64) {
        self.emit(ChatEvent::Updated {
            generation,
            conversation: self.conversation.clone(),
        });
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.event_tx.send(event);
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use oracle_wire::{ProtocolVersion, Source, StreamPayload};
    use parking_lot::Mutex;

    #[derive(Clone)]
    enum Step {
        Payload(String),
        Fail(String),
        Wait(Duration),
        Hang,
    }

    fn content(text: &str) -> Step {
        Step::Payload(StreamPayload::content(text).to_json())
    }

    fn source(source: Source) -> Step {
        Step::Payload(StreamPayload::source(source).to_json())
    }

    fn finished() -> Step {
        Step::Payload(StreamPayload::finished("DONE").to_json())
    }

    /// Scripted transport: each call consumes the next script.
    struct MockTransport {
        scripts: Arc<Mutex<Vec<Vec<Step>>>>,
        replies: Arc<Mutex<Vec<BatchReply>>>,
        requests: Arc<Mutex<Vec<Vec<Turn>>>>,
        protocol: ProtocolVersion,
    }

    impl MockTransport {
        fn new(scripts: Vec<Vec<Step>>) -> Self {
            Self {
                scripts: Arc::new(Mutex::new(scripts)),
                replies: Arc::new(Mutex::new(vec![])),
                requests: Arc::new(Mutex::new(vec![])),
                protocol: ProtocolVersion::Current,
            }
        }

        fn with_replies(replies: Vec<BatchReply>) -> Self {
            let transport = Self::new(vec![]);
            *transport.replies.lock() = replies;
            transport
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn stream(&self, turns: &[Turn]) -> oracle_wire::Result<TransportEventStream> {
            self.requests.lock().push(turns.to_vec());
            let steps = {
                let mut scripts = self.scripts.lock();
                if scripts.is_empty() {
                    vec![content("done"), finished()]
                } else {
                    scripts.remove(0)
                }
            };

            let stream: TransportEventStream = Box::pin(async_stream::stream! {
                yield TransportEvent::Open;
                for step in steps {
                    match step {
                        Step::Payload(data) => yield TransportEvent::Payload(data),
                        Step::Fail(message) => {
                            yield TransportEvent::Failed(oracle_wire::Error::Sse(message));
                            return;
                        }
                        Step::Wait(delay) => tokio::time::sleep(delay).await,
                        Step::Hang => std::future::pending::<()>().await,
                    }
                }
            });
            Ok(stream)
        }

        async fn exchange(&self, turns: &[Turn]) -> oracle_wire::Result<BatchReply> {
            self.requests.lock().push(turns.to_vec());
            let mut replies = self.replies.lock();
            if replies.is_empty() {
                Ok(BatchReply::Turn(Turn::assistant("done", vec![])))
            } else {
                Ok(replies.remove(0))
            }
        }

        fn protocol(&self) -> ProtocolVersion {
            self.protocol
        }
    }

    fn make_session(transport: MockTransport) -> (ChatSession, Arc<Mutex<Vec<Vec<Turn>>>>) {
        let requests = Arc::clone(&transport.requests);
        (
            ChatSession::new(SessionConfig::default(), Arc::new(transport)),
            requests,
        )
    }

    fn drain(rx: &mut broadcast::Receiver<ChatEvent>) -> Vec<ChatEvent> {
        let mut events = vec![];
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn doc() -> Source {
        Source::new(1, 0, "Doc", "http://x", "excerpt")
    }

    #[tokio::test]
    async fn test_streamed_turn_is_folded() {
        let (mut session, requests) = make_session(MockTransport::new(vec![vec![
            content("Hello"),
            content(" world"),
            source(doc()),
            finished(),
        ]]));
        let mut rx = session.subscribe();

        let outcome = session.submit("hi").await.unwrap();

        assert_eq!(outcome, TurnOutcome::Finished);
        assert_eq!(
            session.conversation().turns(),
            &[Turn::user("hi"), Turn::assistant("Hello world", vec![doc()])]
        );
        assert_eq!(requests.lock()[0], vec![Turn::user("hi")]);

        let events = drain(&mut rx);
        assert!(matches!(events.first(), Some(ChatEvent::TurnStart { generation: 1 })));
        assert!(matches!(
            events.last(),
            Some(ChatEvent::TurnEnd {
                outcome: TurnOutcome::Finished,
                ..
            })
        ));
        let updates = events
            .iter()
            .filter(|e| matches!(e, ChatEvent::Updated { .. }))
            .count();
        // placeholder, two fragments, one source
        assert_eq!(updates, 4);
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_request_carries_history_without_placeholder() {
        let (mut session, requests) = make_session(MockTransport::new(vec![]));
        session.submit("first").await.unwrap();
        session.submit("second").await.unwrap();

        let second = requests.lock()[1].clone();
        assert_eq!(
            second,
            vec![
                Turn::user("first"),
                Turn::assistant("done", vec![]),
                Turn::user("second"),
            ]
        );
        assert_eq!(session.conversation().len(), 4);
    }

    #[tokio::test]
    async fn test_decode_error_is_reported_and_skipped() {
        let (mut session, _) = make_session(MockTransport::new(vec![vec![
            content("Hello"),
            Step::Payload("{not json".into()),
            content(" again"),
            finished(),
        ]]));
        let mut rx = session.subscribe();

        let outcome = session.submit("hi").await.unwrap();

        assert_eq!(outcome, TurnOutcome::Finished);
        assert_eq!(session.conversation().last().unwrap().text(), "Hello again");
        assert!(
            drain(&mut rx)
                .iter()
                .any(|e| matches!(e, ChatEvent::DecodeError { generation: 1, .. }))
        );
    }

    #[tokio::test]
    async fn test_halt_policy_stops_turn() {
        let transport = MockTransport::new(vec![vec![
            content("Hello"),
            Step::Payload("[]".into()),
            content(" again"),
        ]]);
        let mut session = ChatSession::new(
            SessionConfig {
                decode_errors: DecodeErrorPolicy::Halt,
                ..Default::default()
            },
            Arc::new(transport),
        );

        let outcome = session.submit("hi").await.unwrap();

        assert_eq!(outcome, TurnOutcome::Halted);
        assert_eq!(session.conversation().last().unwrap().text(), "Hello");
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_answer() {
        let transport = MockTransport::new(vec![vec![content("partial"), Step::Hang]]);
        let mut session = ChatSession::new(
            SessionConfig {
                turn_timeout: Some(Duration::from_millis(50)),
                ..Default::default()
            },
            Arc::new(transport),
        );
        let mut rx = session.subscribe();

        let outcome = session.submit("hi").await.unwrap();

        assert_eq!(outcome, TurnOutcome::TimedOut);
        assert_eq!(session.conversation().last().unwrap().text(), "partial");
        assert!(
            drain(&mut rx)
                .iter()
                .any(|e| matches!(e, ChatEvent::Warning { .. }))
        );
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_transport_failure_is_recoverable() {
        let (mut session, _) = make_session(MockTransport::new(vec![vec![
            content("half"),
            Step::Fail("connection reset".into()),
        ]]));

        let outcome = session.submit("hi").await.unwrap();

        assert!(matches!(outcome, TurnOutcome::Failed(ref m) if m.contains("connection reset")));
        assert_eq!(session.conversation().last().unwrap().text(), "half");

        // The session accepts another submission
        let outcome = session.submit("again").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Finished);
    }

    #[tokio::test]
    async fn test_close_without_finish_is_incomplete() {
        let (mut session, _) = make_session(MockTransport::new(vec![vec![content("cut")]]));
        assert_eq!(
            session.submit("hi").await.unwrap(),
            TurnOutcome::Incomplete
        );
        assert_eq!(session.conversation().last().unwrap().text(), "cut");
    }

    #[tokio::test]
    async fn test_payloads_after_finish_are_ignored() {
        let (mut session, _) = make_session(MockTransport::new(vec![vec![
            content("done."),
            finished(),
            content(" extra"),
        ]]));
        session.submit("hi").await.unwrap();
        assert_eq!(session.conversation().last().unwrap().text(), "done.");
    }

    #[tokio::test]
    async fn test_abort_cancels_and_discards() {
        let (mut session, _) =
            make_session(MockTransport::new(vec![vec![content("started"), Step::Hang]]));
        let handle = session.handle();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            handle.abort();
        });

        let outcome = session.submit("hi").await.unwrap();

        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert_eq!(session.conversation().last().unwrap().text(), "started");
        assert_eq!(session.handle().generation(), 2);
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_superseded_generation_drops_payload() {
        let (mut session, _) = make_session(MockTransport::new(vec![vec![
            content("kept"),
            Step::Wait(Duration::from_millis(100)),
            content(" dropped"),
            finished(),
        ]]));
        let handle = session.handle();

        // Supersede the turn without cancelling its token
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            handle
                .generation
                .fetch_add(1, std::sync::atomic::Ordering::AcqRel);
        });

        let outcome = session.submit("hi").await.unwrap();

        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert_eq!(session.conversation().last().unwrap().text(), "kept");
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_busy_session_rejects_submission() {
        let (mut session, requests) = make_session(MockTransport::new(vec![]));
        let guard = session.handle().begin().unwrap();

        assert!(matches!(session.submit("hi").await, Err(Error::Busy)));
        assert!(session.conversation().is_empty());
        assert!(requests.lock().is_empty());

        drop(guard);
        assert!(session.submit("hi").await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let (mut session, _) = make_session(MockTransport::new(vec![]));
        assert!(matches!(session.submit("   ").await, Err(Error::EmptyInput)));
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_batch_single_turn_fills_placeholder() {
        let transport = MockTransport::with_replies(vec![BatchReply::Turn(Turn::assistant(
            "Answer [1]",
            vec![doc()],
        ))]);
        let (mut session, requests) = make_session(transport);
        session.set_mode(SubmitMode::Batch);

        let outcome = session.submit("hi").await.unwrap();

        assert_eq!(outcome, TurnOutcome::Finished);
        assert_eq!(
            session.conversation().turns(),
            &[Turn::user("hi"), Turn::assistant("Answer [1]", vec![doc()])]
        );
        assert_eq!(requests.lock()[0], vec![Turn::user("hi")]);
    }

    #[tokio::test]
    async fn test_batch_transcript_replaces_conversation() {
        let transcript = vec![
            Turn::user("hi"),
            Turn::assistant("server copy", vec![doc()]),
        ];
        let transport =
            MockTransport::with_replies(vec![BatchReply::Transcript(transcript.clone())]);
        let (mut session, _) = make_session(transport);
        session.set_mode(SubmitMode::Batch);

        session.submit("hi").await.unwrap();

        assert_eq!(session.conversation().turns(), transcript.as_slice());
    }

    #[tokio::test]
    async fn test_clear_resets_conversation() {
        let (mut session, _) = make_session(MockTransport::new(vec![]));
        session.submit("hi").await.unwrap();
        session.clear().unwrap();
        assert!(session.conversation().is_empty());
    }
}
