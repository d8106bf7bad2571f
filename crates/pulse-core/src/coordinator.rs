//! Response coordinator: runs one user turn end to end.
//!
//! A turn moves `Idle -> Streaming -> Resolving -> Complete`, or ends early in
//! `Failed` or `Cancelled`. Deltas are delivered in arrival order as
//! `TurnEvent::Delta`, followed by exactly one `TurnEvent::Finished`. Complete
//! and failed outcomes are mutually exclusive by construction, and a
//! cancelled turn reports neither.
//!
//! Each turn runs on its own task and owns its `StreamState`. Nothing here
//! prevents two turns from running at once; callers that need one-at-a-time
//! behavior must block their own input while a turn is in flight.

use crate::ai::{ChatBackend, ChatMessage, ChatRequest, SearchBackend};
use crate::config::{Config, DEFAULT_MAX_TOKENS, DEFAULT_SUGGESTION_MODEL, DEFAULT_TEMPERATURE};
use crate::error::{PulseError, PulseResult};
use crate::provider::Provider;
use crate::sources::SourceResolver;
use crate::state::ChatTurn;
use crate::stream::{Delta, StreamState};
use crate::suggestions::SuggestionGenerator;
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Document text beyond this many characters is not sent upstream.
pub const MAX_DOCUMENT_CHARS: usize = 10_000;
/// Document preview used as the "query" for sources and follow-ups.
pub const DOCUMENT_TOPIC_CHARS: usize = 1_000;
const EVENT_BUFFER: usize = 64;

pub const QUERY_SYSTEM_PROMPT: &str = "You are Pulse, a medical AI assistant that provides accurate, evidence-based health information.

Guidelines:
- Provide factual, scientifically accurate medical information
- Include relevant context and explanations
- Structure responses with clear headings and bullet points when appropriate
- For symptoms or serious conditions, advise consulting with healthcare professionals
- Never provide definitive diagnoses or prescribe specific medications
- Cite reliable medical sources with bracketed numbers like [1] and list them under a final \"References:\" section as [n] Title (URL)
- Format your response in Markdown
- Use a compassionate, professional tone";

pub const DOCUMENT_SYSTEM_PROMPT: &str = "You are Pulse, a medical AI assistant that analyzes medical documents.

Guidelines:
- Extract and explain key medical information from the document
- Define medical terms and explain their significance
- Format your response in Markdown with clear sections
- Maintain a professional, educational tone
- Focus on explaining the document in an accessible way
- Never make definitive diagnoses or recommend specific treatments";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Streaming,
    Resolving,
    Complete,
    Failed,
    Cancelled,
}

impl TurnPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnPhase::Complete | TurnPhase::Failed | TurnPhase::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    Query,
    Document,
}

/// User-facing description of a failed turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnFailure {
    pub code: &'static str,
    pub message: String,
    pub transient: bool,
}

impl From<&PulseError> for TurnFailure {
    fn from(err: &PulseError) -> Self {
        Self {
            code: err.code(),
            message: err.user_message(),
            transient: err.is_transient(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TurnOutcome {
    Complete(ChatTurn),
    Failed(TurnFailure),
    Cancelled,
}

#[derive(Debug, Clone)]
pub enum TurnEvent {
    Delta(Delta),
    Finished(TurnOutcome),
}

/// Callback-style consumer of a turn, for UIs that prefer it over a stream.
pub trait TurnObserver {
    fn on_chunk(&mut self, delta: &Delta);
    fn on_complete(&mut self, turn: &ChatTurn);
    fn on_error(&mut self, failure: &TurnFailure);
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub chat_model: String,
    pub suggestion_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub query_prompt: String,
    pub document_prompt: String,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            chat_model: Provider::Groq.default_model().to_string(),
            suggestion_model: DEFAULT_SUGGESTION_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            query_prompt: QUERY_SYSTEM_PROMPT.to_string(),
            document_prompt: DOCUMENT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl CoordinatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chat_model: config.chat_model().to_string(),
            suggestion_model: config.suggestion_model().to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct ResponseCoordinator {
    backend: Arc<dyn ChatBackend>,
    resolver: SourceResolver,
    suggestions: SuggestionGenerator,
    settings: Arc<CoordinatorSettings>,
}

impl ResponseCoordinator {
    pub fn new(backend: Arc<dyn ChatBackend>, settings: CoordinatorSettings) -> Self {
        let suggestions = SuggestionGenerator::new(backend.clone(), &settings.suggestion_model);
        Self {
            backend,
            resolver: SourceResolver::new(),
            suggestions,
            settings: Arc::new(settings),
        }
    }

    pub fn with_search(mut self, search: Arc<dyn SearchBackend>) -> Self {
        self.resolver = SourceResolver::with_search(search);
        self
    }

    /// True when bare `[n]` markers can be backed by a search lookup.
    pub fn has_search(&self) -> bool {
        self.resolver.has_search()
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Start a turn for a typed question.
    pub fn submit(&self, text: &str) -> TurnStream {
        self.start(TurnKind::Query, text.to_string())
    }

    /// Start a turn that analyzes document text.
    pub fn submit_document(&self, content: &str) -> TurnStream {
        self.start(TurnKind::Document, content.to_string())
    }

    fn start(&self, kind: TurnKind, input: String) -> TurnStream {
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (phase_tx, phase_rx) = watch::channel(TurnPhase::Idle);
        let cancel = CancellationToken::new();

        let coordinator = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            coordinator.run_turn(kind, input, event_tx, phase_tx, token).await;
        });

        TurnStream {
            events: ReceiverStream::new(event_rx),
            cancel,
            phase: phase_rx,
            _task: task,
            finished: false,
        }
    }

    async fn run_turn(
        self,
        kind: TurnKind,
        input: String,
        events: mpsc::Sender<TurnEvent>,
        phase: watch::Sender<TurnPhase>,
        cancel: CancellationToken,
    ) {
        info!(?kind, chars = input.chars().count(), "starting turn");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PulseError::Cancelled),
            result = self.execute(kind, &input, &events, &phase) => result,
        };

        let outcome = match result {
            Ok(turn) => {
                set_phase(&phase, TurnPhase::Complete);
                info!(sources = turn.sources().len(), "turn complete");
                TurnOutcome::Complete(turn)
            }
            Err(PulseError::Cancelled) => {
                set_phase(&phase, TurnPhase::Cancelled);
                info!("turn cancelled");
                TurnOutcome::Cancelled
            }
            Err(err) => {
                set_phase(&phase, TurnPhase::Failed);
                error!(code = err.code(), "turn failed: {}", err);
                TurnOutcome::Failed(TurnFailure::from(&err))
            }
        };

        // The receiver may already be gone if the caller dropped the turn.
        let _ = events.send(TurnEvent::Finished(outcome)).await;
    }

    fn build_request(&self, kind: TurnKind, input: &str) -> ChatRequest {
        let (system, user) = match kind {
            TurnKind::Query => (self.settings.query_prompt.as_str(), input.to_string()),
            TurnKind::Document => {
                let excerpt: String = input.chars().take(MAX_DOCUMENT_CHARS).collect();
                (
                    self.settings.document_prompt.as_str(),
                    format!(
                        "Please analyze this medical document and explain its key points in an accessible way:\n\n{}",
                        excerpt
                    ),
                )
            }
        };

        ChatRequest {
            model: self.settings.chat_model.clone(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        }
    }

    async fn execute(
        &self,
        kind: TurnKind,
        input: &str,
        events: &mpsc::Sender<TurnEvent>,
        phase: &watch::Sender<TurnPhase>,
    ) -> PulseResult<ChatTurn> {
        set_phase(phase, TurnPhase::Streaming);
        let request = self.build_request(kind, input);
        let mut body = self.backend.stream_chat(&request).await?;

        let mut state = StreamState::new();
        let mut turn = ChatTurn::assistant_streaming();

        while let Some(chunk) = body.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(err) if state.has_answer() => {
                    warn!("stream interrupted after partial answer, keeping it: {}", err);
                    break;
                }
                Err(err) => return Err(err),
            };

            for delta in state.ingest(&bytes)? {
                emit(&mut turn, delta, events).await?;
            }
            if state.is_done() {
                break;
            }
        }
        drop(body);

        for delta in state.finish()? {
            emit(&mut turn, delta, events).await?;
        }

        if !state.has_answer() {
            return Err(PulseError::EmptyResponse);
        }

        set_phase(phase, TurnPhase::Resolving);
        let topic = match kind {
            TurnKind::Query => input.to_string(),
            TurnKind::Document => input.chars().take(DOCUMENT_TOPIC_CHARS).collect(),
        };
        let answer = state.answer_text();
        let (sources, follow_ups) = tokio::join!(
            self.resolver.resolve(&topic, answer, state.provider_citations()),
            self.suggestions.generate(&topic, answer),
        );

        turn.finalize(sources, follow_ups);
        Ok(turn)
    }
}

async fn emit(turn: &mut ChatTurn, delta: Delta, events: &mpsc::Sender<TurnEvent>) -> PulseResult<()> {
    match &delta {
        Delta::Answer(text) => turn.push_answer(text),
        Delta::Thinking(text) => turn.push_thinking(text),
    }
    events
        .send(TurnEvent::Delta(delta))
        .await
        .map_err(|_| PulseError::Cancelled)
}

fn set_phase(phase: &watch::Sender<TurnPhase>, next: TurnPhase) {
    let previous = phase.send_replace(next);
    debug!(?previous, ?next, "turn phase changed");
}

/// Handle to one in-flight turn. Dropping it cancels the turn.
pub struct TurnStream {
    events: ReceiverStream<TurnEvent>,
    cancel: CancellationToken,
    phase: watch::Receiver<TurnPhase>,
    _task: JoinHandle<()>,
    finished: bool,
}

impl TurnStream {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this turn from elsewhere (e.g. a Ctrl-C handler).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn phase(&self) -> TurnPhase {
        *self.phase.borrow()
    }

    /// Discard progress and wait for the terminal outcome.
    pub async fn outcome(mut self) -> TurnOutcome {
        while let Some(event) = self.next().await {
            if let TurnEvent::Finished(outcome) = event {
                return outcome;
            }
        }
        TurnOutcome::Cancelled
    }

    /// Drive the turn to completion through callbacks. At most one of
    /// `on_complete` / `on_error` fires; neither fires on cancellation.
    pub async fn drive<O: TurnObserver + ?Sized>(mut self, observer: &mut O) -> TurnOutcome {
        while let Some(event) = self.next().await {
            match event {
                TurnEvent::Delta(delta) => observer.on_chunk(&delta),
                TurnEvent::Finished(outcome) => {
                    match &outcome {
                        TurnOutcome::Complete(turn) => observer.on_complete(turn),
                        TurnOutcome::Failed(failure) => observer.on_error(failure),
                        TurnOutcome::Cancelled => {}
                    }
                    return outcome;
                }
            }
        }
        TurnOutcome::Cancelled
    }
}

impl Stream for TurnStream {
    type Item = TurnEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        let polled = Pin::new(&mut this.events).poll_next(cx);
        if let Poll::Ready(Some(TurnEvent::Finished(_))) | Poll::Ready(None) = &polled {
            this.finished = true;
        }
        polled
    }
}

impl Drop for TurnStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ByteStream;
    use crate::state::Source;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;
    use std::time::Duration;

    enum Script {
        Chunks(Vec<&'static str>),
        /// Sends the first chunks, then never yields again.
        Hang(Vec<&'static str>),
        OpenError(fn() -> PulseError),
        BreakAfter(Vec<&'static str>),
    }

    struct FakeBackend {
        script: Script,
        suggestion_reply: Option<&'static str>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl FakeBackend {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                suggestion_reply: None,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn with_suggestions(script: Script, reply: &'static str) -> Arc<Self> {
            Arc::new(Self {
                script,
                suggestion_reply: Some(reply),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    fn chunk_stream(chunks: &[&'static str]) -> Vec<PulseResult<Bytes>> {
        chunks.iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))).collect()
    }

    #[async_trait]
    impl ChatBackend for FakeBackend {
        async fn stream_chat(&self, request: &ChatRequest) -> PulseResult<ByteStream> {
            self.requests.lock().unwrap().push(request.clone());
            match &self.script {
                Script::Chunks(chunks) => Ok(Box::pin(futures_util::stream::iter(chunk_stream(chunks)))),
                Script::Hang(chunks) => Ok(Box::pin(
                    futures_util::stream::iter(chunk_stream(chunks)).chain(futures_util::stream::pending()),
                )),
                Script::OpenError(make) => Err(make()),
                Script::BreakAfter(chunks) => {
                    let mut items = chunk_stream(chunks);
                    items.push(Err(PulseError::Transport("connection reset".to_string())));
                    Ok(Box::pin(futures_util::stream::iter(items)))
                }
            }
        }

        async fn complete(&self, _request: &ChatRequest) -> PulseResult<String> {
            match self.suggestion_reply {
                Some(reply) => Ok(reply.to_string()),
                None => Err(PulseError::UpstreamUnavailable("no suggestions".to_string())),
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        chunks: Vec<Delta>,
        completed: Vec<ChatTurn>,
        errors: Vec<TurnFailure>,
    }

    impl TurnObserver for Recorder {
        fn on_chunk(&mut self, delta: &Delta) {
            self.chunks.push(delta.clone());
        }

        fn on_complete(&mut self, turn: &ChatTurn) {
            self.completed.push(turn.clone());
        }

        fn on_error(&mut self, failure: &TurnFailure) {
            self.errors.push(failure.clone());
        }
    }

    fn coordinator(backend: Arc<FakeBackend>) -> ResponseCoordinator {
        ResponseCoordinator::new(backend, CoordinatorSettings::default())
    }

    const HEADACHE_STREAM: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"Headaches can be caused by stress.\"}}]}\n\ndata: [DONE]\n\n";

    #[tokio::test]
    async fn test_plain_answer_completes_without_sources() {
        let backend = FakeBackend::new(Script::Chunks(vec![HEADACHE_STREAM]));
        let mut recorder = Recorder::default();

        let outcome = coordinator(backend.clone())
            .submit("What causes headaches?")
            .drive(&mut recorder)
            .await;

        assert_eq!(
            recorder.chunks,
            vec![Delta::Answer("Headaches can be caused by stress.".to_string())]
        );
        assert!(recorder.errors.is_empty());
        assert_eq!(recorder.completed.len(), 1);
        let turn = &recorder.completed[0];
        assert!(turn.sources().is_empty());
        assert!(turn.suggested_follow_ups().is_empty());
        assert!(!turn.is_streaming());
        assert!(matches!(outcome, TurnOutcome::Complete(_)));

        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests[0].messages[0].role, "system");
        assert_eq!(requests[0].messages[1].content, "What causes headaches?");
        assert_eq!(requests[0].max_tokens, 1500);
    }

    #[tokio::test]
    async fn test_references_and_suggestions_attached() {
        let backend = FakeBackend::with_suggestions(
            Script::Chunks(vec![
                "data: {\"choices\":[{\"delta\":{\"content\":\"<think>check CDC</think>Tension is common [1].\\n\\n\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"References:\\n[1] CDC Headache Guide (https://cdc.gov/headache)\\n\"}}]}\n\n",
                "data: [DONE]\n\n",
            ]),
            "1. What is a tension headache?\n2. How is it treated?",
        );

        let turn = match coordinator(backend).submit("What causes headaches?").outcome().await {
            TurnOutcome::Complete(turn) => turn,
            other => panic!("expected completion, got {:?}", other),
        };

        assert_eq!(turn.thinking, "check CDC");
        assert!(!turn.text.contains("<think>"));
        assert_eq!(
            turn.sources(),
            [Source::new(
                "CDC Headache Guide",
                "https://cdc.gov/headache",
                "Tension is common ."
            )]
        );
        assert_eq!(turn.suggested_follow_ups().len(), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_before_any_bytes() {
        let backend = FakeBackend::new(Script::OpenError(|| {
            PulseError::UpstreamAuth(
                "Authentication failed: Please check your Groq API key is valid and properly configured."
                    .to_string(),
            )
        }));
        let mut recorder = Recorder::default();

        let outcome = coordinator(backend).submit("hi").drive(&mut recorder).await;

        assert!(recorder.chunks.is_empty());
        assert!(recorder.completed.is_empty());
        assert_eq!(recorder.errors.len(), 1);
        assert!(recorder.errors[0].message.contains("Authentication failed"));
        assert_eq!(recorder.errors[0].code, "AUTH_ERROR");
        assert!(matches!(outcome, TurnOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_reports_neither() {
        let backend = FakeBackend::new(Script::Hang(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Partial answer \"}}]}\n\n",
        ]));
        let turn = coordinator(backend).submit("slow question");
        let token = turn.cancellation_token();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let mut recorder = Recorder::default();
        let outcome = tokio::time::timeout(Duration::from_secs(5), turn.drive(&mut recorder))
            .await
            .expect("cancelled turn should end promptly");

        assert!(matches!(outcome, TurnOutcome::Cancelled));
        assert!(recorder.completed.is_empty());
        assert!(recorder.errors.is_empty());
        assert_eq!(recorder.chunks, vec![Delta::Answer("Partial answer ".to_string())]);
    }

    #[tokio::test]
    async fn test_empty_stream_fails() {
        let backend = FakeBackend::new(Script::Chunks(vec!["data: [DONE]\n\n"]));
        let outcome = coordinator(backend).submit("q").outcome().await;
        match outcome {
            TurnOutcome::Failed(failure) => assert_eq!(failure.code, "STREAM_ERROR"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_interrupted_stream_keeps_partial_answer() {
        let backend = FakeBackend::new(Script::BreakAfter(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Rest and fluids help.\"}}]}\n\n",
        ]));
        let outcome = coordinator(backend).submit("q").outcome().await;
        match outcome {
            TurnOutcome::Complete(turn) => assert_eq!(turn.text, "Rest and fluids help."),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transport_error_before_body_fails_as_transient() {
        let backend = FakeBackend::new(Script::BreakAfter(Vec::new()));
        let outcome = coordinator(backend).submit("q").outcome().await;
        match outcome {
            TurnOutcome::Failed(failure) => {
                assert!(failure.transient);
                assert_eq!(failure.message, "Our servers are currently busy. Please try again in a moment.");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_document_turn_truncates_input() {
        let backend = FakeBackend::new(Script::Chunks(vec![HEADACHE_STREAM]));
        let document = "x".repeat(MAX_DOCUMENT_CHARS + 500);

        let outcome = coordinator(backend.clone()).submit_document(&document).outcome().await;
        assert!(matches!(outcome, TurnOutcome::Complete(_)));

        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests[0].messages[0].content, DOCUMENT_SYSTEM_PROMPT);
        let user = &requests[0].messages[1].content;
        assert!(user.starts_with("Please analyze this medical document"));
        assert_eq!(user.matches('x').count(), MAX_DOCUMENT_CHARS);
    }

    #[tokio::test]
    async fn test_phase_reaches_complete() {
        let backend = FakeBackend::new(Script::Chunks(vec![HEADACHE_STREAM]));
        let mut turn = coordinator(backend).submit("q");
        let mut saw_finished = false;
        while let Some(event) = turn.next().await {
            if matches!(event, TurnEvent::Finished(_)) {
                saw_finished = true;
            }
        }
        assert!(saw_finished);
        assert_eq!(turn.phase(), TurnPhase::Complete);
        assert!(turn.phase().is_terminal());
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::new();
        config.chat_model = Some("qwen-qwq-32b".to_string());
        config.max_tokens = 800;
        let settings = CoordinatorSettings::from_config(&config);
        assert_eq!(settings.chat_model, "qwen-qwq-32b");
        assert_eq!(settings.max_tokens, 800);
        assert_eq!(settings.query_prompt, QUERY_SYSTEM_PROMPT);
    }

    struct NoSearch;

    #[async_trait]
    impl SearchBackend for NoSearch {
        async fn search(&self, _query: &str) -> PulseResult<Vec<Source>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_has_search_reflects_backend() {
        let backend = FakeBackend::new(Script::Chunks(Vec::new()));
        let plain = coordinator(backend);
        assert!(!plain.has_search());
        assert!(plain.with_search(Arc::new(NoSearch)).has_search());
    }
}
