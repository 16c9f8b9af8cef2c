//! Shared helpers for integration tests.
//!
//! In-process stand-ins for the engine, assistant backend, history store and
//! speech output, so session tests can run on a paused clock.

use async_trait::async_trait;
use parley::classifier::{Category, ModelReply, Parameters};
use parley::history::HistoryRecord;
use parley::transcript::{EngineEvent, EngineOptions, EventSink, RecognitionResult};
use parley::{
    AssistantBackend, ChatRequest, DispatchOutcome, HistoryStore, ParleyConfig, ParleyError,
    Result, SessionState, SessionUpdate, SpeechOutput, TranscriptionEngine, UserProfile,
    VoiceInterface,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::time::Instant;

// ── Engine ──────────────────────────────────────────────────────────────

/// Transcription engine driven by the test.
pub(crate) struct ScriptedEngine {
    available: bool,
    sinks: Mutex<Vec<EventSink>>,
    starts: Mutex<Vec<Instant>>,
    start_count: watch::Sender<usize>,
    stops: AtomicUsize,
}

impl ScriptedEngine {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::with_availability(true))
    }

    pub(crate) fn unavailable() -> Arc<Self> {
        Arc::new(Self::with_availability(false))
    }

    fn with_availability(available: bool) -> Self {
        Self {
            available,
            sinks: Mutex::new(Vec::new()),
            starts: Mutex::new(Vec::new()),
            start_count: watch::channel(0).0,
            stops: AtomicUsize::new(0),
        }
    }

    /// Emit `event` from the most recently started instance.
    pub(crate) fn emit(&self, event: EngineEvent) -> bool {
        self.sinks
            .lock()
            .unwrap()
            .last()
            .is_some_and(|sink| sink.emit(event))
    }

    /// Emit `event` from the `index`-th instance ever started.
    pub(crate) fn emit_from(&self, index: usize, event: EngineEvent) -> bool {
        self.sinks
            .lock()
            .unwrap()
            .get(index)
            .is_some_and(|sink| sink.emit(event))
    }

    /// Emit one final transcript.
    pub(crate) fn say(&self, text: &str) -> bool {
        self.emit(EngineEvent::Results {
            result_index: 0,
            results: vec![RecognitionResult::final_text(text)],
        })
    }

    pub(crate) fn error(&self, code: &str) -> bool {
        self.emit(EngineEvent::Error { code: code.into() })
    }

    pub(crate) fn start_count(&self) -> usize {
        *self.start_count.borrow()
    }

    pub(crate) fn start_times(&self) -> Vec<Instant> {
        self.starts.lock().unwrap().clone()
    }

    pub(crate) fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait_for_starts(&self, n: usize) {
        let mut rx = self.start_count.subscribe();
        tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|count| *count >= n))
            .await
            .expect("engine start timed out")
            .expect("engine dropped");
    }
}

#[async_trait]
impl TranscriptionEngine for ScriptedEngine {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn start(&self, _options: &EngineOptions, sink: EventSink) -> Result<()> {
        sink.emit(EngineEvent::Start);
        self.sinks.lock().unwrap().push(sink);
        self.starts.lock().unwrap().push(Instant::now());
        self.start_count.send_modify(|count| *count += 1);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.emit(EngineEvent::End);
        Ok(())
    }
}

// ── Backend ─────────────────────────────────────────────────────────────

/// Assistant backend with queued replies.
///
/// Each call yields once before answering, so concurrent dispatches really
/// overlap. A gated backend additionally waits for a semaphore permit.
pub(crate) struct FakeBackend {
    replies: Mutex<VecDeque<Result<ModelReply>>>,
    requests: Mutex<Vec<ChatRequest>>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeBackend {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            gate: None,
        })
    }

    pub(crate) fn gated() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let backend = Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            gate: Some(Arc::clone(&gate)),
        });
        (backend, gate)
    }

    pub(crate) fn push_reply(&self, reply: ModelReply) {
        self.replies.lock().unwrap().push_back(Ok(reply));
    }

    pub(crate) fn push_error(&self, error: ParleyError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssistantBackend for FakeBackend {
    async fn chat(&self, _token: &str, request: &ChatRequest) -> Result<ModelReply> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.gate {
            Some(gate) => gate.acquire().await.expect("gate closed").forget(),
            None => tokio::task::yield_now().await,
        }
        let next = self.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(reply(None, "Okay.")))
    }
}

/// A backend reply with only a category and response text.
pub(crate) fn reply(category: Option<Category>, response: &str) -> ModelReply {
    ModelReply {
        category,
        response: response.into(),
        action: None,
        parameters: Parameters::new(),
        confidence: None,
        follow_up: None,
    }
}

// ── Store ───────────────────────────────────────────────────────────────

/// Non-blocking history store that can be switched to failing.
#[derive(Default)]
pub(crate) struct MemoryStore {
    records: Mutex<Vec<HistoryRecord>>,
    fail: AtomicBool,
}

impl MemoryStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn seeded(records: Vec<HistoryRecord>) -> Arc<Self> {
        let store = Self::default();
        *store.records.lock().unwrap() = records;
        Arc::new(store)
    }

    pub(crate) fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn records(&self) -> Vec<HistoryRecord> {
        self.records.lock().unwrap().clone()
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(ParleyError::History("store offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn append(&self, _token: &str, record: &HistoryRecord) -> Result<()> {
        self.check()?;
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn load_recent(&self, _token: &str, limit: usize) -> Result<Vec<HistoryRecord>> {
        self.check()?;
        let records = self.records.lock().unwrap();
        let skip = records.len().saturating_sub(limit);
        Ok(records[skip..].to_vec())
    }

    async fn clear(&self, _token: &str) -> Result<()> {
        self.check()?;
        self.records.lock().unwrap().clear();
        Ok(())
    }
}

// ── Speech ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct RecordingSpeech {
    spoken: Mutex<Vec<String>>,
    cancels: AtomicUsize,
}

impl RecordingSpeech {
    pub(crate) fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub(crate) fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechOutput for RecordingSpeech {
    async fn speak(&self, text: &str) -> Result<()> {
        self.spoken.lock().unwrap().push(text.to_owned());
        Ok(())
    }

    async fn cancel(&self) -> Result<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Harness ─────────────────────────────────────────────────────────────

pub(crate) fn profile(assistant_name: &str) -> UserProfile {
    UserProfile {
        name: "Ada".into(),
        assistant_name: assistant_name.into(),
        token: Some("token-123".into()),
    }
}

pub(crate) struct Harness {
    pub voice: VoiceInterface,
    pub engine: Arc<ScriptedEngine>,
    pub store: Arc<MemoryStore>,
    pub speech: Arc<RecordingSpeech>,
    pub updates: mpsc::UnboundedReceiver<SessionUpdate>,
}

impl Harness {
    pub(crate) fn build(
        engine: Arc<ScriptedEngine>,
        backend: Arc<FakeBackend>,
        store: Arc<MemoryStore>,
    ) -> Self {
        Self::build_with(ParleyConfig::default(), engine, backend, store)
    }

    pub(crate) fn build_with(
        config: ParleyConfig,
        engine: Arc<ScriptedEngine>,
        backend: Arc<FakeBackend>,
        store: Arc<MemoryStore>,
    ) -> Self {
        let (tx, updates) = mpsc::unbounded_channel();
        let speech = Arc::new(RecordingSpeech::default());
        let voice = VoiceInterface::new(
            config,
            engine.clone(),
            backend,
            store.clone(),
        )
        .with_speech(speech.clone())
        .with_updates(tx);
        Self {
            voice,
            engine,
            store,
            speech,
            updates,
        }
    }

    /// Signed in as Ada with assistant `assistant_name`, listening.
    pub(crate) async fn listening(assistant_name: &str, backend: Arc<FakeBackend>) -> Self {
        let mut harness = Self::build(ScriptedEngine::new(), backend, MemoryStore::new());
        harness.voice.sign_in(profile(assistant_name)).await;
        harness.engine.wait_for_starts(1).await;
        harness.wait_for_state(SessionState::Listening).await;
        harness
    }

    pub(crate) async fn wait_for_state(&mut self, state: SessionState) {
        let handle = self.voice.session_mut().expect("live session");
        let reached = tokio::time::timeout(Duration::from_secs(60), handle.wait_for(state))
            .await
            .expect("state wait timed out");
        assert!(reached, "session ended before reaching {state:?}");
    }

    /// Next dispatch outcome reported by the session.
    pub(crate) async fn next_dispatch(&mut self) -> DispatchOutcome {
        let wait = async {
            while let Some(update) = self.updates.recv().await {
                if let SessionUpdate::Dispatched(outcome) = update {
                    return outcome;
                }
            }
            panic!("update channel closed");
        };
        tokio::time::timeout(Duration::from_secs(60), wait)
            .await
            .expect("no dispatch reported")
    }
}
