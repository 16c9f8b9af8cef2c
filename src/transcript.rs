//! Transcript stream adapter.
//!
//! Wraps an external continuous speech-transcription capability behind the
//! [`TranscriptionEngine`] trait. Engines report raw [`EngineEvent`]s
//! (result batches, error codes); [`normalize`] turns them into the small
//! closed set of [`TranscriptEvent`]s the session controller consumes.

use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Classified transcription engine error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureErrorKind {
    /// The engine was stopped on purpose. Never restarted.
    Aborted,
    /// The engine lost its network connection.
    Network,
    /// No speech was heard before the engine gave up.
    NoSpeech,
    /// The microphone could not be opened.
    AudioCapture,
    /// Microphone permission was denied.
    NotAllowed,
    /// Any other engine-specific code.
    Other(String),
}

impl CaptureErrorKind {
    /// Map an engine error code (e.g. `"no-speech"`) to a kind.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "aborted" => Self::Aborted,
            "network" => Self::Network,
            "no-speech" | "no_speech" => Self::NoSpeech,
            "audio-capture" | "audio_capture" => Self::AudioCapture,
            "not-allowed" | "not_allowed" | "service-not-allowed" => Self::NotAllowed,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Stable code for logs.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Aborted => "aborted",
            Self::Network => "network",
            Self::NoSpeech => "no-speech",
            Self::AudioCapture => "audio-capture",
            Self::NotAllowed => "not-allowed",
            Self::Other(code) => code,
        }
    }
}

/// Normalized transcript stream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    /// The engine began capturing audio.
    Started,
    /// Interim hypothesis; may still change.
    Partial(String),
    /// Final transcript for an utterance.
    Final(String),
    /// The engine reported an error. An [`TranscriptEvent::Ended`] usually follows.
    Error(CaptureErrorKind),
    /// The engine stopped emitting results.
    Ended,
}

/// One hypothesis within an engine result batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    /// Best transcript for this result.
    pub transcript: String,
    /// Whether the engine will not revise this result any more.
    pub is_final: bool,
}

impl RecognitionResult {
    /// A result the engine will not revise.
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            transcript: text.into(),
            is_final: true,
        }
    }

    /// An interim result.
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            transcript: text.into(),
            is_final: false,
        }
    }
}

/// Raw event as reported by a transcription engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Capture started.
    Start,
    /// Result batch. Entries before `result_index` were already reported.
    Results {
        result_index: usize,
        results: Vec<RecognitionResult>,
    },
    /// Engine error code (`"network"`, `"aborted"`, ...).
    Error { code: String },
    /// Capture ended.
    End,
}

/// Translate a raw engine event into a transcript stream event.
///
/// Final results from `result_index` onward are concatenated into a single
/// [`TranscriptEvent::Final`]. Batches without final results become
/// [`TranscriptEvent::Partial`]; empty batches are dropped.
#[must_use]
pub fn normalize(event: EngineEvent) -> Option<TranscriptEvent> {
    match event {
        EngineEvent::Start => Some(TranscriptEvent::Started),
        EngineEvent::End => Some(TranscriptEvent::Ended),
        EngineEvent::Error { code } => {
            Some(TranscriptEvent::Error(CaptureErrorKind::from_code(&code)))
        }
        EngineEvent::Results {
            result_index,
            results,
        } => {
            let fresh = results.get(result_index..).unwrap_or_default();
            let final_text: String = fresh
                .iter()
                .filter(|r| r.is_final)
                .map(|r| r.transcript.as_str())
                .collect();
            if !final_text.trim().is_empty() {
                return Some(TranscriptEvent::Final(final_text));
            }
            let interim: String = fresh.iter().map(|r| r.transcript.as_str()).collect();
            if interim.trim().is_empty() {
                None
            } else {
                Some(TranscriptEvent::Partial(interim))
            }
        }
    }
}

/// Options handed to the engine on every start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// BCP-47 language tag.
    pub language: String,
    /// Keep capturing across utterances.
    pub continuous: bool,
    /// Report interim results.
    pub interim_results: bool,
}

impl EngineOptions {
    /// Continuous capture with interim results in `language`.
    pub fn continuous(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            continuous: true,
            interim_results: true,
        }
    }
}

/// Where an engine instance delivers its events.
///
/// Each sink is stamped with the instance generation it was created for so
/// that late events from a replaced instance can be recognised and ignored.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, EngineEvent)>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, EngineEvent)>) -> Self {
        Self { generation, tx }
    }

    /// Deliver an event. Returns `false` once the session is gone.
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }

    /// Generation of the engine instance this sink belongs to.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// A continuous speech-transcription capability.
///
/// Implementations must emit [`EngineEvent::Start`] once capture begins and
/// [`EngineEvent::End`] when they stop producing results, whether the stop
/// was requested or not.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    /// Whether the capability exists on this platform at all.
    fn is_available(&self) -> bool {
        true
    }

    /// Begin capturing. Events for this instance go to `sink`.
    async fn start(&self, options: &EngineOptions, sink: EventSink) -> Result<()>;

    /// Request the current instance to stop. May be called when already stopped.
    async fn stop(&self) -> Result<()>;
}
