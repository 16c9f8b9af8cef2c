//! Parley: a conversational voice interface engine.
//!
//! Listens continuously, notices when the user addresses the assistant by
//! name, and turns what follows into a classified assistant reply that is
//! reconciled into the chat history:
//!
//! Transcript stream → Wake word → Session controller → Dispatcher →
//! Assistant backend → Classifier → Chat history → (speech)
//!
//! # Architecture
//!
//! - **Transcript**: [`transcript::TranscriptionEngine`] wraps a continuous
//!   speech-to-text capability and reports normalized events
//! - **Wake word**: [`wakeword::detect`] extracts the command after the name
//! - **Session**: [`session::RecognitionSession`] is the listening state
//!   machine; [`session::SessionController`] drives it with restart backoff
//! - **Dispatch**: [`dispatch::CommandDispatcher`] runs one command at a time
//!   with optimistic history updates
//! - **Classifier**: [`classifier::parse_reply`] and the keyword
//!   [`classifier::heuristic`] turn assistant text into typed results
//! - **History**: [`history::ChatHistoryManager`] over a durable
//!   [`history::HistoryStore`]
//! - **Voice**: [`voice::VoiceInterface`] owns all of the above for one
//!   signed-in user

pub mod backend;
pub mod classifier;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod session;
pub mod synthesis;
pub mod transcript;
pub mod voice;
pub mod wakeword;

pub use backend::model::{ClassifyingBackend, GeminiModel, LanguageModel};
pub use backend::{AssistantBackend, ChatRequest, ContextTurn, HttpAssistantBackend};
pub use classifier::{Category, ClassificationResult, Confidence, parse_reply};
pub use config::ParleyConfig;
pub use dispatch::{CommandDispatcher, DispatchOutcome, DropReason, Identity};
pub use error::{ParleyError, Result};
pub use history::{
    ChatHistoryManager, ChatMessage, ClearOutcome, HistoryStore, HttpHistoryStore, MessageStatus,
    MessageType, SqliteHistoryStore,
};
pub use session::{RecognitionSession, SessionController, SessionHandle, SessionState, SessionUpdate};
pub use synthesis::{ProcessSpeech, SpeechOutput};
pub use transcript::{EngineEvent, TranscriptEvent, TranscriptionEngine};
pub use voice::{UserProfile, VoiceInterface};
