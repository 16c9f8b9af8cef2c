//! Command dispatch.
//!
//! Runs at most one command at a time: a command that arrives while another
//! is in flight is dropped, not queued. The pending exchange is inserted
//! before the first suspension point so the log always shows what the user
//! said, even while the assistant is thinking.

use crate::backend::{AssistantBackend, ChatRequest};
use crate::classifier::{
    Classification, ClassificationResult, Confidence, ModelReply, heuristic,
};
use crate::config::DispatchConfig;
use crate::history::{ChatHistoryManager, ChatMessage, MessageStatus, MessageType, Resolution};
use crate::synthesis::SpeechOutput;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Who is talking to whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_name: String,
    pub assistant_name: String,
    /// Bearer token for the backend. `None` means signed out.
    pub token: Option<String>,
}

/// Why a command was not sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Another command is in flight.
    Busy,
    /// Nothing to send after trimming.
    EmptyCommand,
    /// No authentication token.
    Unauthenticated,
    /// The history was cleared while the command was in flight.
    Superseded,
}

/// What happened to one dispatch request.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The exchange resolved, either `Complete` or `Errored`.
    Finished(ChatMessage),
    Dropped(DropReason),
}

impl DispatchOutcome {
    #[must_use]
    pub fn message(&self) -> Option<&ChatMessage> {
        match self {
            Self::Finished(message) => Some(message),
            Self::Dropped(_) => None,
        }
    }
}

/// Clears the in-flight flag however the dispatch future ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Serialises commands to the assistant backend.
pub struct CommandDispatcher {
    backend: Arc<dyn AssistantBackend>,
    history: Arc<ChatHistoryManager>,
    speech: Option<Arc<dyn SpeechOutput>>,
    config: DispatchConfig,
    identity: Identity,
    in_flight: AtomicBool,
}

impl CommandDispatcher {
    pub fn new(
        backend: Arc<dyn AssistantBackend>,
        history: Arc<ChatHistoryManager>,
        config: DispatchConfig,
        identity: Identity,
    ) -> Self {
        Self {
            backend,
            history,
            speech: None,
            config,
            identity,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Speak voice command responses through `speech`.
    #[must_use]
    pub fn with_speech(mut self, speech: Arc<dyn SpeechOutput>) -> Self {
        self.speech = Some(speech);
        self
    }

    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    #[must_use]
    pub fn history(&self) -> &Arc<ChatHistoryManager> {
        &self.history
    }

    /// Whether a command is currently in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Send `command` to the assistant and reconcile the reply into history.
    ///
    /// Never fails: backend errors resolve the exchange as `Errored` with a
    /// fixed fallback reply, and persistence is best-effort.
    pub async fn dispatch(&self, command: &str, message_type: MessageType) -> DispatchOutcome {
        let command = command.trim();
        if command.is_empty() {
            debug!("empty command ignored");
            return DispatchOutcome::Dropped(DropReason::EmptyCommand);
        }
        let Some(token) = self.identity.token.as_deref().filter(|t| !t.is_empty()) else {
            warn!("not signed in; command dropped");
            return DispatchOutcome::Dropped(DropReason::Unauthenticated);
        };

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("command in flight; dropping {:?}", command);
            return DispatchOutcome::Dropped(DropReason::Busy);
        }
        let _guard = InFlight(&self.in_flight);

        let pending = match self.history.append_pending(command, message_type) {
            Ok(pending) => pending,
            Err(e) => {
                info!("{e}; dropping {:?}", command);
                return DispatchOutcome::Dropped(DropReason::Busy);
            }
        };

        let request = ChatRequest {
            message: command.to_owned(),
            assistant_name: self.identity.assistant_name.clone(),
            message_type,
            user_name: self.identity.user_name.clone(),
            context: self.history.recent_exchanges(self.config.context_window),
        };

        let resolution = match self.backend.chat(token, &request).await {
            Ok(reply) => {
                let classification = resolve(reply, command);
                debug!(
                    "command classified as {} (action {:?})",
                    classification.category(),
                    classification.action()
                );
                Resolution::Complete(classification)
            }
            Err(e) => {
                warn!("assistant request failed: {e}");
                let response = if e.is_network() {
                    self.config.network_error_reply.clone()
                } else {
                    self.config.error_reply.clone()
                };
                Resolution::Errored { response }
            }
        };

        let Some(message) = self.history.update_pending(pending.id, resolution) else {
            info!("history cleared while command {} was in flight", pending.id);
            return DispatchOutcome::Dropped(DropReason::Superseded);
        };

        self.history.persist(token, &message).await;

        if message_type == MessageType::Voice
            && message.status == MessageStatus::Complete
            && let Some(speech) = &self.speech
            && let Err(e) = speech.speak(&message.ai_response).await
        {
            warn!("could not speak response: {e}");
        }

        DispatchOutcome::Finished(message)
    }

    /// Stop any spoken response.
    pub async fn cancel_speech(&self) {
        if let Some(speech) = &self.speech
            && let Err(e) = speech.cancel().await
        {
            debug!("speech cancel failed: {e}");
        }
    }
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("identity", &self.identity)
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

/// Turn a backend reply into the exchange's classification.
///
/// A category supplied by the backend is authoritative. Without one, the
/// keyword classifier decides; if it recognises nothing the reply becomes a
/// general fallback.
#[must_use]
pub fn resolve(reply: ModelReply, command: &str) -> ClassificationResult {
    if reply.category.is_some() {
        return ClassificationResult::Structured(reply.into_classification());
    }

    match heuristic::classify(command) {
        Some(guess) => {
            debug!(
                "backend omitted category; keywords suggest {} ({} hits)",
                guess.category, guess.matched
            );
            let parameters = if reply.parameters.is_empty() {
                guess.parameters
            } else {
                reply.parameters
            };
            ClassificationResult::Structured(Classification {
                category: guess.category,
                response: reply.response,
                action: reply.action.or(guess.action),
                parameters,
                confidence: reply
                    .confidence
                    .unwrap_or(Confidence::Score(guess.confidence)),
                follow_up: reply.follow_up,
            })
        }
        None => ClassificationResult::fallback(reply.response),
    }
}
