//! The signed-in user's voice interface.
//!
//! [`VoiceInterface`] ties one user context to its collaborators: the
//! command dispatcher shared by voice and text input, the chat history, and
//! at most one live recognition session. The session is recreated (never
//! mutated) when the assistant is renamed and torn down on logout.

use crate::backend::AssistantBackend;
use crate::config::ParleyConfig;
use crate::dispatch::{CommandDispatcher, DispatchOutcome, DropReason, Identity};
use crate::error::{ParleyError, Result};
use crate::history::{ChatHistoryManager, ChatMessage, ClearOutcome, HistoryStore, MessageType};
use crate::session::{
    RecognitionSession, RestartPolicy, SessionController, SessionHandle, SessionState,
    SessionUpdate,
};
use crate::synthesis::SpeechOutput;
use crate::transcript::{EngineOptions, TranscriptionEngine};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The signed-in user as issued by the authentication service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub name: String,
    /// Also the wake word. Empty means the configured default.
    pub assistant_name: String,
    pub token: Option<String>,
}

/// Voice and text access to the assistant for one signed-in user.
pub struct VoiceInterface {
    config: ParleyConfig,
    engine: Arc<dyn TranscriptionEngine>,
    backend: Arc<dyn AssistantBackend>,
    history: Arc<ChatHistoryManager>,
    speech: Option<Arc<dyn SpeechOutput>>,
    updates: Option<mpsc::UnboundedSender<SessionUpdate>>,
    user: Option<UserProfile>,
    dispatcher: Option<Arc<CommandDispatcher>>,
    session: Option<SessionHandle>,
    voice_available: bool,
    cancel: CancellationToken,
}

impl VoiceInterface {
    pub fn new(
        config: ParleyConfig,
        engine: Arc<dyn TranscriptionEngine>,
        backend: Arc<dyn AssistantBackend>,
        store: Arc<dyn HistoryStore>,
    ) -> Self {
        let voice_available = engine.is_available();
        Self {
            config,
            engine,
            backend,
            history: Arc::new(ChatHistoryManager::new(store)),
            speech: None,
            updates: None,
            user: None,
            dispatcher: None,
            session: None,
            voice_available,
            cancel: CancellationToken::new(),
        }
    }

    /// Speak voice command responses through `speech`.
    #[must_use]
    pub fn with_speech(mut self, speech: Arc<dyn SpeechOutput>) -> Self {
        self.speech = Some(speech);
        self
    }

    /// Forward session progress to `updates`.
    #[must_use]
    pub fn with_updates(mut self, updates: mpsc::UnboundedSender<SessionUpdate>) -> Self {
        self.updates = Some(updates);
        self
    }

    #[must_use]
    pub fn history(&self) -> &Arc<ChatHistoryManager> {
        &self.history
    }

    #[must_use]
    pub fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    /// Whether voice input can be used at all on this platform.
    #[must_use]
    pub fn is_voice_available(&self) -> bool {
        self.voice_available
    }

    /// State of the live session, if there is one.
    #[must_use]
    pub fn session_state(&self) -> Option<SessionState> {
        self.session
            .as_ref()
            .filter(|s| !s.is_finished())
            .map(SessionHandle::state)
    }

    /// Mutable access to the live session handle.
    pub fn session_mut(&mut self) -> Option<&mut SessionHandle> {
        self.session.as_mut()
    }

    /// Wake word in effect for the signed-in user.
    #[must_use]
    pub fn wake_word(&self) -> Option<String> {
        self.user.as_ref().map(|user| {
            if user.assistant_name.trim().is_empty() {
                self.config.voice.default_wake_word.clone()
            } else {
                user.assistant_name.trim().to_owned()
            }
        })
    }

    /// Install `profile` as the active user, load their history and start
    /// listening when voice is enabled.
    ///
    /// Returns the loaded history, newest first. History and voice failures
    /// are logged; signing in still succeeds.
    pub async fn sign_in(&mut self, profile: UserProfile) -> Vec<ChatMessage> {
        if self.user.is_some() {
            self.logout().await;
        }
        info!("signed in as {}", profile.name);
        self.user = Some(profile);
        self.rebuild_dispatcher();

        let loaded = match self.token() {
            Some(token) => self
                .history
                .load_recent(&token, self.config.history.load_limit)
                .await
                .unwrap_or_else(|e| {
                    warn!("could not load chat history: {e}");
                    Vec::new()
                }),
            None => Vec::new(),
        };

        if self.config.voice.enabled
            && let Err(e) = self.start_listening().await
        {
            warn!("voice commands disabled: {e}");
        }
        loaded
    }

    /// Rename the assistant. The live session is replaced, since the wake
    /// word changes with the name.
    pub async fn rename_assistant(&mut self, assistant_name: impl Into<String>) -> Result<()> {
        let user = self
            .user
            .as_mut()
            .ok_or_else(|| ParleyError::Auth("not signed in".into()))?;
        user.assistant_name = assistant_name.into();

        let was_listening = self.session_state().is_some();
        self.stop_listening().await;
        self.rebuild_dispatcher();
        if was_listening {
            self.start_listening().await?;
        }
        Ok(())
    }

    /// Start continuous listening. Does nothing if a session is already
    /// capturing; a session parked in `Idle` or `Erroring` is replaced.
    ///
    /// # Errors
    ///
    /// [`ParleyError::Auth`] when nobody is signed in and
    /// [`ParleyError::Capture`] when transcription is unavailable.
    pub async fn start_listening(&mut self) -> Result<()> {
        if matches!(
            self.session_state(),
            Some(SessionState::Starting | SessionState::Listening | SessionState::Processing)
        ) {
            return Ok(());
        }
        self.stop_listening().await;
        let dispatcher = self
            .dispatcher
            .clone()
            .ok_or_else(|| ParleyError::Auth("not signed in".into()))?;
        let wake_word = self.wake_word().unwrap_or_default();

        let session = RecognitionSession::new(
            wake_word.clone(),
            RestartPolicy::from_config(&self.config.voice),
            self.config.voice.auto_restart,
        );
        let mut controller = SessionController::new(
            session,
            Arc::clone(&self.engine),
            dispatcher,
            EngineOptions::continuous(self.config.voice.language.clone()),
        )
        .with_parent_cancel(&self.cancel);
        if let Some(updates) = &self.updates {
            controller = controller.with_updates(updates.clone());
        }

        match controller.spawn() {
            Ok(handle) => {
                info!("voice commands on; wake word \"{wake_word}\"");
                self.session = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.voice_available = false;
                Err(e)
            }
        }
    }

    /// Stop listening and wait for the session to wind down.
    pub async fn stop_listening(&mut self) {
        if let Some(session) = self.session.take() {
            session.shutdown().await;
        }
    }

    /// Send a typed message through the same dispatcher as voice commands.
    pub async fn send_text(&self, text: &str) -> DispatchOutcome {
        match &self.dispatcher {
            Some(dispatcher) => dispatcher.dispatch(text, MessageType::Text).await,
            None => DispatchOutcome::Dropped(DropReason::Unauthenticated),
        }
    }

    /// Clear the chat history in memory and in the durable store.
    pub async fn clear_history(&self) -> ClearOutcome {
        match self.token() {
            Some(token) => self.history.clear(&token).await,
            None => {
                self.history.reset();
                ClearOutcome {
                    success: false,
                    error: Some("not signed in".into()),
                }
            }
        }
    }

    /// Tear down the user context: stop listening, silence speech and drop
    /// the in-memory history.
    pub async fn logout(&mut self) {
        self.stop_listening().await;
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.cancel_speech().await;
        }
        self.history.reset();
        if let Some(user) = self.user.take() {
            info!("{} signed out", user.name);
        }
    }

    fn token(&self) -> Option<String> {
        self.user
            .as_ref()
            .and_then(|u| u.token.clone())
            .filter(|t| !t.is_empty())
    }

    fn rebuild_dispatcher(&mut self) {
        let Some(user) = &self.user else {
            self.dispatcher = None;
            return;
        };
        let identity = Identity {
            user_name: user.name.clone(),
            assistant_name: self.wake_word().unwrap_or_default(),
            token: user.token.clone(),
        };
        let mut dispatcher = CommandDispatcher::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.history),
            self.config.dispatch.clone(),
            identity,
        );
        if let Some(speech) = &self.speech {
            dispatcher = dispatcher.with_speech(Arc::clone(speech));
        }
        self.dispatcher = Some(Arc::new(dispatcher));
    }
}

impl Drop for VoiceInterface {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for VoiceInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceInterface")
            .field("user", &self.user.as_ref().map(|u| &u.name))
            .field("session", &self.session_state())
            .field("voice_available", &self.voice_available)
            .finish_non_exhaustive()
    }
}
