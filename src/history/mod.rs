//! Chat history with optimistic updates.
//!
//! The in-memory log is authoritative for the running session. It is kept
//! oldest-first, grows only by appending, and allows exactly one entry to be
//! [`MessageStatus::Pending`] at a time. Exchanges are mirrored into a
//! [`HistoryStore`] on a best-effort basis.

pub mod store;

pub use store::{
    ERRORED_RESPONSE_TYPE, HistoryRecord, HistoryStore, HttpHistoryStore, SqliteHistoryStore,
};

use crate::backend::ContextTurn;
use crate::classifier::{Category, ClassificationResult};
use crate::error::{ParleyError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// How a command reached the assistant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Voice,
}

impl MessageType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Voice => "voice",
        }
    }
}

/// Lifecycle of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Sent; waiting for the assistant.
    Pending,
    /// Answered.
    Complete,
    /// Failed; `ai_response` holds the fallback text.
    Errored,
}

/// One exchange between the user and the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Monotonic within a history instance.
    pub id: u64,
    pub user_message: String,
    /// Empty while pending.
    pub ai_response: String,
    pub message_type: MessageType,
    pub response_type: Category,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
    /// Full classification for answered exchanges produced this session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationResult>,
}

impl ChatMessage {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == MessageStatus::Pending
    }

    /// Durable form of this exchange.
    #[must_use]
    pub fn to_record(&self) -> HistoryRecord {
        HistoryRecord {
            message: self.user_message.clone(),
            response: self.ai_response.clone(),
            timestamp: self.timestamp,
            message_type: Some(self.message_type),
            response_type: Some(match self.status {
                MessageStatus::Errored => ERRORED_RESPONSE_TYPE.to_owned(),
                _ => self.response_type.as_str().to_owned(),
            }),
        }
    }
}

/// How the pending exchange ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The assistant answered.
    Complete(ClassificationResult),
    /// The request failed; `response` is the user-facing fallback text.
    Errored { response: String },
}

/// Result of [`ChatHistoryManager::clear`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClearOutcome {
    /// Whether the durable store was cleared too. Memory is always cleared.
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct HistoryState {
    /// Oldest first.
    messages: Vec<ChatMessage>,
    pending: Option<u64>,
    next_id: u64,
}

impl HistoryState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Owner of the conversation log for one signed-in user.
pub struct ChatHistoryManager {
    state: Mutex<HistoryState>,
    store: Arc<dyn HistoryStore>,
}

impl ChatHistoryManager {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self {
            state: Mutex::new(HistoryState::default()),
            store,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HistoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a new pending exchange.
    ///
    /// # Errors
    ///
    /// Returns [`ParleyError::Dispatch`] if another exchange is still pending.
    pub fn append_pending(
        &self,
        user_message: impl Into<String>,
        message_type: MessageType,
    ) -> Result<ChatMessage> {
        let mut state = self.lock();
        if let Some(id) = state.pending {
            return Err(ParleyError::Dispatch(format!(
                "exchange {id} is still pending"
            )));
        }

        let id = state.allocate_id();
        let message = ChatMessage {
            id,
            user_message: user_message.into(),
            ai_response: String::new(),
            message_type,
            response_type: Category::General,
            status: MessageStatus::Pending,
            timestamp: Utc::now(),
            classification: None,
        };
        state.messages.push(message.clone());
        state.pending = Some(id);
        Ok(message)
    }

    /// Resolve the pending exchange `id` in place.
    ///
    /// Returns the updated message, or `None` (no-op) if `id` is not the
    /// pending exchange, e.g. because the history was cleared meanwhile.
    pub fn update_pending(&self, id: u64, resolution: Resolution) -> Option<ChatMessage> {
        let mut state = self.lock();
        if state.pending != Some(id) {
            debug!("no pending exchange {id}; update ignored");
            return None;
        }
        state.pending = None;

        let message = state.messages.iter_mut().rev().find(|m| m.id == id)?;
        match resolution {
            Resolution::Complete(classification) => {
                message.ai_response = classification.response().to_owned();
                message.response_type = classification.category();
                message.status = MessageStatus::Complete;
                message.classification = Some(classification);
            }
            Resolution::Errored { response } => {
                message.ai_response = response;
                message.response_type = Category::General;
                message.status = MessageStatus::Errored;
            }
        }
        Some(message.clone())
    }

    /// Mirror `message` into the durable store. Failures are logged only.
    pub async fn persist(&self, token: &str, message: &ChatMessage) -> bool {
        match self.store.append(token, &message.to_record()).await {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to persist exchange {}: {e}", message.id);
                false
            }
        }
    }

    /// Load up to `limit` stored exchanges, newest first.
    ///
    /// Missing optional fields default to message type `text` and category
    /// `general`. When nothing is pending, the loaded exchanges also replace
    /// the in-memory log.
    ///
    /// # Errors
    ///
    /// Propagates store failures; memory is left untouched in that case.
    pub async fn load_recent(&self, token: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let records = self.store.load_recent(token, limit).await?;

        let mut state = self.lock();
        let mut loaded: Vec<ChatMessage> = records
            .into_iter()
            .map(|record| {
                let id = state.allocate_id();
                record.into_message(id)
            })
            .collect();

        if state.pending.is_none() {
            state.messages.clone_from(&loaded);
        } else {
            debug!("exchange pending; loaded history not merged into memory");
        }
        drop(state);

        loaded.reverse();
        info!("loaded {} stored exchanges", loaded.len());
        Ok(loaded)
    }

    /// Empty memory, then the durable store.
    ///
    /// A store failure is reported in the outcome and not retried; memory
    /// stays empty either way.
    pub async fn clear(&self, token: &str) -> ClearOutcome {
        self.reset();
        match self.store.clear(token).await {
            Ok(()) => ClearOutcome {
                success: true,
                error: None,
            },
            Err(e) => {
                warn!("history cleared locally but the store failed: {e}");
                ClearOutcome {
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Drop the in-memory log without touching the store.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.messages.clear();
        state.pending = None;
    }

    /// The most recent `n` completed exchanges, oldest first.
    #[must_use]
    pub fn recent_exchanges(&self, n: usize) -> Vec<ContextTurn> {
        let state = self.lock();
        let mut turns: Vec<ContextTurn> = state
            .messages
            .iter()
            .rev()
            .filter(|m| m.status == MessageStatus::Complete)
            .take(n)
            .map(|m| ContextTurn {
                message: m.user_message.clone(),
                response: m.ai_response.clone(),
            })
            .collect();
        turns.reverse();
        turns
    }

    /// Snapshot of the log, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.lock().messages.clone()
    }

    /// The pending exchange, if any.
    #[must_use]
    pub fn pending(&self) -> Option<ChatMessage> {
        let state = self.lock();
        let id = state.pending?;
        state.messages.iter().rev().find(|m| m.id == id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().messages.is_empty()
    }
}

impl std::fmt::Debug for ChatHistoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ChatHistoryManager")
            .field("messages", &state.messages.len())
            .field("pending", &state.pending)
            .finish_non_exhaustive()
    }
}
