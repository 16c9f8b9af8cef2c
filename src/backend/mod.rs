//! Assistant backend boundary.
//!
//! An [`AssistantBackend`] turns one user command (plus recent context) into
//! a [`ModelReply`]. Two implementations ship with the crate:
//!
//! - [`HttpAssistantBackend`]: posts to an assistant server's `/ai/chat`
//!   endpoint.
//! - [`model::ClassifyingBackend`]: builds the assistant prompt locally and
//!   calls a [`model::LanguageModel`] directly.

pub mod model;

use crate::classifier::{Category, Confidence, ModelReply, string_parameters};
use crate::config::BackendConfig;
use crate::error::{ParleyError, Result};
use crate::history::MessageType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One completed exchange sent as conversational context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTurn {
    pub message: String,
    pub response: String,
}

/// A command forwarded to the assistant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub assistant_name: String,
    pub message_type: MessageType,
    /// Speaker's display name; used by local prompt building only.
    #[serde(skip)]
    pub user_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<ContextTurn>,
}

/// Something that can answer a user command.
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    /// Answer `request` on behalf of the user identified by `token`.
    ///
    /// # Errors
    ///
    /// [`ParleyError::Network`] when no response arrived,
    /// [`ParleyError::Auth`] when the token was rejected and
    /// [`ParleyError::Backend`] for any other failure.
    async fn chat(&self, token: &str, request: &ChatRequest) -> Result<ModelReply>;
}

// ── Wire format ─────────────────────────────────────────────────────────

/// `/ai/chat` response body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default, alias = "category", alias = "type")]
    pub response_type: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub parameters: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub confidence: Option<Confidence>,
    #[serde(default, alias = "follow_up")]
    pub follow_up: Option<String>,
    /// Server-side status text; carries the reason when `success` is false.
    #[serde(default)]
    pub message: Option<String>,
}

impl ChatReply {
    /// Convert into the domain reply.
    ///
    /// # Errors
    ///
    /// [`ParleyError::Backend`] when the server did not report
    /// `success: true` or sent no response text.
    pub fn into_model_reply(self) -> Result<ModelReply> {
        match self.success {
            Some(true) => {}
            Some(false) => {
                return Err(ParleyError::Backend(
                    self.message
                        .unwrap_or_else(|| "assistant reported failure".to_owned()),
                ));
            }
            None => {
                return Err(ParleyError::Backend(
                    "malformed payload: missing success flag".into(),
                ));
            }
        }
        let Some(response) = self.response.filter(|r| !r.trim().is_empty()) else {
            return Err(ParleyError::Backend(
                "malformed payload: missing response text".into(),
            ));
        };

        let category = self.response_type.as_deref().and_then(|name| {
            name.parse::<Category>()
                .map_err(|e| warn!("{e}; ignoring backend category"))
                .ok()
        });

        Ok(ModelReply {
            category,
            response,
            action: self.action.filter(|a| !a.trim().is_empty()),
            parameters: string_parameters(self.parameters),
            confidence: self.confidence,
            follow_up: self.follow_up,
        })
    }
}

// ── HTTP plumbing shared with the history store ─────────────────────────

/// Build a client honouring the configured request timeout.
pub(crate) fn http_client(config: &BackendConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()
        .map_err(|e| ParleyError::Config(format!("failed to build HTTP client: {e}")))
}

/// Join a base URL and an endpoint path without doubling slashes.
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Map a non-success HTTP status to an error.
pub(crate) fn map_http_error(status: reqwest::StatusCode, body: &str) -> ParleyError {
    let message = extract_error_message(body);
    match status.as_u16() {
        401 | 403 => ParleyError::Auth(format!("request rejected: {message}")),
        408 | 504 => ParleyError::Network(format!("HTTP {}: {message}", status.as_u16())),
        _ => ParleyError::Backend(format!("HTTP {}: {message}", status.as_u16())),
    }
}

/// Extract an error message from a JSON error body.
///
/// Understands `{"message": ..}`, `{"error": ..}` and `{"error": {"message": ..}}`.
pub(crate) fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .and_then(|m| m.as_str())
                .or_else(|| v.get("error").and_then(|e| e.as_str()))
                .or_else(|| {
                    v.get("error")
                        .and_then(|e| e.get("message"))
                        .and_then(|m| m.as_str())
                })
                .map(String::from)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Send a request and return the body of a successful response.
pub(crate) async fn send_checked(request: reqwest::RequestBuilder) -> Result<String> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(map_http_error(status, &body));
    }
    Ok(body)
}

/// Parse a JSON response body.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| ParleyError::Backend(format!("malformed payload: {e}")))
}

// ── HTTP backend ────────────────────────────────────────────────────────

/// Backend that forwards commands to an assistant server.
#[derive(Debug, Clone)]
pub struct HttpAssistantBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAssistantBackend {
    /// Create a backend talking to `config.server_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ParleyError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.server_url.clone(),
        })
    }
}

#[async_trait]
impl AssistantBackend for HttpAssistantBackend {
    async fn chat(&self, token: &str, request: &ChatRequest) -> Result<ModelReply> {
        let url = endpoint(&self.base_url, "ai/chat");
        debug!(
            "POST {url} ({} message, {} context turns)",
            request.message_type.as_str(),
            request.context.len()
        );

        let body = send_checked(self.client.post(&url).bearer_auth(token).json(request)).await?;
        decode::<ChatReply>(&body)?.into_model_reply()
    }
}
