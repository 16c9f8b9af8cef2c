//! Local assistant backend: prompt building plus a direct language model call.

use super::{AssistantBackend, ChatRequest, decode, endpoint, http_client, send_checked};
use crate::classifier::{Category, ModelReply, Parameters, fallback_text};
use crate::config::BackendConfig;
use crate::error::{ParleyError, Result};
use crate::history::MessageType;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info};

/// A text-in, text-out language model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier for logs.
    fn name(&self) -> &str;

    /// Generate a completion for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

// ── Gemini ──────────────────────────────────────────────────────────────

/// Google Gemini `generateContent` client.
#[derive(Debug, Clone)]
pub struct GeminiModel {
    client: reqwest::Client,
    base_url: String,
    model_id: String,
    api_key: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiModel {
    /// Create a client with an explicit API key.
    ///
    /// # Errors
    ///
    /// Returns [`ParleyError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &BackendConfig, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.model_url.clone(),
            model_id: config.model_id.clone(),
            api_key: api_key.into(),
        })
    }

    /// Create a client reading the API key from `config.api_key_env`.
    ///
    /// # Errors
    ///
    /// Returns [`ParleyError::Auth`] if the variable is unset or empty.
    pub fn from_env(config: &BackendConfig) -> Result<Self> {
        let key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ParleyError::Auth(format!("{} is not set", config.api_key_env))
            })?;
        Self::new(config, key)
    }
}

#[async_trait]
impl LanguageModel for GeminiModel {
    fn name(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = endpoint(
            &self.base_url,
            &format!("models/{}:generateContent", self.model_id),
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let raw = send_checked(
            self.client
                .post(&url)
                .query(&[("key", self.api_key.as_str())])
                .json(&body),
        )
        .await?;

        let parsed: GenerateResponse = decode(&raw)?;
        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .and_then(|p| p.text)
            .ok_or_else(|| ParleyError::Backend("malformed payload: no candidate text".into()))
    }
}

// ── Prompt ──────────────────────────────────────────────────────────────

const RESPONSE_FORMAT: &str = r#"Always respond with a single JSON object and no other text:
{
  "category": "<one of the categories above>",
  "response": "your natural, conversational reply",
  "action": "specific action to execute, or null",
  "parameters": {"app": "...", "recipient": "...", "message": "...", "url": "...", "query": "...", "path": "..."},
  "confidence": "high|medium|low",
  "follow_up": "optional suggested follow-up"
}"#;

const EXAMPLES: &[(&str, Category, &str, &str)] = &[
    ("What time is it?", Category::SystemCommand, "get_current_time", ""),
    ("Take a screenshot", Category::SystemCommand, "screenshot", ""),
    ("Open file manager", Category::SystemCommand, "open_file_manager", ""),
    ("Open a new tab", Category::WebNavigation, "open_new_tab", ""),
    (
        "Go to Google",
        Category::WebNavigation,
        "open_website",
        r#"{"url": "https://www.google.com"}"#,
    ),
    (
        "Open Google Chrome",
        Category::AppControl,
        "open_app",
        r#"{"app": "chrome"}"#,
    ),
    (
        "Send WhatsApp to John: Hello",
        Category::Communication,
        "send_whatsapp",
        r#"{"contact": "John", "message": "Hello"}"#,
    ),
    (
        "Send email to mom",
        Category::Communication,
        "send_email",
        r#"{"recipient": "mom"}"#,
    ),
    (
        "Open Documents folder",
        Category::FileOperation,
        "open_folder",
        r#"{"path": "Documents"}"#,
    ),
];

/// Instructions describing the assistant and the reply format.
#[must_use]
pub fn system_prompt(assistant_name: &str, user_name: &str) -> String {
    let mut prompt = format!(
        "You are {assistant_name}, a voice assistant for {user_name}. \
         Be concise, friendly and practical. Ask a clarifying question when a \
         request is ambiguous and confirm before sending messages on the user's behalf.\n\n\
         Categorise every reply as one of: "
    );
    let names: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();
    prompt.push_str(&names.join(", "));
    prompt.push_str(".\n\n");
    prompt.push_str(RESPONSE_FORMAT);
    prompt.push_str("\n\nExamples:\n");
    for (said, category, action, params) in EXAMPLES {
        let _ = write!(prompt, "- \"{said}\" -> category: \"{category}\", action: \"{action}\"");
        if !params.is_empty() {
            let _ = write!(prompt, ", parameters: {params}");
        }
        prompt.push('\n');
    }
    prompt
}

/// Full prompt for one request: instructions, recent context, then the command.
#[must_use]
pub fn build_prompt(request: &ChatRequest) -> String {
    let user_name = if request.user_name.trim().is_empty() {
        "User"
    } else {
        request.user_name.as_str()
    };
    let mut prompt = system_prompt(&request.assistant_name, user_name);
    prompt.push('\n');

    if !request.context.is_empty() {
        let context: Vec<String> = request
            .context
            .iter()
            .map(|turn| format!("User: {}\nAssistant: {}", turn.message, turn.response))
            .collect();
        let _ = write!(prompt, "Previous conversation:\n{}\n\n", context.join("\n\n"));
    }

    match request.message_type {
        MessageType::Voice => {
            let _ = write!(prompt, "[VOICE INPUT] User said: \"{}\"\n\n", request.message);
        }
        MessageType::Text => {
            let _ = write!(prompt, "User: {}\n\n", request.message);
        }
    }

    prompt.push_str(
        "Reply with the JSON object only. If this requires a system action, \
         specify the action and parameters.",
    );
    prompt
}

// ── Backend ─────────────────────────────────────────────────────────────

/// Backend that prompts a [`LanguageModel`] and classifies its reply locally.
///
/// A reply that is not a structured JSON object comes back with no category,
/// so the dispatcher's keyword classifier gets a chance before the general
/// fallback.
#[derive(Clone)]
pub struct ClassifyingBackend {
    model: Arc<dyn LanguageModel>,
}

impl ClassifyingBackend {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl AssistantBackend for ClassifyingBackend {
    async fn chat(&self, _token: &str, request: &ChatRequest) -> Result<ModelReply> {
        let prompt = build_prompt(request);
        debug!("prompting {} ({} chars)", self.model.name(), prompt.len());
        let raw = self.model.generate(&prompt).await?;

        Ok(ModelReply::parse(&raw).unwrap_or_else(|| {
            info!("model reply is not structured, classifying locally");
            ModelReply {
                category: None,
                response: fallback_text(&raw),
                action: None,
                parameters: Parameters::new(),
                confidence: None,
                follow_up: None,
            }
        }))
    }
}
