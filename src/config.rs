//! Configuration types for the voice command engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    /// Continuous listening and restart policy.
    pub voice: VoiceConfig,
    /// Command dispatch settings.
    pub dispatch: DispatchConfig,
    /// Assistant backend / language model connection settings.
    pub backend: BackendConfig,
    /// Chat history settings.
    pub history: HistoryConfig,
    /// Spoken response settings.
    pub synthesis: SynthesisConfig,
}

/// Continuous listening configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Whether continuous listening starts as soon as a user signs in.
    pub enabled: bool,
    /// Restart the transcription engine after errors and natural end-of-stream.
    pub auto_restart: bool,
    /// Wake word used when the signed-in user has not named the assistant.
    pub default_wake_word: String,
    /// BCP-47 language tag handed to the transcription engine.
    pub language: String,
    /// Delay before restarting after a `network` capture error.
    pub network_retry_ms: u64,
    /// Delay before restarting after any other capture error.
    pub error_retry_ms: u64,
    /// Delay before restarting after the engine ends on its own.
    pub end_retry_ms: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_restart: true,
            default_wake_word: "assistant".to_owned(),
            language: "en-US".to_owned(),
            network_retry_ms: 5_000,
            error_retry_ms: 2_000,
            end_retry_ms: 1_000,
        }
    }
}

impl VoiceConfig {
    /// Restart delay after a `network` capture error.
    #[must_use]
    pub fn network_retry(&self) -> Duration {
        Duration::from_millis(self.network_retry_ms)
    }

    /// Restart delay after a non-network capture error.
    #[must_use]
    pub fn error_retry(&self) -> Duration {
        Duration::from_millis(self.error_retry_ms)
    }

    /// Restart delay after a natural end-of-stream.
    #[must_use]
    pub fn end_retry(&self) -> Duration {
        Duration::from_millis(self.end_retry_ms)
    }
}

/// Command dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Number of most recent completed exchanges sent as context.
    pub context_window: usize,
    /// Reply shown when the backend answers with a failure.
    pub error_reply: String,
    /// Reply shown when the backend could not be reached.
    pub network_error_reply: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            context_window: 5,
            error_reply: "Sorry, I encountered an error. Please try again.".to_owned(),
            network_error_reply: "Sorry, I encountered a network error. Please try again."
                .to_owned(),
        }
    }
}

/// Assistant backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the assistant server exposing `/ai/chat` and `/history`.
    pub server_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_s: u64,
    /// Base URL of the Gemini-compatible `generateContent` API (local mode).
    pub model_url: String,
    /// Model identifier for the language model (local mode).
    pub model_id: String,
    /// Environment variable holding the language model API key.
    pub api_key_env: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8000/api".to_owned(),
            request_timeout_s: 30,
            model_url: "https://generativelanguage.googleapis.com/v1beta".to_owned(),
            model_id: "gemini-1.5-flash-latest".to_owned(),
            api_key_env: "GEMINI_API_KEY".to_owned(),
        }
    }
}

impl BackendConfig {
    /// Per-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_s)
    }
}

/// Chat history configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Number of exchanges fetched from the durable store on sign-in.
    pub load_limit: usize,
    /// SQLite database used by the local store (None = platform data dir).
    pub db_path: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            load_limit: 50,
            db_path: None,
        }
    }
}

impl HistoryConfig {
    /// Resolve the SQLite database path for the local store.
    #[must_use]
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("parley")
                .join("history.db")
        })
    }
}

/// Spoken response configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Whether voice command responses are spoken aloud.
    pub enabled: bool,
    /// External TTS program; receives the text as its final argument.
    pub command: String,
    /// Speaking rate relative to normal (1.0).
    pub rate: f32,
    /// Pitch relative to normal (1.0).
    pub pitch: f32,
    /// Output volume in \[0, 1\].
    pub volume: f32,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "espeak-ng".to_owned(),
            rate: 0.9,
            pitch: 1.0,
            volume: 0.8,
        }
    }
}

impl ParleyConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or fails validation.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::error::ParleyError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::ParleyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/parley/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("parley").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("/tmp/parley-config/config.toml"))
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ParleyError::Config`] describing the first invalid field.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::ParleyError;

        if self.dispatch.context_window == 0 {
            return Err(ParleyError::Config(
                "dispatch.context_window must be greater than 0".into(),
            ));
        }
        if self.history.load_limit == 0 {
            return Err(ParleyError::Config(
                "history.load_limit must be greater than 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.synthesis.volume) {
            return Err(ParleyError::Config(format!(
                "synthesis.volume must be between 0.0 and 1.0, got {}",
                self.synthesis.volume
            )));
        }
        if self.synthesis.rate <= 0.0 {
            return Err(ParleyError::Config("synthesis.rate must be positive".into()));
        }
        if self.voice.default_wake_word.trim().is_empty() {
            return Err(ParleyError::Config(
                "voice.default_wake_word must not be empty".into(),
            ));
        }
        Ok(())
    }
}
