//! Error types for the parley voice engine.

/// Top-level error type for the voice command engine.
#[derive(Debug, thiserror::Error)]
pub enum ParleyError {
    /// Transcription engine could not be started or stopped.
    #[error("capture error: {0}")]
    Capture(String),

    /// Recognition session lifecycle violation (e.g. second engine instance).
    #[error("session error: {0}")]
    Session(String),

    /// Command dispatch refused to run.
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// Assistant backend or language model answered with a failure or an
    /// unusable payload.
    #[error("backend error: {0}")]
    Backend(String),

    /// The request never produced a response (connect, timeout, reset).
    #[error("network error: {0}")]
    Network(String),

    /// Durable chat history store error.
    #[error("history error: {0}")]
    History(String),

    /// Speech synthesis error.
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Missing or rejected authentication.
    #[error("auth error: {0}")]
    Auth(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ParleyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Backend(format!("malformed payload: {e}"))
        } else if e.is_timeout() {
            Self::Network(format!("request timed out: {e}"))
        } else {
            Self::Network(format!("request failed: {e}"))
        }
    }
}

impl From<rusqlite::Error> for ParleyError {
    fn from(e: rusqlite::Error) -> Self {
        Self::History(format!("sqlite: {e}"))
    }
}

impl ParleyError {
    /// Whether the failure happened in transport rather than in the service.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ParleyError>;
