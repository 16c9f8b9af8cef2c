//! Spoken responses.
//!
//! Speech output is a singleton: starting an utterance cancels whatever was
//! being said.

use crate::config::SynthesisConfig;
use crate::error::{ParleyError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// espeak-ng defaults that the relative settings scale.
const BASE_WORDS_PER_MINUTE: f32 = 175.0;
const BASE_PITCH: f32 = 50.0;
const BASE_AMPLITUDE: f32 = 100.0;

/// Something that can say text out loud.
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    /// Cancel any current utterance and start saying `text`.
    ///
    /// Returns once playback has started, not when it finishes.
    async fn speak(&self, text: &str) -> Result<()>;

    /// Stop the current utterance, if any.
    async fn cancel(&self) -> Result<()>;
}

/// Speech through an external TTS program (espeak-ng compatible flags).
#[derive(Debug)]
pub struct ProcessSpeech {
    config: SynthesisConfig,
    current: Mutex<Option<Child>>,
}

impl ProcessSpeech {
    pub fn new(config: SynthesisConfig) -> Self {
        Self {
            config,
            current: Mutex::new(None),
        }
    }

    /// Command-line arguments for saying `text`.
    #[must_use]
    pub fn arguments(&self, text: &str) -> Vec<String> {
        let speed = (BASE_WORDS_PER_MINUTE * self.config.rate).round() as u32;
        let pitch = (BASE_PITCH * self.config.pitch).round().clamp(0.0, 99.0) as u32;
        let amplitude = (BASE_AMPLITUDE * self.config.volume).round().clamp(0.0, 200.0) as u32;
        vec![
            "-s".to_owned(),
            speed.to_string(),
            "-p".to_owned(),
            pitch.to_string(),
            "-a".to_owned(),
            amplitude.to_string(),
            "--".to_owned(),
            text.to_owned(),
        ]
    }
}

async fn stop_child(slot: &mut Option<Child>) {
    if let Some(mut child) = slot.take() {
        match child.try_wait() {
            Ok(Some(_)) => {}
            _ => {
                if let Err(e) = child.kill().await {
                    debug!("speech process already gone: {e}");
                }
            }
        }
    }
}

#[async_trait]
impl SpeechOutput for ProcessSpeech {
    async fn speak(&self, text: &str) -> Result<()> {
        let mut current = self.current.lock().await;
        stop_child(&mut current).await;

        if text.trim().is_empty() {
            return Ok(());
        }

        let child = Command::new(&self.config.command)
            .args(self.arguments(text))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                warn!("failed to start {}: {e}", self.config.command);
                ParleyError::Synthesis(format!("{}: {e}", self.config.command))
            })?;
        debug!("speaking {} chars via {}", text.len(), self.config.command);
        *current = Some(child);
        Ok(())
    }

    async fn cancel(&self) -> Result<()> {
        stop_child(&mut *self.current.lock().await).await;
        Ok(())
    }
}
