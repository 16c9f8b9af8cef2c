//! Recognition session state machine.
//!
//! [`RecognitionSession`] holds the listening lifecycle and decides what
//! should happen next; it performs no I/O. Every change goes through a
//! transition method that returns an [`Effect`] (or a [`StartPlan`]) for the
//! async driver in [`controller`] to carry out.
//!
//! Restart races are settled with a generation counter: each start and each
//! stop bumps the generation, and a scheduled restart only fires if the
//! generation it was scheduled under is still current.

pub mod controller;

pub use controller::{SessionController, SessionHandle, SessionUpdate};

use crate::config::VoiceConfig;
use crate::error::{ParleyError, Result};
use crate::transcript::{CaptureErrorKind, TranscriptEvent};
use crate::wakeword::{self, WakeMatch};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Listening lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Created, engine not running.
    Idle,
    /// Engine start requested, waiting for it to report capture.
    Starting,
    /// Capturing and watching for the wake word.
    Listening,
    /// A command is being handled; further commands are dropped.
    Processing,
    /// The engine reported an error; a restart may be scheduled.
    Erroring,
    /// Explicitly stopped. Terminal.
    Stopped,
}

/// Restart delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub network: Duration,
    pub error: Duration,
    pub ended: Duration,
}

impl RestartPolicy {
    #[must_use]
    pub fn from_config(config: &VoiceConfig) -> Self {
        Self {
            network: config.network_retry(),
            error: config.error_retry(),
            ended: config.end_retry(),
        }
    }

    /// Delay before restarting after `kind`; `None` when it must not restart.
    #[must_use]
    pub fn delay_for(&self, kind: &CaptureErrorKind) -> Option<Duration> {
        match kind {
            CaptureErrorKind::Aborted => None,
            CaptureErrorKind::Network => Some(self.network),
            _ => Some(self.error),
        }
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from_config(&VoiceConfig::default())
    }
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    None,
    /// Hand the command to the dispatcher.
    Dispatch(String),
    /// Fire [`RecognitionSession::restart_due`] with `generation` after `delay`.
    ScheduleRestart { generation: u64, delay: Duration },
}

/// Instruction to start a fresh engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartPlan {
    pub generation: u64,
    /// The previous instance never reported its end; stop it first.
    pub stop_previous: bool,
}

/// Listening lifecycle for one signed-in user and one assistant name.
#[derive(Debug, Clone)]
pub struct RecognitionSession {
    state: SessionState,
    wake_word: String,
    should_auto_restart: bool,
    active_instance: Option<u64>,
    generation: u64,
    /// Set by an `aborted` error; the instance's end must not restart it.
    restart_blocked: bool,
    /// A command handed out by this session has not finished yet.
    dispatching: bool,
    policy: RestartPolicy,
}

impl RecognitionSession {
    pub fn new(wake_word: impl Into<String>, policy: RestartPolicy, auto_restart: bool) -> Self {
        Self {
            state: SessionState::Idle,
            wake_word: wake_word.into(),
            should_auto_restart: auto_restart,
            active_instance: None,
            generation: 0,
            restart_blocked: false,
            dispatching: false,
            policy,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn wake_word(&self) -> &str {
        &self.wake_word
    }

    #[must_use]
    pub fn should_auto_restart(&self) -> bool {
        self.should_auto_restart
    }

    #[must_use]
    pub fn active_instance(&self) -> Option<u64> {
        self.active_instance
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn is_dispatching(&self) -> bool {
        self.dispatching
    }

    /// Enter `Starting` with a new engine instance.
    ///
    /// # Errors
    ///
    /// [`ParleyError::Session`] if the session is stopped or an instance is
    /// already active.
    pub fn begin_start(&mut self) -> Result<u64> {
        if self.state == SessionState::Stopped {
            return Err(ParleyError::Session("session is stopped".into()));
        }
        if let Some(active) = self.active_instance {
            return Err(ParleyError::Session(format!(
                "engine instance {active} is still active"
            )));
        }
        self.generation += 1;
        self.active_instance = Some(self.generation);
        self.restart_blocked = false;
        self.state = SessionState::Starting;
        debug!("starting engine instance {}", self.generation);
        Ok(self.generation)
    }

    /// The engine refused to start instance `generation`.
    pub fn start_failed(&mut self, generation: u64) -> Effect {
        if generation != self.generation || self.state == SessionState::Stopped {
            return Effect::None;
        }
        self.active_instance = None;
        self.state = SessionState::Erroring;
        self.schedule(self.policy.error)
    }

    /// Apply one transcript event from engine instance `generation`.
    pub fn handle(&mut self, generation: u64, event: TranscriptEvent) -> Effect {
        if self.state == SessionState::Stopped {
            return Effect::None;
        }
        if generation != self.generation {
            debug!("dropping {event:?} from stale instance {generation}");
            return Effect::None;
        }

        match event {
            TranscriptEvent::Started => {
                if self.state == SessionState::Starting {
                    self.state = SessionState::Listening;
                    info!("listening for \"{}\"", self.wake_word);
                }
                Effect::None
            }
            TranscriptEvent::Partial(_) => Effect::None,
            TranscriptEvent::Final(text) => self.on_final(&text),
            TranscriptEvent::Error(kind) => self.on_error(&kind),
            TranscriptEvent::Ended => self.on_ended(),
        }
    }

    fn on_final(&mut self, text: &str) -> Effect {
        let command = match wakeword::inspect(text, &self.wake_word) {
            WakeMatch::NotAddressed => return Effect::None,
            WakeMatch::WakeWordOnly => {
                info!("heard \"{}\" with no command", self.wake_word);
                return Effect::None;
            }
            WakeMatch::Command(command) => command,
        };

        if self.dispatching {
            info!("still handling a command; dropping {command:?}");
            return Effect::None;
        }
        if self.state != SessionState::Listening {
            debug!("not listening ({:?}); dropping {command:?}", self.state);
            return Effect::None;
        }

        self.state = SessionState::Processing;
        self.dispatching = true;
        Effect::Dispatch(command)
    }

    fn on_error(&mut self, kind: &CaptureErrorKind) -> Effect {
        if *kind == CaptureErrorKind::Aborted {
            self.restart_blocked = true;
        }
        if matches!(
            self.state,
            SessionState::Listening | SessionState::Processing | SessionState::Starting
        ) {
            self.state = SessionState::Erroring;
        }

        if !self.should_auto_restart {
            debug!("capture error {}; auto-restart off", kind.code());
            return Effect::None;
        }
        match self.policy.delay_for(kind) {
            Some(delay) => {
                warn!("capture error {}; restarting in {delay:?}", kind.code());
                self.schedule(delay)
            }
            None => {
                info!("capture aborted; not restarting");
                Effect::None
            }
        }
    }

    fn on_ended(&mut self) -> Effect {
        self.active_instance = None;

        if self.restart_blocked || !self.should_auto_restart {
            debug!("engine ended; no restart");
            if matches!(self.state, SessionState::Listening | SessionState::Starting) {
                self.state = SessionState::Idle;
            }
            return Effect::None;
        }

        match self.state {
            // The error already scheduled a restart.
            SessionState::Erroring => Effect::None,
            // Re-armed when the dispatcher finishes.
            SessionState::Processing => Effect::None,
            SessionState::Listening | SessionState::Starting | SessionState::Idle => {
                self.state = SessionState::Idle;
                debug!("engine ended; restarting in {:?}", self.policy.ended);
                self.schedule(self.policy.ended)
            }
            SessionState::Stopped => Effect::None,
        }
    }

    fn schedule(&self, delay: Duration) -> Effect {
        if !self.should_auto_restart {
            return Effect::None;
        }
        Effect::ScheduleRestart {
            generation: self.generation,
            delay,
        }
    }

    /// A restart scheduled under `generation` is due.
    ///
    /// Returns `None` if the restart is no longer wanted: a newer instance
    /// exists, the session is already starting, listening or stopped, or
    /// auto-restart was turned off.
    pub fn restart_due(&mut self, generation: u64) -> Option<StartPlan> {
        if generation != self.generation {
            debug!("restart for instance {generation} superseded");
            return None;
        }
        if matches!(
            self.state,
            SessionState::Listening | SessionState::Starting | SessionState::Stopped
        ) {
            debug!("restart skipped in {:?}", self.state);
            return None;
        }
        if !self.should_auto_restart || self.restart_blocked {
            return None;
        }
        self.plan_start()
    }

    /// The dispatcher finished the command this session handed out.
    pub fn dispatch_finished(&mut self) -> Option<StartPlan> {
        self.dispatching = false;
        if self.state != SessionState::Processing {
            return None;
        }
        if !self.should_auto_restart {
            self.state = SessionState::Idle;
            return None;
        }
        if self.active_instance.is_some() {
            self.state = SessionState::Listening;
            return None;
        }
        self.plan_start()
    }

    fn plan_start(&mut self) -> Option<StartPlan> {
        let stop_previous = self.active_instance.take().is_some();
        match self.begin_start() {
            Ok(generation) => Some(StartPlan {
                generation,
                stop_previous,
            }),
            Err(e) => {
                warn!("cannot restart: {e}");
                None
            }
        }
    }

    /// Stop for good. Returns whether an engine instance should be stopped.
    pub fn stop(&mut self) -> bool {
        self.should_auto_restart = false;
        self.state = SessionState::Stopped;
        self.generation += 1;
        self.active_instance.take().is_some()
    }
}
