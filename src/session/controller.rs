//! Async driver for [`RecognitionSession`].
//!
//! One task owns the session and reacts, in order, to engine events, restart
//! timers and dispatch completions until it is cancelled. Timers and
//! dispatches run as separate tasks and report back through channels, so the
//! session itself is never shared.

use super::{Effect, RecognitionSession, SessionState, StartPlan};
use crate::dispatch::{CommandDispatcher, DispatchOutcome};
use crate::error::{ParleyError, Result};
use crate::history::MessageType;
use crate::transcript::{
    EngineEvent, EngineOptions, EventSink, TranscriptEvent, TranscriptionEngine, normalize,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Progress reported to observers (UI, CLI).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    State(SessionState),
    Transcript(TranscriptEvent),
    Dispatched(DispatchOutcome),
}

/// Handle to a running session task.
#[derive(Debug)]
pub struct SessionHandle {
    cancel: CancellationToken,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Stop listening. Pending restarts are abandoned.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the session reaches `target`.
    ///
    /// Returns `false` if the session task ended first.
    pub async fn wait_for(&mut self, target: SessionState) -> bool {
        self.state.wait_for(|s| *s == target).await.is_ok()
    }

    /// Stop and wait for the session task to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("session task ended abnormally: {e}");
        }
    }
}

/// Drives one [`RecognitionSession`] against a transcription engine.
pub struct SessionController {
    session: RecognitionSession,
    engine: Arc<dyn TranscriptionEngine>,
    dispatcher: Arc<CommandDispatcher>,
    options: EngineOptions,
    cancel: CancellationToken,
    events_tx: mpsc::UnboundedSender<(u64, EngineEvent)>,
    events_rx: mpsc::UnboundedReceiver<(u64, EngineEvent)>,
    restart_tx: mpsc::UnboundedSender<u64>,
    restart_rx: mpsc::UnboundedReceiver<u64>,
    done_tx: mpsc::UnboundedSender<DispatchOutcome>,
    done_rx: mpsc::UnboundedReceiver<DispatchOutcome>,
    state_tx: watch::Sender<SessionState>,
    updates: Option<mpsc::UnboundedSender<SessionUpdate>>,
}

impl SessionController {
    pub fn new(
        session: RecognitionSession,
        engine: Arc<dyn TranscriptionEngine>,
        dispatcher: Arc<CommandDispatcher>,
        options: EngineOptions,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (restart_tx, restart_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(session.state());
        Self {
            session,
            engine,
            dispatcher,
            options,
            cancel: CancellationToken::new(),
            events_tx,
            events_rx,
            restart_tx,
            restart_rx,
            done_tx,
            done_rx,
            state_tx,
            updates: None,
        }
    }

    /// Report progress on `updates`.
    #[must_use]
    pub fn with_updates(mut self, updates: mpsc::UnboundedSender<SessionUpdate>) -> Self {
        self.updates = Some(updates);
        self
    }

    /// Cancel this session when `parent` is cancelled.
    #[must_use]
    pub fn with_parent_cancel(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    #[must_use]
    pub fn session(&self) -> &RecognitionSession {
        &self.session
    }

    /// Start the session on the current runtime.
    ///
    /// # Errors
    ///
    /// [`ParleyError::Capture`] if the transcription capability is not
    /// available on this platform.
    pub fn spawn(self) -> Result<SessionHandle> {
        if !self.engine.is_available() {
            return Err(ParleyError::Capture(
                "speech transcription is not available".into(),
            ));
        }
        let cancel = self.cancel.clone();
        let state = self.state_tx.subscribe();
        let task = tokio::spawn(self.run());
        Ok(SessionHandle {
            cancel,
            state,
            task,
        })
    }

    /// Run until cancelled or stopped.
    pub async fn run(mut self) {
        match self.session.begin_start() {
            Ok(generation) => {
                self.start_engine(StartPlan {
                    generation,
                    stop_previous: false,
                })
                .await;
            }
            Err(e) => warn!("session not started: {e}"),
        }
        self.publish_state();

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                Some((generation, raw)) = self.events_rx.recv() => {
                    if let Some(event) = normalize(raw) {
                        self.handle_event(generation, event).await;
                    }
                }
                Some(generation) = self.restart_rx.recv() => {
                    self.on_restart_due(generation).await;
                }
                Some(outcome) = self.done_rx.recv() => {
                    self.on_dispatch_finished(outcome).await;
                }
            }
            if self.session.state() == SessionState::Stopped {
                break;
            }
        }

        self.shutdown().await;
    }

    /// Apply one normalized transcript event from engine instance `generation`.
    pub async fn handle_event(&mut self, generation: u64, event: TranscriptEvent) {
        self.notify(SessionUpdate::Transcript(event.clone()));
        let effect = self.session.handle(generation, event);
        self.apply(effect);
        self.publish_state();
    }

    async fn on_restart_due(&mut self, generation: u64) {
        if let Some(plan) = self.session.restart_due(generation) {
            info!("restarting transcription engine");
            self.start_engine(plan).await;
        }
        self.publish_state();
    }

    async fn on_dispatch_finished(&mut self, outcome: DispatchOutcome) {
        self.notify(SessionUpdate::Dispatched(outcome));
        if let Some(plan) = self.session.dispatch_finished() {
            self.start_engine(plan).await;
        }
        self.publish_state();
    }

    async fn start_engine(&mut self, plan: StartPlan) {
        if plan.stop_previous
            && let Err(e) = self.engine.stop().await
        {
            debug!("stopping previous engine instance failed: {e}");
        }

        let sink = EventSink::new(plan.generation, self.events_tx.clone());
        if let Err(e) = self.engine.start(&self.options, sink).await {
            warn!("transcription engine failed to start: {e}");
            let effect = self.session.start_failed(plan.generation);
            self.apply(effect);
        }
    }

    fn apply(&self, effect: Effect) {
        match effect {
            Effect::None => {}
            Effect::Dispatch(command) => {
                info!("dispatching voice command {command:?}");
                let dispatcher = Arc::clone(&self.dispatcher);
                let done = self.done_tx.clone();
                tokio::spawn(async move {
                    let outcome = dispatcher.dispatch(&command, MessageType::Voice).await;
                    let _ = done.send(outcome);
                });
            }
            Effect::ScheduleRestart { generation, delay } => {
                let restart = self.restart_tx.clone();
                let cancel = self.cancel.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        () = cancel.cancelled() => {}
                        () = tokio::time::sleep(delay) => {
                            let _ = restart.send(generation);
                        }
                    }
                });
            }
        }
    }

    async fn shutdown(&mut self) {
        let had_engine = self.session.stop();
        if had_engine && let Err(e) = self.engine.stop().await {
            debug!("engine stop during shutdown failed: {e}");
        }
        self.publish_state();
        info!("recognition session stopped");
    }

    fn publish_state(&self) {
        let state = self.session.state();
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            debug!("session state -> {state:?}");
            self.notify(SessionUpdate::State(state));
        }
    }

    fn notify(&self, update: SessionUpdate) {
        if let Some(updates) = &self.updates {
            let _ = updates.send(update);
        }
    }
}
