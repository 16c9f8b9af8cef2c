//! Restart backoff and lifecycle of a live session on a paused clock.

use crate::helpers::{FakeBackend, Harness, MemoryStore, ScriptedEngine, profile};
use parley::{ParleyConfig, SessionState};
use parley::transcript::EngineEvent;
use std::time::Duration;
use tokio::time::{Instant, sleep};

#[tokio::test(start_paused = true)]
async fn network_error_restarts_after_five_seconds_and_not_before() {
    let mut h = Harness::listening("jarvis", FakeBackend::new()).await;

    let failed_at = Instant::now();
    assert!(h.engine.error("network"));
    assert!(h.engine.emit(EngineEvent::End));
    h.wait_for_state(SessionState::Erroring).await;

    sleep(Duration::from_millis(4_999)).await;
    assert_eq!(h.engine.start_count(), 1, "restarted before the backoff");

    h.engine.wait_for_starts(2).await;
    let starts = h.engine.start_times();
    assert!(starts[1] - failed_at >= Duration::from_millis(5_000));
    h.wait_for_state(SessionState::Listening).await;
}

#[tokio::test(start_paused = true)]
async fn other_errors_restart_after_two_seconds() {
    let mut h = Harness::listening("jarvis", FakeBackend::new()).await;

    let failed_at = Instant::now();
    h.engine.error("no-speech");
    h.engine.emit(EngineEvent::End);

    h.engine.wait_for_starts(2).await;
    let elapsed = h.engine.start_times()[1] - failed_at;
    assert!(elapsed >= Duration::from_millis(2_000));
    assert!(elapsed < Duration::from_millis(5_000));
}

#[tokio::test(start_paused = true)]
async fn natural_end_restarts_after_one_second() {
    let mut h = Harness::listening("jarvis", FakeBackend::new()).await;

    let ended_at = Instant::now();
    h.engine.emit(EngineEvent::End);
    h.wait_for_state(SessionState::Idle).await;

    h.engine.wait_for_starts(2).await;
    let elapsed = h.engine.start_times()[1] - ended_at;
    assert!(elapsed >= Duration::from_millis(1_000));
    assert!(elapsed < Duration::from_millis(2_000));
}

#[tokio::test(start_paused = true)]
async fn aborted_capture_is_never_restarted() {
    let mut h = Harness::listening("jarvis", FakeBackend::new()).await;

    h.engine.error("aborted");
    h.engine.emit(EngineEvent::End);
    h.wait_for_state(SessionState::Erroring).await;

    sleep(Duration::from_secs(60)).await;
    assert_eq!(h.engine.start_count(), 1);
    assert_eq!(h.voice.session_state(), Some(SessionState::Erroring));
}

#[tokio::test(start_paused = true)]
async fn listening_again_after_an_abort_starts_a_fresh_session() {
    let mut h = Harness::listening("jarvis", FakeBackend::new()).await;
    h.engine.error("aborted");
    h.engine.emit(EngineEvent::End);
    h.wait_for_state(SessionState::Erroring).await;

    h.voice.start_listening().await.unwrap();

    h.engine.wait_for_starts(2).await;
    h.wait_for_state(SessionState::Listening).await;
    assert_eq!(h.voice.session_state(), Some(SessionState::Listening));
}

#[tokio::test(start_paused = true)]
async fn listening_again_after_an_unrestarted_end_starts_a_fresh_session() {
    let mut config = ParleyConfig::default();
    config.voice.auto_restart = false;
    let mut h = Harness::build_with(
        config,
        ScriptedEngine::new(),
        FakeBackend::new(),
        MemoryStore::new(),
    );
    h.voice.sign_in(profile("jarvis")).await;
    h.wait_for_state(SessionState::Listening).await;

    h.engine.emit(EngineEvent::End);
    h.wait_for_state(SessionState::Idle).await;
    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.engine.start_count(), 1);

    h.voice.start_listening().await.unwrap();

    h.engine.wait_for_starts(2).await;
    h.wait_for_state(SessionState::Listening).await;
}

#[tokio::test(start_paused = true)]
async fn listening_again_while_capturing_keeps_the_session() {
    let mut h = Harness::listening("jarvis", FakeBackend::new()).await;

    h.voice.start_listening().await.unwrap();

    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.engine.start_count(), 1);
    assert_eq!(h.engine.stop_count(), 0);
    assert_eq!(h.voice.session_state(), Some(SessionState::Listening));
}

#[tokio::test(start_paused = true)]
async fn stopping_abandons_a_scheduled_restart() {
    let mut h = Harness::listening("jarvis", FakeBackend::new()).await;

    h.engine.error("network");
    h.engine.emit(EngineEvent::End);
    h.wait_for_state(SessionState::Erroring).await;
    h.voice.stop_listening().await;

    sleep(Duration::from_secs(30)).await;
    assert_eq!(h.engine.start_count(), 1);
    assert_eq!(h.voice.session_state(), None);
}

#[tokio::test(start_paused = true)]
async fn events_from_a_replaced_instance_are_ignored() {
    let mut h = Harness::listening("jarvis", FakeBackend::new()).await;

    h.engine.emit(EngineEvent::End);
    h.engine.wait_for_starts(2).await;
    h.wait_for_state(SessionState::Listening).await;

    assert!(h.engine.emit_from(0, EngineEvent::End));
    assert!(h.engine.emit_from(0, EngineEvent::Error { code: "network".into() }));
    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.engine.start_count(), 2);
    assert_eq!(h.voice.session_state(), Some(SessionState::Listening));
}

#[tokio::test(start_paused = true)]
async fn stopping_stops_the_engine() {
    let mut h = Harness::listening("jarvis", FakeBackend::new()).await;
    assert_eq!(h.engine.stop_count(), 0);

    h.voice.stop_listening().await;
    assert_eq!(h.engine.stop_count(), 1);
    assert_eq!(h.voice.session_state(), None);
}
