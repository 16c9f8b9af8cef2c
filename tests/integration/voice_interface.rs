//! Sign-in, rename and logout of the voice interface.

use crate::helpers::{FakeBackend, Harness, MemoryStore, ScriptedEngine, profile};
use parley::{DispatchOutcome, DropReason, SessionState, UserProfile};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::test(start_paused = true)]
async fn renaming_restarts_listening_with_the_new_wake_word() {
    let backend = FakeBackend::new();
    let mut h = Harness::listening("jarvis", backend.clone()).await;

    h.voice.rename_assistant("nova").await.unwrap();
    assert_eq!(h.voice.wake_word().as_deref(), Some("nova"));
    h.engine.wait_for_starts(2).await;
    h.wait_for_state(SessionState::Listening).await;

    h.engine.say("jarvis open chrome");
    h.engine.say("nova open chrome");
    let outcome = h.next_dispatch().await;

    assert_eq!(outcome.message().unwrap().user_message, "open chrome");
    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].assistant_name, "nova");
}

#[tokio::test(start_paused = true)]
async fn logout_stops_listening_and_forgets_history() {
    let mut h = Harness::listening("jarvis", FakeBackend::new()).await;
    h.engine.say("jarvis what time is it");
    h.next_dispatch().await;
    assert_eq!(h.voice.history().len(), 1);

    h.voice.logout().await;

    assert_eq!(h.voice.session_state(), None);
    assert!(h.voice.user().is_none());
    assert!(h.voice.history().is_empty());
    assert_eq!(h.engine.stop_count(), 1);
    assert!(h.speech.cancels() >= 1);
    // The durable copy survives logout.
    assert_eq!(h.store.records().len(), 1);

    let outcome = h.voice.send_text("hello").await;
    assert_eq!(outcome, DispatchOutcome::Dropped(DropReason::Unauthenticated));

    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.engine.start_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn signing_in_again_replaces_the_previous_user() {
    let mut h = Harness::listening("jarvis", FakeBackend::new()).await;

    h.voice
        .sign_in(UserProfile {
            name: "Grace".into(),
            ..profile("friday")
        })
        .await;
    h.engine.wait_for_starts(2).await;

    assert_eq!(h.voice.user().unwrap().name, "Grace");
    assert_eq!(h.voice.wake_word().as_deref(), Some("friday"));
    assert_eq!(h.engine.stop_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn blank_assistant_name_falls_back_to_default_wake_word() {
    let backend = FakeBackend::new();
    let mut h = Harness::listening("  ", backend.clone()).await;
    assert_eq!(h.voice.wake_word().as_deref(), Some("assistant"));

    h.engine.say("Assistant what time is it");
    let outcome = h.next_dispatch().await;
    assert_eq!(outcome.message().unwrap().user_message, "what time is it");
}

#[tokio::test]
async fn unavailable_transcription_leaves_text_working() {
    let mut h = Harness::build(
        ScriptedEngine::unavailable(),
        FakeBackend::new(),
        MemoryStore::new(),
    );
    h.voice.sign_in(profile("jarvis")).await;

    assert!(!h.voice.is_voice_available());
    assert_eq!(h.voice.session_state(), None);
    assert!(h.voice.start_listening().await.is_err());

    let outcome = h.voice.send_text("what time is it").await;
    assert!(matches!(outcome, DispatchOutcome::Finished(_)));
}

#[tokio::test]
async fn listening_requires_a_signed_in_user() {
    let mut h = Harness::build(ScriptedEngine::new(), FakeBackend::new(), MemoryStore::new());
    assert!(h.voice.start_listening().await.is_err());
    assert_eq!(h.engine.start_count(), 0);
}
