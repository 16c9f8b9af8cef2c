//! Voice and text commands flowing through the shared dispatcher.

use crate::helpers::{FakeBackend, Harness, MemoryStore, ScriptedEngine, profile, reply};
use parley::classifier::Category;
use parley::config::DispatchConfig;
use parley::{
    ChatHistoryManager, CommandDispatcher, DispatchOutcome, DropReason, Identity, MessageStatus,
    MessageType, ParleyError, SessionState, UserProfile,
};
use std::sync::Arc;

#[tokio::test(start_paused = true)]
async fn wake_word_command_is_classified_and_spoken() {
    let backend = FakeBackend::new();
    backend.push_reply(reply(None, "Opening Chrome."));
    let mut h = Harness::listening("jarvis", backend.clone()).await;

    assert!(h.engine.say("Jarvis open chrome"));
    let outcome = h.next_dispatch().await;
    let message = outcome.message().expect("dispatched");

    assert_eq!(message.user_message, "open chrome");
    assert_eq!(message.message_type, MessageType::Voice);
    assert_eq!(message.status, MessageStatus::Complete);
    assert_eq!(message.response_type, Category::AppControl);
    let classification = message.classification.as_ref().unwrap();
    assert_eq!(classification.action(), Some("open_app"));
    assert_eq!(
        classification.parameters().get("app").map(String::as_str),
        Some("chrome")
    );

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].message, "open chrome");
    assert_eq!(requests[0].assistant_name, "jarvis");
    assert_eq!(requests[0].message_type, MessageType::Voice);

    assert_eq!(h.speech.spoken(), vec!["Opening Chrome.".to_owned()]);
    assert_eq!(h.store.records().len(), 1);
    h.wait_for_state(SessionState::Listening).await;
}

#[tokio::test(start_paused = true)]
async fn speech_without_a_command_is_not_dispatched() {
    let backend = FakeBackend::new();
    let mut h = Harness::listening("jarvis", backend.clone()).await;

    h.engine.say("Jarvis");
    h.engine.say("open chrome");
    h.engine.say("jarvis what time is it");

    let outcome = h.next_dispatch().await;
    assert_eq!(outcome.message().unwrap().user_message, "what time is it");
    assert_eq!(backend.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn backend_category_wins_over_keywords() {
    let backend = FakeBackend::new();
    backend.push_reply(reply(Some(Category::Creative), "Here's a poem."));
    let mut h = Harness::listening("jarvis", backend).await;

    h.engine.say("jarvis open a poem about chrome");
    let outcome = h.next_dispatch().await;
    assert_eq!(outcome.message().unwrap().response_type, Category::Creative);
}

#[tokio::test(start_paused = true)]
async fn commands_heard_while_processing_are_dropped() {
    let (backend, gate) = FakeBackend::gated();
    let mut h = Harness::listening("jarvis", backend.clone()).await;

    h.engine.say("jarvis open chrome");
    h.wait_for_state(SessionState::Processing).await;
    h.engine.say("jarvis open firefox");
    tokio::task::yield_now().await;

    gate.add_permits(1);
    let outcome = h.next_dispatch().await;
    assert_eq!(outcome.message().unwrap().user_message, "open chrome");
    h.wait_for_state(SessionState::Listening).await;
    assert_eq!(backend.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn voice_and_text_never_overlap() {
    let (backend, gate) = FakeBackend::gated();
    let mut h = Harness::listening("jarvis", backend.clone()).await;

    h.engine.say("jarvis open chrome");
    h.wait_for_state(SessionState::Processing).await;
    while h.voice.history().pending().is_none() {
        tokio::task::yield_now().await;
    }

    let typed = h.voice.send_text("hello there").await;
    assert_eq!(typed, DispatchOutcome::Dropped(DropReason::Busy));
    assert_eq!(h.voice.history().len(), 1);

    gate.add_permits(1);
    let spoken = h.next_dispatch().await;
    assert_eq!(spoken.message().unwrap().user_message, "open chrome");
    assert!(h.voice.history().pending().is_none());
    assert_eq!(backend.requests().len(), 1);
}

#[tokio::test]
async fn back_to_back_dispatches_admit_only_one() {
    let backend = FakeBackend::new();
    let history = Arc::new(ChatHistoryManager::new(MemoryStore::new()));
    let dispatcher = CommandDispatcher::new(
        backend.clone(),
        Arc::clone(&history),
        DispatchConfig::default(),
        Identity {
            user_name: "Ada".into(),
            assistant_name: "jarvis".into(),
            token: Some("token-123".into()),
        },
    );

    let (first, second) = tokio::join!(
        dispatcher.dispatch("open chrome", MessageType::Voice),
        dispatcher.dispatch("open firefox", MessageType::Text),
    );

    assert!(matches!(first, DispatchOutcome::Finished(_)));
    assert_eq!(second, DispatchOutcome::Dropped(DropReason::Busy));
    assert_eq!(history.len(), 1);
    assert_eq!(backend.requests().len(), 1);
    assert!(!dispatcher.is_busy());
}

#[tokio::test]
async fn failures_resolve_with_fixed_replies() {
    let backend = FakeBackend::new();
    backend.push_error(ParleyError::Backend("HTTP 500: boom".into()));
    backend.push_error(ParleyError::Network("connection refused".into()));
    let mut h = Harness::build(ScriptedEngine::unavailable(), backend, MemoryStore::new());
    h.voice.sign_in(profile("jarvis")).await;

    let service = h.voice.send_text("open chrome").await;
    let service = service.message().unwrap();
    assert_eq!(service.status, MessageStatus::Errored);
    assert_eq!(
        service.ai_response,
        "Sorry, I encountered an error. Please try again."
    );

    let network = h.voice.send_text("open chrome").await;
    let network = network.message().unwrap();
    assert_eq!(network.status, MessageStatus::Errored);
    assert_eq!(
        network.ai_response,
        "Sorry, I encountered a network error. Please try again."
    );

    // Errored exchanges are still persisted, tagged as errors, but never spoken.
    let records = h.store.records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.response_type.as_deref() == Some("error")));
    assert!(h.speech.spoken().is_empty());
}

#[tokio::test]
async fn typed_replies_are_not_spoken() {
    let backend = FakeBackend::new();
    let mut h = Harness::build(ScriptedEngine::unavailable(), backend, MemoryStore::new());
    h.voice.sign_in(profile("jarvis")).await;

    let outcome = h.voice.send_text("what time is it").await;
    let message = outcome.message().unwrap();
    assert_eq!(message.message_type, MessageType::Text);
    assert_eq!(message.status, MessageStatus::Complete);
    assert!(h.speech.spoken().is_empty());
}

#[tokio::test]
async fn commands_without_a_token_are_dropped() {
    let backend = FakeBackend::new();
    let mut h = Harness::build(ScriptedEngine::unavailable(), backend.clone(), MemoryStore::new());
    h.voice
        .sign_in(UserProfile {
            token: None,
            ..profile("jarvis")
        })
        .await;

    let outcome = h.voice.send_text("open chrome").await;
    assert_eq!(outcome, DispatchOutcome::Dropped(DropReason::Unauthenticated));
    assert!(backend.requests().is_empty());
    assert!(h.voice.history().is_empty());
}

#[tokio::test]
async fn context_carries_the_last_five_exchanges() {
    let backend = FakeBackend::new();
    let mut h = Harness::build(ScriptedEngine::unavailable(), backend.clone(), MemoryStore::new());
    h.voice.sign_in(profile("jarvis")).await;

    for i in 0..7 {
        backend.push_reply(reply(Some(Category::General), &format!("reply {i}")));
        h.voice.send_text(&format!("message {i}")).await;
    }
    h.voice.send_text("one more").await;

    let requests = backend.requests();
    let context = &requests.last().unwrap().context;
    assert_eq!(context.len(), 5);
    assert_eq!(context[0].message, "message 2");
    assert_eq!(context[4].response, "reply 6");
}
