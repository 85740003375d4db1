//! Chat Streaming Integration Tests
//!
//! Chat turns through the engine: paced reveal, transcript persistence,
//! history window, busy rejection, upstream failures and the safety valve.

use std::sync::Arc;
use std::time::Duration;

use insight_sync::models::transcript::TurnRole;
use insight_sync::services::streaming::{StreamAbort, StreamState};
use insight_sync::storage::{Database, TranscriptStore};
use insight_sync::AppError;
use insight_sync_llm::{LlmError, MessageRole};

use crate::support::{engine, manual_clock, test_config, RecordingObserver, ScriptedProvider};

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_chat_turn_reveals_in_order_and_persists_both_turns() {
    let db = Database::new_in_memory().unwrap();
    let provider = Arc::new(ScriptedProvider::healthy());
    provider.stream(&["I hear ", "you. ", "Tell me more?"], Duration::from_millis(2));
    let clock = manual_clock();
    let engine = engine(&test_config(), &db, provider.clone(), clock, "ctx-a");

    let observer = Arc::new(RecordingObserver::default());
    let turn = engine
        .stream_chat("u1", "Work was overwhelming today", observer.clone())
        .unwrap();
    assert!(engine.chat().is_busy());

    assert_eq!(turn.wait().await, StreamState::Complete);
    assert_eq!(observer.revealed(), "I hear you. Tell me more?");
    assert_eq!(
        *observer.completions.lock().unwrap(),
        vec!["I hear you. Tell me more?".to_string()]
    );
    assert!(observer
        .fragments
        .lock()
        .unwrap()
        .iter()
        .all(|f| f.chars().count() <= 4));
    assert!(!engine.chat().is_busy());

    let turns = db.list("u1", turn.day).unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, TurnRole::User);
    assert_eq!(turns[0].text, "Work was overwhelming today");
    assert_eq!(turns[1].role, TurnRole::Assistant);
    assert_eq!(turns[1].text, "I hear you. Tell me more?");
    assert_eq!(turns[1].model.as_deref(), Some("scripted"));
}

#[tokio::test]
async fn test_history_is_limited_to_recent_turns() {
    let db = Database::new_in_memory().unwrap();
    let provider = Arc::new(ScriptedProvider::healthy());
    let mut config = test_config();
    config.chat_history_turns = 3;
    let engine = engine(&config, &db, provider.clone(), manual_clock(), "ctx-a");

    for message in ["first message here", "second message here", "third message here"] {
        let turn = engine
            .stream_chat("u1", message, Arc::new(RecordingObserver::default()))
            .unwrap();
        turn.wait().await;
    }

    let sent = provider.last_stream_messages();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[2].role, MessageRole::User);
    assert_eq!(sent[2].content, "third message here");
    assert_eq!(provider.stream_calls(), 3);
}

// ============================================================================
// Busy flag
// ============================================================================

#[tokio::test]
async fn test_second_turn_while_busy_is_rejected() {
    let db = Database::new_in_memory().unwrap();
    let provider = Arc::new(ScriptedProvider::healthy());
    provider.stream(&["slow ", "reply"], Duration::from_millis(30));
    let engine = engine(&test_config(), &db, provider, manual_clock(), "ctx-a");

    let first = engine
        .stream_chat("u1", "first question please", Arc::new(RecordingObserver::default()))
        .unwrap();
    let second = engine.stream_chat("u1", "second question", Arc::new(RecordingObserver::default()));
    assert!(matches!(second, Err(AppError::Busy(_))));

    first.wait().await;
    assert!(engine
        .stream_chat("u1", "now it works", Arc::new(RecordingObserver::default()))
        .is_ok());
}

#[tokio::test]
async fn test_empty_message_is_rejected_without_taking_busy() {
    let db = Database::new_in_memory().unwrap();
    let engine = engine(
        &test_config(),
        &db,
        Arc::new(ScriptedProvider::healthy()),
        manual_clock(),
        "ctx-a",
    );
    let result = engine.stream_chat("u1", "   ", Arc::new(RecordingObserver::default()));
    assert!(matches!(result, Err(AppError::Validation(_))));
    assert!(!engine.chat().is_busy());
}

// ============================================================================
// Failures and aborts
// ============================================================================

#[tokio::test]
async fn test_upstream_failure_before_text_is_terminal_error() {
    let db = Database::new_in_memory().unwrap();
    let provider = Arc::new(ScriptedProvider::healthy());
    provider.stream(&[], Duration::ZERO);
    provider.stream_fails_with(LlmError::ProviderUnavailable {
        message: "connection refused".to_string(),
    });
    let engine = engine(&test_config(), &db, provider.clone(), manual_clock(), "ctx-a");

    let observer = Arc::new(RecordingObserver::default());
    let turn = engine
        .stream_chat("u1", "are you there today", observer.clone())
        .unwrap();

    assert!(matches!(turn.wait().await, StreamState::Failed(_)));
    assert!(observer.completions.lock().unwrap().is_empty());
    assert_eq!(observer.errors.lock().unwrap().len(), 1);
    assert!(!engine.chat().is_busy());
    assert!(turn.wait_analysis().await.is_none());
    // Only the user turn was stored.
    assert_eq!(db.list("u1", turn.day).unwrap().len(), 1);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_cancel_turn_clears_busy_once() {
    let db = Database::new_in_memory().unwrap();
    let provider = Arc::new(ScriptedProvider::healthy());
    provider.stream(&["partial"], Duration::ZERO);
    provider.stream_hangs();
    let engine = engine(&test_config(), &db, provider, manual_clock(), "ctx-a");

    let observer = Arc::new(RecordingObserver::default());
    let turn = engine
        .stream_chat("u1", "tell me something", observer.clone())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    turn.cancel();
    turn.cancel();

    assert_eq!(turn.wait().await, StreamState::Aborted(StreamAbort::Cancelled));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(*observer.aborts.lock().unwrap(), vec![StreamAbort::Cancelled]);
    assert!(observer.completions.lock().unwrap().is_empty());
    assert!(!engine.chat().is_busy());
}

#[tokio::test]
async fn test_safety_valve_aborts_hung_turn() {
    let db = Database::new_in_memory().unwrap();
    let provider = Arc::new(ScriptedProvider::healthy());
    provider.stream(&[], Duration::ZERO);
    provider.stream_hangs();
    let mut config = test_config();
    config.busy_ceiling_secs = 1;
    let engine = engine(&config, &db, provider, manual_clock(), "ctx-a");

    let observer = Arc::new(RecordingObserver::default());
    let turn = engine
        .stream_chat("u1", "hello are you there", observer.clone())
        .unwrap();

    let state = tokio::time::timeout(Duration::from_secs(5), turn.wait())
        .await
        .expect("safety valve should fire");
    assert_eq!(state, StreamState::Aborted(StreamAbort::SafetyValve));
    assert_eq!(*observer.aborts.lock().unwrap(), vec![StreamAbort::SafetyValve]);
    assert!(!engine.chat().is_busy());
}
