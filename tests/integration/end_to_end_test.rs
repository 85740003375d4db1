//! End-to-End Tests
//!
//! Two engines with different context ids over one shared database: a chat
//! turn in the first produces analyses that the second picks up on its own
//! schedule, without a manual refresh.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDate};
use tokio_util::sync::CancellationToken;

use insight_sync::services::analysis::AnalysisOutcome;
use insight_sync::services::cache::CacheSource;
use insight_sync::storage::Database;
use insight_sync::utils::clock::Clock;
use insight_sync::RefreshOptions;
use insight_sync_core::{
    AnalysisResult, EmotionScores, InsightKind, InsightPayload, InvalidationReason, Origin, Scope,
    ScopeFilter,
};

use crate::support::{
    engine, manual_clock, test_config, RecordingObserver, Reply, ScriptedProvider, EMOTION_MARKER,
};

#[tokio::test]
async fn test_chat_turns_flow_into_a_second_context() {
    let db = Database::new_in_memory().unwrap();
    let clock = manual_clock();
    let provider = Arc::new(ScriptedProvider::healthy());
    provider.stream(&["That sounds ", "like a heavy day."], StdDuration::from_millis(1));
    let config = test_config();

    let tab_a = engine(&config, &db, provider.clone(), clock.clone(), "tab-a");
    let tab_b = engine(&config, &db, provider.clone(), clock.clone(), "tab-b");
    let scope = tab_a.scope_for_today(InsightKind::Emotion, "u1").unwrap();
    assert_eq!(scope, tab_b.scope_for_today(InsightKind::Emotion, "u1").unwrap());

    // B looks first and caches the absence.
    let before = tab_b.read_insight(InsightKind::Emotion, &scope);
    assert!(before.payload.is_none());

    let a_events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&a_events);
    let _subscription = tab_a.on_invalidated(ScopeFilter::user("u1"), move |event| {
        sink.lock().unwrap().push(event.reason);
    });

    let first = tab_a
        .stream_chat("u1", "Work has been really stressful lately", Arc::new(RecordingObserver::default()))
        .unwrap();
    let outcomes = first.wait_analysis().await.unwrap();
    assert_eq!(outcomes.len(), 4);

    // The second turn recomputes over the whole day.
    let second = tab_a
        .stream_chat("u1", "I went for a run and it helped a bit", Arc::new(RecordingObserver::default()))
        .unwrap();
    let outcomes = second.wait_analysis().await.unwrap();
    let emotion = outcomes
        .iter()
        .filter_map(AnalysisOutcome::result)
        .find(|r| r.kind() == InsightKind::Emotion)
        .cloned()
        .expect("emotion result");
    assert_eq!(emotion.origin, Origin::Model);
    assert_eq!(emotion.scope, scope);
    assert!(matches!(emotion.payload, InsightPayload::Emotion(_)));

    // The writer sees its own result immediately.
    let own = tab_a.read_insight(InsightKind::Emotion, &scope);
    assert_eq!(own.payload.as_ref(), Some(&emotion));
    assert!(!own.stale);
    assert!(a_events
        .lock()
        .unwrap()
        .iter()
        .all(|reason| *reason == InvalidationReason::Write));

    // B still serves its cached absence until its TTL runs out.
    let cached = tab_b.read_insight(InsightKind::Emotion, &scope);
    assert!(cached.payload.is_none());
    assert_eq!(cached.source, CacheSource::Local);

    clock.advance(Duration::seconds(config.ttl_short_secs as i64));
    let later = tab_b.read_insight(InsightKind::Emotion, &scope);
    assert_eq!(later.payload, Some(emotion));
    assert_eq!(later.source, CacheSource::Durable);
    assert!(!later.stale);
}

#[tokio::test]
async fn test_watcher_delivers_external_writes_between_engines() {
    let db = Database::new_in_memory().unwrap();
    let clock = manual_clock();
    let provider = Arc::new(ScriptedProvider::healthy());
    let mut config = test_config();
    config.watcher_poll_secs = 1;

    let tab_a = engine(&config, &db, provider.clone(), clock.clone(), "tab-a");
    let tab_b = engine(&config, &db, provider.clone(), clock.clone(), "tab-b");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _subscription = tab_b.on_invalidated(ScopeFilter::user("u1"), move |event| {
        sink.lock().unwrap().push((event.reason, event.kind));
    });
    let cancel = CancellationToken::new();
    let watcher = tab_b.start_watcher(cancel.clone()).unwrap();

    for text in ["Today felt long and tiring", "Dinner with friends was lovely"] {
        let turn = tab_a
            .stream_chat("u1", text, Arc::new(RecordingObserver::default()))
            .unwrap();
        turn.wait_analysis().await;
    }

    let deadline = tokio::time::Instant::now() + StdDuration::from_secs(5);
    loop {
        let has_emotion = seen
            .lock()
            .unwrap()
            .iter()
            .any(|(reason, kind)| *reason == InvalidationReason::ExternalWrite && *kind == Some(InsightKind::Emotion));
        if has_emotion || tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(50)).await;
    }
    cancel.cancel();
    watcher.await.unwrap();

    let seen = seen.lock().unwrap();
    assert!(seen
        .iter()
        .any(|(reason, kind)| *reason == InvalidationReason::ExternalWrite && *kind == Some(InsightKind::Emotion)));
    assert!(seen.iter().all(|(reason, _)| *reason == InvalidationReason::ExternalWrite));

    let scope = tab_b.scope_for_today(InsightKind::Emotion, "u1").unwrap();
    let read = tab_b.read_insight(InsightKind::Emotion, &scope);
    assert!(read.payload.is_some());
    assert!(!read.stale);
}

#[tokio::test]
async fn test_forced_refresh_recomputes_and_announces() {
    let db = Database::new_in_memory().unwrap();
    let clock = manual_clock();
    let provider = Arc::new(ScriptedProvider::healthy());
    let engine = engine(&test_config(), &db, provider.clone(), clock.clone(), "tab-a");

    for text in ["Slept badly and felt anxious", "Talking it through helped"] {
        let turn = engine
            .stream_chat("u1", text, Arc::new(RecordingObserver::default()))
            .unwrap();
        turn.wait_analysis().await;
    }
    let scope = engine.scope_for_today(InsightKind::Emotion, "u1").unwrap();
    let calls = provider.calls();

    // Fresh value: a plain refresh does not call the backend.
    let outcome = engine
        .refresh_insight(InsightKind::Emotion, &scope, RefreshOptions::default())
        .await
        .unwrap();
    assert!(outcome.result().is_some());
    assert_eq!(provider.calls(), calls);

    let reasons = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reasons);
    let _subscription = engine.on_invalidated(ScopeFilter::scope(&scope), move |event| {
        sink.lock().unwrap().push(event.reason);
    });

    provider.on(
        EMOTION_MARKER,
        Reply::Text(r#"{"happiness": 30, "energy": 35, "anxiety": 70, "stress": 65}"#.to_string()),
    );
    let outcome = engine
        .refresh_insight(InsightKind::Emotion, &scope, RefreshOptions::forced())
        .await
        .unwrap();
    assert_eq!(provider.calls(), calls + 1);
    let scores = *outcome.result().unwrap().payload.as_emotion().unwrap();
    assert_eq!(scores.fields(), [30, 35, 70, 65]);
    assert_eq!(
        *reasons.lock().unwrap(),
        vec![InvalidationReason::ForceRefresh, InvalidationReason::Write]
    );

    let balance = engine.mood_balance("u1", 7).unwrap();
    assert_eq!(balance.days, 1);
    assert_eq!(balance.negative, 100.0);
}

fn days_considered(outcome: &AnalysisOutcome) -> u32 {
    match outcome.result().map(|r| &r.payload) {
        Some(InsightPayload::Highlights(h)) => h.days_considered,
        other => panic!("expected highlights, got {:?}", other),
    }
}

#[tokio::test]
async fn test_highlights_recompute_on_the_next_day() {
    let db = Database::new_in_memory().unwrap();
    let clock = manual_clock();
    let provider = Arc::new(ScriptedProvider::healthy());
    let engine = engine(&test_config(), &db, provider.clone(), clock.clone(), "tab-a");
    let day0 = NaiveDate::from_ymd_opt(2025, 8, 29).unwrap();

    let scores = EmotionScores::clamped(70.0, 60.0, 20.0, 25.0);
    let first = AnalysisResult::new(
        Scope::for_day("u1", day0).unwrap(),
        InsightPayload::Emotion(scores),
        Origin::Model,
        clock.now(),
    );
    engine.cache().write(&first, None).unwrap();

    let scope = engine.scope_for_today(InsightKind::Highlights, "u1").unwrap();
    let outcome = engine
        .refresh_insight(InsightKind::Highlights, &scope, RefreshOptions::default())
        .await
        .unwrap();
    assert_eq!(days_considered(&outcome), 1);

    // 17:30 local plus twelve hours is the next calendar day
    clock.advance(Duration::hours(12));
    let second = AnalysisResult::new(
        Scope::for_day("u1", day0.succ_opt().unwrap()).unwrap(),
        InsightPayload::Emotion(EmotionScores::clamped(40.0, 35.0, 60.0, 70.0)),
        Origin::Model,
        clock.now(),
    );
    engine.cache().write(&second, None).unwrap();

    let read = engine.read_insight(InsightKind::Highlights, &scope);
    assert!(read.payload.is_some());
    assert!(read.stale);

    let outcome = engine
        .refresh_insight(InsightKind::Highlights, &scope, RefreshOptions::default())
        .await
        .unwrap();
    assert_eq!(days_considered(&outcome), 2);
    assert!(!engine.read_insight(InsightKind::Highlights, &scope).stale);
    assert_eq!(provider.calls(), 0);
}
