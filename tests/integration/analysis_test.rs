//! Analysis Orchestrator Integration Tests
//!
//! Jobs run against the scripted backend and a real in-memory durable tier:
//! - Minimum-input guards short-circuit before any backend call
//! - Malformed output, network failures and timeouts degrade to fallbacks
//! - Fallbacks never replace stored model results
//! - Per-job cancellation, overlap accounting and correlation propagation
//! - Highlights computed from stored emotion results

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};

use insight_sync::models::settings::AppConfig;
use insight_sync::models::transcript::Turn;
use insight_sync::services::analysis::{
    AnalysisOrchestrator, AnalysisOutcome, AnalysisSettings, AnalysisTrigger,
};
use insight_sync::services::cache::{
    CacheManager, CachePolicy, DurableChange, DurableRecord, DurableStore, WriteMarker,
};
use insight_sync::services::sync::InvalidationBus;
use insight_sync::storage::{Database, LocalCache, TranscriptStore};
use insight_sync::utils::clock::{Clock, DayCalendar};
use insight_sync::{AppError, AppResult};
use insight_sync_core::{
    AnalysisResult, CorrelationId, EmotionScores, InsightKind, InsightPayload, InvalidationReason,
    Origin, Scope, ScopeFilter,
};
use insight_sync_llm::LlmError;

use crate::support::{
    manual_clock, pipeline, Reply, ScriptedProvider, EMOTION_MARKER, REFLECTION_MARKER,
};

// ============================================================================
// Helpers
// ============================================================================

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 8, 29).unwrap()
}

fn seed_turns(db: &Database, user: &str, day: NaiveDate, texts: &[&str]) {
    let clock = manual_clock();
    for (i, text) in texts.iter().enumerate() {
        let turn = if i % 2 == 0 {
            Turn::user(*text, clock.now())
        } else {
            Turn::assistant(*text, None, clock.now())
        };
        db.append(user, day, &turn).unwrap();
    }
}

fn seed_conversation(db: &Database) {
    seed_turns(
        db,
        "u1",
        day(),
        &[
            "My deadline at work is crushing me",
            "That sounds like a lot of pressure",
            "I went for a run and felt better",
        ],
    );
}

fn fast_settings() -> AnalysisSettings {
    AnalysisSettings {
        emotion_timeout: Duration::from_millis(100),
        reflection_timeout: Duration::from_millis(100),
        pattern_timeout: Duration::from_millis(100),
        habit_timeout: Duration::from_millis(100),
        ..AnalysisSettings::default()
    }
}

fn ready(outcome: &AnalysisOutcome) -> &AnalysisResult {
    outcome.result().expect("expected a ready outcome")
}

// ============================================================================
// Guards
// ============================================================================

#[tokio::test]
async fn test_below_guard_never_calls_backend() {
    let db = Database::new_in_memory().unwrap();
    seed_turns(&db, "u1", day(), &["hi", "Hello! How are you?"]);
    let provider = Arc::new(ScriptedProvider::healthy());
    let (_cache, orchestrator) = pipeline(fast_settings(), &db, provider.clone(), manual_clock(), "ctx-a");

    let request = orchestrator
        .request_for(InsightKind::Emotion, "u1", day(), AnalysisTrigger::TurnCompleted, CorrelationId::new())
        .unwrap();
    let outcome = orchestrator.run(request).await;

    match outcome {
        AnalysisOutcome::InsufficientInput(insufficient) => {
            assert_eq!(insufficient.kind, InsightKind::Emotion);
            assert_eq!(insufficient.required, 2);
            assert_eq!(insufficient.available, 1);
        }
        other => panic!("expected insufficient input, got {:?}", other),
    }
    assert_eq!(provider.calls(), 0);
    assert_eq!(orchestrator.stats().insufficient, 1);
}

// ============================================================================
// Degradation paths
// ============================================================================

#[tokio::test]
async fn test_run_all_partial_success_with_mixed_failures() {
    let db = Database::new_in_memory().unwrap();
    seed_conversation(&db);
    let provider = Arc::new(ScriptedProvider::healthy());
    provider.on(EMOTION_MARKER, Reply::Text("I'd rather not give numbers today.".to_string()));
    provider.on(
        REFLECTION_MARKER,
        Reply::Fail(LlmError::NetworkError {
            message: "connection reset".to_string(),
        }),
    );
    let (cache, orchestrator) = pipeline(fast_settings(), &db, provider.clone(), manual_clock(), "ctx-a");

    let outcomes = orchestrator
        .run_all("u1", day(), AnalysisTrigger::ManualRefresh, CorrelationId::new())
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 4);
    assert_eq!(provider.calls(), 4);

    let by_kind = |kind: InsightKind| {
        outcomes
            .iter()
            .filter_map(AnalysisOutcome::result)
            .find(|r| r.kind() == kind)
            .cloned()
            .expect("every kind should produce a result")
    };

    let emotion = by_kind(InsightKind::Emotion);
    assert_eq!(emotion.origin, Origin::Fallback);
    assert_eq!(emotion.payload, InsightPayload::Emotion(EmotionScores::neutral()));

    let reflection = by_kind(InsightKind::Reflection);
    assert_eq!(reflection.origin, Origin::Fallback);
    match &reflection.payload {
        InsightPayload::Reflection(entry) => {
            assert!(entry.summary.contains("My deadline at work is crushing me"));
        }
        other => panic!("unexpected payload {:?}", other),
    }

    assert_eq!(by_kind(InsightKind::PatternSet).origin, Origin::Model);
    assert_eq!(by_kind(InsightKind::HabitSet).origin, Origin::Model);

    // Every result reached the durable tier before run_all resolved.
    let scope = Scope::for_day("u1", day()).unwrap();
    let stored = cache.durable().get(InsightKind::Emotion, &scope).unwrap().unwrap();
    assert_eq!(stored.result, emotion);

    let stats = orchestrator.stats();
    assert_eq!(stats.fallbacks, 2);
    assert_eq!(stats.model_results, 2);
}

#[tokio::test]
async fn test_scalar_extraction_is_a_model_result() {
    let db = Database::new_in_memory().unwrap();
    seed_conversation(&db);
    let provider = Arc::new(ScriptedProvider::healthy());
    provider.on(
        EMOTION_MARKER,
        Reply::Text("happiness: 0, energy: 140,\n anxiety = 35 and stress: 41".to_string()),
    );
    let (_cache, orchestrator) = pipeline(fast_settings(), &db, provider, manual_clock(), "ctx-a");

    let request = orchestrator
        .request_for(InsightKind::Emotion, "u1", day(), AnalysisTrigger::StaleRead, CorrelationId::new())
        .unwrap();
    let outcome = orchestrator.run(request).await;
    let result = ready(&outcome);
    assert_eq!(result.origin, Origin::Model);
    let scores = result.payload.as_emotion().unwrap();
    assert_eq!(scores.fields(), [1, 100, 35, 41]);
}

#[tokio::test]
async fn test_backend_timeout_degrades_to_fallback() {
    let db = Database::new_in_memory().unwrap();
    seed_conversation(&db);
    let provider = Arc::new(ScriptedProvider::healthy());
    provider.on(EMOTION_MARKER, Reply::Hang);
    let (_cache, orchestrator) = pipeline(fast_settings(), &db, provider, manual_clock(), "ctx-a");

    let request = orchestrator
        .request_for(InsightKind::Emotion, "u1", day(), AnalysisTrigger::TurnCompleted, CorrelationId::new())
        .unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(5), orchestrator.run(request))
        .await
        .expect("job timeout should resolve the job");
    let result = ready(&outcome);
    assert_eq!(result.origin, Origin::Fallback);
    assert!(result.payload.as_emotion().unwrap().fields().iter().all(|v| *v >= 1));
}

#[tokio::test]
async fn test_fallback_does_not_replace_stored_model_result() {
    let db = Database::new_in_memory().unwrap();
    seed_conversation(&db);
    let provider = Arc::new(ScriptedProvider::healthy());
    let (cache, orchestrator) = pipeline(fast_settings(), &db, provider.clone(), manual_clock(), "ctx-a");

    let request = |trigger| {
        orchestrator
            .request_for(InsightKind::Emotion, "u1", day(), trigger, CorrelationId::new())
            .unwrap()
    };
    let first = orchestrator.run(request(AnalysisTrigger::TurnCompleted)).await;
    assert_eq!(ready(&first).origin, Origin::Model);

    provider.on(
        EMOTION_MARKER,
        Reply::Fail(LlmError::Timeout { seconds: 30 }),
    );
    let second = orchestrator.run(request(AnalysisTrigger::ManualRefresh)).await;
    assert_eq!(ready(&second).origin, Origin::Model);
    assert_eq!(ready(&second), ready(&first));

    let scope = Scope::for_day("u1", day()).unwrap();
    let stored = cache.durable().get(InsightKind::Emotion, &scope).unwrap().unwrap();
    assert_eq!(stored.result.origin, Origin::Model);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_cancelling_one_job_leaves_siblings_running() {
    let db = Database::new_in_memory().unwrap();
    seed_conversation(&db);
    let provider = Arc::new(ScriptedProvider::healthy());
    provider.on(EMOTION_MARKER, Reply::Hang);
    let settings = AnalysisSettings {
        emotion_timeout: Duration::from_secs(30),
        ..fast_settings()
    };
    let (cache, orchestrator) = pipeline(settings, &db, provider, manual_clock(), "ctx-a");

    let correlation = CorrelationId::new();
    let emotion = orchestrator.spawn(
        orchestrator
            .request_for(InsightKind::Emotion, "u1", day(), AnalysisTrigger::TurnCompleted, correlation)
            .unwrap(),
    );
    let reflection = orchestrator.spawn(
        orchestrator
            .request_for(InsightKind::Reflection, "u1", day(), AnalysisTrigger::TurnCompleted, correlation)
            .unwrap(),
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    emotion.cancel();

    assert!(matches!(emotion.join().await, AnalysisOutcome::Cancelled { kind: InsightKind::Emotion, .. }));
    let reflection = reflection.join().await;
    assert_eq!(ready(&reflection).origin, Origin::Model);

    let scope = Scope::for_day("u1", day()).unwrap();
    assert!(cache.durable().get(InsightKind::Emotion, &scope).unwrap().is_none());
    assert_eq!(orchestrator.stats().cancelled, 1);
}

#[tokio::test]
async fn test_overlapping_jobs_are_counted_and_last_write_wins() {
    let db = Database::new_in_memory().unwrap();
    seed_conversation(&db);
    let provider = Arc::new(ScriptedProvider::healthy());
    provider.set_delay(Duration::from_millis(30));
    let (cache, orchestrator) = pipeline(fast_settings(), &db, provider, manual_clock(), "ctx-a");

    let spawn = || {
        orchestrator.spawn(
            orchestrator
                .request_for(InsightKind::Emotion, "u1", day(), AnalysisTrigger::TurnCompleted, CorrelationId::new())
                .unwrap(),
        )
    };
    let a = spawn();
    let b = spawn();
    let (a, b) = (a.join().await, b.join().await);
    assert!(a.result().is_some() && b.result().is_some());
    assert_eq!(orchestrator.stats().overlapping_jobs, 1);

    let scope = Scope::for_day("u1", day()).unwrap();
    let stored = cache.durable().get(InsightKind::Emotion, &scope).unwrap().unwrap();
    assert_eq!(stored.revision, 2);
}

#[tokio::test]
async fn test_write_events_carry_payload_and_correlation() {
    let db = Database::new_in_memory().unwrap();
    seed_conversation(&db);
    let provider = Arc::new(ScriptedProvider::healthy());
    let (cache, orchestrator) = pipeline(fast_settings(), &db, provider, manual_clock(), "ctx-a");

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let _subscription = cache.bus().subscribe(ScopeFilter::user("u1"), move |event| {
        sink.lock().unwrap().push(event.clone());
    });

    let correlation = CorrelationId::new();
    orchestrator
        .run_all("u1", day(), AnalysisTrigger::TurnCompleted, correlation)
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 4);
    for event in events.iter() {
        assert_eq!(event.reason, InvalidationReason::Write);
        assert_eq!(event.correlation, Some(correlation));
        assert!(event.payload.is_some());
    }
}

// ============================================================================
// Highlights
// ============================================================================

#[tokio::test]
async fn test_highlights_from_stored_emotions() {
    let db = Database::new_in_memory().unwrap();
    let clock = manual_clock();
    let provider = Arc::new(ScriptedProvider::healthy());
    let (cache, orchestrator) = pipeline(fast_settings(), &db, provider.clone(), clock.clone(), "ctx-a");

    let seed = |offset: i64, scores: EmotionScores, origin: Origin| {
        let d = day() - chrono::Duration::days(offset);
        let result = AnalysisResult::new(
            Scope::for_day("u1", d).unwrap(),
            InsightPayload::Emotion(scores),
            origin,
            clock.now(),
        );
        cache.write(&result, None).unwrap();
    };
    seed(0, EmotionScores::clamped(60.0, 60.0, 30.0, 30.0), Origin::Model);
    seed(3, EmotionScores::clamped(90.0, 80.0, 10.0, 10.0), Origin::Model);
    seed(5, EmotionScores::clamped(20.0, 30.0, 85.0, 90.0), Origin::Model);
    // Fallback days never count.
    seed(7, EmotionScores::clamped(100.0, 100.0, 1.0, 1.0), Origin::Fallback);

    let request = orchestrator
        .request_for(InsightKind::Highlights, "u1", day(), AnalysisTrigger::StaleRead, CorrelationId::new())
        .unwrap();
    assert_eq!(request.scope.period.as_str(), "3months");
    let outcome = orchestrator.run(request).await;

    match &ready(&outcome).payload {
        InsightPayload::Highlights(h) => {
            assert_eq!(h.best_day.day, day() - chrono::Duration::days(3));
            assert_eq!(h.toughest_day.day, day() - chrono::Duration::days(5));
            assert_eq!(h.days_considered, 3);
        }
        other => panic!("unexpected payload {:?}", other),
    }
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_highlights_without_model_data_is_insufficient() {
    let db = Database::new_in_memory().unwrap();
    let (_cache, orchestrator) = pipeline(
        fast_settings(),
        &db,
        Arc::new(ScriptedProvider::healthy()),
        manual_clock(),
        "ctx-a",
    );
    let request = orchestrator
        .request_for(InsightKind::Highlights, "u1", day(), AnalysisTrigger::StaleRead, CorrelationId::new())
        .unwrap();
    assert!(orchestrator.run(request).await.is_insufficient());
}

// ============================================================================
// Durable write failures
// ============================================================================

/// Reads go to the database; every write is refused.
struct ReadOnlyStore(Database);

impl DurableStore for ReadOnlyStore {
    fn get(&self, kind: InsightKind, scope: &Scope) -> AppResult<Option<DurableRecord>> {
        self.0.get(kind, scope)
    }
    fn put(&self, _: &AnalysisResult, _: &str) -> AppResult<i64> {
        Err(AppError::database("disk full"))
    }
    fn list_days(&self, user_id: &str, kind: InsightKind, from: NaiveDate, to: NaiveDate) -> AppResult<Vec<AnalysisResult>> {
        self.0.list_days(user_id, kind, from, to)
    }
    fn latest_revision(&self) -> AppResult<i64> {
        self.0.latest_revision()
    }
    fn changes_since(&self, revision: i64, exclude_writer: &str) -> AppResult<Vec<DurableChange>> {
        self.0.changes_since(revision, exclude_writer)
    }
    fn record_write_marker(&self, _: &str, _: DateTime<Utc>, _: &str) -> AppResult<()> {
        Err(AppError::database("disk full"))
    }
    fn write_marker(&self, user_id: &str) -> AppResult<Option<WriteMarker>> {
        self.0.write_marker(user_id)
    }
}

#[tokio::test]
async fn test_failed_durable_write_is_reported() {
    let db = Database::new_in_memory().unwrap();
    seed_conversation(&db);
    let clock = manual_clock();
    let config = AppConfig::default();
    let cache = Arc::new(CacheManager::new(
        Arc::new(ReadOnlyStore(db.clone())),
        LocalCache::new(),
        InvalidationBus::new(),
        clock,
        CachePolicy::from_config(&config).unwrap(),
        "ctx-a",
    ));
    let orchestrator = AnalysisOrchestrator::new(
        Arc::new(ScriptedProvider::healthy()),
        Arc::clone(&cache),
        Arc::new(db.clone()),
        fast_settings(),
        DayCalendar::new(config.day_offset_minutes).unwrap(),
    );

    let request = orchestrator
        .request_for(InsightKind::Emotion, "u1", day(), AnalysisTrigger::TurnCompleted, CorrelationId::new())
        .unwrap();
    let outcome = orchestrator.run(request).await;

    assert!(!outcome.is_persisted());
    match &outcome {
        AnalysisOutcome::Unpersisted { result, error } => {
            assert_eq!(result.origin, Origin::Model);
            assert!(error.contains("disk full"));
        }
        other => panic!("expected an unpersisted outcome, got {:?}", other),
    }
    assert!(!cache.forced_freshness_active("u1"));
    assert_eq!(cache.local_len(), 0);
}
