//! Cache Synchronization Integration Tests
//!
//! Two execution contexts share one in-memory durable tier but keep separate
//! local tiers and buses, the way two open windows would.

use std::sync::{Arc, Mutex};

use chrono::{Duration, NaiveDate};

use insight_sync::models::transcript::Turn;
use insight_sync::services::analysis::{AnalysisSettings, AnalysisTrigger};
use insight_sync::services::cache::{CachePredicate, CacheSource};
use insight_sync::services::sync::DurableWatcher;
use insight_sync::storage::{Database, TranscriptStore};
use insight_sync::utils::clock::Clock;
use insight_sync_core::{
    AnalysisResult, CorrelationId, DayHighlight, EmotionScores, Highlights, InsightKind,
    InsightPayload, InvalidationReason, Origin, PeriodKey, Scope, ScopeFilter,
};

use crate::support::{manual_clock, pipeline, ScriptedProvider};

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 8, 29).unwrap()
}

fn emotion(user: &str, d: NaiveDate, happiness: f64, at: chrono::DateTime<chrono::Utc>) -> AnalysisResult {
    AnalysisResult::new(
        Scope::for_day(user, d).unwrap(),
        InsightPayload::Emotion(EmotionScores::clamped(happiness, 50.0, 20.0, 20.0)),
        Origin::Model,
        at,
    )
}

#[tokio::test]
async fn test_forced_freshness_bypasses_cached_absence() {
    let db = Database::new_in_memory().unwrap();
    let clock = manual_clock();
    let provider = Arc::new(ScriptedProvider::healthy());
    let (a, _) = pipeline(AnalysisSettings::default(), &db, provider.clone(), clock.clone(), "ctx-a");
    let (b, _) = pipeline(AnalysisSettings::default(), &db, provider, clock.clone(), "ctx-b");
    let scope = Scope::for_day("u1", day()).unwrap();

    let first = a.read(InsightKind::Emotion, &scope);
    assert!(first.payload.is_none());
    assert!(first.stale);
    assert_eq!(first.source, CacheSource::Durable);

    let written = emotion("u1", day(), 80.0, clock.now());
    b.write(&written, None).unwrap();

    // Absence is cached within the TTL.
    let cached = a.read(InsightKind::Emotion, &scope);
    assert_eq!(cached.payload, None);
    assert!(cached.stale);
    assert_eq!(cached.source, CacheSource::Local);

    a.set_forced_freshness(&scope, Duration::minutes(5));
    let forced = a.read(InsightKind::Emotion, &scope);
    assert_eq!(forced.payload, Some(written.clone()));
    assert!(!forced.stale);
    assert_eq!(forced.source, CacheSource::Durable);

    // Once the window closes the refreshed local entry is served.
    clock.advance(Duration::minutes(6));
    let after = a.read(InsightKind::Emotion, &scope);
    assert_eq!(after.payload, Some(written));
    assert_eq!(after.source, CacheSource::Local);
}

#[tokio::test]
async fn test_expired_local_entry_is_never_served_fresh() {
    let db = Database::new_in_memory().unwrap();
    let clock = manual_clock();
    let provider = Arc::new(ScriptedProvider::healthy());
    let (a, _) = pipeline(AnalysisSettings::default(), &db, provider.clone(), clock.clone(), "ctx-a");
    let (b, _) = pipeline(AnalysisSettings::default(), &db, provider, clock.clone(), "ctx-b");
    let scope = Scope::for_day("u1", day()).unwrap();

    let mine = emotion("u1", day(), 40.0, clock.now());
    a.write(&mine, None).unwrap();
    let theirs = emotion("u1", day(), 90.0, clock.now());
    b.write(&theirs, None).unwrap();

    clock.advance(Duration::minutes(29));
    let within = a.read(InsightKind::Emotion, &scope);
    assert_eq!(within.payload, Some(mine));
    assert_eq!(within.source, CacheSource::Local);

    clock.advance(Duration::minutes(1));
    let expired = a.read(InsightKind::Emotion, &scope);
    assert_eq!(expired.payload, Some(theirs));
    assert_eq!(expired.source, CacheSource::Durable);
    assert!(!expired.stale);
}

#[tokio::test]
async fn test_highlights_expire_at_calendar_rollover() {
    let db = Database::new_in_memory().unwrap();
    let clock = manual_clock();
    let (cache, _) = pipeline(
        AnalysisSettings::default(),
        &db,
        Arc::new(ScriptedProvider::healthy()),
        clock.clone(),
        "ctx-a",
    );
    let scope = Scope::new("u1", PeriodKey::named("3months").unwrap()).unwrap();
    let scores = EmotionScores::clamped(80.0, 70.0, 20.0, 20.0);
    let highlight = DayHighlight {
        day: day(),
        score: 75,
        scores,
    };
    let result = AnalysisResult::new(
        scope.clone(),
        InsightPayload::Highlights(Highlights {
            best_day: highlight.clone(),
            toughest_day: highlight,
            days_considered: 1,
        }),
        Origin::Model,
        clock.now(),
    );
    cache.write(&result, None).unwrap();

    // 12:00 UTC is 17:30 at +05:30; five hours later is still the same day.
    clock.advance(Duration::hours(5));
    assert_eq!(cache.read(InsightKind::Highlights, &scope).source, CacheSource::Local);

    // Two more hours crosses local midnight, well inside the 24 h TTL.
    clock.advance(Duration::hours(2));
    let rolled = cache.read(InsightKind::Highlights, &scope);
    assert_eq!(rolled.source, CacheSource::Durable);
    assert_eq!(rolled.payload, Some(result));
    assert!(rolled.stale);
}

#[tokio::test]
async fn test_invalidate_removes_only_matching_entries() {
    let db = Database::new_in_memory().unwrap();
    let clock = manual_clock();
    let (cache, _) = pipeline(
        AnalysisSettings::default(),
        &db,
        Arc::new(ScriptedProvider::healthy()),
        clock.clone(),
        "ctx-a",
    );
    let yesterday = day().pred_opt().unwrap();

    cache.write(&emotion("u1", day(), 60.0, clock.now()), None).unwrap();
    cache.write(&emotion("u1", yesterday, 65.0, clock.now()), None).unwrap();
    cache.write(&emotion("u2", day(), 70.0, clock.now()), None).unwrap();
    let other_kind = AnalysisResult::new(
        Scope::for_day("u1", day()).unwrap(),
        InsightPayload::Reflection(insight_sync::services::analysis::parser::reflection_entry(
            "A calm day with a long walk.",
        )),
        Origin::Model,
        clock.now(),
    );
    cache.write(&other_kind, None).unwrap();
    assert_eq!(cache.local_len(), 4);

    let removed = cache.invalidate(&CachePredicate::user("u1").with_kind(InsightKind::Emotion));
    assert_eq!(removed, 2);
    assert_eq!(cache.local_len(), 2);

    let untouched = cache.read(InsightKind::Reflection, &Scope::for_day("u1", day()).unwrap());
    assert_eq!(untouched.source, CacheSource::Local);
    let untouched = cache.read(InsightKind::Emotion, &Scope::for_day("u2", day()).unwrap());
    assert_eq!(untouched.source, CacheSource::Local);

    // The durable tier is not touched.
    let refetched = cache.read(InsightKind::Emotion, &Scope::for_day("u1", yesterday).unwrap());
    assert_eq!(refetched.source, CacheSource::Durable);
    assert!(refetched.payload.is_some());
}

#[tokio::test]
async fn test_watcher_turns_foreign_writes_into_events() {
    let db = Database::new_in_memory().unwrap();
    let clock = manual_clock();
    for text in ["My deadline at work is crushing me", "I went for a run after"] {
        db.append("u1", day(), &Turn::user(text, clock.now())).unwrap();
    }
    let provider = Arc::new(ScriptedProvider::healthy());
    let (a, _) = pipeline(AnalysisSettings::default(), &db, provider.clone(), clock.clone(), "ctx-a");
    let (b, b_orchestrator) = pipeline(AnalysisSettings::default(), &db, provider, clock.clone(), "ctx-b");
    let scope = Scope::for_day("u1", day()).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let _subscription = a.bus().subscribe(ScopeFilter::scope(&scope), move |event| {
        sink.lock().unwrap().push(event.clone());
    });

    assert!(a.read(InsightKind::Emotion, &scope).payload.is_none());
    let watcher_a = DurableWatcher::new(Arc::clone(&a)).unwrap();
    let watcher_b = DurableWatcher::new(Arc::clone(&b)).unwrap();

    let request = b_orchestrator
        .request_for(InsightKind::Emotion, "u1", day(), AnalysisTrigger::TurnCompleted, CorrelationId::new())
        .unwrap();
    let produced = b_orchestrator.run(request).await;
    let produced = produced.result().cloned().unwrap();

    // Writers ignore their own rows.
    assert_eq!(watcher_b.poll_once().unwrap(), 0);
    assert!(!a.forced_freshness_active("u1"));

    assert_eq!(watcher_a.poll_once().unwrap(), 1);
    assert_eq!(watcher_a.poll_once().unwrap(), 0);

    {
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, InvalidationReason::ExternalWrite);
        assert_eq!(events[0].kind, Some(InsightKind::Emotion));
        assert!(events[0].payload.is_none());
    }

    assert!(a.forced_freshness_active("u1"));
    let read = a.read(InsightKind::Emotion, &scope);
    assert_eq!(read.payload, Some(produced));
    assert_eq!(read.source, CacheSource::Durable);
}
