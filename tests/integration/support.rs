//! Shared fixtures: a scripted generation backend, a manual clock and
//! engine builders over a shared in-memory database.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc;

use insight_sync::models::settings::AppConfig;
use insight_sync::services::analysis::{AnalysisOrchestrator, AnalysisSettings};
use insight_sync::services::cache::{CacheManager, CachePolicy};
use insight_sync::services::streaming::{StreamAbort, StreamObserver};
use insight_sync::services::sync::InvalidationBus;
use insight_sync::storage::{Database, LocalCache};
use insight_sync::utils::clock::{DayCalendar, ManualClock};
use insight_sync::InsightEngine;
use insight_sync_core::UnifiedStreamEvent;
use insight_sync_llm::{
    LlmError, LlmProvider, LlmRequestOptions, LlmResponse, LlmResult, Message, ProviderConfig,
    StopReason, UsageStats,
};

pub const EMOTION_MARKER: &str = "emotion analyzer";
pub const REFLECTION_MARKER: &str = "journal reflection";
pub const PATTERN_MARKER: &str = "emotional patterns";
pub const HABIT_MARKER: &str = "suggest up to 3";

pub const EMOTION_JSON: &str = r#"Sure! {"happiness": 72, "energy": 64, "anxiety": 18, "stress": 22}"#;
pub const PATTERN_JSON: &str = r#"{"triggers": {"stress": ["deadlines"], "joy": ["running"], "distraction": ["phone"]},
 "insights": {"primaryStressSource": "work", "mainJoySource": "exercise", "behavioralPattern": "evening slumps"},
 "recommendations": ["take breaks"]}"#;
pub const HABIT_JSON: &str = r#"{"habits": [{"title": "Evening walk", "description": "Walk after dinner",
 "why": "Helps unwind", "frequency": "Daily", "category": "self_care"}],
 "patterns": {"topStruggles": ["deadlines"], "emotionalTriggers": ["email"], "positiveBehaviors": ["running"]},
 "insights": {"mainChallenge": "work pressure", "emotionalCycle": "tense mornings", "keyOpportunity": "rest"}}"#;
pub const REFLECTION_TEXT: &str =
    "Today I talked through a stressful deadline and felt calmer afterwards. A run helped a lot.";

/// Scripted backend reply.
#[derive(Clone)]
pub enum Reply {
    Text(String),
    Fail(LlmError),
    /// Never answers
    Hang,
}

pub struct ScriptedProvider {
    config: ProviderConfig,
    rules: Mutex<Vec<(String, Reply)>>,
    fallback: Mutex<Reply>,
    delay: Mutex<Duration>,
    fragments: Mutex<Vec<String>>,
    fragment_gap: Mutex<Duration>,
    stream_error: Mutex<Option<LlmError>>,
    stream_hang: Mutex<bool>,
    calls: AtomicUsize,
    stream_calls: AtomicUsize,
    stream_messages: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            config: ProviderConfig::default(),
            rules: Mutex::new(Vec::new()),
            fallback: Mutex::new(Reply::Text(String::new())),
            delay: Mutex::new(Duration::ZERO),
            fragments: Mutex::new(vec!["Hello".to_string(), " there".to_string()]),
            fragment_gap: Mutex::new(Duration::ZERO),
            stream_error: Mutex::new(None),
            stream_hang: Mutex::new(false),
            calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            stream_messages: Mutex::new(Vec::new()),
        }
    }

    /// Well-formed answers for every analysis kind.
    pub fn healthy() -> Self {
        let provider = Self::new();
        provider.on(EMOTION_MARKER, Reply::Text(EMOTION_JSON.to_string()));
        provider.on(REFLECTION_MARKER, Reply::Text(REFLECTION_TEXT.to_string()));
        provider.on(PATTERN_MARKER, Reply::Text(PATTERN_JSON.to_string()));
        provider.on(HABIT_MARKER, Reply::Text(HABIT_JSON.to_string()));
        provider
    }

    /// Answer prompts containing `marker` with `reply`. Later rules win.
    pub fn on(&self, marker: &str, reply: Reply) {
        self.rules.lock().unwrap().insert(0, (marker.to_string(), reply));
    }

    pub fn otherwise(&self, reply: Reply) {
        *self.fallback.lock().unwrap() = reply;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn stream(&self, fragments: &[&str], gap: Duration) {
        *self.fragments.lock().unwrap() = fragments.iter().map(|f| f.to_string()).collect();
        *self.fragment_gap.lock().unwrap() = gap;
    }

    pub fn stream_fails_with(&self, error: LlmError) {
        *self.stream_error.lock().unwrap() = Some(error);
    }

    pub fn stream_hangs(&self) {
        *self.stream_hang.lock().unwrap() = true;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn last_stream_messages(&self) -> Vec<Message> {
        self.stream_messages.lock().unwrap().last().cloned().unwrap_or_default()
    }

    fn reply_for(&self, prompt: &str) -> Reply {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .find(|(marker, _)| prompt.contains(marker.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }
}

fn response(text: String) -> LlmResponse {
    LlmResponse {
        content: Some(text),
        stop_reason: StopReason::EndTurn,
        usage: UsageStats::default(),
        model: "scripted".to_string(),
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn send_message(
        &self,
        messages: Vec<Message>,
        _system: Option<String>,
        _request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt: String = messages.iter().map(|m| m.content.as_str()).collect();
        let reply = self.reply_for(&prompt);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match reply {
            Reply::Text(text) => Ok(response(text)),
            Reply::Fail(error) => Err(error),
            Reply::Hang => {
                std::future::pending::<()>().await;
                Err(LlmError::Other {
                    message: "unreachable".to_string(),
                })
            }
        }
    }

    async fn stream_message(
        &self,
        messages: Vec<Message>,
        _system: Option<String>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        _request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.stream_messages.lock().unwrap().push(messages);

        let fragments = self.fragments.lock().unwrap().clone();
        let gap = *self.fragment_gap.lock().unwrap();
        let error = self.stream_error.lock().unwrap().clone();
        let hang = *self.stream_hang.lock().unwrap();

        let mut text = String::new();
        for fragment in fragments {
            if !gap.is_zero() {
                tokio::time::sleep(gap).await;
            }
            text.push_str(&fragment);
            if tx
                .send(UnifiedStreamEvent::TextDelta { content: fragment })
                .await
                .is_err()
            {
                break;
            }
        }
        if hang {
            std::future::pending::<()>().await;
        }
        match error {
            Some(error) => Err(error),
            None => {
                let _ = tx
                    .send(UnifiedStreamEvent::Complete {
                        stop_reason: Some("stop".to_string()),
                    })
                    .await;
                Ok(response(text))
            }
        }
    }

    async fn health_check(&self) -> LlmResult<()> {
        Ok(())
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

/// Records everything a stream session reports.
#[derive(Default)]
pub struct RecordingObserver {
    pub fragments: Mutex<Vec<String>>,
    pub completions: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<String>>,
    pub aborts: Mutex<Vec<StreamAbort>>,
}

impl RecordingObserver {
    pub fn revealed(&self) -> String {
        self.fragments.lock().unwrap().concat()
    }
}

impl StreamObserver for RecordingObserver {
    fn on_fragment(&self, text: &str) {
        self.fragments.lock().unwrap().push(text.to_string());
    }

    fn on_complete(&self, full_text: &str) {
        self.completions.lock().unwrap().push(full_text.to_string());
    }

    fn on_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }

    fn on_aborted(&self, reason: StreamAbort) {
        self.aborts.lock().unwrap().push(reason);
    }
}

/// 2025-08-29 12:00 UTC, mid-afternoon on the same calendar day at +05:30.
pub fn start_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 8, 29, 12, 0, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(start_instant()))
}

/// Config tuned for fast tests: quick typewriter, no snapshot file.
pub fn test_config() -> AppConfig {
    AppConfig {
        typewriter_tick_ms: 1,
        typewriter_chars_per_tick: 4,
        drain_wait_cap_ms: 500,
        drain_poll_ms: 1,
        local_cache_snapshot: false,
        ..AppConfig::default()
    }
}

pub fn engine(
    config: &AppConfig,
    db: &Database,
    provider: Arc<ScriptedProvider>,
    clock: Arc<ManualClock>,
    context_id: &str,
) -> InsightEngine {
    InsightEngine::new(config, db.clone(), provider, clock, LocalCache::new(), context_id)
        .expect("engine should build")
}

/// Cache manager and orchestrator wired directly, for tests that need
/// sub-second job timeouts.
pub fn pipeline(
    settings: AnalysisSettings,
    db: &Database,
    provider: Arc<ScriptedProvider>,
    clock: Arc<ManualClock>,
    context_id: &str,
) -> (Arc<CacheManager>, Arc<AnalysisOrchestrator>) {
    let config = test_config();
    let calendar = DayCalendar::new(config.day_offset_minutes).unwrap();
    let cache = Arc::new(CacheManager::new(
        Arc::new(db.clone()),
        LocalCache::new(),
        InvalidationBus::new(),
        clock,
        CachePolicy::from_config(&config).unwrap(),
        context_id,
    ));
    let orchestrator = Arc::new(AnalysisOrchestrator::new(
        provider,
        Arc::clone(&cache),
        Arc::new(db.clone()),
        settings,
        calendar,
    ));
    (cache, orchestrator)
}
