//! Analysis Job Orchestrator
//!
//! Issues analysis jobs against the generation backend. Every job is
//! independent: it owns its timeout and cancellation token, and sibling jobs
//! neither wait for nor affect each other. Backend and parse failures are
//! recovered here and never reach the caller; they produce a fallback result
//! tagged `Origin::Fallback`.
//!
//! A job resolves only after its result has been handed to the cache
//! manager, so the durable tier is up to date by the time a caller observes
//! completion.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use insight_sync_core::{
    AnalysisResult, CorrelationId, EmotionScores, InsightKind, InsightPayload, Origin, PeriodKey, Scope,
};
use insight_sync_llm::{LlmError, LlmProvider, LlmRequestOptions, Message};

use crate::models::settings::AppConfig;
use crate::models::transcript::TranscriptWindow;
use crate::services::analysis::guards::{InputGuards, InsufficientInput};
use crate::services::analysis::parser::{self, reflection_entry};
use crate::services::analysis::prompts;
use crate::services::analysis::summary::{compute_highlights, fallback_reflection};
use crate::services::cache::manager::CacheManager;
use crate::storage::local_cache::cache_key;
use crate::storage::transcript::TranscriptStore;
use crate::utils::clock::DayCalendar;
use crate::utils::error::AppResult;

/// Period name used for the highlights scope.
pub const HIGHLIGHTS_PERIOD: &str = "3months";

/// What caused a job to be issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisTrigger {
    TurnCompleted,
    ManualRefresh,
    StaleRead,
}

/// Argument of one job.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub kind: InsightKind,
    pub scope: Scope,
    pub input: TranscriptWindow,
    pub triggered_at: DateTime<Utc>,
    pub trigger: AnalysisTrigger,
    pub correlation: CorrelationId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    Ready(AnalysisResult),
    /// Produced, but the durable write failed; other contexts will not see it
    Unpersisted { result: AnalysisResult, error: String },
    InsufficientInput(InsufficientInput),
    Cancelled { kind: InsightKind, scope: Scope },
}

impl AnalysisOutcome {
    pub fn result(&self) -> Option<&AnalysisResult> {
        match self {
            AnalysisOutcome::Ready(result) | AnalysisOutcome::Unpersisted { result, .. } => {
                Some(result)
            }
            _ => None,
        }
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self, AnalysisOutcome::Ready(_))
    }

    pub fn is_insufficient(&self) -> bool {
        matches!(self, AnalysisOutcome::InsufficientInput(_))
    }
}

/// Tunables read from `AppConfig`.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSettings {
    pub guards: InputGuards,
    pub emotion_timeout: Duration,
    pub reflection_timeout: Duration,
    pub pattern_timeout: Duration,
    pub habit_timeout: Duration,
    pub temperature: f32,
    pub pattern_window_days: u32,
    pub habit_window_days: u32,
    pub highlights_window_days: u32,
    pub forced_freshness: Duration,
}

impl AnalysisSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            guards: InputGuards::from_config(config),
            emotion_timeout: config.analysis_timeout(InsightKind::Emotion),
            reflection_timeout: config.analysis_timeout(InsightKind::Reflection),
            pattern_timeout: config.analysis_timeout(InsightKind::PatternSet),
            habit_timeout: config.analysis_timeout(InsightKind::HabitSet),
            temperature: config.analysis_temperature,
            pattern_window_days: config.pattern_window_days,
            habit_window_days: config.habit_window_days,
            highlights_window_days: config.highlights_window_days,
            forced_freshness: Duration::from_secs(config.forced_freshness_secs),
        }
    }

    pub fn timeout(&self, kind: InsightKind) -> Duration {
        match kind {
            InsightKind::Emotion | InsightKind::Highlights => self.emotion_timeout,
            InsightKind::Reflection => self.reflection_timeout,
            InsightKind::PatternSet => self.pattern_timeout,
            InsightKind::HabitSet => self.habit_timeout,
        }
    }
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorStats {
    pub jobs_started: u64,
    pub backend_calls: u64,
    pub model_results: u64,
    pub fallbacks: u64,
    pub insufficient: u64,
    pub cancelled: u64,
    /// Jobs started while another job for the same `(kind, scope)` was running
    pub overlapping_jobs: u64,
}

#[derive(Default)]
struct StatCounters {
    jobs_started: AtomicU64,
    backend_calls: AtomicU64,
    model_results: AtomicU64,
    fallbacks: AtomicU64,
    insufficient: AtomicU64,
    cancelled: AtomicU64,
    overlapping_jobs: AtomicU64,
}

impl StatCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> OrchestratorStats {
        OrchestratorStats {
            jobs_started: self.jobs_started.load(Ordering::Relaxed),
            backend_calls: self.backend_calls.load(Ordering::Relaxed),
            model_results: self.model_results.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            insufficient: self.insufficient.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            overlapping_jobs: self.overlapping_jobs.load(Ordering::Relaxed),
        }
    }
}

/// Decrements the in-flight count for a key when the job ends.
struct InFlight<'a> {
    map: &'a DashMap<String, usize>,
    key: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut remove = false;
        if let Some(mut count) = self.map.get_mut(&self.key) {
            *count = count.saturating_sub(1);
            remove = *count == 0;
        }
        if remove {
            self.map.remove_if(&self.key, |_, count| *count == 0);
        }
    }
}

/// Handle to one spawned job.
pub struct JobHandle {
    pub kind: InsightKind,
    pub scope: Scope,
    cancel: CancellationToken,
    handle: JoinHandle<AnalysisOutcome>,
}

impl JobHandle {
    /// Abort this job only. A job that already persisted its result is
    /// unaffected.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) -> AnalysisOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("[Orchestrator] {} job for {} did not finish: {}", self.kind, self.scope, e);
                AnalysisOutcome::Cancelled {
                    kind: self.kind,
                    scope: self.scope,
                }
            }
        }
    }
}

pub struct AnalysisOrchestrator {
    provider: Arc<dyn LlmProvider>,
    cache: Arc<CacheManager>,
    transcripts: Arc<dyn TranscriptStore>,
    settings: AnalysisSettings,
    calendar: DayCalendar,
    in_flight: DashMap<String, usize>,
    stats: StatCounters,
}

impl AnalysisOrchestrator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        cache: Arc<CacheManager>,
        transcripts: Arc<dyn TranscriptStore>,
        settings: AnalysisSettings,
        calendar: DayCalendar,
    ) -> Self {
        Self {
            provider,
            cache,
            transcripts,
            settings,
            calendar,
            in_flight: DashMap::new(),
            stats: StatCounters::default(),
        }
    }

    pub fn stats(&self) -> OrchestratorStats {
        self.stats.snapshot()
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    /// Scope a kind is stored under for the calendar day `day`.
    pub fn scope_for(&self, kind: InsightKind, user_id: &str, day: NaiveDate) -> AppResult<Scope> {
        let period = match kind {
            InsightKind::Emotion | InsightKind::Reflection => PeriodKey::day(day),
            InsightKind::PatternSet => PeriodKey::window(self.settings.pattern_window_days, day),
            InsightKind::HabitSet => PeriodKey::window(self.settings.habit_window_days, day),
            InsightKind::Highlights => PeriodKey::named(HIGHLIGHTS_PERIOD)?,
        };
        Ok(Scope::new(user_id, period)?)
    }

    /// Build the request for `kind` anchored at `day`, loading its transcript window.
    pub fn request_for(
        &self,
        kind: InsightKind,
        user_id: &str,
        day: NaiveDate,
        trigger: AnalysisTrigger,
        correlation: CorrelationId,
    ) -> AppResult<AnalysisRequest> {
        let span = match kind {
            InsightKind::Emotion | InsightKind::Reflection => 1,
            InsightKind::PatternSet => self.settings.pattern_window_days,
            InsightKind::HabitSet => self.settings.habit_window_days,
            InsightKind::Highlights => 0,
        };
        let input = if span == 0 {
            TranscriptWindow::default()
        } else {
            let days = self.calendar.days_back(day, span);
            self.transcripts.list_range(user_id, &days)?
        };
        Ok(AnalysisRequest {
            kind,
            scope: self.scope_for(kind, user_id, day)?,
            input,
            triggered_at: self.cache.now(),
            trigger,
            correlation,
        })
    }

    /// Run one job to completion on the current task.
    pub async fn run(&self, request: AnalysisRequest) -> AnalysisOutcome {
        self.run_with_cancel(request, CancellationToken::new()).await
    }

    /// Spawn one job with its own cancellation token.
    pub fn spawn(self: &Arc<Self>, request: AnalysisRequest) -> JobHandle {
        let cancel = CancellationToken::new();
        let kind = request.kind;
        let scope = request.scope.clone();
        let this = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { this.run_with_cancel(request, token).await });
        JobHandle {
            kind,
            scope,
            cancel,
            handle,
        }
    }

    /// Run every backend analysis for `user_id` on `day` concurrently.
    ///
    /// Partial success is normal: each outcome stands on its own.
    pub async fn run_all(
        self: &Arc<Self>,
        user_id: &str,
        day: NaiveDate,
        trigger: AnalysisTrigger,
        correlation: CorrelationId,
    ) -> AppResult<Vec<AnalysisOutcome>> {
        let mut handles = Vec::with_capacity(InsightKind::ANALYSIS.len());
        for kind in InsightKind::ANALYSIS {
            let request = self.request_for(kind, user_id, day, trigger, correlation)?;
            handles.push(self.spawn(request));
        }
        info!(
            "[Orchestrator] run_all for {} on {} ({} jobs, correlation {})",
            user_id,
            day,
            handles.len(),
            correlation
        );
        Ok(join_all(handles.into_iter().map(JobHandle::join)).await)
    }

    async fn run_with_cancel(&self, request: AnalysisRequest, cancel: CancellationToken) -> AnalysisOutcome {
        StatCounters::bump(&self.stats.jobs_started);
        let kind = request.kind;

        if kind == InsightKind::Highlights {
            return self.run_highlights(&request);
        }

        if let Err(insufficient) = self.settings.guards.check(kind, &request.input) {
            debug!("[Orchestrator] Skipping {} for {}: {}", kind, request.scope, insufficient);
            StatCounters::bump(&self.stats.insufficient);
            return AnalysisOutcome::InsufficientInput(insufficient);
        }

        let _in_flight = self.enter(kind, &request.scope);
        let (payload, origin) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return self.cancelled(kind, &request.scope);
            }
            produced = self.produce(&request) => produced,
        };

        if cancel.is_cancelled() {
            return self.cancelled(kind, &request.scope);
        }

        let result = AnalysisResult::new(request.scope.clone(), payload, origin, self.cache.now());
        self.persist(result, request.correlation)
    }

    fn cancelled(&self, kind: InsightKind, scope: &Scope) -> AnalysisOutcome {
        info!("[Orchestrator] {} job for {} cancelled", kind, scope);
        StatCounters::bump(&self.stats.cancelled);
        AnalysisOutcome::Cancelled {
            kind,
            scope: scope.clone(),
        }
    }

    fn enter(&self, kind: InsightKind, scope: &Scope) -> InFlight<'_> {
        let key = cache_key(kind, scope);
        let previous = {
            let mut count = self.in_flight.entry(key.clone()).or_insert(0);
            let previous = *count;
            *count += 1;
            previous
        };
        if previous > 0 {
            StatCounters::bump(&self.stats.overlapping_jobs);
            warn!(
                "[Orchestrator] {} job for {} overlaps {} running job(s); last write wins",
                kind, scope, previous
            );
        }
        InFlight {
            map: &self.in_flight,
            key,
        }
    }

    /// Call the backend and parse, degrading to the fallback payload.
    async fn produce(&self, request: &AnalysisRequest) -> (InsightPayload, Origin) {
        let kind = request.kind;
        let Some(prompt) = prompts::analysis_prompt(kind, &request.input) else {
            return self.fallback_payload(request);
        };

        let timeout = self.settings.timeout(kind);
        let mut options = LlmRequestOptions::default()
            .with_temperature(self.settings.temperature)
            .with_timeout(timeout);
        if prompts::wants_json(kind) {
            options = options.json();
        }

        StatCounters::bump(&self.stats.backend_calls);
        let call = self
            .provider
            .send_message(vec![Message::user(prompt)], None, options);
        let response = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                self.log_backend_failure(kind, &request.scope, &e);
                return self.fallback_payload(request);
            }
            Err(_) => {
                self.log_backend_failure(
                    kind,
                    &request.scope,
                    &LlmError::Timeout {
                        seconds: timeout.as_secs(),
                    },
                );
                return self.fallback_payload(request);
            }
        };

        match parser::parse(kind, response.text()) {
            Some(parsed) if parsed.origin == Origin::Model => {
                debug!("[Orchestrator] Parsed {} via {:?}", kind, parsed.step);
                StatCounters::bump(&self.stats.model_results);
                (parsed.payload, Origin::Model)
            }
            _ => {
                warn!("[Orchestrator] Unusable {} output for {}, using fallback", kind, request.scope);
                self.fallback_payload(request)
            }
        }
    }

    fn log_backend_failure(&self, kind: InsightKind, scope: &Scope, error: &LlmError) {
        if error.is_transient() {
            warn!("[Orchestrator] {} backend call for {} failed: {}", kind, scope, error);
        } else {
            warn!(
                "[Orchestrator] {} backend call for {} failed permanently: {}",
                kind, scope, error
            );
        }
    }

    fn fallback_payload(&self, request: &AnalysisRequest) -> (InsightPayload, Origin) {
        StatCounters::bump(&self.stats.fallbacks);
        let payload = match request.kind {
            InsightKind::Reflection => {
                InsightPayload::Reflection(reflection_entry(&fallback_reflection(&request.input)))
            }
            kind => parser::default_payload(kind)
                .unwrap_or_else(|| InsightPayload::Emotion(EmotionScores::neutral())),
        };
        (payload, Origin::Fallback)
    }

    /// Hand `result` to the cache manager. A fallback never replaces a model
    /// result already stored for the key; the stored one is returned instead.
    fn persist(&self, result: AnalysisResult, correlation: CorrelationId) -> AnalysisOutcome {
        if result.origin == Origin::Fallback {
            match self.cache.durable().get(result.kind(), &result.scope) {
                Ok(Some(existing)) if existing.result.origin == Origin::Model => {
                    info!(
                        "[Orchestrator] Keeping stored model {} for {} over fallback",
                        result.kind(),
                        result.scope
                    );
                    return AnalysisOutcome::Ready(existing.result);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("[Orchestrator] Could not check stored {} for {}: {}", result.kind(), result.scope, e);
                }
            }
        }

        match self.cache.write(&result, Some(correlation)) {
            Ok(_) => {
                let window = chrono::Duration::from_std(self.settings.forced_freshness)
                    .unwrap_or_else(|_| chrono::Duration::seconds(0));
                self.cache.set_forced_freshness(&result.scope, window);
                if let Err(e) = self.cache.record_write_marker(&result.scope.user_id) {
                    warn!("[Orchestrator] Failed to record write marker: {}", e);
                }
            }
            Err(e) => {
                warn!("[Orchestrator] Failed to persist {} for {}: {}", result.kind(), result.scope, e);
                return AnalysisOutcome::Unpersisted {
                    result,
                    error: e.to_string(),
                };
            }
        }
        AnalysisOutcome::Ready(result)
    }

    fn run_highlights(&self, request: &AnalysisRequest) -> AnalysisOutcome {
        let anchor = self.calendar.day_of(request.triggered_at);
        let span = i64::from(self.settings.highlights_window_days.saturating_sub(1));
        let from = anchor - chrono::Duration::days(span);

        let series = match self
            .cache
            .durable()
            .list_days(&request.scope.user_id, InsightKind::Emotion, from, anchor)
        {
            Ok(series) => series,
            Err(e) => {
                warn!("[Orchestrator] Could not load emotion series: {}", e);
                Vec::new()
            }
        };

        match compute_highlights(&series) {
            Some(highlights) => {
                let result = AnalysisResult::new(
                    request.scope.clone(),
                    InsightPayload::Highlights(highlights),
                    Origin::Model,
                    self.cache.now(),
                );
                self.persist(result, request.correlation)
            }
            None => {
                StatCounters::bump(&self.stats.insufficient);
                AnalysisOutcome::InsufficientInput(InsufficientInput::new(
                    InsightKind::Highlights,
                    "days with analyzed emotions",
                    1,
                    0,
                ))
            }
        }
    }
}
