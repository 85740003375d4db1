//! Insight Engine
//!
//! The surface the view layer talks to. Wires the durable tier, local cache,
//! invalidation bus, analysis orchestrator and chat service for one execution
//! context, and exposes reads, refreshes, chat and change notifications.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use insight_sync_core::{
    AnalysisResult, CorrelationId, InsightKind, InvalidationEvent, Scope, ScopeFilter,
};
use insight_sync_llm::LlmProvider;

use crate::models::settings::AppConfig;
use crate::services::analysis::orchestrator::{
    AnalysisOrchestrator, AnalysisOutcome, AnalysisSettings, AnalysisTrigger,
};
use crate::services::analysis::summary::{mood_balance, MoodBalance};
use crate::services::cache::durable::DurableStore;
use crate::services::cache::manager::{CacheManager, CachePredicate, CacheRead};
use crate::services::cache::policy::CachePolicy;
use crate::services::chat::{ChatService, ChatSettings, ChatTurn};
use crate::services::streaming::StreamObserver;
use crate::services::sync::bus::{InvalidationBus, Subscription};
use crate::services::sync::watcher::DurableWatcher;
use crate::storage::database::Database;
use crate::storage::local_cache::LocalCache;
use crate::storage::transcript::TranscriptStore;
use crate::utils::clock::{Clock, DayCalendar};
use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOptions {
    /// Recompute even when a fresh value is cached
    pub force: bool,
}

impl RefreshOptions {
    pub fn forced() -> Self {
        Self { force: true }
    }
}

/// Emotion series for a date range plus its mood balance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmotionSeries {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub results: Vec<AnalysisResult>,
    pub balance: MoodBalance,
}

pub struct InsightEngine {
    cache: Arc<CacheManager>,
    orchestrator: Arc<AnalysisOrchestrator>,
    chat: ChatService,
    clock: Arc<dyn Clock>,
    calendar: DayCalendar,
    watcher_interval: Duration,
}

impl InsightEngine {
    /// Build an engine for one execution context over a shared database.
    pub fn new(
        config: &AppConfig,
        database: Database,
        provider: Arc<dyn LlmProvider>,
        clock: Arc<dyn Clock>,
        local: LocalCache,
        context_id: impl Into<String>,
    ) -> AppResult<Self> {
        config.validate().map_err(AppError::config)?;
        let calendar = DayCalendar::new(config.day_offset_minutes)?;
        let policy = CachePolicy::from_config(config)?;

        let durable: Arc<dyn DurableStore> = Arc::new(database.clone());
        let transcripts: Arc<dyn TranscriptStore> = Arc::new(database);

        let context_id = context_id.into();
        let cache = Arc::new(CacheManager::new(
            durable,
            local,
            InvalidationBus::new(),
            Arc::clone(&clock),
            policy,
            context_id.clone(),
        ));
        let orchestrator = Arc::new(AnalysisOrchestrator::new(
            Arc::clone(&provider),
            Arc::clone(&cache),
            Arc::clone(&transcripts),
            AnalysisSettings::from_config(config),
            calendar,
        ));
        let chat = ChatService::new(
            provider,
            transcripts,
            Arc::clone(&orchestrator),
            Arc::clone(&clock),
            calendar,
            ChatSettings::from_config(config),
        );

        info!("[InsightEngine] Context {} ready", context_id);
        Ok(Self {
            cache,
            orchestrator,
            chat,
            clock,
            calendar,
            watcher_interval: Duration::from_secs(config.watcher_poll_secs.max(1)),
        })
    }

    pub fn context_id(&self) -> &str {
        self.cache.context_id()
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn orchestrator(&self) -> &Arc<AnalysisOrchestrator> {
        &self.orchestrator
    }

    pub fn chat(&self) -> &ChatService {
        &self.chat
    }

    pub fn today(&self) -> NaiveDate {
        self.calendar.today(self.clock.as_ref())
    }

    /// Scope `kind` is stored under for `user_id` today.
    pub fn scope_for_today(&self, kind: InsightKind, user_id: &str) -> AppResult<Scope> {
        self.orchestrator.scope_for(kind, user_id, self.today())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn read_insight(&self, kind: InsightKind, scope: &Scope) -> CacheRead {
        self.cache.read(kind, scope)
    }

    /// Emotion results for `[from, to]`, oldest first, with their mood balance.
    pub fn read_series(&self, user_id: &str, from: NaiveDate, to: NaiveDate) -> AppResult<EmotionSeries> {
        if from > to {
            return Err(AppError::validation(format!(
                "Series start {} is after its end {}",
                from, to
            )));
        }
        let results = self
            .cache
            .durable()
            .list_days(user_id, InsightKind::Emotion, from, to)?;
        let balance = mood_balance(&results);
        Ok(EmotionSeries {
            from,
            to,
            results,
            balance,
        })
    }

    /// Mood balance over the last `days` days ending today.
    pub fn mood_balance(&self, user_id: &str, days: u32) -> AppResult<MoodBalance> {
        let to = self.today();
        let span = self.calendar.days_back(to, days.max(1));
        let from = span.last().copied().unwrap_or(to);
        Ok(self.read_series(user_id, from, to)?.balance)
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Recompute `kind` for `scope`.
    ///
    /// Without `force`, a fresh cached value is returned as-is. With `force`,
    /// a `ForceRefresh` event is published, the local entry is dropped and the
    /// job always runs.
    pub async fn refresh_insight(
        &self,
        kind: InsightKind,
        scope: &Scope,
        options: RefreshOptions,
    ) -> AppResult<AnalysisOutcome> {
        let day = scope.period.anchor_day().unwrap_or_else(|| self.today());
        let expected = self.orchestrator.scope_for(kind, &scope.user_id, day)?;
        if &expected != scope {
            return Err(AppError::validation(format!(
                "{} is not stored under period {} (expected {})",
                kind, scope.period, expected.period
            )));
        }

        let correlation = CorrelationId::new();
        let trigger = if options.force {
            self.cache.bus().publish(&InvalidationEvent::force_refresh(
                scope.clone(),
                Some(kind),
                Some(correlation),
                self.clock.now(),
            ));
            self.cache.invalidate(&CachePredicate::exact(kind, scope));
            AnalysisTrigger::ManualRefresh
        } else {
            let cached = self.cache.read(kind, scope);
            if let (false, Some(result)) = (cached.stale, cached.payload) {
                debug!("[InsightEngine] {} for {} is fresh, skipping refresh", kind, scope);
                return Ok(AnalysisOutcome::Ready(result));
            }
            AnalysisTrigger::StaleRead
        };

        let request = self
            .orchestrator
            .request_for(kind, &scope.user_id, day, trigger, correlation)?;
        Ok(self.orchestrator.run(request).await)
    }

    /// Run every backend analysis for `user_id` today.
    pub async fn refresh_all(&self, user_id: &str) -> AppResult<Vec<AnalysisOutcome>> {
        self.orchestrator
            .run_all(
                user_id,
                self.today(),
                AnalysisTrigger::ManualRefresh,
                CorrelationId::new(),
            )
            .await
    }

    // ========================================================================
    // Chat and notifications
    // ========================================================================

    pub fn stream_chat(
        &self,
        user_id: &str,
        prompt: &str,
        observer: Arc<dyn StreamObserver>,
    ) -> AppResult<ChatTurn> {
        self.chat.stream_chat(user_id, prompt, observer)
    }

    pub fn on_invalidated<F>(&self, filter: ScopeFilter, handler: F) -> Subscription
    where
        F: Fn(&InvalidationEvent) + Send + Sync + 'static,
    {
        self.cache.bus().subscribe(filter, handler)
    }

    /// Start polling the durable tier for writes from other contexts.
    pub fn start_watcher(&self, cancel: CancellationToken) -> AppResult<JoinHandle<()>> {
        let watcher = Arc::new(DurableWatcher::new(Arc::clone(&self.cache))?);
        Ok(watcher.spawn(self.watcher_interval, cancel))
    }
}
