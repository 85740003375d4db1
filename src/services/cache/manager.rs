//! Cache Manager
//!
//! Owns the read/refresh/write protocol across the local tier and the durable
//! tier. Every local-tier mutation goes through this type.
//!
//! Reads never fail outward. A forced-freshness window for the scope's user
//! sends reads straight to the durable tier; otherwise a fresh local entry is
//! served, and anything else falls through to the durable tier, whose answer
//! (including absence) is cached locally. Writes go durable first, then
//! local, then publish a `Write` event carrying the payload.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use insight_sync_core::{
    AnalysisResult, CorrelationId, InsightKind, InvalidationEvent, PeriodKey, Scope, TtlClass,
};

use crate::services::cache::durable::{DurableRecord, DurableStore};
use crate::services::cache::policy::CachePolicy;
use crate::services::sync::bus::InvalidationBus;
use crate::storage::local_cache::{LocalCache, LocalEntry};
use crate::utils::clock::Clock;
use crate::utils::error::AppResult;

/// Which tier answered a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    Local,
    Durable,
    /// Nothing could be served
    None,
}

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheRead {
    pub payload: Option<AnalysisResult>,
    /// True when no payload is available or an expired value was served
    pub stale: bool,
    pub source: CacheSource,
}

impl CacheRead {
    fn fresh(payload: Option<AnalysisResult>, source: CacheSource) -> Self {
        let stale = payload.is_none();
        Self {
            payload,
            stale,
            source,
        }
    }

    fn stale(payload: Option<AnalysisResult>) -> Self {
        let source = if payload.is_some() {
            CacheSource::Local
        } else {
            CacheSource::None
        };
        Self {
            payload,
            stale: true,
            source,
        }
    }
}

/// Selects local-tier entries. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachePredicate {
    pub kind: Option<InsightKind>,
    pub class: Option<TtlClass>,
    pub user_id: Option<String>,
    pub period: Option<PeriodKey>,
}

impl CachePredicate {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// Exactly one `(kind, scope)` slot.
    pub fn exact(kind: InsightKind, scope: &Scope) -> Self {
        Self {
            kind: Some(kind),
            class: None,
            user_id: Some(scope.user_id.clone()),
            period: Some(scope.period.clone()),
        }
    }

    pub fn with_kind(mut self, kind: InsightKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_class(mut self, class: TtlClass) -> Self {
        self.class = Some(class);
        self
    }

    pub fn with_period(mut self, period: PeriodKey) -> Self {
        self.period = Some(period);
        self
    }

    pub fn matches(&self, entry: &LocalEntry) -> bool {
        self.kind.map_or(true, |k| k == entry.kind)
            && self.class.map_or(true, |c| c == entry.class)
            && self
                .user_id
                .as_ref()
                .map_or(true, |u| u == &entry.scope.user_id)
            && self
                .period
                .as_ref()
                .map_or(true, |p| p == &entry.scope.period)
    }
}

pub struct CacheManager {
    durable: Arc<dyn DurableStore>,
    local: LocalCache,
    bus: InvalidationBus,
    clock: Arc<dyn Clock>,
    policy: CachePolicy,
    /// Forced-freshness expiry per user
    forced: DashMap<String, DateTime<Utc>>,
    context_id: String,
}

impl CacheManager {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        local: LocalCache,
        bus: InvalidationBus,
        clock: Arc<dyn Clock>,
        policy: CachePolicy,
        context_id: impl Into<String>,
    ) -> Self {
        Self {
            durable,
            local,
            bus,
            clock,
            policy,
            forced: DashMap::new(),
            context_id: context_id.into(),
        }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn durable(&self) -> &Arc<dyn DurableStore> {
        &self.durable
    }

    pub fn bus(&self) -> &InvalidationBus {
        &self.bus
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Read `(kind, scope)` through the tiers.
    pub fn read(&self, kind: InsightKind, scope: &Scope) -> CacheRead {
        let now = self.clock.now();
        let local = self.local.get(kind, scope);

        if self.forced_freshness_active(&scope.user_id) {
            debug!("[CacheManager] Forced freshness active for {}, reading durable tier", scope.user_id);
            return self.read_durable(kind, scope, local);
        }

        if let Some(entry) = &local {
            if self.policy.is_fresh(entry, now) {
                return CacheRead::fresh(entry.payload.clone(), CacheSource::Local);
            }
        }

        self.read_durable(kind, scope, local)
    }

    fn read_durable(&self, kind: InsightKind, scope: &Scope, local: Option<LocalEntry>) -> CacheRead {
        match self.durable.get(kind, scope) {
            Ok(record) => {
                let payload = record.map(|r: DurableRecord| r.result);
                let now = self.clock.now();
                // A long-class value computed on an earlier day stays stale
                // until it is recomputed, and keeps its original stamp locally.
                let carried_over = payload.as_ref().filter(|result| {
                    kind.ttl_class().is_calendar_gated()
                        && !self.policy.calendar.same_day(result.computed_at, now)
                });
                match carried_over.map(|result| result.computed_at) {
                    Some(computed_at) => {
                        debug!("[CacheManager] {} for {} is from an earlier day", kind, scope);
                        self.store_local(kind, scope, payload.clone(), computed_at);
                        CacheRead {
                            payload,
                            stale: true,
                            source: CacheSource::Durable,
                        }
                    }
                    None => {
                        self.store_local(kind, scope, payload.clone(), now);
                        CacheRead::fresh(payload, CacheSource::Durable)
                    }
                }
            }
            Err(e) => {
                warn!("[CacheManager] Durable read failed for {} {}: {}", kind, scope, e);
                CacheRead::stale(local.and_then(|entry| entry.payload))
            }
        }
    }

    fn store_local(
        &self,
        kind: InsightKind,
        scope: &Scope,
        payload: Option<AnalysisResult>,
        written_at: DateTime<Utc>,
    ) {
        let class = kind.ttl_class();
        self.local.put(LocalEntry {
            kind,
            scope: scope.clone(),
            class,
            payload,
            written_at,
            ttl_secs: self.policy.ttl_secs(class),
        });
        // Only long-class entries are worth carrying across a restart.
        if class == TtlClass::Long {
            if let Err(e) = self.local.persist() {
                warn!("[CacheManager] Failed to persist local cache snapshot: {}", e);
            }
        }
    }

    /// Persist `result` to the durable tier, then the local tier, then
    /// announce it. Returns the durable revision.
    pub fn write(&self, result: &AnalysisResult, correlation: Option<CorrelationId>) -> AppResult<i64> {
        let revision = self.durable.put(result, &self.context_id)?;
        self.store_local(result.kind(), &result.scope, Some(result.clone()), self.clock.now());

        info!(
            "[CacheManager] Wrote {} for {} (origin: {}, revision: {})",
            result.kind(),
            result.scope,
            result.origin.as_str(),
            revision
        );
        self.bus
            .publish(&InvalidationEvent::write(result.clone(), correlation, self.clock.now()));
        Ok(revision)
    }

    /// Drop matching local entries; the durable tier is untouched.
    pub fn invalidate(&self, predicate: &CachePredicate) -> usize {
        let removed = self.local.remove_where(|entry| predicate.matches(entry));
        if removed > 0 {
            debug!("[CacheManager] Invalidated {} local entries", removed);
            if let Err(e) = self.local.persist() {
                warn!("[CacheManager] Failed to persist local cache snapshot: {}", e);
            }
        }
        removed
    }

    /// Bypass the local tier for `scope`'s user for `duration`.
    pub fn set_forced_freshness(&self, scope: &Scope, duration: Duration) {
        self.open_window(&scope.user_id, self.clock.now() + duration);
    }

    fn open_window(&self, user_id: &str, expires_at: DateTime<Utc>) {
        let mut slot = self.forced.entry(user_id.to_string()).or_insert(expires_at);
        if *slot < expires_at {
            *slot = expires_at;
        }
    }

    pub fn forced_freshness_active(&self, user_id: &str) -> bool {
        let now = self.clock.now();
        let expired = match self.forced.get(user_id) {
            Some(expires_at) => *expires_at <= now,
            None => return false,
        };
        if expired {
            self.forced.remove_if(user_id, |_, expires_at| *expires_at <= now);
            return false;
        }
        true
    }

    /// Record the user's durable write marker for this context.
    pub fn record_write_marker(&self, user_id: &str) -> AppResult<()> {
        self.durable
            .record_write_marker(user_id, self.clock.now(), &self.context_id)
    }

    /// Adopt a recent write marker left by any context. Returns whether a
    /// window is now open for the user.
    pub fn sync_forced_freshness(&self, user_id: &str) -> bool {
        match self.durable.write_marker(user_id) {
            Ok(Some(marker)) => {
                let secs = i64::try_from(self.policy.forced_freshness_secs)
                    .unwrap_or(i64::MAX)
                    .min(i64::MAX / 1000);
                let window = Duration::seconds(secs);
                if let Some(expires_at) = marker.written_at.checked_add_signed(window) {
                    if expires_at > self.clock.now() {
                        self.open_window(user_id, expires_at);
                    }
                }
            }
            Ok(None) => {}
            Err(e) => warn!("[CacheManager] Could not read write marker for {}: {}", user_id, e),
        }
        self.forced_freshness_active(user_id)
    }

    pub fn local_len(&self) -> usize {
        self.local.len()
    }
}
