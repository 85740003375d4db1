//! Invalidation Events
//!
//! Notifications published when a durable result is written, force-refreshed,
//! or observed as written by another execution context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::insight::{AnalysisResult, CorrelationId, InsightKind, PeriodKey, Scope};

/// Why an invalidation was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationReason {
    /// A new result was written by this context
    Write,
    /// A caller bypassed the cache for this scope
    ForceRefresh,
    /// Another context wrote the durable record
    ExternalWrite,
}

/// `{scope, kind, reason, emitted_at}` plus the new payload when one exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub scope: Scope,
    /// `None` means every kind in the scope
    pub kind: Option<InsightKind>,
    pub reason: InvalidationReason,
    pub emitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation: Option<CorrelationId>,
}

impl InvalidationEvent {
    pub fn write(result: AnalysisResult, correlation: Option<CorrelationId>, at: DateTime<Utc>) -> Self {
        Self {
            scope: result.scope.clone(),
            kind: Some(result.kind()),
            reason: InvalidationReason::Write,
            emitted_at: at,
            payload: Some(result),
            correlation,
        }
    }

    pub fn force_refresh(
        scope: Scope,
        kind: Option<InsightKind>,
        correlation: Option<CorrelationId>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            scope,
            kind,
            reason: InvalidationReason::ForceRefresh,
            emitted_at: at,
            payload: None,
            correlation,
        }
    }

    pub fn external_write(scope: Scope, kind: InsightKind, at: DateTime<Utc>) -> Self {
        Self {
            scope,
            kind: Some(kind),
            reason: InvalidationReason::ExternalWrite,
            emitted_at: at,
            payload: None,
            correlation: None,
        }
    }

    /// Whether this event concerns `kind` (scope-wide events match every kind).
    pub fn covers_kind(&self, kind: InsightKind) -> bool {
        self.kind.map_or(true, |k| k == kind)
    }
}

/// Subscription filter. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeFilter {
    pub user_id: Option<String>,
    pub period: Option<PeriodKey>,
    pub kind: Option<InsightKind>,
}

impl ScopeFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn scope(scope: &Scope) -> Self {
        Self {
            user_id: Some(scope.user_id.clone()),
            period: Some(scope.period.clone()),
            kind: None,
        }
    }

    pub fn with_kind(mut self, kind: InsightKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn matches(&self, event: &InvalidationEvent) -> bool {
        if let Some(user) = &self.user_id {
            if user != &event.scope.user_id {
                return false;
            }
        }
        if let Some(period) = &self.period {
            if period != &event.scope.period {
                return false;
            }
        }
        match (self.kind, event.kind) {
            (Some(wanted), Some(actual)) => wanted == actual,
            _ => true,
        }
    }
}
