//! Durable Tier Contract
//!
//! The authoritative system-of-record shared by every execution context.
//! Writes overwrite per `(kind, scope)` and carry a global revision so other
//! contexts can discover them by polling.

use chrono::{DateTime, NaiveDate, Utc};

use insight_sync_core::{AnalysisResult, InsightKind, Scope};

use crate::utils::error::AppResult;

/// A stored result plus its write metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct DurableRecord {
    pub result: AnalysisResult,
    pub writer_context: String,
    pub revision: i64,
}

/// A row observed by revision scan.
#[derive(Debug, Clone, PartialEq)]
pub struct DurableChange {
    pub scope: Scope,
    pub kind: InsightKind,
    /// Written by a context other than the one scanning
    pub foreign: bool,
    pub revision: i64,
}

/// Per-user "most recent write" marker.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteMarker {
    pub written_at: DateTime<Utc>,
    pub writer_context: String,
}

pub trait DurableStore: Send + Sync {
    fn get(&self, kind: InsightKind, scope: &Scope) -> AppResult<Option<DurableRecord>>;

    /// Overwrite the current result for the key; returns the new revision.
    fn put(&self, result: &AnalysisResult, writer_context: &str) -> AppResult<i64>;

    /// Day-keyed results for one user and kind in `[from, to]`, oldest first.
    fn list_days(
        &self,
        user_id: &str,
        kind: InsightKind,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<AnalysisResult>>;

    fn latest_revision(&self) -> AppResult<i64>;

    fn changes_since(&self, revision: i64, exclude_writer: &str) -> AppResult<Vec<DurableChange>>;

    fn record_write_marker(&self, user_id: &str, at: DateTime<Utc>, writer_context: &str) -> AppResult<()>;

    fn write_marker(&self, user_id: &str) -> AppResult<Option<WriteMarker>>;
}
