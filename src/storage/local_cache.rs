//! Local Cache Tier
//!
//! Time-boxed, per-context cache of analysis results. Entries record when
//! they were written and their TTL; freshness is decided by the cache
//! manager, which owns every mutation. Absence of a durable value is cached
//! too, as an entry with no payload.
//!
//! The map can be snapshotted to a JSON file so entries outlive a restart of
//! the same context. The snapshot records its owning context and is replaced
//! atomically; a snapshot owned by another context is never restored.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use insight_sync_core::{AnalysisResult, InsightKind, Scope, TtlClass};

use crate::utils::error::AppResult;

/// One cached `(kind, scope)` slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalEntry {
    pub kind: InsightKind,
    pub scope: Scope,
    pub class: TtlClass,
    /// `None` records that the durable tier had nothing for this key
    pub payload: Option<AnalysisResult>,
    pub written_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl LocalEntry {
    /// Whether the elapsed-time budget has run out at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let secs = i64::try_from(self.ttl_secs).unwrap_or(i64::MAX).min(i64::MAX / 1000);
        let ttl = chrono::Duration::seconds(secs);
        match self.written_at.checked_add_signed(ttl) {
            Some(deadline) => deadline <= now,
            None => false,
        }
    }
}

/// Stable key shared by every context: `"{kind}:{period}:{user}"`.
pub fn cache_key(kind: InsightKind, scope: &Scope) -> String {
    format!("{}:{}", kind.as_str(), scope.key_fragment())
}

/// On-disk form of a snapshot.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    context_id: String,
    entries: Vec<LocalEntry>,
}

#[derive(Debug)]
struct SnapshotTarget {
    path: PathBuf,
    context_id: String,
}

#[derive(Debug, Default)]
pub struct LocalCache {
    entries: DashMap<String, LocalEntry>,
    snapshot: Option<SnapshotTarget>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache backed by a JSON snapshot owned by `context_id`. A missing,
    /// unreadable or foreign snapshot starts empty.
    pub fn with_snapshot(path: impl Into<PathBuf>, context_id: impl Into<String>) -> Self {
        let path = path.into();
        let context_id = context_id.into();
        let entries = DashMap::new();
        match Self::load_snapshot(&path) {
            Ok(Some(snapshot)) if snapshot.context_id == context_id => {
                debug!(
                    "[LocalCache] Loaded {} entries from {}",
                    snapshot.entries.len(),
                    path.display()
                );
                for entry in snapshot.entries {
                    entries.insert(cache_key(entry.kind, &entry.scope), entry);
                }
            }
            Ok(Some(snapshot)) => warn!(
                "[LocalCache] Snapshot {} belongs to context {}, starting empty",
                path.display(),
                snapshot.context_id
            ),
            Ok(None) => {}
            Err(e) => warn!("[LocalCache] Ignoring snapshot {}: {}", path.display(), e),
        }
        Self {
            entries,
            snapshot: Some(SnapshotTarget { path, context_id }),
        }
    }

    fn load_snapshot(path: &Path) -> AppResult<Option<Snapshot>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn get(&self, kind: InsightKind, scope: &Scope) -> Option<LocalEntry> {
        self.entries
            .get(&cache_key(kind, scope))
            .map(|entry| entry.value().clone())
    }

    pub fn put(&self, entry: LocalEntry) {
        let key = cache_key(entry.kind, &entry.scope);
        self.entries.insert(key, entry);
    }

    pub fn remove(&self, kind: InsightKind, scope: &Scope) -> bool {
        self.entries.remove(&cache_key(kind, scope)).is_some()
    }

    /// Remove every entry matching `predicate`; returns how many were removed.
    pub fn remove_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&LocalEntry) -> bool,
    {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let matched = predicate(entry);
            if matched {
                removed += 1;
            }
            !matched
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace the snapshot file, if this cache has one. The new content is
    /// written to a temporary file in the same directory and renamed over
    /// the old one.
    pub fn persist(&self) -> AppResult<()> {
        let Some(target) = &self.snapshot else {
            return Ok(());
        };
        let mut entries: Vec<LocalEntry> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by(|a, b| cache_key(a.kind, &a.scope).cmp(&cache_key(b.kind, &b.scope)));
        let snapshot = Snapshot {
            context_id: target.context_id.clone(),
            entries,
        };

        let dir = match target.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;
        let mut file = tempfile::NamedTempFile::new_in(&dir)?;
        file.write_all(serde_json::to_string_pretty(&snapshot)?.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(&target.path).map_err(|e| e.error)?;
        Ok(())
    }
}
