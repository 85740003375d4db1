//! Durable-Write Watcher
//!
//! There is no push channel between execution contexts. Each context polls
//! the durable tier for rows written by another context since its cursor,
//! drops the matching local entries and republishes them on its own bus as
//! `ExternalWrite` notices (without payload; subscribers re-read).
//!
//! A foreign write therefore becomes visible here after at most one poll
//! interval, or sooner when the local entry's TTL runs out.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use insight_sync_core::InvalidationEvent;

use crate::services::cache::manager::{CacheManager, CachePredicate};
use crate::utils::error::AppResult;

pub struct DurableWatcher {
    cache: Arc<CacheManager>,
    cursor: AtomicI64,
}

impl DurableWatcher {
    /// Start from the current durable revision; earlier writes are not replayed.
    pub fn new(cache: Arc<CacheManager>) -> AppResult<Self> {
        let cursor = cache.durable().latest_revision()?;
        Ok(Self {
            cache,
            cursor: AtomicI64::new(cursor),
        })
    }

    pub fn cursor(&self) -> i64 {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Scan once; returns the number of foreign writes observed.
    pub fn poll_once(&self) -> AppResult<usize> {
        let since = self.cursor();
        let changes = self
            .cache
            .durable()
            .changes_since(since, self.cache.context_id())?;

        let mut foreign = 0;
        let mut users = HashSet::new();
        for change in changes {
            self.cursor.fetch_max(change.revision, Ordering::SeqCst);
            if !change.foreign {
                continue;
            }
            foreign += 1;
            self.cache
                .invalidate(&CachePredicate::exact(change.kind, &change.scope));
            users.insert(change.scope.user_id.clone());
            self.cache.bus().publish(&InvalidationEvent::external_write(
                change.scope,
                change.kind,
                self.cache.now(),
            ));
        }

        for user_id in users {
            self.cache.sync_forced_freshness(&user_id);
        }
        if foreign > 0 {
            debug!("[DurableWatcher] Observed {} external write(s) since revision {}", foreign, since);
        }
        Ok(foreign)
    }

    /// Poll on a fixed interval until `cancel` fires.
    pub fn spawn(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("[DurableWatcher] Polling every {:?}", interval);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("[DurableWatcher] Stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.poll_once() {
                            warn!("[DurableWatcher] Poll failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}
