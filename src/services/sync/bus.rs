//! Invalidation Bus
//!
//! Same-context publish/subscribe for "this data changed" notices. Delivery is
//! synchronous: `publish` returns after every matching handler has run.
//! Handlers are invoked outside the subscriber lock, so a handler may itself
//! subscribe, unsubscribe or publish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::debug;

use insight_sync_core::{InvalidationEvent, ScopeFilter};

type Handler = Arc<dyn Fn(&InvalidationEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    filter: ScopeFilter,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn remove(&self, id: u64) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }
}

/// Cloneable handle to one context's bus.
#[derive(Clone, Default)]
pub struct InvalidationBus {
    inner: Arc<BusInner>,
}

impl InvalidationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events matching `filter`.
    pub fn subscribe<F>(&self, filter: ScopeFilter, handler: F) -> Subscription
    where
        F: Fn(&InvalidationEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().push(Subscriber {
            id,
            filter,
            handler: Arc::new(handler),
        });
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every current matching subscriber; returns how many
    /// handlers ran.
    pub fn publish(&self, event: &InvalidationEvent) -> usize {
        let handlers: Vec<Handler> = self
            .inner
            .lock()
            .iter()
            .filter(|s| s.filter.matches(event))
            .map(|s| Arc::clone(&s.handler))
            .collect();

        debug!(
            "[InvalidationBus] {:?} for {} delivered to {} subscriber(s)",
            event.reason,
            event.scope,
            handlers.len()
        );
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Live registration; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
