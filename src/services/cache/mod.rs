//! Insight Cache
//!
//! Three-tier cache for derived insights: ephemeral view state (owned by
//! callers), the per-context local tier and the shared durable tier.

pub mod durable;
pub mod manager;
pub mod policy;

pub use durable::{DurableChange, DurableRecord, DurableStore, WriteMarker};
pub use manager::{CacheManager, CachePredicate, CacheRead, CacheSource};
pub use policy::CachePolicy;
