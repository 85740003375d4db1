//! Cross-Component Synchronization
//!
//! The same-context invalidation bus and the durable-write watcher that
//! turns other contexts' writes into local invalidations.

pub mod bus;
pub mod watcher;

pub use bus::{InvalidationBus, Subscription};
pub use watcher::DurableWatcher;
