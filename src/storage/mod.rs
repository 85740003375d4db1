//! Storage Layer
//!
//! Handles all data persistence: SQLite durable tier, the local cache tier,
//! the transcript store and JSON config.

pub mod config;
pub mod database;
pub mod local_cache;
pub mod transcript;

pub use config::*;
pub use database::*;
pub use local_cache::*;
pub use transcript::*;
