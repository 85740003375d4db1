//! Insight Sync - Rust Backend Library
//!
//! Derived-insight pipeline and multi-tier cache synchronization engine for a
//! conversational wellbeing client. It includes:
//! - Chat streaming with a paced typewriter reveal
//! - Background analysis jobs with layered output parsing
//! - A local/durable cache with forced-freshness and invalidation
//! - Storage layer (SQLite, local cache snapshot, config)

pub mod models;
pub mod services;
pub mod state;
pub mod storage;
pub mod utils;

pub use insight_sync_core::{AnalysisResult, InsightKind, InsightPayload, Origin, Scope};
pub use models::settings::{AppConfig, SettingsUpdate};
pub use services::insights::{InsightEngine, RefreshOptions};
pub use state::AppState;
pub use utils::error::{AppError, AppResult};
