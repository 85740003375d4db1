//! Services
//!
//! Business logic for the insight pipeline: streaming replay, analysis jobs,
//! the cache tiers and their synchronization, plus the chat and engine
//! surfaces that tie them together.

pub mod analysis;
pub mod cache;
pub mod chat;
pub mod insights;
pub mod streaming;
pub mod sync;

pub use chat::{ChatService, ChatSettings, ChatTurn};
pub use insights::{EmotionSeries, InsightEngine, RefreshOptions};
