//! Insight Sync Core
//!
//! Foundational types for the Insight Sync workspace: error types, the insight
//! domain model, invalidation events, and provider-agnostic stream events.
//! This crate has zero dependencies on application-level code (database,
//! HTTP providers, runtime).
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `insight` - Kinds, scopes, period keys and typed payloads
//! - `invalidation` - Invalidation events and subscription filters
//! - `streaming` - Unified stream event types and adapter trait
//!
//! ## Design Principles
//!
//! 1. **Minimal dependencies** - serde, thiserror, chrono and uuid only
//! 2. **Typed payloads** - a result's kind is derived from its payload variant
//! 3. **Unidirectional dependency** - this crate depends on nothing else in the workspace

pub mod error;
pub mod insight;
pub mod invalidation;
pub mod streaming;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Insight Model ──────────────────────────────────────────────────────
pub use insight::{
    clamp_score, AnalysisResult, CorrelationId, DayHighlight, EmotionScores, HabitCategory,
    HabitInsights, HabitPatterns, HabitSet, HabitSuggestion, Highlights, InsightKind,
    InsightPayload, Mood, Origin, PatternInsights, PatternSet, PeriodKey, ReflectionEntry, Scope,
    TriggerGroups, TtlClass,
};

// ── Invalidation ───────────────────────────────────────────────────────
pub use invalidation::{InvalidationEvent, InvalidationReason, ScopeFilter};

// ── Streaming Types ────────────────────────────────────────────────────
pub use streaming::{AdapterError, StreamAdapter, UnifiedStreamEvent};
