//! Integration Tests Module
//!
//! End-to-end tests for the insight pipeline over in-memory SQLite, a
//! scripted generation backend and a manual clock. No network calls are made.

// Scripted provider, observers and engine builders
mod support;

// Chat turns through the stream consumer, busy flag and safety valve
mod streaming_test;

// Analysis jobs: guards, fallbacks, timeouts, cancellation, highlights
mod analysis_test;

// Cache tiers, forced freshness and cross-context invalidation
mod cache_sync_test;

// Two execution contexts sharing one durable tier
mod end_to_end_test;
