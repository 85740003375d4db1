//! Token Stream Consumer
//!
//! Paces generation streams into a steady typewriter reveal for the chat
//! surface. The backend side of streaming lives in `insight-sync-llm`; this
//! module only consumes `UnifiedStreamEvent`s.

pub mod consumer;

pub use consumer::{StreamAbort, StreamObserver, StreamSession, StreamState, TypewriterConfig};
