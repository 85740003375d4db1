//! Unified Stream Event Types
//!
//! Provider-agnostic event types and adapter trait for processing incremental
//! generation output. These types are shared across the LLM crate (provider
//! implementations) and the root crate (stream consumer, chat service).

use serde::{Deserialize, Serialize};

/// Unified streaming event that all provider adapters convert to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnifiedStreamEvent {
    /// Text content delta from the model
    TextDelta { content: String },

    /// Token usage information
    Usage {
        input_tokens: u32,
        output_tokens: u32,
    },

    /// Error during streaming
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// Stream complete
    Complete {
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },
}

impl UnifiedStreamEvent {
    /// Build a text delta event.
    pub fn text(content: impl Into<String>) -> Self {
        Self::TextDelta {
            content: content.into(),
        }
    }

    /// Whether this event ends the stream (complete or error).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}

/// Errors that can occur during stream adaptation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum AdapterError {
    /// Invalid format that couldn't be parsed
    InvalidFormat(String),
    /// JSON/data parsing error
    ParseError(String),
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterError::InvalidFormat(msg) => write!(f, "Invalid format: {}", msg),
            AdapterError::ParseError(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for AdapterError {}

/// Trait for adapting provider-specific stream formats to unified events.
///
/// The Ollama (NDJSON) and OpenAI-compatible (SSE) adapters implement this
/// trait so providers share one line-oriented processing loop.
pub trait StreamAdapter: Send + Sync {
    /// Returns the provider name for logging and identification.
    fn provider_name(&self) -> &'static str;

    /// Adapt a raw stream line/chunk to unified events.
    ///
    /// A single input line may produce zero, one, or multiple events.
    fn adapt(&mut self, input: &str) -> Result<Vec<UnifiedStreamEvent>, AdapterError>;

    /// Reset adapter state for a new stream.
    fn reset(&mut self) {}
}
