//! Insight Sync LLM
//!
//! Provides a unified interface for the generation backend used by chat and
//! analysis jobs:
//! - Ollama (local or remote, `/api/chat`)
//! - OpenAI-compatible chat completions endpoints
//!
//! Also includes provider-specific streaming adapters and the HTTP client factory.

pub mod http_client;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod streaming_adapters;
pub mod types;

// Re-export main types
pub use http_client::build_http_client;
pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;
pub use provider::{create_provider, LlmProvider};
pub use types::*;

// Re-export streaming adapters
pub use streaming_adapters::{OllamaAdapter, OpenAIAdapter};
