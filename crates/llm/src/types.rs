//! LLM Types
//!
//! Request, response, configuration and error types shared by all providers.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Supported generation backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// Local or remote Ollama server (`/api/chat`)
    Ollama,
    /// Any OpenAI-compatible chat completions endpoint
    #[serde(rename = "openai")]
    OpenAI,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Ollama => "ollama",
            ProviderType::OpenAI => "openai",
        }
    }

    /// Whether the provider needs an API key to be usable.
    pub fn requires_api_key(&self) -> bool {
        matches!(self, ProviderType::OpenAI)
    }
}

impl Default for ProviderType {
    fn default() -> Self {
        Self::Ollama
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(ProviderType::Ollama),
            "openai" | "openai-compatible" => Ok(ProviderType::OpenAI),
            other => Err(LlmError::InvalidRequest {
                message: format!("Unknown provider: {}", other),
            }),
        }
    }
}

/// Configuration for an LLM provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// The provider type
    pub provider: ProviderType,
    /// API key (not needed for Ollama)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Base URL override (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Model name to use
    pub model: String,
    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Temperature (0.0 - 1.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Proxy URL (`http://`, `https://` or `socks5://`)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub proxy_url: Option<String>,
    /// Provider-specific options merged into the request body
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: ProviderType::Ollama,
            api_key: None,
            base_url: None,
            model: "llama3.2".to_string(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            proxy_url: None,
            options: HashMap::new(),
        }
    }
}

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// A single conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Why generation stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    Other(String),
}

impl From<&str> for StopReason {
    fn from(s: &str) -> Self {
        match s {
            "stop" | "end_turn" => StopReason::EndTurn,
            "length" | "max_tokens" => StopReason::MaxTokens,
            "stop_sequence" => StopReason::StopSequence,
            other => StopReason::Other(other.to_string()),
        }
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Complete response from a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub stop_reason: StopReason,
    pub usage: UsageStats,
    pub model: String,
}

impl LlmResponse {
    /// Response text, empty when the model produced nothing.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Per-request overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmRequestOptions {
    pub temperature_override: Option<f32>,
    pub max_tokens_override: Option<u32>,
    /// Ask the backend to constrain output to a JSON object when supported
    pub json_mode: bool,
    /// Request-level timeout enforced by the HTTP client
    pub timeout: Option<Duration>,
}

impl LlmRequestOptions {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature_override = Some(temperature);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

/// Errors returned by providers
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LlmError {
    /// Authentication failed (invalid API key)
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Rate limit exceeded
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<u32>,
    },

    /// Model not found or not available
    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    /// Invalid request (bad parameters)
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Server error from the provider
    #[error("Server error ({status:?}): {message}")]
    ServerError {
        message: String,
        status: Option<u16>,
    },

    /// Network/connection error
    #[error("Network error: {message}")]
    NetworkError { message: String },

    /// The request did not finish within its deadline
    #[error("Request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Response parsing error
    #[error("Parse error: {message}")]
    ParseError { message: String },

    /// Provider not available (e.g., Ollama not running)
    #[error("Provider unavailable: {message}")]
    ProviderUnavailable { message: String },

    /// Other error
    #[error("Error: {message}")]
    Other { message: String },
}

impl LlmError {
    /// Whether the failure is a reachability/timeout problem rather than a
    /// rejection of the request itself.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::NetworkError { .. }
                | LlmError::Timeout { .. }
                | LlmError::ServerError { .. }
                | LlmError::RateLimited { .. }
                | LlmError::ProviderUnavailable { .. }
        )
    }

    /// Map a reqwest transport error, separating timeouts from other failures.
    pub fn from_reqwest(err: reqwest::Error, timeout: Option<Duration>) -> Self {
        if err.is_timeout() {
            LlmError::Timeout {
                seconds: timeout.map(|t| t.as_secs()).unwrap_or_default(),
            }
        } else if err.is_connect() {
            LlmError::ProviderUnavailable {
                message: err.to_string(),
            }
        } else {
            LlmError::NetworkError {
                message: err.to_string(),
            }
        }
    }
}

/// Result type alias for provider calls
pub type LlmResult<T> = Result<T, LlmError>;
