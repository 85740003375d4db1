//! LLM Provider Trait
//!
//! Defines the common interface for all generation backends, plus the shared
//! line-oriented stream pump used by the streaming providers.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use super::types::{
    LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message, ProviderConfig, ProviderType,
    StopReason, UsageStats,
};
use crate::ollama::OllamaProvider;
use crate::openai::OpenAIProvider;
use insight_sync_core::streaming::{StreamAdapter, UnifiedStreamEvent};

/// Trait that all LLM providers must implement.
///
/// Provides a unified interface for:
/// - Single message completions (send_message)
/// - Streaming completions (stream_message)
/// - Health checking
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the provider name for identification.
    fn name(&self) -> &'static str;

    /// Returns the current model being used.
    fn model(&self) -> &str;

    /// Send a message and get a complete response.
    async fn send_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse>;

    /// Stream a message response via a channel.
    ///
    /// Events are forwarded in production order. Returns the accumulated
    /// response once the backend closes the stream, or early if the receiver
    /// is dropped.
    async fn stream_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse>;

    /// Check if the provider is healthy and reachable.
    async fn health_check(&self) -> LlmResult<()>;

    /// Get the configuration for this provider.
    fn config(&self) -> &ProviderConfig;

    /// List available models (if supported by provider).
    async fn list_models(&self) -> LlmResult<Option<Vec<String>>> {
        Ok(None)
    }
}

/// Build the provider for a configuration.
pub fn create_provider(config: ProviderConfig) -> LlmResult<Arc<dyn LlmProvider>> {
    if config.provider.requires_api_key() && config.api_key.is_none() {
        return Err(missing_api_key_error(config.provider.as_str()));
    }
    let provider: Arc<dyn LlmProvider> = match config.provider {
        ProviderType::Ollama => Arc::new(OllamaProvider::new(config)?),
        ProviderType::OpenAI => Arc::new(OpenAIProvider::new(config)?),
    };
    Ok(provider)
}

/// Helper function to create an error for missing API key
pub fn missing_api_key_error(provider: &str) -> LlmError {
    LlmError::AuthenticationFailed {
        message: format!("API key not configured for {}", provider),
    }
}

/// Helper function to parse HTTP error status codes
pub fn parse_http_error(status: u16, body: &str, provider: &str) -> LlmError {
    match status {
        401 => LlmError::AuthenticationFailed {
            message: format!("{}: Invalid API key", provider),
        },
        403 => LlmError::AuthenticationFailed {
            message: format!("{}: Access denied", provider),
        },
        404 => LlmError::ModelNotFound {
            model: body.to_string(),
        },
        408 => LlmError::Timeout { seconds: 0 },
        429 => LlmError::RateLimited {
            message: body.to_string(),
            retry_after: None,
        },
        400 => LlmError::InvalidRequest {
            message: body.to_string(),
        },
        500..=599 => LlmError::ServerError {
            message: body.to_string(),
            status: Some(status),
        },
        _ => LlmError::Other {
            message: format!("HTTP {}: {}", status, body),
        },
    }
}

/// Drive a line-delimited streaming body through an adapter.
///
/// Complete lines are adapted as they arrive; a trailing partial line is
/// flushed at end of body. Every adapted event is forwarded on `tx`. An
/// in-band error event from the backend ends the pump with an error.
pub(crate) async fn pump_stream(
    response: reqwest::Response,
    adapter: &mut dyn StreamAdapter,
    tx: &mpsc::Sender<UnifiedStreamEvent>,
    model: &str,
    request_options: &LlmRequestOptions,
) -> LlmResult<LlmResponse> {
    let mut acc = StreamAccumulator::new(model);
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    'outer: while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| LlmError::from_reqwest(e, request_options.timeout))?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(line_end) = buffer.find('\n') {
            let line: String = buffer.drain(..=line_end).collect();
            match acc.feed(adapter, line.trim(), tx).await? {
                PumpControl::Continue => {}
                PumpControl::ReceiverGone => break 'outer,
            }
        }
    }

    let rest = std::mem::take(&mut buffer);
    if !rest.trim().is_empty() && !tx.is_closed() {
        acc.feed(adapter, rest.trim(), tx).await?;
    }

    Ok(acc.finish())
}

enum PumpControl {
    Continue,
    ReceiverGone,
}

struct StreamAccumulator {
    model: String,
    content: String,
    usage: UsageStats,
    stop_reason: StopReason,
}

impl StreamAccumulator {
    fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            content: String::new(),
            usage: UsageStats::default(),
            stop_reason: StopReason::EndTurn,
        }
    }

    async fn feed(
        &mut self,
        adapter: &mut dyn StreamAdapter,
        line: &str,
        tx: &mpsc::Sender<UnifiedStreamEvent>,
    ) -> LlmResult<PumpControl> {
        if line.is_empty() {
            return Ok(PumpControl::Continue);
        }

        let events = match adapter.adapt(line) {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("[{}] Skipping unparseable stream line: {}", adapter.provider_name(), e);
                return Ok(PumpControl::Continue);
            }
        };

        for event in events {
            let backend_error = match &event {
                UnifiedStreamEvent::TextDelta { content } => {
                    self.content.push_str(content);
                    None
                }
                UnifiedStreamEvent::Usage {
                    input_tokens,
                    output_tokens,
                } => {
                    self.usage.input_tokens = *input_tokens;
                    self.usage.output_tokens = *output_tokens;
                    None
                }
                UnifiedStreamEvent::Complete {
                    stop_reason: Some(reason),
                } => {
                    self.stop_reason = StopReason::from(reason.as_str());
                    None
                }
                UnifiedStreamEvent::Complete { stop_reason: None } => None,
                UnifiedStreamEvent::Error { message, .. } => Some(message.clone()),
            };

            if tx.send(event).await.is_err() {
                tracing::debug!("[{}] Stream receiver dropped, stopping", adapter.provider_name());
                return Ok(PumpControl::ReceiverGone);
            }

            if let Some(message) = backend_error {
                return Err(LlmError::ServerError {
                    message,
                    status: None,
                });
            }
        }

        Ok(PumpControl::Continue)
    }

    fn finish(self) -> LlmResponse {
        LlmResponse {
            content: if self.content.is_empty() {
                None
            } else {
                Some(self.content)
            },
            stop_reason: self.stop_reason,
            usage: self.usage,
            model: self.model,
        }
    }
}
