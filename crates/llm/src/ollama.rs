//! Ollama Provider
//!
//! Implementation of the LlmProvider trait for an Ollama server using the
//! `/api/chat` endpoint (NDJSON streaming).

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::provider::{parse_http_error, pump_stream, LlmProvider};
use super::types::{
    LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message, ProviderConfig, StopReason,
    UsageStats,
};
use crate::http_client::{build_http_client, endpoint};
use crate::streaming_adapters::OllamaAdapter;
use insight_sync_core::streaming::UnifiedStreamEvent;

/// Default Ollama server
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Ollama provider
pub struct OllamaProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a new Ollama provider with the given configuration
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let client = build_http_client(config.proxy_url.as_deref())?;
        Ok(Self { config, client })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL)
    }

    /// Build the request body for `/api/chat`
    fn build_request_body(
        &self,
        messages: &[Message],
        system: Option<&str>,
        stream: bool,
        request_options: &LlmRequestOptions,
    ) -> serde_json::Value {
        let mut chat: Vec<serde_json::Value> = Vec::new();
        if let Some(sys) = system {
            chat.push(serde_json::json!({ "role": "system", "content": sys }));
        }
        for msg in messages {
            chat.push(serde_json::json!({
                "role": msg.role.as_str(),
                "content": msg.content,
            }));
        }

        let mut options = serde_json::json!({
            "temperature": request_options
                .temperature_override
                .unwrap_or(self.config.temperature),
            "num_predict": request_options
                .max_tokens_override
                .unwrap_or(self.config.max_tokens),
        });
        for (key, value) in &self.config.options {
            options[key] = value.clone();
        }

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": chat,
            "stream": stream,
            "options": options,
        });
        if request_options.json_mode {
            body["format"] = serde_json::json!("json");
        }
        body
    }

    async fn post_chat(
        &self,
        body: &serde_json::Value,
        request_options: &LlmRequestOptions,
    ) -> LlmResult<reqwest::Response> {
        let url = endpoint(self.base_url(), "api/chat")?;
        let mut request = self.client.post(url).json(body);
        if let Some(timeout) = request_options.timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LlmError::from_reqwest(e, request_options.timeout))?;

        let status = response.status().as_u16();
        if status != 200 {
            let body_text = response.text().await.unwrap_or_default();
            return Err(parse_http_error(status, &body_text, "ollama"));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn send_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let body = self.build_request_body(&messages, system.as_deref(), false, &request_options);
        let response = self.post_chat(&body, &request_options).await?;

        let body_text = response
            .text()
            .await
            .map_err(|e| LlmError::from_reqwest(e, request_options.timeout))?;
        let parsed: OllamaChatResponse =
            serde_json::from_str(&body_text).map_err(|e| LlmError::ParseError {
                message: format!("Failed to parse response: {}", e),
            })?;

        if let Some(error) = parsed.error {
            return Err(LlmError::ServerError {
                message: error,
                status: None,
            });
        }

        Ok(LlmResponse {
            content: parsed.message.map(|m| m.content).filter(|c| !c.is_empty()),
            stop_reason: parsed
                .done_reason
                .as_deref()
                .map(StopReason::from)
                .unwrap_or(StopReason::EndTurn),
            usage: UsageStats {
                input_tokens: parsed.prompt_eval_count.unwrap_or(0),
                output_tokens: parsed.eval_count.unwrap_or(0),
            },
            model: parsed.model.unwrap_or_else(|| self.config.model.clone()),
        })
    }

    async fn stream_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let body = self.build_request_body(&messages, system.as_deref(), true, &request_options);
        let response = self.post_chat(&body, &request_options).await?;

        let mut adapter = OllamaAdapter::new();
        pump_stream(response, &mut adapter, &tx, &self.config.model, &request_options).await
    }

    async fn health_check(&self) -> LlmResult<()> {
        self.list_models().await.map(|_| ())
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn list_models(&self) -> LlmResult<Option<Vec<String>>> {
        let url = endpoint(self.base_url(), "api/tags")?;
        let response = self.client.get(url).send().await.map_err(|e| {
            LlmError::ProviderUnavailable {
                message: format!("Ollama not reachable at {}: {}", self.base_url(), e),
            }
        })?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(parse_http_error(status, &body, "ollama"));
        }

        let tags: OllamaTags = response.json().await.map_err(|e| LlmError::ParseError {
            message: e.to_string(),
        })?;
        Ok(Some(tags.models.into_iter().map(|m| m.name).collect()))
    }
}

/// Non-streaming `/api/chat` response
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}
