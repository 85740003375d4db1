//! OpenAI-Compatible Provider
//!
//! Implementation of the LlmProvider trait for any chat completions endpoint
//! speaking the OpenAI wire format (hosted OpenAI, vLLM, LM Studio, proxies).

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::provider::{missing_api_key_error, parse_http_error, pump_stream, LlmProvider};
use super::types::{
    LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message, ProviderConfig, StopReason,
    UsageStats,
};
use crate::http_client::{build_http_client, endpoint};
use crate::streaming_adapters::OpenAIAdapter;
use insight_sync_core::streaming::UnifiedStreamEvent;

/// Default OpenAI API base
const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI-compatible provider
pub struct OpenAIProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// Create a new provider with the given configuration
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let client = build_http_client(config.proxy_url.as_deref())?;
        Ok(Self { config, client })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(OPENAI_API_BASE)
    }

    fn api_key(&self) -> LlmResult<&str> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| missing_api_key_error("openai"))
    }

    /// Build the request body for the API
    fn build_request_body(
        &self,
        messages: &[Message],
        system: Option<&str>,
        stream: bool,
        request_options: &LlmRequestOptions,
    ) -> serde_json::Value {
        let mut openai_messages: Vec<serde_json::Value> = Vec::new();
        if let Some(sys) = system {
            openai_messages.push(serde_json::json!({ "role": "system", "content": sys }));
        }
        for msg in messages {
            openai_messages.push(serde_json::json!({
                "role": msg.role.as_str(),
                "content": msg.content,
            }));
        }

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": openai_messages,
            "max_tokens": request_options
                .max_tokens_override
                .unwrap_or(self.config.max_tokens),
            "temperature": request_options
                .temperature_override
                .unwrap_or(self.config.temperature),
            "stream": stream,
        });

        if request_options.json_mode {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        // Add stream options for usage in streaming
        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        for (key, value) in &self.config.options {
            body[key] = value.clone();
        }

        body
    }

    async fn post_completions(
        &self,
        body: &serde_json::Value,
        request_options: &LlmRequestOptions,
    ) -> LlmResult<reqwest::Response> {
        let api_key = self.api_key()?;
        let url = endpoint(self.base_url(), "chat/completions")?;

        let mut request = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(body);
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
            return Err(parse_http_error(status, &body_text, "openai"));
        }
        Ok(response)
    }

    /// Parse a response from the API
    fn parse_response(&self, response: OpenAIResponse) -> LlmResponse {
        let choice = response.choices.into_iter().next();
        let stop_reason = choice
            .as_ref()
            .and_then(|c| c.finish_reason.as_deref())
            .map(StopReason::from)
            .unwrap_or(StopReason::EndTurn);
        let content = choice
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|c| !c.is_empty());

        let usage = response
            .usage
            .map(|u| UsageStats {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        LlmResponse {
            content,
            stop_reason,
            usage,
            model: response.model.unwrap_or_else(|| self.config.model.clone()),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    fn name(&self) -> &'static str {
        "openai"
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
        let response = self.post_completions(&body, &request_options).await?;

        let body_text = response
            .text()
            .await
            .map_err(|e| LlmError::from_reqwest(e, request_options.timeout))?;
        let parsed: OpenAIResponse =
            serde_json::from_str(&body_text).map_err(|e| LlmError::ParseError {
                message: format!("Failed to parse response: {}", e),
            })?;

        Ok(self.parse_response(parsed))
    }

    async fn stream_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let body = self.build_request_body(&messages, system.as_deref(), true, &request_options);
        let response = self.post_completions(&body, &request_options).await?;

        let mut adapter = OpenAIAdapter::new();
        pump_stream(response, &mut adapter, &tx, &self.config.model, &request_options).await
    }

    async fn health_check(&self) -> LlmResult<()> {
        self.list_models().await.map(|_| ())
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn list_models(&self) -> LlmResult<Option<Vec<String>>> {
        let api_key = self.api_key()?;
        let url = endpoint(self.base_url(), "models")?;

        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {}", api_key))
            .send()
            .await
            .map_err(|e| LlmError::from_reqwest(e, None))?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(parse_http_error(status, &body, "openai"));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| LlmError::ParseError {
            message: e.to_string(),
        })?;

        let models = body["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["id"].as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Some(models))
    }
}

/// Chat completions response format
#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ResponseUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
