//! OpenAI-Compatible API Adapter
//!
//! Handles the chat completions SSE format (`data: {...}` lines terminated by
//! `data: [DONE]`).

use serde::Deserialize;

use insight_sync_core::streaming::{AdapterError, StreamAdapter, UnifiedStreamEvent};

#[derive(Debug, Deserialize)]
struct OpenAIEvent {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

/// Adapter for OpenAI-compatible SSE format
pub struct OpenAIAdapter {
    /// Set once a Complete event has been emitted for this stream
    completed: bool,
}

impl OpenAIAdapter {
    pub fn new() -> Self {
        Self { completed: false }
    }
}

impl Default for OpenAIAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAdapter for OpenAIAdapter {
    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn adapt(&mut self, input: &str) -> Result<Vec<UnifiedStreamEvent>, AdapterError> {
        let input = input.trim();
        // Comments, event names and keep-alives carry no data.
        let Some(data) = input.strip_prefix("data:") else {
            return Ok(vec![]);
        };
        let data = data.trim();

        if data == "[DONE]" {
            if self.completed {
                return Ok(vec![]);
            }
            self.completed = true;
            return Ok(vec![UnifiedStreamEvent::Complete { stop_reason: None }]);
        }

        let event: OpenAIEvent = serde_json::from_str(data)
            .map_err(|e| AdapterError::ParseError(format!("{}: {}", e, data)))?;

        if let Some(error) = event.error {
            return Ok(vec![UnifiedStreamEvent::Error {
                message: error.message,
                code: error.kind,
            }]);
        }

        let mut events = Vec::new();
        let mut finish = None;

        for choice in event.choices {
            if let Some(content) = choice.delta.and_then(|d| d.content) {
                if !content.is_empty() {
                    events.push(UnifiedStreamEvent::TextDelta { content });
                }
            }
            if choice.finish_reason.is_some() {
                finish = choice.finish_reason;
            }
        }

        if let Some(usage) = event.usage {
            events.push(UnifiedStreamEvent::Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            });
        }

        if finish.is_some() && !self.completed {
            self.completed = true;
            events.push(UnifiedStreamEvent::Complete {
                stop_reason: finish,
            });
        }

        Ok(events)
    }

    fn reset(&mut self) {
        self.completed = false;
    }
}
