//! Ollama API Adapter
//!
//! Handles the Ollama NDJSON stream format (`/api/chat` and `/api/generate`).
//! Reasoning models wrap their chain of thought in `<think>` tags; that text is
//! withheld so only the answer reaches the transcript and the parser.

use serde::Deserialize;

use insight_sync_core::streaming::{AdapterError, StreamAdapter, UnifiedStreamEvent};

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Ollama stream line
#[derive(Debug, Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: Option<OllamaMessage>,
    /// `/api/generate` carries text here instead of `message`
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ThinkState {
    Normal,
    InThinking,
}

/// Adapter for Ollama JSON stream format
pub struct OllamaAdapter {
    state: ThinkState,
    /// Holds a possible partial tag across chunk boundaries
    buffer: String,
}

impl OllamaAdapter {
    pub fn new() -> Self {
        Self {
            state: ThinkState::Normal,
            buffer: String::new(),
        }
    }

    /// Length of the longest suffix of `text` that is a proper prefix of `tag`.
    fn partial_tag_len(text: &str, tag: &str) -> usize {
        (1..tag.len())
            .rev()
            .find(|&n| text.ends_with(&tag[..n]))
            .unwrap_or(0)
    }

    /// Consume the buffer, returning visible text and keeping any partial tag.
    fn process_buffer(&mut self) -> String {
        let mut visible = String::new();

        loop {
            match self.state {
                ThinkState::Normal => {
                    if let Some(pos) = self.buffer.find(THINK_OPEN) {
                        visible.push_str(&self.buffer[..pos]);
                        self.buffer.drain(..pos + THINK_OPEN.len());
                        self.state = ThinkState::InThinking;
                    } else {
                        let keep = Self::partial_tag_len(&self.buffer, THINK_OPEN);
                        let cut = self.buffer.len() - keep;
                        visible.push_str(&self.buffer[..cut]);
                        self.buffer.drain(..cut);
                        break;
                    }
                }
                ThinkState::InThinking => {
                    if let Some(pos) = self.buffer.find(THINK_CLOSE) {
                        self.buffer.drain(..pos + THINK_CLOSE.len());
                        self.state = ThinkState::Normal;
                    } else {
                        let keep = Self::partial_tag_len(&self.buffer, THINK_CLOSE);
                        let cut = self.buffer.len() - keep;
                        self.buffer.drain(..cut);
                        break;
                    }
                }
            }
        }

        visible
    }

    /// Release a held partial tag as plain text at end of stream.
    fn flush(&mut self) -> String {
        match self.state {
            ThinkState::Normal => std::mem::take(&mut self.buffer),
            ThinkState::InThinking => {
                self.buffer.clear();
                String::new()
            }
        }
    }
}

impl Default for OllamaAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAdapter for OllamaAdapter {
    fn provider_name(&self) -> &'static str {
        "ollama"
    }

    fn adapt(&mut self, input: &str) -> Result<Vec<UnifiedStreamEvent>, AdapterError> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(vec![]);
        }

        let chunk: OllamaChunk = serde_json::from_str(input)
            .map_err(|e| AdapterError::ParseError(format!("{}: {}", e, input)))?;

        if let Some(error) = chunk.error {
            return Ok(vec![UnifiedStreamEvent::Error {
                message: error,
                code: None,
            }]);
        }

        let mut events = Vec::new();

        let text = chunk
            .message
            .map(|m| m.content)
            .or(chunk.response)
            .unwrap_or_default();
        if !text.is_empty() {
            self.buffer.push_str(&text);
            let visible = self.process_buffer();
            if !visible.is_empty() {
                events.push(UnifiedStreamEvent::TextDelta { content: visible });
            }
        }

        if chunk.done {
            let tail = self.flush();
            if !tail.is_empty() {
                events.push(UnifiedStreamEvent::TextDelta { content: tail });
            }
            if chunk.prompt_eval_count.is_some() || chunk.eval_count.is_some() {
                events.push(UnifiedStreamEvent::Usage {
                    input_tokens: chunk.prompt_eval_count.unwrap_or(0),
                    output_tokens: chunk.eval_count.unwrap_or(0),
                });
            }
            events.push(UnifiedStreamEvent::Complete {
                stop_reason: chunk.done_reason,
            });
        }

        Ok(events)
    }

    fn reset(&mut self) {
        self.state = ThinkState::Normal;
        self.buffer.clear();
    }
}
