//! Settings Models
//!
//! Application configuration and settings data structures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use insight_sync_core::{InsightKind, TtlClass};
use insight_sync_llm::{ProviderConfig, ProviderType};

/// Application configuration stored in config.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Generation backend: "ollama" or "openai"
    pub provider: String,
    /// Backend base URL (provider default when unset)
    pub base_url: Option<String>,
    /// Model used for chat and analysis
    pub model: String,
    /// API key for providers that need one
    pub api_key: Option<String>,
    /// Optional HTTP/SOCKS proxy for backend calls
    pub proxy_url: Option<String>,
    /// Sampling temperature for chat turns
    pub chat_temperature: f32,
    /// Sampling temperature for structured analyses
    pub analysis_temperature: f32,
    /// Generation cap per request
    pub max_tokens: u32,
    /// Prior turns sent along with a chat prompt
    pub chat_history_turns: u32,

    /// Per-kind analysis timeouts in seconds
    pub emotion_timeout_secs: u64,
    pub reflection_timeout_secs: u64,
    pub pattern_timeout_secs: u64,
    pub habit_timeout_secs: u64,

    /// Minimum-input guards
    pub emotion_min_turns: u32,
    pub reflection_min_user_turns: u32,
    pub pattern_min_turns: u32,
    pub pattern_min_days: u32,
    pub habit_min_turns: u32,
    pub habit_min_days: u32,

    /// Analysis windows in days
    pub pattern_window_days: u32,
    pub habit_window_days: u32,
    pub highlights_window_days: u32,

    /// Local-tier TTLs in seconds
    pub ttl_short_secs: u64,
    pub ttl_medium_secs: u64,
    pub ttl_long_secs: u64,
    /// Forced-freshness window opened after a write
    pub forced_freshness_secs: u64,
    /// Persist the local tier between runs; needs `context_name`
    pub local_cache_snapshot: bool,
    /// Stable execution context id. Unset means a fresh id per run.
    pub context_name: Option<String>,

    /// Typewriter cadence
    pub typewriter_tick_ms: u64,
    pub typewriter_chars_per_tick: u32,
    pub drain_wait_cap_ms: u64,
    pub drain_poll_ms: u64,
    /// Busy flag ceiling for a chat turn
    pub busy_ceiling_secs: u64,

    /// Durable-write watcher poll interval
    pub watcher_poll_secs: u64,
    /// UTC offset defining the calendar day, in minutes
    pub day_offset_minutes: i32,

    /// Enable debug logging
    pub debug_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: None,
            model: "llama3.2".to_string(),
            api_key: None,
            proxy_url: None,
            chat_temperature: 0.7,
            analysis_temperature: 0.3,
            max_tokens: 1024,
            chat_history_turns: 5,
            emotion_timeout_secs: 30,
            reflection_timeout_secs: 90,
            pattern_timeout_secs: 60,
            habit_timeout_secs: 90,
            emotion_min_turns: 2,
            reflection_min_user_turns: 1,
            pattern_min_turns: 1,
            pattern_min_days: 1,
            habit_min_turns: 1,
            habit_min_days: 1,
            pattern_window_days: 7,
            habit_window_days: 90,
            highlights_window_days: 90,
            ttl_short_secs: 1800,
            ttl_medium_secs: 3600,
            ttl_long_secs: 86400,
            forced_freshness_secs: 300,
            local_cache_snapshot: false,
            context_name: None,
            typewriter_tick_ms: 30,
            typewriter_chars_per_tick: 2,
            drain_wait_cap_ms: 3000,
            drain_poll_ms: 50,
            busy_ceiling_secs: 45,
            watcher_poll_secs: 60,
            day_offset_minutes: 330,
            debug_mode: false,
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Settings update request (partial update)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SettingsUpdate {
    pub provider: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub proxy_url: Option<String>,
    pub chat_temperature: Option<f32>,
    pub analysis_temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub emotion_timeout_secs: Option<u64>,
    pub reflection_timeout_secs: Option<u64>,
    pub pattern_timeout_secs: Option<u64>,
    pub habit_timeout_secs: Option<u64>,
    pub pattern_window_days: Option<u32>,
    pub habit_window_days: Option<u32>,
    pub ttl_short_secs: Option<u64>,
    pub ttl_medium_secs: Option<u64>,
    pub ttl_long_secs: Option<u64>,
    pub forced_freshness_secs: Option<u64>,
    pub typewriter_tick_ms: Option<u64>,
    pub typewriter_chars_per_tick: Option<u32>,
    pub busy_ceiling_secs: Option<u64>,
    pub watcher_poll_secs: Option<u64>,
    pub day_offset_minutes: Option<i32>,
    pub debug_mode: Option<bool>,
}

impl AppConfig {
    /// Apply a partial update to the configuration
    pub fn apply_update(&mut self, update: SettingsUpdate) {
        if let Some(value) = update.provider {
            self.provider = value;
        }
        if let Some(value) = update.model {
            self.model = value;
        }
        if let Some(value) = update.chat_temperature {
            self.chat_temperature = value;
        }
        if let Some(value) = update.analysis_temperature {
            self.analysis_temperature = value;
        }
        if let Some(value) = update.max_tokens {
            self.max_tokens = value;
        }
        if let Some(value) = update.emotion_timeout_secs {
            self.emotion_timeout_secs = value;
        }
        if let Some(value) = update.reflection_timeout_secs {
            self.reflection_timeout_secs = value;
        }
        if let Some(value) = update.pattern_timeout_secs {
            self.pattern_timeout_secs = value;
        }
        if let Some(value) = update.habit_timeout_secs {
            self.habit_timeout_secs = value;
        }
        if let Some(value) = update.pattern_window_days {
            self.pattern_window_days = value;
        }
        if let Some(value) = update.habit_window_days {
            self.habit_window_days = value;
        }
        if let Some(value) = update.ttl_short_secs {
            self.ttl_short_secs = value;
        }
        if let Some(value) = update.ttl_medium_secs {
            self.ttl_medium_secs = value;
        }
        if let Some(value) = update.ttl_long_secs {
            self.ttl_long_secs = value;
        }
        if let Some(value) = update.forced_freshness_secs {
            self.forced_freshness_secs = value;
        }
        if let Some(value) = update.typewriter_tick_ms {
            self.typewriter_tick_ms = value;
        }
        if let Some(value) = update.typewriter_chars_per_tick {
            self.typewriter_chars_per_tick = value;
        }
        if let Some(value) = update.busy_ceiling_secs {
            self.busy_ceiling_secs = value;
        }
        if let Some(value) = update.watcher_poll_secs {
            self.watcher_poll_secs = value;
        }
        if let Some(value) = update.day_offset_minutes {
            self.day_offset_minutes = value;
        }
        if let Some(value) = update.debug_mode {
            self.debug_mode = value;
        }

        // An empty string clears an optional setting.
        if let Some(value) = update.base_url {
            self.base_url = non_empty(value);
        }
        if let Some(value) = update.api_key {
            self.api_key = non_empty(value);
        }
        if let Some(value) = update.proxy_url {
            self.proxy_url = non_empty(value);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        let provider: ProviderType = self
            .provider
            .parse()
            .map_err(|_| format!("Invalid provider: {}. Must be 'ollama' or 'openai'", self.provider))?;

        if provider.requires_api_key() && self.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(format!("Provider '{}' requires an api_key", self.provider));
        }

        if self.model.trim().is_empty() {
            return Err("model must not be empty".to_string());
        }

        for (name, temp) in [
            ("chat_temperature", self.chat_temperature),
            ("analysis_temperature", self.analysis_temperature),
        ] {
            if !(0.0..=2.0).contains(&temp) {
                return Err(format!("{} must be between 0.0 and 2.0", name));
            }
        }

        for (name, value) in [
            ("emotion_timeout_secs", self.emotion_timeout_secs),
            ("reflection_timeout_secs", self.reflection_timeout_secs),
            ("pattern_timeout_secs", self.pattern_timeout_secs),
            ("habit_timeout_secs", self.habit_timeout_secs),
            ("ttl_short_secs", self.ttl_short_secs),
            ("ttl_medium_secs", self.ttl_medium_secs),
            ("ttl_long_secs", self.ttl_long_secs),
            ("typewriter_tick_ms", self.typewriter_tick_ms),
            ("drain_poll_ms", self.drain_poll_ms),
            ("busy_ceiling_secs", self.busy_ceiling_secs),
            ("watcher_poll_secs", self.watcher_poll_secs),
        ] {
            if value == 0 {
                return Err(format!("{} must be greater than zero", name));
            }
        }

        if self.typewriter_chars_per_tick == 0 {
            return Err("typewriter_chars_per_tick must be greater than zero".to_string());
        }

        if self.ttl_short_secs > self.ttl_medium_secs || self.ttl_medium_secs > self.ttl_long_secs {
            return Err("TTLs must satisfy short <= medium <= long".to_string());
        }

        if self.day_offset_minutes.abs() > 14 * 60 {
            return Err(format!(
                "day_offset_minutes must be within ±840, got {}",
                self.day_offset_minutes
            ));
        }

        if self.pattern_window_days == 0
            || self.habit_window_days == 0
            || self.highlights_window_days == 0
        {
            return Err("analysis windows must cover at least one day".to_string());
        }

        Ok(())
    }

    /// Backend configuration for the generation provider.
    pub fn provider_config(&self) -> Result<ProviderConfig, String> {
        let provider: ProviderType = self
            .provider
            .parse()
            .map_err(|_| format!("Invalid provider: {}", self.provider))?;
        Ok(ProviderConfig {
            provider,
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.chat_temperature,
            proxy_url: self.proxy_url.clone(),
            ..Default::default()
        })
    }

    /// Local-tier TTL for a staleness class.
    pub fn ttl_secs(&self, class: TtlClass) -> u64 {
        match class {
            TtlClass::Short => self.ttl_short_secs,
            TtlClass::Medium => self.ttl_medium_secs,
            TtlClass::Long => self.ttl_long_secs,
        }
    }

    /// Backend timeout for an analysis kind.
    pub fn analysis_timeout(&self, kind: InsightKind) -> Duration {
        let secs = match kind {
            InsightKind::Emotion => self.emotion_timeout_secs,
            InsightKind::Reflection => self.reflection_timeout_secs,
            InsightKind::PatternSet => self.pattern_timeout_secs,
            InsightKind::HabitSet => self.habit_timeout_secs,
            InsightKind::Highlights => self.emotion_timeout_secs,
        };
        Duration::from_secs(secs)
    }
}
