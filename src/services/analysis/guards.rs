//! Minimum-Input Guards
//!
//! Below its guard an analysis is not issued at all; the caller gets an
//! explicit "not enough data yet" outcome instead of a fallback value.

use serde::Serialize;

use insight_sync_core::InsightKind;

use crate::models::settings::AppConfig;
use crate::models::transcript::TranscriptWindow;

/// Why a job was not issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InsufficientInput {
    pub kind: InsightKind,
    pub reason: String,
    pub required: u32,
    pub available: u32,
}

impl InsufficientInput {
    pub fn new(kind: InsightKind, reason: impl Into<String>, required: u32, available: u32) -> Self {
        Self {
            kind,
            reason: reason.into(),
            required,
            available,
        }
    }
}

impl std::fmt::Display for InsufficientInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "not enough data for {}: {} ({} of {})",
            self.kind, self.reason, self.available, self.required
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputGuards {
    pub emotion_min_turns: u32,
    pub reflection_min_user_turns: u32,
    pub pattern_min_turns: u32,
    pub pattern_min_days: u32,
    pub habit_min_turns: u32,
    pub habit_min_days: u32,
}

impl InputGuards {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            emotion_min_turns: config.emotion_min_turns,
            reflection_min_user_turns: config.reflection_min_user_turns,
            pattern_min_turns: config.pattern_min_turns,
            pattern_min_days: config.pattern_min_days,
            habit_min_turns: config.habit_min_turns,
            habit_min_days: config.habit_min_days,
        }
    }

    /// Check `window` against the guard for `kind`. Highlights have no
    /// transcript guard; they are gated on stored emotion data instead.
    pub fn check(&self, kind: InsightKind, window: &TranscriptWindow) -> Result<(), InsufficientInput> {
        let turns = count(window.substantive_count());
        let days = count(window.days_with_data());
        match kind {
            InsightKind::Emotion => at_least(kind, "substantive turns", self.emotion_min_turns, turns),
            InsightKind::Reflection => at_least(
                kind,
                "substantive user turns",
                self.reflection_min_user_turns,
                count(window.substantive_user_texts().len()),
            ),
            InsightKind::PatternSet => {
                at_least(kind, "substantive turns", self.pattern_min_turns, turns)?;
                at_least(kind, "days with conversations", self.pattern_min_days, days)
            }
            InsightKind::HabitSet => {
                at_least(kind, "substantive turns", self.habit_min_turns, turns)?;
                at_least(kind, "days with conversations", self.habit_min_days, days)
            }
            InsightKind::Highlights => Ok(()),
        }
    }
}

impl Default for InputGuards {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

fn at_least(kind: InsightKind, what: &str, required: u32, available: u32) -> Result<(), InsufficientInput> {
    if available >= required {
        Ok(())
    } else {
        Err(InsufficientInput::new(kind, what, required, available))
    }
}
