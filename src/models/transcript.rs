//! Transcript Models
//!
//! Conversation turns as stored in the transcript store, plus the
//! "substantive turn" rules the analysis guards are built on.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::error::AppError;

/// Bare greetings that carry no analyzable content.
const GREETINGS: &[&str] = &[
    "hey", "hi", "hello", "hii", "hiii", "hiiii", "sup", "yo", "what's up", "wassup",
];

/// Turns at or below this many characters are never substantive.
const MIN_SUBSTANTIVE_CHARS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TurnRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(TurnRole::User),
            "assistant" | "ai" => Ok(TurnRole::Assistant),
            other => Err(AppError::validation(format!("Unknown turn role: {}", other))),
        }
    }
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    /// Model that produced an assistant turn
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
            model: None,
            created_at: at,
        }
    }

    pub fn assistant(text: impl Into<String>, model: Option<String>, at: DateTime<Utc>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
            model,
            created_at: at,
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == TurnRole::User
    }

    /// Non-trivial content: longer than a few characters and not a bare greeting.
    pub fn is_substantive(&self) -> bool {
        is_substantive_text(&self.text)
    }
}

/// Whether `text` is a bare greeting, optionally followed by `!` or `.`.
pub fn is_simple_greeting(text: &str) -> bool {
    let clean = text.trim().to_lowercase();
    let stripped = clean
        .strip_suffix('!')
        .or_else(|| clean.strip_suffix('.'))
        .unwrap_or(&clean);
    GREETINGS.contains(&stripped)
}

pub fn is_substantive_text(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.chars().count() > MIN_SUBSTANTIVE_CHARS && !is_simple_greeting(trimmed)
}

/// Turns of one calendar day.
#[derive(Debug, Clone, PartialEq)]
pub struct DayTranscript {
    pub day: NaiveDate,
    pub turns: Vec<Turn>,
}

impl DayTranscript {
    pub fn substantive_turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter().filter(|t| t.is_substantive())
    }
}

/// Input to an analysis job: one or more days of turns, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptWindow {
    pub days: Vec<DayTranscript>,
}

impl TranscriptWindow {
    pub fn single(day: NaiveDate, turns: Vec<Turn>) -> Self {
        Self {
            days: vec![DayTranscript { day, turns }],
        }
    }

    /// Days that hold at least one turn.
    pub fn days_with_data(&self) -> usize {
        self.days.iter().filter(|d| !d.turns.is_empty()).count()
    }

    pub fn total_turns(&self) -> usize {
        self.days.iter().map(|d| d.turns.len()).sum()
    }

    pub fn substantive_count(&self) -> usize {
        self.days.iter().map(|d| d.substantive_turns().count()).sum()
    }

    /// Substantive user turns, oldest first.
    pub fn substantive_user_texts(&self) -> Vec<&str> {
        self.days
            .iter()
            .flat_map(|d| d.turns.iter())
            .filter(|t| t.is_user() && t.is_substantive())
            .map(|t| t.text.trim())
            .collect()
    }

    pub fn all_turns(&self) -> impl Iterator<Item = &Turn> {
        self.days.iter().flat_map(|d| d.turns.iter())
    }
}
