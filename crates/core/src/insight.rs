//! Insight Domain Types
//!
//! Typed model for derived wellbeing signals. `InsightPayload` is a sum type
//! whose variant determines the payload shape, so a `kind` can never disagree
//! with the data it labels.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Separator used when composing storage keys; forbidden inside key parts.
const KEY_SEPARATOR: char = ':';

/// The kinds of derived insight the pipeline produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    /// Emotion scores for one day
    Emotion,
    /// Narrative journal reflection for one day
    Reflection,
    /// Triggers, joy sources and distractions over a window
    PatternSet,
    /// Habit suggestions over a long window
    HabitSet,
    /// Best/toughest day over the last months (computed locally)
    Highlights,
}

impl InsightKind {
    /// Kinds that are produced by a generation-backend call.
    pub const ANALYSIS: [InsightKind; 4] = [
        InsightKind::Emotion,
        InsightKind::Reflection,
        InsightKind::PatternSet,
        InsightKind::HabitSet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InsightKind::Emotion => "emotion",
            InsightKind::Reflection => "reflection",
            InsightKind::PatternSet => "pattern_set",
            InsightKind::HabitSet => "habit_set",
            InsightKind::Highlights => "highlights",
        }
    }

    /// Staleness class used by the local cache tier.
    pub fn ttl_class(&self) -> TtlClass {
        match self {
            InsightKind::Emotion | InsightKind::Reflection => TtlClass::Short,
            InsightKind::PatternSet | InsightKind::HabitSet => TtlClass::Medium,
            InsightKind::Highlights => TtlClass::Long,
        }
    }

    /// Whether producing this kind requires a generation-backend call.
    pub fn uses_backend(&self) -> bool {
        !matches!(self, InsightKind::Highlights)
    }
}

impl fmt::Display for InsightKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InsightKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "emotion" | "emotions" => Ok(InsightKind::Emotion),
            "reflection" | "reflections" => Ok(InsightKind::Reflection),
            "pattern" | "patterns" | "pattern_set" => Ok(InsightKind::PatternSet),
            "habit" | "habits" | "habit_set" => Ok(InsightKind::HabitSet),
            "highlights" => Ok(InsightKind::Highlights),
            other => Err(CoreError::UnknownKind(other.to_string())),
        }
    }
}

/// Local-tier staleness classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlClass {
    /// Raw emotional time series and balance (~30 min)
    Short,
    /// Pattern/trigger analysis (~60 min)
    Medium,
    /// Once-per-calendar-day highlights (~24 h, gated by day rollover)
    Long,
}

impl TtlClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            TtlClass::Short => "short",
            TtlClass::Medium => "medium",
            TtlClass::Long => "long",
        }
    }

    /// Long entries expire at calendar-day rollover as well as by age.
    pub fn is_calendar_gated(&self) -> bool {
        matches!(self, TtlClass::Long)
    }
}

/// Identifies the time slice a result covers: a day, a window, or a named period.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeriodKey(String);

impl PeriodKey {
    /// Single calendar day, formatted `YYYY-MM-DD`.
    pub fn day(date: NaiveDate) -> Self {
        Self(date.format("%Y-%m-%d").to_string())
    }

    /// Trailing window of `days` days ending on `anchor`.
    pub fn window(days: u32, anchor: NaiveDate) -> Self {
        Self(format!("{}d@{}", days, anchor.format("%Y-%m-%d")))
    }

    /// Fixed named period such as `3months`.
    pub fn named(name: &str) -> CoreResult<Self> {
        Self::parse(name)
    }

    pub fn parse(raw: &str) -> CoreResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(CoreError::invalid_scope("empty period key"));
        }
        if raw.contains(KEY_SEPARATOR) {
            return Err(CoreError::invalid_scope(format!(
                "period key must not contain '{}': {}",
                KEY_SEPARATOR, raw
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The calendar day, when this key names exactly one day.
    pub fn as_day(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.0, "%Y-%m-%d").ok()
    }

    /// The day a day or window key is anchored on. Named periods have none.
    pub fn anchor_day(&self) -> Option<NaiveDate> {
        match self.0.split_once('@') {
            Some((_, anchor)) => NaiveDate::parse_from_str(anchor, "%Y-%m-%d").ok(),
            None => self.as_day(),
        }
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The (user, period) slice a cache entry or result belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub user_id: String,
    pub period: PeriodKey,
}

impl Scope {
    pub fn new(user_id: impl Into<String>, period: PeriodKey) -> CoreResult<Self> {
        let user_id = user_id.into();
        if user_id.trim().is_empty() {
            return Err(CoreError::invalid_scope("empty user id"));
        }
        if user_id.contains(KEY_SEPARATOR) {
            return Err(CoreError::invalid_scope(format!(
                "user id must not contain '{}': {}",
                KEY_SEPARATOR, user_id
            )));
        }
        Ok(Self { user_id, period })
    }

    pub fn for_day(user_id: impl Into<String>, date: NaiveDate) -> CoreResult<Self> {
        Self::new(user_id, PeriodKey::day(date))
    }

    /// Deterministic key fragment; identical across execution contexts.
    pub fn key_fragment(&self) -> String {
        format!("{}{}{}", self.period, KEY_SEPARATOR, self.user_id)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.period)
    }
}

/// Whether a result came from the model or from a deterministic fallback path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Model,
    Fallback,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Model => "model",
            Origin::Fallback => "fallback",
        }
    }
}

impl FromStr for Origin {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "model" => Ok(Origin::Model),
            "fallback" => Ok(Origin::Fallback),
            other => Err(CoreError::parse(format!("unknown origin: {}", other))),
        }
    }
}

/// Emotion scores, each in [1, 100]. Zero is not a reachable signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmotionScores {
    pub happiness: u8,
    pub energy: u8,
    pub anxiety: u8,
    pub stress: u8,
}

impl EmotionScores {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 100;

    /// Build scores, clamping every field into [1, 100].
    pub fn clamped(happiness: f64, energy: f64, anxiety: f64, stress: f64) -> Self {
        Self {
            happiness: clamp_score(happiness, Self::MIN),
            energy: clamp_score(energy, Self::MIN),
            anxiety: clamp_score(anxiety, Self::MIN),
            stress: clamp_score(stress, Self::MIN),
        }
    }

    /// Mid-range happiness/energy, low-but-nonzero anxiety/stress.
    pub fn neutral() -> Self {
        Self {
            happiness: 50,
            energy: 50,
            anxiety: 30,
            stress: 30,
        }
    }

    /// Mean of happiness and energy.
    pub fn uplift(&self) -> f64 {
        (f64::from(self.happiness) + f64::from(self.energy)) / 2.0
    }

    /// Mean of anxiety and stress.
    pub fn strain(&self) -> f64 {
        (f64::from(self.anxiety) + f64::from(self.stress)) / 2.0
    }

    pub fn fields(&self) -> [u8; 4] {
        [self.happiness, self.energy, self.anxiety, self.stress]
    }
}

/// Round and clamp a raw score into `[floor, 100]`. NaN maps to `floor`.
pub fn clamp_score(value: f64, floor: u8) -> u8 {
    if value.is_nan() {
        return floor;
    }
    value.round().clamp(f64::from(floor), 100.0) as u8
}

/// Mood detected from reflection wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mood {
    Happy,
    Sad,
    Anxious,
    Angry,
    Peaceful,
    Neutral,
}

/// A first-person journal entry summarizing one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectionEntry {
    pub summary: String,
    pub mood: Mood,
    /// Mood score in [0, 100]
    pub mood_score: u8,
    pub themes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerGroups {
    pub stress: Vec<String>,
    pub joy: Vec<String>,
    pub distraction: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PatternInsights {
    pub primary_stress_source: String,
    pub main_joy_source: String,
    pub behavioral_pattern: String,
}

/// Behavioral triggers extracted over a window of days.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternSet {
    pub triggers: TriggerGroups,
    pub insights: PatternInsights,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HabitCategory {
    StressManagement,
    Sleep,
    Social,
    Productivity,
    SelfCare,
    Mindfulness,
    #[serde(other)]
    Other,
}

impl Default for HabitCategory {
    fn default() -> Self {
        Self::Other
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HabitSuggestion {
    pub title: String,
    pub description: String,
    pub why: String,
    pub frequency: String,
    pub category: HabitCategory,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HabitPatterns {
    pub top_struggles: Vec<String>,
    pub emotional_triggers: Vec<String>,
    pub positive_behaviors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HabitInsights {
    pub main_challenge: String,
    pub emotional_cycle: String,
    pub key_opportunity: String,
}

/// Habit suggestions inferred from a long transcript window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HabitSet {
    pub habits: Vec<HabitSuggestion>,
    pub patterns: HabitPatterns,
    pub insights: HabitInsights,
}

/// One day singled out by the highlights view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayHighlight {
    pub day: NaiveDate,
    /// Uplift (best day) or strain (toughest day), in [0, 100]
    pub score: u8,
    pub scores: EmotionScores,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Highlights {
    pub best_day: DayHighlight,
    pub toughest_day: DayHighlight,
    pub days_considered: u32,
}

/// Kind-specific payload. The variant is the kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum InsightPayload {
    Emotion(EmotionScores),
    Reflection(ReflectionEntry),
    PatternSet(PatternSet),
    HabitSet(HabitSet),
    Highlights(Highlights),
}

impl InsightPayload {
    pub fn kind(&self) -> InsightKind {
        match self {
            InsightPayload::Emotion(_) => InsightKind::Emotion,
            InsightPayload::Reflection(_) => InsightKind::Reflection,
            InsightPayload::PatternSet(_) => InsightKind::PatternSet,
            InsightPayload::HabitSet(_) => InsightKind::HabitSet,
            InsightPayload::Highlights(_) => InsightKind::Highlights,
        }
    }

    pub fn as_emotion(&self) -> Option<&EmotionScores> {
        match self {
            InsightPayload::Emotion(scores) => Some(scores),
            _ => None,
        }
    }
}

/// A normalized analysis output for one `(kind, scope)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub scope: Scope,
    pub payload: InsightPayload,
    pub computed_at: DateTime<Utc>,
    pub origin: Origin,
}

impl AnalysisResult {
    pub fn new(scope: Scope, payload: InsightPayload, origin: Origin, computed_at: DateTime<Utc>) -> Self {
        Self {
            scope,
            payload,
            computed_at,
            origin,
        }
    }

    pub fn kind(&self) -> InsightKind {
        self.payload.kind()
    }

    pub fn is_fallback(&self) -> bool {
        self.origin == Origin::Fallback
    }
}

/// Correlates every write and notification produced by one triggering operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
