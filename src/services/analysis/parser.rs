//! Structured Output Parser
//!
//! Turns raw backend text into a typed payload. Attempts, in order:
//!
//! 1. strict JSON parse of the outermost balanced `{...}` in the text
//! 2. field-by-field scalar extraction (emotion scores only)
//! 3. a deterministic default for the kind, tagged `Origin::Fallback`
//!
//! Reflections are prose, so step 2 for them is a cleanup of the raw text.
//! Nothing in this module panics or returns an error.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use insight_sync_core::{
    EmotionScores, HabitCategory, HabitInsights, HabitPatterns, HabitSet, HabitSuggestion,
    InsightKind, InsightPayload, Mood, Origin, PatternInsights, PatternSet, ReflectionEntry,
    TriggerGroups,
};

/// Items kept per trigger group and for recommendations.
pub const MAX_LIST_ITEMS: usize = 4;
/// Habit suggestions kept.
pub const MAX_HABITS: usize = 3;
/// Items kept per habit pattern list.
pub const MAX_PATTERN_ITEMS: usize = 3;
/// Reflection text cap in characters.
pub const MAX_REFLECTION_CHARS: usize = 600;

const EMOTION_FIELDS: [&str; 4] = ["happiness", "energy", "anxiety", "stress"];

/// Which step produced the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStep {
    Structured,
    Scalars,
    Prose,
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    pub payload: InsightPayload,
    pub origin: Origin,
    pub step: ParseStep,
}

impl Parsed {
    fn model(payload: InsightPayload, step: ParseStep) -> Self {
        Self {
            payload,
            origin: Origin::Model,
            step,
        }
    }

    fn fallback(payload: InsightPayload) -> Self {
        Self {
            payload,
            origin: Origin::Fallback,
            step: ParseStep::Default,
        }
    }
}

/// Parse backend output for `kind`.
///
/// Returns `None` only for kinds computed locally (highlights), which are
/// never produced by the backend.
pub fn parse(kind: InsightKind, raw: &str) -> Option<Parsed> {
    let parsed = match kind {
        InsightKind::Emotion => parse_emotion(raw),
        InsightKind::Reflection => parse_reflection(raw),
        InsightKind::PatternSet => parse_patterns(raw),
        InsightKind::HabitSet => parse_habits(raw),
        InsightKind::Highlights => return None,
    };
    Some(parsed)
}

/// The step 3 payload for `kind`.
pub fn default_payload(kind: InsightKind) -> Option<InsightPayload> {
    match kind {
        InsightKind::Emotion => Some(InsightPayload::Emotion(EmotionScores::neutral())),
        InsightKind::Reflection => Some(InsightPayload::Reflection(reflection_entry(
            "Today I took a moment to pause and check in with myself.",
        ))),
        InsightKind::PatternSet => Some(InsightPayload::PatternSet(default_patterns())),
        InsightKind::HabitSet => Some(InsightPayload::HabitSet(default_habits())),
        InsightKind::Highlights => None,
    }
}

// ============================================================================
// JSON extraction
// ============================================================================

/// Slice of the first balanced `{...}` object in `raw`, honoring string
/// literals and escapes. When braces never balance, falls back to the span
/// from the first `{` to the last `}`.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in raw[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

fn parse_object(raw: &str) -> Option<Value> {
    let candidate = extract_json_object(raw)?;
    match serde_json::from_str::<Value>(candidate) {
        Ok(value) if value.is_object() => Some(value),
        _ => None,
    }
}

// ============================================================================
// Emotion
// ============================================================================

fn number_field(value: &Value, field: &str) -> Option<f64> {
    match value.get(field)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn scores_from(values: [Option<f64>; 4]) -> Option<EmotionScores> {
    let [happiness, energy, anxiety, stress] = values;
    Some(EmotionScores::clamped(happiness?, energy?, anxiety?, stress?))
}

fn scalar_patterns() -> &'static Vec<(&'static str, Regex)> {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        EMOTION_FIELDS
            .iter()
            .filter_map(|field| {
                let pattern = format!(r#"(?i)["']?\b{}["']?\s*[:=]\s*["']?(-?\d+(?:\.\d+)?)"#, field);
                Regex::new(&pattern).ok().map(|r| (*field, r))
            })
            .collect()
    })
}

fn extract_scalar(raw: &str, field: &str) -> Option<f64> {
    scalar_patterns()
        .iter()
        .find(|(name, _)| *name == field)
        .and_then(|(_, regex)| regex.captures(raw))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn parse_emotion(raw: &str) -> Parsed {
    if let Some(value) = parse_object(raw) {
        let values = EMOTION_FIELDS.map(|field| number_field(&value, field));
        if let Some(scores) = scores_from(values) {
            return Parsed::model(InsightPayload::Emotion(scores), ParseStep::Structured);
        }
    }

    let values = EMOTION_FIELDS.map(|field| extract_scalar(raw, field));
    if let Some(scores) = scores_from(values) {
        return Parsed::model(InsightPayload::Emotion(scores), ParseStep::Scalars);
    }

    Parsed::fallback(InsightPayload::Emotion(EmotionScores::neutral()))
}

// ============================================================================
// Reflection
// ============================================================================

const MOOD_KEYWORDS: [(Mood, &[&str]); 5] = [
    (Mood::Happy, &["happy", "good", "great", "excited", "positive", "hopeful"]),
    (Mood::Sad, &["sad", "down", "depressed", "upset", "disappointed"]),
    (Mood::Anxious, &["anxious", "worried", "nervous", "stressed", "overwhelmed"]),
    (Mood::Angry, &["angry", "frustrated", "annoyed", "mad"]),
    (Mood::Peaceful, &["calm", "peaceful", "relaxed", "content"]),
];

const THEME_KEYWORDS: [(&str, &[&str]); 5] = [
    ("Work discussion", &["work"]),
    ("Relationship focus", &["relationship", "family"]),
    ("Health consideration", &["health"]),
    ("Future planning", &["future", "plan"]),
    ("Stress management", &["stress", "anxiety"]),
];

const DEFAULT_THEME: &str = "General reflection";

/// Keyword mood of a text and its 0-100 score. Ties go to the earlier mood.
pub fn detect_mood(text: &str) -> (Mood, u8) {
    let lower = text.to_lowercase();
    let mut detected = Mood::Neutral;
    let mut best = 0u32;
    for (mood, keywords) in MOOD_KEYWORDS {
        let hits = keywords.iter().filter(|k| lower.contains(*k)).count() as u32;
        if hits > best {
            best = hits;
            detected = mood;
        }
    }

    let n = best as i32;
    let score = match detected {
        Mood::Happy | Mood::Peaceful => 75 + (5 * n).min(25),
        Mood::Sad | Mood::Angry => (40 - 5 * n).max(15),
        Mood::Anxious => (45 - 3 * n).max(25),
        Mood::Neutral => 50,
    };
    (detected, score.clamp(0, 100) as u8)
}

pub fn detect_themes(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let themes: Vec<String> = THEME_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(theme, _)| theme.to_string())
        .collect();
    if themes.is_empty() {
        vec![DEFAULT_THEME.to_string()]
    } else {
        themes
    }
}

/// Build a reflection entry from its summary text.
pub fn reflection_entry(summary: &str) -> ReflectionEntry {
    let (mood, mood_score) = detect_mood(summary);
    ReflectionEntry {
        summary: summary.to_string(),
        mood,
        mood_score,
        themes: detect_themes(summary),
    }
}

fn clean_prose(raw: &str) -> String {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim();
    truncate_chars(unquoted, MAX_REFLECTION_CHARS)
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

fn parse_reflection(raw: &str) -> Parsed {
    // An object reply must carry its text in a known field; any other
    // object is not prose.
    if raw.trim_start().starts_with('{') {
        let summary = parse_object(raw).and_then(|value| {
            ["summary", "reflection"]
                .iter()
                .find_map(|field| value.get(*field).and_then(Value::as_str))
                .map(clean_prose)
                .filter(|s| !s.is_empty())
        });
        return match summary {
            Some(summary) => Parsed::model(
                InsightPayload::Reflection(reflection_entry(&summary)),
                ParseStep::Structured,
            ),
            None => reflection_fallback(),
        };
    }

    let prose = clean_prose(raw);
    if !prose.is_empty() {
        return Parsed::model(InsightPayload::Reflection(reflection_entry(&prose)), ParseStep::Prose);
    }
    reflection_fallback()
}

fn reflection_fallback() -> Parsed {
    match default_payload(InsightKind::Reflection) {
        Some(payload) => Parsed::fallback(payload),
        None => Parsed::fallback(InsightPayload::Reflection(reflection_entry(""))),
    }
}

// ============================================================================
// Pattern set
// ============================================================================

fn clean_list(items: Vec<String>, max: usize) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .take(max)
        .collect()
}

fn or_default(value: String, default: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn default_patterns() -> PatternSet {
    PatternSet {
        triggers: TriggerGroups {
            stress: strings(&["Work pressure", "Time constraints", "Uncertainty"]),
            joy: strings(&["Personal achievements", "Social connections", "Creative activities"]),
            distraction: strings(&["Social media", "Procrastination", "Multitasking"]),
        },
        insights: PatternInsights {
            primary_stress_source: "Work-related pressure".to_string(),
            main_joy_source: "Personal accomplishments".to_string(),
            behavioral_pattern: "Balancing work and personal life".to_string(),
        },
        recommendations: strings(&[
            "Practice time management techniques",
            "Set clear boundaries between work and personal time",
            "Engage in regular physical activity",
        ]),
    }
}

fn normalize_patterns(set: PatternSet) -> Option<PatternSet> {
    let defaults = default_patterns().insights;
    let normalized = PatternSet {
        triggers: TriggerGroups {
            stress: clean_list(set.triggers.stress, MAX_LIST_ITEMS),
            joy: clean_list(set.triggers.joy, MAX_LIST_ITEMS),
            distraction: clean_list(set.triggers.distraction, MAX_LIST_ITEMS),
        },
        insights: PatternInsights {
            primary_stress_source: or_default(
                set.insights.primary_stress_source,
                &defaults.primary_stress_source,
            ),
            main_joy_source: or_default(set.insights.main_joy_source, &defaults.main_joy_source),
            behavioral_pattern: or_default(
                set.insights.behavioral_pattern,
                &defaults.behavioral_pattern,
            ),
        },
        recommendations: clean_list(set.recommendations, MAX_LIST_ITEMS),
    };

    let empty = normalized.triggers.stress.is_empty()
        && normalized.triggers.joy.is_empty()
        && normalized.triggers.distraction.is_empty()
        && normalized.recommendations.is_empty();
    (!empty).then_some(normalized)
}

fn parse_patterns(raw: &str) -> Parsed {
    let structured = parse_object(raw)
        .and_then(|value| serde_json::from_value::<PatternSet>(value).ok())
        .and_then(normalize_patterns);
    match structured {
        Some(set) => Parsed::model(InsightPayload::PatternSet(set), ParseStep::Structured),
        None => Parsed::fallback(InsightPayload::PatternSet(default_patterns())),
    }
}

// ============================================================================
// Habit set
// ============================================================================

pub fn default_habits() -> HabitSet {
    HabitSet {
        habits: vec![
            HabitSuggestion {
                title: "Daily Reflection".to_string(),
                description: "Take 5 minutes each evening to reflect on your day".to_string(),
                why: "Regular reflection helps process emotions and identify patterns".to_string(),
                frequency: "Daily".to_string(),
                category: HabitCategory::Mindfulness,
            },
            HabitSuggestion {
                title: "Stress Management".to_string(),
                description: "Practice deep breathing when feeling overwhelmed".to_string(),
                why: "Helps manage stress and anxiety in the moment".to_string(),
                frequency: "When feeling stressed".to_string(),
                category: HabitCategory::StressManagement,
            },
            HabitSuggestion {
                title: "Gratitude Practice".to_string(),
                description: "Write down three things you're grateful for each day".to_string(),
                why: "Focuses attention on positive aspects of life".to_string(),
                frequency: "Daily".to_string(),
                category: HabitCategory::SelfCare,
            },
        ],
        patterns: HabitPatterns {
            top_struggles: strings(&["Work stress", "Time management", "Self-doubt"]),
            emotional_triggers: strings(&["Deadlines", "Criticism", "Uncertainty"]),
            positive_behaviors: strings(&["Problem-solving", "Seeking support", "Learning new things"]),
        },
        insights: HabitInsights {
            main_challenge: "Balancing work demands with personal well-being".to_string(),
            emotional_cycle: "Stress builds up during work, relief comes from personal activities"
                .to_string(),
            key_opportunity: "Developing consistent stress management routines".to_string(),
        },
    }
}

fn normalize_habits(set: HabitSet) -> Option<HabitSet> {
    let habits: Vec<HabitSuggestion> = set
        .habits
        .into_iter()
        .filter(|h| !h.title.trim().is_empty())
        .take(MAX_HABITS)
        .map(|h| HabitSuggestion {
            title: h.title.trim().to_string(),
            description: h.description.trim().to_string(),
            why: h.why.trim().to_string(),
            frequency: or_default(h.frequency, "Daily"),
            category: h.category,
        })
        .collect();
    if habits.is_empty() {
        return None;
    }

    let defaults = default_habits().insights;
    Some(HabitSet {
        habits,
        patterns: HabitPatterns {
            top_struggles: clean_list(set.patterns.top_struggles, MAX_PATTERN_ITEMS),
            emotional_triggers: clean_list(set.patterns.emotional_triggers, MAX_PATTERN_ITEMS),
            positive_behaviors: clean_list(set.patterns.positive_behaviors, MAX_PATTERN_ITEMS),
        },
        insights: HabitInsights {
            main_challenge: or_default(set.insights.main_challenge, &defaults.main_challenge),
            emotional_cycle: or_default(set.insights.emotional_cycle, &defaults.emotional_cycle),
            key_opportunity: or_default(set.insights.key_opportunity, &defaults.key_opportunity),
        },
    })
}

fn parse_habits(raw: &str) -> Parsed {
    let structured = parse_object(raw)
        .and_then(|value| serde_json::from_value::<HabitSet>(value).ok())
        .and_then(normalize_habits);
    match structured {
        Some(set) => Parsed::model(InsightPayload::HabitSet(set), ParseStep::Structured),
        None => Parsed::fallback(InsightPayload::HabitSet(default_habits())),
    }
}
