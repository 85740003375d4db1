//! Analysis Prompts
//!
//! Kind-specific instructions sent to the generation backend. The parser
//! defends against whatever comes back, so these only need to steer the
//! model toward the expected shape.

use insight_sync_core::InsightKind;

use crate::models::transcript::TranscriptWindow;

/// Most recent turns included in an analysis transcript.
pub const MAX_PROMPT_TURNS: usize = 120;

/// System prompt for live chat turns.
pub const CHAT_SYSTEM_PROMPT: &str = "You are a warm, supportive wellbeing companion. \
Listen carefully, reflect feelings back, ask one gentle follow-up question at a time, \
and keep replies short and conversational. You are not a therapist and never diagnose.";

const EMOTION_INSTRUCTIONS: &str = r#"You are an emotion analyzer. Analyze the conversation below and return ONLY a JSON object with emotional scores.

Rules:
1. Each score MUST be an integer between 1 and 100 (NOT 0, the minimum is 1)
2. happiness: positive emotions, joy, satisfaction, contentment
3. energy: vitality, motivation, activity level, enthusiasm
4. anxiety: worry, fear, nervousness, unease
5. stress: pressure, overwhelm, burden, tension
6. If happiness is high (>70), stress and anxiety should be low (<40)
7. If stress or anxiety is high (>60), happiness should be moderate to low (<50)

Return ONLY valid JSON, no explanation:
{"happiness": X, "energy": Y, "anxiety": Z, "stress": W}"#;

const REFLECTION_INSTRUCTIONS: &str = "Write a short first-person journal reflection (3 to 5 sentences) \
summarizing the user's day from the conversation below, as if the user wrote it. \
Mention what they shared, how they felt, and one thing that matters to them next. \
Return only the reflection text, without a title or quotes.";

const PATTERN_INSTRUCTIONS: &str = r#"Analyze the conversations below and identify emotional patterns, triggers, and insights.
Use at most 4 items per list.

Return ONLY a JSON object with this structure:
{
  "triggers": {
    "stress": ["trigger1", "trigger2"],
    "joy": ["joy1", "joy2"],
    "distraction": ["distraction1", "distraction2"]
  },
  "insights": {
    "primaryStressSource": "main stress source",
    "mainJoySource": "main joy source",
    "behavioralPattern": "observed pattern"
  },
  "recommendations": ["recommendation1", "recommendation2", "recommendation3"]
}"#;

const HABIT_INSTRUCTIONS: &str = r#"Based on the conversations below, suggest up to 3 small, concrete habits that would help this person.
category must be one of: stress_management, sleep, social, productivity, self_care, mindfulness, other.
Use at most 3 items per pattern list.

Return ONLY a JSON object with this structure:
{
  "habits": [
    {"title": "...", "description": "...", "why": "...", "frequency": "Daily", "category": "mindfulness"}
  ],
  "patterns": {
    "topStruggles": ["..."],
    "emotionalTriggers": ["..."],
    "positiveBehaviors": ["..."]
  },
  "insights": {
    "mainChallenge": "...",
    "emotionalCycle": "...",
    "keyOpportunity": "..."
  }
}"#;

/// Render turns as `role: text` lines, grouped by day when the window spans
/// more than one day.
pub fn format_transcript(window: &TranscriptWindow) -> String {
    let total = window.total_turns();
    let mut skip = total.saturating_sub(MAX_PROMPT_TURNS);
    let multi_day = window.days_with_data() > 1;
    let mut out = String::new();

    for day in &window.days {
        if day.turns.is_empty() {
            continue;
        }
        if skip >= day.turns.len() {
            skip -= day.turns.len();
            continue;
        }
        if multi_day {
            out.push_str(&format!("[{}]\n", day.day.format("%Y-%m-%d")));
        }
        for turn in day.turns.iter().skip(skip) {
            out.push_str(turn.role.as_str());
            out.push_str(": ");
            out.push_str(turn.text.trim());
            out.push('\n');
        }
        skip = 0;
    }
    out
}

/// Full prompt for an analysis job, or `None` for locally computed kinds.
pub fn analysis_prompt(kind: InsightKind, window: &TranscriptWindow) -> Option<String> {
    let instructions = match kind {
        InsightKind::Emotion => EMOTION_INSTRUCTIONS,
        InsightKind::Reflection => REFLECTION_INSTRUCTIONS,
        InsightKind::PatternSet => PATTERN_INSTRUCTIONS,
        InsightKind::HabitSet => HABIT_INSTRUCTIONS,
        InsightKind::Highlights => return None,
    };
    Some(format!(
        "{}\n\nCONVERSATION:\n{}",
        instructions,
        format_transcript(window)
    ))
}

/// Whether the backend should be asked for a JSON object.
pub fn wants_json(kind: InsightKind) -> bool {
    matches!(
        kind,
        InsightKind::Emotion | InsightKind::PatternSet | InsightKind::HabitSet
    )
}
