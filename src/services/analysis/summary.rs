//! Local Summaries
//!
//! Values derived without a backend call: the dashboard highlights, the
//! mood-balance split of an emotion series, and the transcript-based
//! reflection used when the backend cannot produce one.

use serde::Serialize;

use insight_sync_core::{AnalysisResult, DayHighlight, EmotionScores, Highlights, Origin};

use crate::models::transcript::TranscriptWindow;

/// Characters of user text quoted in a fallback reflection.
const FALLBACK_QUOTE_CHARS: usize = 220;

/// Best and toughest day among model-origin emotion results.
///
/// Fallback results are ignored; `None` when no model-origin day exists.
pub fn compute_highlights(series: &[AnalysisResult]) -> Option<Highlights> {
    let days: Vec<(chrono::NaiveDate, EmotionScores)> = series
        .iter()
        .filter(|r| r.origin == Origin::Model)
        .filter_map(|r| Some((r.scope.period.as_day()?, *r.payload.as_emotion()?)))
        .collect();

    // Ties resolve to the earliest day
    let best = days
        .iter()
        .fold(None::<&(chrono::NaiveDate, EmotionScores)>, |acc, cur| match acc {
            Some(prev) if prev.1.uplift() >= cur.1.uplift() => Some(prev),
            _ => Some(cur),
        })?;
    let toughest = days
        .iter()
        .fold(None::<&(chrono::NaiveDate, EmotionScores)>, |acc, cur| match acc {
            Some(prev) if prev.1.strain() >= cur.1.strain() => Some(prev),
            _ => Some(cur),
        })?;

    Some(Highlights {
        best_day: DayHighlight {
            day: best.0,
            score: best.1.uplift().round() as u8,
            scores: best.1,
        },
        toughest_day: DayHighlight {
            day: toughest.0,
            score: toughest.1.strain().round() as u8,
            scores: toughest.1,
        },
        days_considered: u32::try_from(days.len()).unwrap_or(u32::MAX),
    })
}

/// Share of positive, neutral and negative days in a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MoodBalance {
    pub positive: f64,
    pub neutral: f64,
    pub negative: f64,
    pub days: u32,
}

impl MoodBalance {
    pub fn empty() -> Self {
        Self {
            positive: 0.0,
            neutral: 0.0,
            negative: 0.0,
            days: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DayMood {
    Positive,
    Neutral,
    Negative,
}

/// Strain wins over uplift: a happy but stressed day counts as negative.
pub fn classify_day(scores: &EmotionScores) -> DayMood {
    if scores.anxiety >= 60 || scores.stress >= 60 {
        DayMood::Negative
    } else if scores.happiness >= 60 && scores.stress < 50 {
        DayMood::Positive
    } else {
        DayMood::Neutral
    }
}

/// Percentages (0-100, one decimal) over the emotion results in `series`.
pub fn mood_balance(series: &[AnalysisResult]) -> MoodBalance {
    let scores: Vec<&EmotionScores> = series.iter().filter_map(|r| r.payload.as_emotion()).collect();
    if scores.is_empty() {
        return MoodBalance::empty();
    }

    let (mut positive, mut neutral, mut negative) = (0u32, 0u32, 0u32);
    for s in &scores {
        match classify_day(s) {
            DayMood::Positive => positive += 1,
            DayMood::Neutral => neutral += 1,
            DayMood::Negative => negative += 1,
        }
    }
    let days = u32::try_from(scores.len()).unwrap_or(u32::MAX);
    let pct = |n: u32| (f64::from(n) * 1000.0 / f64::from(days)).round() / 10.0;
    MoodBalance {
        positive: pct(positive),
        neutral: pct(neutral),
        negative: pct(negative),
        days,
    }
}

/// Reflection text built from the user's own words.
pub fn fallback_reflection(window: &TranscriptWindow) -> String {
    let texts = window.substantive_user_texts();
    let (first, last) = match (texts.first(), texts.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return "Had a brief chat today but didn't share much.".to_string(),
    };

    let base = if texts.len() > 1 && first != last {
        format!("{} ... {}", first, last)
    } else {
        last.to_string()
    };
    let quoted: String = base.chars().take(FALLBACK_QUOTE_CHARS).collect();
    let ellipsis = if base.chars().count() > FALLBACK_QUOTE_CHARS {
        "..."
    } else {
        ""
    };
    format!(
        "Today I reflected on my day. I shared about: \u{201c}{}{}\u{201d}. It was helpful to pause, notice my feelings, and consider what matters next.",
        quoted, ellipsis
    )
}
