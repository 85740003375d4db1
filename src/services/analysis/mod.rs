//! Analysis Pipeline
//!
//! Backend-driven analyses of conversation transcripts (emotion scores,
//! reflections, pattern sets, habit sets) plus the locally computed
//! dashboard summaries.

pub mod guards;
pub mod orchestrator;
pub mod parser;
pub mod prompts;
pub mod summary;

pub use guards::{InputGuards, InsufficientInput};
pub use orchestrator::{
    AnalysisOrchestrator, AnalysisOutcome, AnalysisRequest, AnalysisSettings, AnalysisTrigger,
    JobHandle, OrchestratorStats,
};
pub use parser::{parse, ParseStep, Parsed};
pub use summary::{compute_highlights, mood_balance, DayMood, MoodBalance};
