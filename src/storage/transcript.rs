//! Transcript Store
//!
//! Durable record of conversation turns, keyed by user and calendar day.

use chrono::NaiveDate;

use crate::models::transcript::{DayTranscript, TranscriptWindow, Turn};
use crate::utils::error::AppResult;

pub trait TranscriptStore: Send + Sync {
    fn append(&self, user_id: &str, day: NaiveDate, turn: &Turn) -> AppResult<()>;

    /// Turns of one day in insertion order.
    fn list(&self, user_id: &str, day: NaiveDate) -> AppResult<Vec<Turn>>;

    /// Turns for several days, returned oldest day first regardless of the
    /// order `days` is given in.
    fn list_range(&self, user_id: &str, days: &[NaiveDate]) -> AppResult<TranscriptWindow> {
        let mut ordered = days.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let mut window = TranscriptWindow::default();
        for day in ordered {
            let turns = self.list(user_id, day)?;
            window.days.push(DayTranscript { day, turns });
        }
        Ok(window)
    }
}
