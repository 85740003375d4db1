//! Clock and Calendar
//!
//! Time source abstraction plus the fixed-offset calendar used to derive day
//! keys. All calendar-day decisions (scopes, highlights rollover) go through
//! `DayCalendar` so every execution context agrees on where a day starts.

use std::sync::Mutex;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Utc};

use crate::utils::error::{AppError, AppResult};

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and deterministic embedding.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = instant;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Maps instants to calendar days in a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayCalendar {
    offset: FixedOffset,
}

impl DayCalendar {
    /// Offsets are limited to the real-world range of ±14 h.
    pub fn new(offset_minutes: i32) -> AppResult<Self> {
        let offset = FixedOffset::east_opt(offset_minutes * 60)
            .filter(|_| offset_minutes.abs() <= 14 * 60);
        match offset {
            Some(offset) => Ok(Self { offset }),
            None => Err(AppError::config(format!(
                "day_offset_minutes out of range: {}",
                offset_minutes
            ))),
        }
    }

    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    /// Calendar day containing `instant`.
    pub fn day_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    pub fn today(&self, clock: &dyn Clock) -> NaiveDate {
        self.day_of(clock.now())
    }

    /// `count` days ending at `anchor` inclusive, most recent first.
    pub fn days_back(&self, anchor: NaiveDate, count: u32) -> Vec<NaiveDate> {
        (0..i64::from(count))
            .map(|i| anchor - Duration::days(i))
            .collect()
    }

    pub fn same_day(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        self.day_of(a) == self.day_of(b)
    }
}
