//! Freshness Policy
//!
//! Decides whether a local-tier entry may still be served. Short and medium
//! classes expire on elapsed time only; the long class must also have been
//! written on the current calendar day.

use chrono::{DateTime, Utc};

use insight_sync_core::TtlClass;

use crate::models::settings::AppConfig;
use crate::storage::local_cache::LocalEntry;
use crate::utils::clock::DayCalendar;
use crate::utils::error::AppResult;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachePolicy {
    pub ttl_short_secs: u64,
    pub ttl_medium_secs: u64,
    pub ttl_long_secs: u64,
    pub forced_freshness_secs: u64,
    pub calendar: DayCalendar,
}

impl CachePolicy {
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        Ok(Self {
            ttl_short_secs: config.ttl_short_secs,
            ttl_medium_secs: config.ttl_medium_secs,
            ttl_long_secs: config.ttl_long_secs,
            forced_freshness_secs: config.forced_freshness_secs,
            calendar: DayCalendar::new(config.day_offset_minutes)?,
        })
    }

    pub fn ttl_secs(&self, class: TtlClass) -> u64 {
        match class {
            TtlClass::Short => self.ttl_short_secs,
            TtlClass::Medium => self.ttl_medium_secs,
            TtlClass::Long => self.ttl_long_secs,
        }
    }

    pub fn is_fresh(&self, entry: &LocalEntry, now: DateTime<Utc>) -> bool {
        if entry.is_expired(now) {
            return false;
        }
        if entry.class.is_calendar_gated() {
            return self.calendar.same_day(entry.written_at, now);
        }
        true
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        let config = AppConfig::default();
        Self {
            ttl_short_secs: config.ttl_short_secs,
            ttl_medium_secs: config.ttl_medium_secs,
            ttl_long_secs: config.ttl_long_secs,
            forced_freshness_secs: config.forced_freshness_secs,
            calendar: DayCalendar::utc(),
        }
    }
}
