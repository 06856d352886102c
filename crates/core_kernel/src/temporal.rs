//! Date ranges for statement windows
//!
//! A `DateRange` is the inclusive window a caller asks the bank feed for.
//! Sync fetches large ranges in fixed-size pages, so the range knows how
//! to split itself into windows.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from date range construction
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemporalError {
    #[error("Invalid range: start {start} is after end {end}")]
    StartAfterEnd { start: NaiveDate, end: NaiveDate },
}

/// An inclusive calendar date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Creates a range, validating that `start <= end`
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, TemporalError> {
        if start > end {
            return Err(TemporalError::StartAfterEnd { start, end });
        }
        Ok(Self { start, end })
    }

    /// Creates a single-day range
    pub fn single_day(day: NaiveDate) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    /// Returns the first day of the range
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Returns the last day of the range
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Returns true if `day` falls within the range (inclusive)
    pub fn contains(&self, day: NaiveDate) -> bool {
        day >= self.start && day <= self.end
    }

    /// Number of days covered, counting both endpoints
    pub fn num_days(&self) -> u64 {
        (self.end - self.start).num_days() as u64 + 1
    }

    /// Splits the range into consecutive windows of at most `window_days`
    /// days each. Windows are returned in chronological order and together
    /// cover the range exactly.
    pub fn windows(&self, window_days: u32) -> Vec<DateRange> {
        let window_days = window_days.max(1) as u64;
        let mut windows = Vec::new();
        let mut cursor = self.start;

        while cursor <= self.end {
            let window_end = cursor
                .checked_add_days(Days::new(window_days - 1))
                .unwrap_or(self.end)
                .min(self.end);
            windows.push(DateRange {
                start: cursor,
                end: window_end,
            });
            match window_end.checked_add_days(Days::new(1)) {
                Some(next) => cursor = next,
                None => break,
            }
        }

        windows
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}
