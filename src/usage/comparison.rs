use chrono::{DateTime, Utc};
use serde::Serialize;

use super::range::{first_of_month, first_of_previous_month, start_of_day};
use super::UsageReading;

/// The two calendar windows compared by a month-over-month query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComparisonWindows {
    pub previous_start: DateTime<Utc>,
    pub current_start: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

impl ComparisonWindows {
    pub fn for_now(now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        Self {
            previous_start: start_of_day(first_of_previous_month(today)),
            current_start: start_of_day(first_of_month(today)),
            now,
        }
    }

    /// `[current_start, now]`
    pub fn in_current(&self, at: DateTime<Utc>) -> bool {
        at >= self.current_start && at <= self.now
    }

    /// `[previous_start, current_start)`
    pub fn in_previous(&self, at: DateTime<Utc>) -> bool {
        at >= self.previous_start && at < self.current_start
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageComparison {
    pub current_month_total: f64,
    pub previous_month_total: f64,
    pub current_month_readings: Vec<UsageReading>,
    pub previous_month_readings: Vec<UsageReading>,
}

impl UsageComparison {
    pub fn empty() -> Self {
        Self {
            current_month_total: 0.0,
            previous_month_total: 0.0,
            current_month_readings: Vec::new(),
            previous_month_readings: Vec::new(),
        }
    }

    /// Splits `readings` into the two windows; anything outside both is ignored.
    pub fn from_readings(windows: &ComparisonWindows, readings: Vec<UsageReading>) -> Self {
        let mut comparison = Self::empty();
        for reading in readings {
            if windows.in_current(reading.recorded_at) {
                comparison.current_month_total += reading.total_usage;
                comparison.current_month_readings.push(reading);
            } else if windows.in_previous(reading.recorded_at) {
                comparison.previous_month_total += reading.total_usage;
                comparison.previous_month_readings.push(reading);
            }
        }
        comparison
            .current_month_readings
            .sort_by_key(|r| r.recorded_at);
        comparison
            .previous_month_readings
            .sort_by_key(|r| r.recorded_at);
        comparison
    }
}
