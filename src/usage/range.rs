use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::UsageError;

/// Bucket size requested by a usage query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Week,
    Month,
    Year,
}

impl Granularity {
    pub fn as_token(&self) -> &'static str {
        match self {
            Granularity::Day => "1d",
            Granularity::Week => "1w",
            Granularity::Month => "1m",
            Granularity::Year => "1y",
        }
    }

    /// Calendar window containing `now`, as `[start, end)` in UTC.
    /// Weeks start on Monday.
    pub fn time_range(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let today = now.date_naive();
        match self {
            Granularity::Day => (start_of_day(today), start_of_day(today + Duration::days(1))),
            Granularity::Week => {
                let monday =
                    today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
                (start_of_day(monday), start_of_day(monday + Duration::days(7)))
            }
            Granularity::Month => (
                start_of_day(first_of_month(today)),
                start_of_day(first_of_next_month(today)),
            ),
            Granularity::Year => {
                let jan_first = first_of_year(today);
                // 366 days past Jan 1 always lands in the following year.
                let next_jan_first = first_of_year(jan_first + Duration::days(366));
                (start_of_day(jan_first), start_of_day(next_jan_first))
            }
        }
    }
}

impl FromStr for Granularity {
    type Err = UsageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1d" | "day" => Ok(Granularity::Day),
            "1w" | "week" => Ok(Granularity::Week),
            "1m" | "month" => Ok(Granularity::Month),
            "1y" | "year" => Ok(Granularity::Year),
            _ => Err(UsageError::UnsupportedRange(s.to_string())),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::default()).and_utc()
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.day0()))
}

pub fn first_of_next_month(date: NaiveDate) -> NaiveDate {
    first_of_month(first_of_month(date) + Duration::days(31))
}

pub fn first_of_previous_month(date: NaiveDate) -> NaiveDate {
    first_of_month(first_of_month(date) - Duration::days(1))
}

fn first_of_year(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.ordinal0()))
}
