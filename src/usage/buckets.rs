use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;

use super::{Granularity, UsageError};

/// A raw telemetry row as stored.
pub type UsageReading = crate::db::entities::water_usage::Model;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyBucket {
    pub date: NaiveDate,
    pub readings: Vec<UsageReading>,
    pub total_usage: f64,
    pub average_flow: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyBucket {
    /// `YYYY-MM`
    pub month: String,
    pub days: Vec<DailyBucket>,
    pub total_usage: f64,
    pub average_flow: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearlyBucket {
    pub year: i32,
    pub months: Vec<MonthlyBucket>,
    pub total_usage: f64,
    pub average_flow: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "granularity", content = "buckets", rename_all = "lowercase")]
pub enum BucketResult {
    Day(Vec<DailyBucket>),
    Week(Vec<DailyBucket>),
    Month(MonthlyBucket),
    Year(YearlyBucket),
}

impl BucketResult {
    pub fn total_usage(&self) -> f64 {
        match self {
            BucketResult::Day(days) | BucketResult::Week(days) => {
                days.iter().map(|d| d.total_usage).sum()
            }
            BucketResult::Month(month) => month.total_usage,
            BucketResult::Year(year) => year.total_usage,
        }
    }
}

/// Mean flow rate of `readings`, 0 when there are none.
pub fn average_flow(readings: &[UsageReading]) -> f64 {
    if readings.is_empty() {
        return 0.0;
    }
    readings.iter().map(|r| r.flow_rate).sum::<f64>() / readings.len() as f64
}

fn mean(values: impl ExactSizeIterator<Item = f64>) -> f64 {
    let count = values.len();
    if count == 0 {
        return 0.0;
    }
    values.sum::<f64>() / count as f64
}

/// Groups readings by UTC calendar date. Buckets come out in ascending date
/// order whatever the input order, and readings inside a bucket are sorted
/// by timestamp.
pub fn bucket_by_day(readings: impl IntoIterator<Item = UsageReading>) -> Vec<DailyBucket> {
    let mut by_date: BTreeMap<NaiveDate, Vec<UsageReading>> = BTreeMap::new();
    for reading in readings {
        by_date
            .entry(reading.recorded_at.date_naive())
            .or_default()
            .push(reading);
    }

    by_date
        .into_iter()
        .map(|(date, mut readings)| {
            readings.sort_by_key(|r| r.recorded_at);
            let total_usage = readings.iter().map(|r| r.total_usage).sum();
            let average_flow = average_flow(&readings);
            DailyBucket {
                date,
                readings,
                total_usage,
                average_flow,
            }
        })
        .collect()
}

/// Day buckets of one month plus the month rollup. The month average is the
/// mean of the daily averages, not a flat mean over the raw readings.
pub fn bucket_month(readings: Vec<UsageReading>) -> Result<MonthlyBucket, UsageError> {
    let first = earliest(&readings).ok_or(UsageError::EmptyDataset("month"))?;
    let month = first.format("%Y-%m").to_string();

    let days = bucket_by_day(readings);
    let total_usage = days.iter().map(|d| d.total_usage).sum();
    let average_flow = mean(days.iter().map(|d| d.average_flow));

    Ok(MonthlyBucket {
        month,
        days,
        total_usage,
        average_flow,
    })
}

/// Month buckets of one year plus the year rollup, averaged the same
/// two-stage way as [`bucket_month`].
pub fn bucket_year(readings: Vec<UsageReading>) -> Result<YearlyBucket, UsageError> {
    let first = earliest(&readings).ok_or(UsageError::EmptyDataset("year"))?;
    let year = first.year();

    let mut by_month: BTreeMap<(i32, u32), Vec<UsageReading>> = BTreeMap::new();
    for reading in readings {
        let key = (reading.recorded_at.year(), reading.recorded_at.month());
        by_month.entry(key).or_default().push(reading);
    }

    let months = by_month
        .into_values()
        .map(bucket_month)
        .collect::<Result<Vec<_>, _>>()?;
    let total_usage = months.iter().map(|m| m.total_usage).sum();
    let average_flow = mean(months.iter().map(|m| m.average_flow));

    Ok(YearlyBucket {
        year,
        months,
        total_usage,
        average_flow,
    })
}

/// Restricts `readings` to the calendar window of `granularity` around `now`
/// and aggregates them.
pub fn build_buckets(
    granularity: Granularity,
    now: DateTime<Utc>,
    readings: Vec<UsageReading>,
) -> Result<BucketResult, UsageError> {
    let (start, end) = granularity.time_range(now);
    let in_range: Vec<UsageReading> = readings
        .into_iter()
        .filter(|r| r.recorded_at >= start && r.recorded_at < end)
        .collect();

    Ok(match granularity {
        Granularity::Day => BucketResult::Day(bucket_by_day(in_range)),
        Granularity::Week => BucketResult::Week(bucket_by_day(in_range)),
        Granularity::Month => BucketResult::Month(bucket_month(in_range)?),
        Granularity::Year => BucketResult::Year(bucket_year(in_range)?),
    })
}

fn earliest(readings: &[UsageReading]) -> Option<DateTime<Utc>> {
    readings.iter().map(|r| r.recorded_at).min()
}
