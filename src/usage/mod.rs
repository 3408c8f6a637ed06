//! Aggregation core: calendar bucketing of raw readings, month-over-month
//! comparison and day-over-day change. Nothing in here touches storage.

pub mod buckets;
pub mod change;
pub mod comparison;
pub mod range;

pub use buckets::{
    average_flow, bucket_by_day, bucket_month, bucket_year, build_buckets, BucketResult,
    DailyBucket, MonthlyBucket, UsageReading, YearlyBucket,
};
pub use change::{percent_change, ChangeDirection};
pub use comparison::{ComparisonWindows, UsageComparison};
pub use range::Granularity;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("Unsupported range filter: {0}")]
    UnsupportedRange(String),
    #[error("No readings available to build the {0} aggregate")]
    EmptyDataset(&'static str),
}
