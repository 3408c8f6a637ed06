use std::collections::HashMap;

use chrono::{DateTime, Duration, Months, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::Deserialize;
use tracing::debug;

use crate::db::entities::water_usage;
use crate::db::services::{device_service, group_service};
use crate::usage::{self, BucketResult, ComparisonWindows, Granularity, UsageComparison, UsageReading};
use crate::web::error::AppError;

/// Telemetry pushed by a sensor.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUsageReading {
    pub device_id: String,
    pub total_usage: f64,
    #[serde(default)]
    pub flow_rate: f64,
    /// Defaults to the time of ingestion.
    pub recorded_at: Option<DateTime<Utc>>,
}

/// Validates and stores one reading. The device must already exist.
pub async fn record_usage_reading(
    db: &DatabaseConnection,
    reading: NewUsageReading,
) -> Result<UsageReading, AppError> {
    device_service::validate_device_id(&reading.device_id)?;
    if !reading.total_usage.is_finite() || reading.total_usage <= 0.0 {
        return Err(AppError::InvalidInput(
            "Total usage must be greater than zero".to_string(),
        ));
    }
    if !reading.flow_rate.is_finite() || reading.flow_rate < 0.0 {
        return Err(AppError::InvalidInput(
            "Flow rate must be a non-negative number".to_string(),
        ));
    }

    let txn = db.begin().await?;
    device_service::get_device(&txn, &reading.device_id).await?;

    let stored = water_usage::ActiveModel {
        device_id: Set(reading.device_id),
        flow_rate: Set(reading.flow_rate),
        total_usage: Set(reading.total_usage),
        recorded_at: Set(reading.recorded_at.unwrap_or_else(Utc::now)),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;
    debug!(device_id = %stored.device_id, total_usage = stored.total_usage, "Recorded usage reading.");
    Ok(stored)
}

/// Readings of the given devices with `start <= recorded_at < end`, oldest first.
pub async fn readings_between<C: ConnectionTrait>(
    db: &C,
    device_ids: &[String],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<UsageReading>, AppError> {
    if device_ids.is_empty() {
        return Ok(Vec::new());
    }
    Ok(water_usage::Entity::find()
        .filter(water_usage::Column::DeviceId.is_in(device_ids.iter().cloned()))
        .filter(water_usage::Column::RecordedAt.gte(start))
        .filter(water_usage::Column::RecordedAt.lt(end))
        .order_by_asc(water_usage::Column::RecordedAt)
        .all(db)
        .await?)
}

/// Per-device sums of `total_usage`, over `[start, end)` when a window is
/// given and over all time otherwise. Devices without readings are absent.
pub async fn device_totals<C: ConnectionTrait>(
    db: &C,
    device_ids: &[String],
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
) -> Result<HashMap<String, f64>, AppError> {
    if device_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let mut query = water_usage::Entity::find()
        .select_only()
        .column(water_usage::Column::DeviceId)
        .column_as(water_usage::Column::TotalUsage.sum(), "total")
        .filter(water_usage::Column::DeviceId.is_in(device_ids.iter().cloned()));
    if let Some((start, end)) = window {
        query = query
            .filter(water_usage::Column::RecordedAt.gte(start))
            .filter(water_usage::Column::RecordedAt.lt(end));
    }
    let rows: Vec<(String, Option<f64>)> = query
        .group_by(water_usage::Column::DeviceId)
        .into_tuple()
        .all(db)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(device_id, total)| (device_id, total.unwrap_or_default()))
        .collect())
}

/// Sum of `total_usage` for one device over `[start, end)`.
pub async fn device_total_between<C: ConnectionTrait>(
    db: &C,
    device_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<f64, AppError> {
    let totals = device_totals(db, &[device_id.to_string()], Some((start, end))).await?;
    Ok(totals.get(device_id).copied().unwrap_or_default())
}

pub async fn get_usage_buckets(
    db: &DatabaseConnection,
    device_id: &str,
    granularity: Granularity,
    now: DateTime<Utc>,
) -> Result<BucketResult, AppError> {
    device_service::get_device(db, device_id).await?;
    let (start, end) = granularity.time_range(now);
    let readings = readings_between(db, &[device_id.to_string()], start, end).await?;
    Ok(usage::build_buckets(granularity, now, readings)?)
}

async fn compare_devices(
    db: &DatabaseConnection,
    device_ids: Vec<String>,
    now: DateTime<Utc>,
) -> Result<UsageComparison, AppError> {
    if device_ids.is_empty() {
        return Ok(UsageComparison::empty());
    }
    let windows = ComparisonWindows::for_now(now);
    // `now` is inclusive for the current window.
    let end = now + Duration::microseconds(1);
    let readings = readings_between(db, &device_ids, windows.previous_start, end).await?;
    Ok(UsageComparison::from_readings(&windows, readings))
}

/// Current calendar month so far against the whole previous month, for all
/// devices of one group.
pub async fn compare_group_usage(
    db: &DatabaseConnection,
    group_id: i32,
    now: DateTime<Utc>,
) -> Result<UsageComparison, AppError> {
    group_service::get_group(db, group_id).await?;
    let device_ids = device_service::devices_in_group(db, group_id)
        .await?
        .into_iter()
        .map(|d| d.id)
        .collect();
    compare_devices(db, device_ids, now).await
}

/// Same as [`compare_group_usage`] across every group the user belongs to.
pub async fn compare_user_usage(
    db: &DatabaseConnection,
    user_id: i32,
    now: DateTime<Utc>,
) -> Result<UsageComparison, AppError> {
    let device_ids = device_service::devices_for_user(db, user_id)
        .await?
        .into_iter()
        .map(|d| d.id)
        .collect();
    compare_devices(db, device_ids, now).await
}

fn analysis_window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_sub_months(Months::new(3))
        .unwrap_or_else(|| now - Duration::days(90))
}

/// Readings of the last three months for a user's devices.
pub async fn recent_readings_for_user(
    db: &DatabaseConnection,
    user_id: i32,
    now: DateTime<Utc>,
) -> Result<Vec<UsageReading>, AppError> {
    let device_ids: Vec<String> = device_service::devices_for_user(db, user_id)
        .await?
        .into_iter()
        .map(|d| d.id)
        .collect();
    readings_between(db, &device_ids, analysis_window_start(now), now + Duration::seconds(1)).await
}

/// Readings of the last three months for a group's devices.
pub async fn recent_readings_for_group(
    db: &DatabaseConnection,
    group_id: i32,
    now: DateTime<Utc>,
) -> Result<Vec<UsageReading>, AppError> {
    let device_ids: Vec<String> = device_service::devices_in_group(db, group_id)
        .await?
        .into_iter()
        .map(|d| d.id)
        .collect();
    readings_between(db, &device_ids, analysis_window_start(now), now + Duration::seconds(1)).await
}
