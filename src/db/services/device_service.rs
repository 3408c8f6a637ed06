use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::info;

use crate::db::entities::{daily_usage, device, notification, water_usage};
use crate::db::services::{group_service, usage_service};
use crate::web::error::AppError;

const DEVICE_ID_PREFIX: &str = "ET-";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceUsageShare {
    pub device_id: String,
    pub name: String,
    pub location: String,
    pub total_usage: f64,
    /// Share of the group total, 0..=100.
    pub percentage: f64,
}

/// Device identifiers look like `ET-` followed by hex digits and dashes.
pub fn validate_device_id(device_id: &str) -> Result<(), AppError> {
    let valid = device_id
        .strip_prefix(DEVICE_ID_PREFIX)
        .is_some_and(|rest| {
            !rest.is_empty() && rest.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
        });
    if valid {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!("Invalid device ID format: {device_id}")))
    }
}

pub async fn find_device<C: ConnectionTrait>(
    db: &C,
    device_id: &str,
) -> Result<Option<device::Model>, AppError> {
    Ok(device::Entity::find_by_id(device_id.to_string()).one(db).await?)
}

pub async fn get_device<C: ConnectionTrait>(
    db: &C,
    device_id: &str,
) -> Result<device::Model, AppError> {
    find_device(db, device_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Device {device_id} not found")))
}

pub async fn add_device(
    db: &DatabaseConnection,
    group_id: i32,
    device_id: &str,
    name: &str,
    location: &str,
) -> Result<device::Model, AppError> {
    validate_device_id(device_id)?;
    if name.trim().is_empty() {
        return Err(AppError::InvalidInput("Device name must not be empty".to_string()));
    }

    let txn = db.begin().await?;
    group_service::get_group(&txn, group_id).await?;
    if find_device(&txn, device_id).await?.is_some() {
        return Err(AppError::Conflict(format!("Device {device_id} is already registered")));
    }

    let created = device::ActiveModel {
        id: Set(device_id.to_string()),
        user_group_id: Set(group_id),
        name: Set(name.trim().to_string()),
        location: Set(location.trim().to_string()),
        created_at: Set(Utc::now()),
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;
    info!(device_id, group_id, "Registered device.");
    Ok(created)
}

/// Removes a device of `group_id` together with its readings, snapshots and
/// notifications.
pub async fn remove_device(
    db: &DatabaseConnection,
    group_id: i32,
    device_id: &str,
) -> Result<(), AppError> {
    let txn = db.begin().await?;

    let found = get_device(&txn, device_id).await?;
    if found.user_group_id != group_id {
        return Err(AppError::NotFound(format!(
            "Device {device_id} not found in group {group_id}"
        )));
    }

    let readings = water_usage::Entity::delete_many()
        .filter(water_usage::Column::DeviceId.eq(device_id))
        .exec(&txn)
        .await?;
    daily_usage::Entity::delete_many()
        .filter(daily_usage::Column::DeviceId.eq(device_id))
        .exec(&txn)
        .await?;
    notification::Entity::delete_many()
        .filter(notification::Column::DeviceId.eq(device_id))
        .exec(&txn)
        .await?;
    device::Entity::delete_by_id(device_id.to_string())
        .exec(&txn)
        .await?;

    txn.commit().await?;
    info!(device_id, group_id, readings = readings.rows_affected, "Removed device.");
    Ok(())
}

pub async fn devices_in_group<C: ConnectionTrait>(
    db: &C,
    group_id: i32,
) -> Result<Vec<device::Model>, AppError> {
    Ok(device::Entity::find()
        .filter(device::Column::UserGroupId.eq(group_id))
        .order_by_asc(device::Column::Name)
        .all(db)
        .await?)
}

pub async fn devices_in_groups<C: ConnectionTrait>(
    db: &C,
    group_ids: &[i32],
) -> Result<Vec<device::Model>, AppError> {
    if group_ids.is_empty() {
        return Ok(Vec::new());
    }
    Ok(device::Entity::find()
        .filter(device::Column::UserGroupId.is_in(group_ids.iter().copied()))
        .order_by_asc(device::Column::Id)
        .all(db)
        .await?)
}

pub async fn devices_for_user<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
) -> Result<Vec<device::Model>, AppError> {
    let group_ids = group_service::group_ids_for_user(db, user_id).await?;
    devices_in_groups(db, &group_ids).await
}

/// Each device's all-time consumption as a share of the group's total.
pub async fn usage_share(
    db: &DatabaseConnection,
    group_id: i32,
) -> Result<Vec<DeviceUsageShare>, AppError> {
    let devices = devices_in_group(db, group_id).await?;
    if devices.is_empty() {
        return Ok(Vec::new());
    }

    let device_ids: Vec<String> = devices.iter().map(|d| d.id.clone()).collect();
    let totals = usage_service::device_totals(db, &device_ids, None).await?;
    let group_total: f64 = totals.values().sum();

    Ok(devices
        .iter()
        .map(|d| {
            let total_usage = totals.get(d.id.as_str()).copied().unwrap_or_default();
            let percentage = if group_total > 0.0 {
                total_usage / group_total * 100.0
            } else {
                0.0
            };
            DeviceUsageShare {
                device_id: d.id.clone(),
                name: d.name.clone(),
                location: d.location.clone(),
                total_usage,
                percentage,
            }
        })
        .collect())
}
