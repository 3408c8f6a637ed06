use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, QuerySelect, Set,
};

use crate::db::entities::{daily_usage, notification};
use crate::db::services::device_service;
use crate::web::error::AppError;

pub async fn find_snapshot<C: ConnectionTrait>(
    db: &C,
    device_id: &str,
    date: NaiveDate,
) -> Result<Option<daily_usage::Model>, AppError> {
    Ok(daily_usage::Entity::find()
        .filter(daily_usage::Column::DeviceId.eq(device_id))
        .filter(daily_usage::Column::Date.eq(date))
        .one(db)
        .await?)
}

/// Writes the device's total for `date`, overwriting an existing snapshot.
/// Once a snapshot is marked notified it stays notified.
pub async fn upsert_snapshot<C: ConnectionTrait>(
    db: &C,
    device_id: &str,
    date: NaiveDate,
    total_usage: f64,
    notified: bool,
    now: DateTime<Utc>,
) -> Result<daily_usage::Model, AppError> {
    match find_snapshot(db, device_id, date).await? {
        Some(existing) => {
            let was_notified = existing.notified;
            let mut active = existing.into_active_model();
            active.total_usage = Set(total_usage);
            active.notified = Set(was_notified || notified);
            active.updated_at = Set(now);
            Ok(active.update(db).await?)
        }
        None => Ok(daily_usage::ActiveModel {
            device_id: Set(device_id.to_string()),
            date: Set(date),
            total_usage: Set(total_usage),
            notified: Set(notified),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await?),
    }
}

pub async fn append_notification<C: ConnectionTrait>(
    db: &C,
    device_id: &str,
    message: String,
    threshold: f64,
    now: DateTime<Utc>,
) -> Result<notification::Model, AppError> {
    Ok(notification::ActiveModel {
        device_id: Set(device_id.to_string()),
        message: Set(message),
        threshold: Set(threshold),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?)
}

/// Notifications for every device the user can see, newest first.
pub async fn notifications_for_user(
    db: &DatabaseConnection,
    user_id: i32,
    limit: u64,
) -> Result<Vec<notification::Model>, AppError> {
    let device_ids: Vec<String> = device_service::devices_for_user(db, user_id)
        .await?
        .into_iter()
        .map(|d| d.id)
        .collect();
    if device_ids.is_empty() {
        return Ok(Vec::new());
    }

    Ok(notification::Entity::find()
        .filter(notification::Column::DeviceId.is_in(device_ids))
        .order_by_desc(notification::Column::CreatedAt)
        .order_by_desc(notification::Column::Id)
        .limit(limit)
        .all(db)
        .await?)
}
