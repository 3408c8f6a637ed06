use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sea_orm::{DatabaseConnection, EntityTrait, QuerySelect, TransactionTrait};
use serde::Serialize;
use tokio::time::{interval, Duration as TokioDuration};
use tracing::{debug, error, info, warn};

use super::MessageTemplates;
use crate::db::entities::{device, notification};
use crate::db::services::{device_service, group_service, notification_service, usage_service};
use crate::usage::range::start_of_day;
use crate::usage::{percent_change, ChangeDirection};
use crate::web::error::AppError;

/// Percent change worth notifying about, given yesterday's snapshot (if any)
/// and today's running total.
///
/// Only increases over a non-zero baseline notify. A device without a
/// snapshot for yesterday, or with a zero one, has nothing meaningful to be
/// compared against.
pub fn notifiable_change(yesterday: Option<f64>, today: f64) -> Option<f64> {
    let yesterday = yesterday.filter(|total| *total > 0.0)?;
    let percent = percent_change(yesterday, today);
    (ChangeDirection::from_percent(percent) == ChangeDirection::Increase).then_some(percent)
}

/// One line of the live digest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestEntry {
    pub device_id: String,
    /// `group | device | location`
    pub title: String,
    pub message: String,
    pub direction: ChangeDirection,
    pub percent: f64,
    pub yesterday_total: f64,
    pub today_total: f64,
}

pub struct NotificationEngine {
    db: DatabaseConnection,
    templates: MessageTemplates,
}

impl NotificationEngine {
    pub fn new(db: DatabaseConnection, templates: MessageTemplates) -> Self {
        Self { db, templates }
    }

    pub async fn start_periodic_sweep(self: Arc<Self>, period_seconds: u64) {
        info!(period_seconds, "Notification sweep scheduler started.");
        let mut ticker = interval(TokioDuration::from_secs(period_seconds.max(1)));
        loop {
            ticker.tick().await;
            match self.run_sweep(Utc::now()).await {
                Ok(emitted) => info!(count = emitted.len(), "Scheduled notification sweep finished."),
                Err(e) => error!(error = %e, "Scheduled notification sweep failed."),
            }
        }
    }

    /// Compares every device's usage today with its snapshot for yesterday,
    /// stores today's snapshot and returns the notifications it appended.
    ///
    /// A failure on one device is logged and the sweep moves on.
    pub async fn run_sweep(&self, now: DateTime<Utc>) -> Result<Vec<notification::Model>, AppError> {
        let devices = device::Entity::find().all(&self.db).await?;
        let mut emitted = Vec::new();

        for device in &devices {
            match self.sweep_device(device, now).await {
                Ok(Some(notification)) => emitted.push(notification),
                Ok(None) => {}
                Err(e) => warn!(device_id = %device.id, error = %e, "Skipping device in notification sweep."),
            }
        }

        info!(devices = devices.len(), emitted = emitted.len(), "Notification sweep completed.");
        Ok(emitted)
    }

    /// Runs under an exclusive lock on the device row so a scheduled and an
    /// on-demand sweep cannot interleave their snapshot read and write.
    async fn sweep_device(
        &self,
        device: &device::Model,
        now: DateTime<Utc>,
    ) -> Result<Option<notification::Model>, AppError> {
        let today = now.date_naive();
        let yesterday = today - Duration::days(1);
        let day_start = start_of_day(today);
        let day_end = start_of_day(today + Duration::days(1));

        let txn = self.db.begin().await?;

        let locked = device::Entity::find_by_id(device.id.clone())
            .lock_exclusive()
            .one(&txn)
            .await?;
        if locked.is_none() {
            // Removed since the device list was read.
            txn.commit().await?;
            return Ok(None);
        }

        let today_total =
            usage_service::device_total_between(&txn, &device.id, day_start, day_end).await?;
        let yesterday_total = notification_service::find_snapshot(&txn, &device.id, yesterday)
            .await?
            .map(|s| s.total_usage);
        let already_notified = notification_service::find_snapshot(&txn, &device.id, today)
            .await?
            .is_some_and(|s| s.notified);

        let mut emitted = None;
        if !already_notified {
            if let Some(percent) = notifiable_change(yesterday_total, today_total) {
                let message = self.templates.render(
                    ChangeDirection::Increase,
                    &device.name,
                    percent,
                    yesterday_total.unwrap_or_default(),
                    today_total,
                )?;
                let appended =
                    notification_service::append_notification(&txn, &device.id, message, percent, now)
                        .await?;
                emitted = Some(appended);
            }
        }

        notification_service::upsert_snapshot(
            &txn,
            &device.id,
            today,
            today_total,
            emitted.is_some(),
            now,
        )
        .await?;

        txn.commit().await?;
        debug!(
            device_id = %device.id,
            today_total,
            yesterday_total = ?yesterday_total,
            notified = emitted.is_some(),
            "Swept device."
        );
        Ok(emitted)
    }

    /// Live today-versus-yesterday summary for every device the user can
    /// see. Nothing is persisted. Devices with no usage on either day are
    /// left out.
    pub async fn digest_for_user(
        &self,
        user_id: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<DigestEntry>, AppError> {
        let today = now.date_naive();
        let today_start = start_of_day(today);
        let tomorrow_start = start_of_day(today + Duration::days(1));
        let yesterday_start = start_of_day(today - Duration::days(1));

        let group_names: HashMap<i32, String> = group_service::groups_for_user(&self.db, user_id)
            .await?
            .into_iter()
            .map(|g| (g.id, g.name))
            .collect();
        let devices = device_service::devices_for_user(&self.db, user_id).await?;

        let mut entries = Vec::new();
        for device in devices {
            let today_total = usage_service::device_total_between(
                &self.db,
                &device.id,
                today_start,
                tomorrow_start,
            )
            .await?;
            let yesterday_total = usage_service::device_total_between(
                &self.db,
                &device.id,
                yesterday_start,
                today_start,
            )
            .await?;
            if today_total == 0.0 && yesterday_total == 0.0 {
                continue;
            }

            let percent = percent_change(yesterday_total, today_total);
            let direction = ChangeDirection::from_percent(percent);
            let message =
                self.templates
                    .render(direction, &device.name, percent, yesterday_total, today_total)?;
            let group_name = group_names
                .get(&device.user_group_id)
                .map(String::as_str)
                .unwrap_or_default();

            entries.push(DigestEntry {
                title: format!("{} | {} | {}", group_name, device.name, device.location),
                device_id: device.id,
                message,
                direction,
                percent,
                yesterday_total,
                today_total,
            });
        }
        Ok(entries)
    }
}
