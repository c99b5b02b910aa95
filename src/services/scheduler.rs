//! Periodic work: due scheduled sends and daily maintenance.

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use super::jobs::Job;
use super::notifications;
use crate::app::AppState;
use crate::domain::admin::DeliveryStatus;

/// Sent and failed push notifications are kept this long
pub const PUSH_RETENTION_DAYS: i64 = 90;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Moves due `scheduled` pushes to `sending`; each id is claimed once.
pub async fn claim_due_push_notifications(db: &PgPool) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        UPDATE push_notifications
        SET status = $1, updated_at = NOW()
        WHERE status = $2 AND scheduled_at <= NOW()
        RETURNING id
        "#,
    )
    .bind(DeliveryStatus::Sending.to_string())
    .bind(DeliveryStatus::Scheduled.to_string())
    .fetch_all(db)
    .await
}

pub async fn claim_due_campaigns(db: &PgPool) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        UPDATE email_campaigns
        SET status = $1, updated_at = NOW()
        WHERE status = $2 AND scheduled_at <= NOW()
        RETURNING id
        "#,
    )
    .bind(DeliveryStatus::Sending.to_string())
    .bind(DeliveryStatus::Scheduled.to_string())
    .fetch_all(db)
    .await
}

async fn dispatch_due(state: &AppState) -> Result<()> {
    for notification_id in claim_due_push_notifications(&state.db).await? {
        tracing::info!(notification_id = %notification_id, "Scheduled push notification due");
        state.jobs.enqueue(Job::SendPushNotification { notification_id });
    }
    for campaign_id in claim_due_campaigns(&state.db).await? {
        tracing::info!(campaign_id = %campaign_id, "Scheduled campaign due");
        state.jobs.enqueue(Job::SendCampaign { campaign_id });
    }
    Ok(())
}

pub async fn delete_old_push_notifications(db: &PgPool) -> Result<u64, sqlx::Error> {
    let cutoff = Utc::now() - ChronoDuration::days(PUSH_RETENTION_DAYS);
    let result = sqlx::query(
        "DELETE FROM push_notifications WHERE status IN ($1, $2) AND created_at < $3",
    )
    .bind(DeliveryStatus::Sent.to_string())
    .bind(DeliveryStatus::Failed.to_string())
    .bind(cutoff)
    .execute(db)
    .await?;

    tracing::info!(deleted = result.rows_affected(), "Old push notifications deleted");
    Ok(result.rows_affected())
}

pub async fn mark_overdue_milestones(db: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE project_milestones
        SET status = 'overdue', updated_at = NOW()
        WHERE status IN ('pending', 'in_progress') AND due_date < CURRENT_DATE
        "#,
    )
    .execute(db)
    .await?;

    tracing::info!(updated = result.rows_affected(), "Overdue milestones marked");
    Ok(result.rows_affected())
}

async fn daily_maintenance(state: &AppState) {
    if let Err(e) = notifications::cleanup_read_notifications(&state.db).await {
        tracing::error!(error = %e, "Notification cleanup failed");
    }
    if let Err(e) = delete_old_push_notifications(&state.db).await {
        tracing::error!(error = %e, "Push notification cleanup failed");
    }
    if let Err(e) = notifications::send_daily_digest(state).await {
        tracing::error!(error = %e, "Daily digest failed");
    }
    if let Err(e) = mark_overdue_milestones(&state.db).await {
        tracing::error!(error = %e, "Overdue milestone update failed");
    }
}

/// Runs until the process exits.
pub async fn run_scheduler(state: Arc<AppState>) {
    let period = Duration::from_secs(state.settings.scheduler_interval_seconds.max(1));
    let mut due = tokio::time::interval(period);
    due.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut daily = tokio::time::interval(DAY);
    daily.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(interval_secs = period.as_secs(), "Scheduler started");

    loop {
        tokio::select! {
            _ = due.tick() => {
                if let Err(e) = dispatch_due(&state).await {
                    tracing::error!(error = %e, "Scheduled send dispatch failed");
                }
            }
            _ = daily.tick() => daily_maintenance(&state).await,
        }
    }
}
