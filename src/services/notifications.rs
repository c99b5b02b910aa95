//! Notification service
//!
//! Creates in-app notifications from other parts of the application and fans
//! them out to email and push according to each user's preferences.

use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::jobs::Job;
use super::mailer::OutgoingEmail;
use crate::app::AppState;
use crate::domain::notifications::{
    DeliveryChannel, NewNotification, Notification, NotificationPreference,
};

/// Read notifications older than this are deleted by maintenance
pub const READ_RETENTION_DAYS: i64 = 30;
/// Notifications listed in a daily digest email
pub const DIGEST_LIMIT: i64 = 10;

/// Stored preferences, or the defaults when the user never saved any.
pub async fn preferences_for(
    db: &PgPool,
    user_id: Uuid,
) -> Result<NotificationPreference, sqlx::Error> {
    let prefs: Option<NotificationPreference> =
        sqlx::query_as("SELECT * FROM notification_preferences WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(db)
            .await?;
    Ok(prefs.unwrap_or_else(|| NotificationPreference::defaults_for(user_id)))
}

/// Stores the notification, then queues email and push delivery.
pub async fn create_notification(
    state: &AppState,
    new: NewNotification,
) -> Result<Notification, sqlx::Error> {
    let (related_type, related_id) = match &new.related {
        Some((kind, id)) => (Some(kind.clone()), Some(*id)),
        None => (None, None),
    };

    let notification: Notification = sqlx::query_as(
        r#"
        INSERT INTO notifications (id, user_id, notification_type, title, message, related_type, related_id, extra_data)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(new.user_id)
    .bind(new.notification_type.to_string())
    .bind(&new.title)
    .bind(&new.message)
    .bind(related_type)
    .bind(related_id)
    .bind(sqlx::types::Json(&new.extra_data))
    .fetch_one(&state.db)
    .await?;

    tracing::info!(
        user_id = %new.user_id,
        notification_type = %new.notification_type,
        notification_id = %notification.id,
        "Notification created"
    );

    let prefs = preferences_for(&state.db, new.user_id).await?;

    if prefs.allows(DeliveryChannel::Email, new.notification_type) {
        let email: Option<String> =
            sqlx::query_scalar("SELECT email FROM users WHERE id = $1 AND is_active = TRUE")
                .bind(new.user_id)
                .fetch_optional(&state.db)
                .await?;
        if let Some(email) = email {
            let subject = format!("[{}] {}", state.settings.site_name, new.title);
            let body = format!(
                "{}\n\n{}\n\n{}",
                new.title, new.message, state.settings.site_url
            );
            state
                .jobs
                .enqueue(Job::SendEmail(OutgoingEmail::plain(email, subject, body)));
        }
    }

    if prefs.allows(DeliveryChannel::Push, new.notification_type) {
        state.jobs.enqueue(Job::PushToUser {
            user_id: new.user_id,
            title: new.title.clone(),
            body: new.message.clone(),
            data: serde_json::json!({
                "notification_id": notification.id,
                "notification_type": new.notification_type,
            }),
        });
    }

    Ok(notification)
}

/// Best-effort variant for side effects of other operations.
pub async fn notify(state: &AppState, new: NewNotification) {
    let user_id = new.user_id;
    if let Err(e) = create_notification(state, new).await {
        tracing::error!(user_id = %user_id, error = %e, "Failed to create notification");
    }
}

/// Same notification for each of `user_ids`; the prototype's own user is
/// ignored. Returns how many were created.
pub async fn create_bulk(
    state: &AppState,
    user_ids: &[Uuid],
    prototype: &NewNotification,
) -> Result<usize, sqlx::Error> {
    let mut created = 0;
    for user_id in user_ids {
        let new = NewNotification {
            user_id: *user_id,
            ..prototype.clone()
        };
        create_notification(state, new).await?;
        created += 1;
    }
    Ok(created)
}

pub async fn cleanup_read_notifications(db: &PgPool) -> Result<u64, sqlx::Error> {
    let cutoff = Utc::now() - Duration::days(READ_RETENTION_DAYS);
    let result = sqlx::query("DELETE FROM notifications WHERE is_read = TRUE AND created_at < $1")
        .bind(cutoff)
        .execute(db)
        .await?;

    tracing::info!(deleted = result.rows_affected(), "Old read notifications deleted");
    Ok(result.rows_affected())
}

#[derive(Debug, FromRow)]
struct DigestRecipient {
    id: Uuid,
    email: String,
    first_name: String,
    total_unread: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct DigestItem {
    pub title: String,
    pub message: String,
}

/// Plain-text digest body.
pub fn digest_body(first_name: &str, items: &[DigestItem], total_unread: i64, site_url: &str) -> String {
    let greeting = if first_name.trim().is_empty() {
        "Hello,".to_string()
    } else {
        format!("Hello {},", first_name.trim())
    };
    let mut body = format!(
        "{}\n\nYou have {} unread notifications.\n\n",
        greeting, total_unread
    );
    for item in items {
        body.push_str(&format!("- {}: {}\n", item.title, item.message));
    }
    body.push_str(&format!("\n{}\n", site_url));
    body
}

/// Emails users who received unread notifications in the last 24 hours.
pub async fn send_daily_digest(state: &AppState) -> Result<u64> {
    let since = Utc::now() - Duration::days(1);

    let recipients: Vec<DigestRecipient> = sqlx::query_as(
        r#"
        SELECT u.id, u.email, u.first_name,
               (SELECT COUNT(*) FROM notifications a WHERE a.user_id = u.id AND a.is_read = FALSE) AS total_unread
        FROM users u
        LEFT JOIN notification_preferences p ON p.user_id = u.id
        WHERE u.is_active = TRUE
          AND COALESCE(p.email_project_updates, TRUE) = TRUE
          AND EXISTS (
              SELECT 1 FROM notifications n
              WHERE n.user_id = u.id AND n.is_read = FALSE AND n.created_at >= $1
          )
        "#,
    )
    .bind(since)
    .fetch_all(&state.db)
    .await?;

    let mut sent = 0u64;
    for recipient in recipients {
        let items: Vec<DigestItem> = sqlx::query_as(
            r#"
            SELECT title, message FROM notifications
            WHERE user_id = $1 AND is_read = FALSE AND created_at >= $2
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(recipient.id)
        .bind(since)
        .bind(DIGEST_LIMIT)
        .fetch_all(&state.db)
        .await?;

        if items.is_empty() {
            continue;
        }

        let subject = format!(
            "[{}] Daily Digest - {} unread notifications",
            state.settings.site_name,
            items.len()
        );
        let body = digest_body(
            &recipient.first_name,
            &items,
            recipient.total_unread,
            &state.settings.site_url,
        );
        state
            .jobs
            .enqueue(Job::SendEmail(OutgoingEmail::plain(recipient.email, subject, body)));
        sent += 1;
    }

    tracing::info!(sent = sent, "Daily digest queued");
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_lists_items() {
        let items = vec![
            DigestItem {
                title: "New application".into(),
                message: "Bo applied".into(),
            },
            DigestItem {
                title: "Review".into(),
                message: "5 stars".into(),
            },
        ];
        let body = digest_body("Ana", &items, 4, "https://handshakeme.com");
        assert!(body.starts_with("Hello Ana,"));
        assert!(body.contains("You have 4 unread notifications."));
        assert!(body.contains("- New application: Bo applied\n"));
        assert!(body.trim_end().ends_with("https://handshakeme.com"));
    }

    #[test]
    fn digest_without_name() {
        assert!(digest_body(" ", &[], 0, "x").starts_with("Hello,"));
    }
}
