//! Notification routes
//!
//! Endpoints for in-app notifications: list, mark read, delete, and the
//! caller's delivery preferences.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{DataResponse, MessageResponse, NoContent, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::notifications::*;
use crate::error::{ApiError, ApiResult};
use crate::services::notifications::preferences_for;

/// GET /api/notifications
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<NotificationQuery>,
) -> ApiResult<impl IntoResponse> {
    let kind = filter.notification_type.map(|t| t.to_string());

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM notifications
        WHERE user_id = $1
          AND ($2::text IS NULL OR notification_type = $2)
          AND ($3::bool IS NULL OR is_read = $3)
        "#,
    )
    .bind(auth.user_id)
    .bind(&kind)
    .bind(filter.is_read)
    .fetch_one(&state.db)
    .await?;

    let notifications: Vec<Notification> = sqlx::query_as(
        r#"
        SELECT * FROM notifications
        WHERE user_id = $1
          AND ($2::text IS NULL OR notification_type = $2)
          AND ($3::bool IS NULL OR is_read = $3)
        ORDER BY created_at DESC
        LIMIT $4 OFFSET $5
        "#,
    )
    .bind(auth.user_id)
    .bind(&kind)
    .bind(filter.is_read)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&state.db)
    .await?;

    Ok(Paginated::new(notifications, &pagination, total))
}

/// GET /api/notifications/:notification_id
pub async fn get_notification(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(notification_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let notification: Notification =
        sqlx::query_as("SELECT * FROM notifications WHERE id = $1 AND user_id = $2")
            .bind(notification_id)
            .bind(auth.user_id)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(|| ApiError::not_found("Notification not found"))?;
    Ok(DataResponse::new(notification))
}

/// DELETE /api/notifications/:notification_id
pub async fn delete_notification(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(notification_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let deleted = sqlx::query("DELETE FROM notifications WHERE id = $1 AND user_id = $2")
        .bind(notification_id)
        .bind(auth.user_id)
        .execute(&state.db)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(ApiError::not_found("Notification not found"));
    }
    Ok(NoContent)
}

/// POST /api/notifications/:notification_id/read
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(notification_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let notification: Notification = sqlx::query_as(
        r#"
        UPDATE notifications
        SET is_read = TRUE, read_at = COALESCE(read_at, NOW())
        WHERE id = $1 AND user_id = $2
        RETURNING *
        "#,
    )
    .bind(notification_id)
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Notification not found"))?;
    Ok(DataResponse::new(notification))
}

/// POST /api/notifications/mark-all-read
pub async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
) -> ApiResult<impl IntoResponse> {
    let updated = sqlx::query(
        "UPDATE notifications SET is_read = TRUE, read_at = NOW() WHERE user_id = $1 AND NOT is_read",
    )
    .bind(auth.user_id)
    .execute(&state.db)
    .await?
    .rows_affected();
    Ok(MessageResponse::new(format!("{} notifications marked as read", updated)))
}

fn require_ids(req: &NotificationIdsRequest) -> ApiResult<()> {
    if req.notification_ids.is_empty() {
        return Err(ApiError::field("notification_ids", "This list may not be empty."));
    }
    Ok(())
}

/// POST /api/notifications/bulk-read
pub async fn bulk_mark_read(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Json(req): Json<NotificationIdsRequest>,
) -> ApiResult<impl IntoResponse> {
    require_ids(&req)?;
    let updated = sqlx::query(
        r#"
        UPDATE notifications SET is_read = TRUE, read_at = COALESCE(read_at, NOW())
        WHERE user_id = $1 AND id = ANY($2)
        "#,
    )
    .bind(auth.user_id)
    .bind(&req.notification_ids)
    .execute(&state.db)
    .await?
    .rows_affected();
    Ok(MessageResponse::new(format!("{} notifications marked as read", updated)))
}

/// POST /api/notifications/bulk-delete
pub async fn bulk_delete(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Json(req): Json<NotificationIdsRequest>,
) -> ApiResult<impl IntoResponse> {
    require_ids(&req)?;
    let deleted = sqlx::query("DELETE FROM notifications WHERE user_id = $1 AND id = ANY($2)")
        .bind(auth.user_id)
        .bind(&req.notification_ids)
        .execute(&state.db)
        .await?
        .rows_affected();
    Ok(MessageResponse::new(format!("{} notifications deleted", deleted)))
}

/// GET /api/notifications/unread-count
pub async fn unread_count(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
) -> ApiResult<impl IntoResponse> {
    let unread_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND NOT is_read")
            .bind(auth.user_id)
            .fetch_one(&state.db)
            .await?;
    Ok(DataResponse::new(UnreadCountResponse { unread_count }))
}

/// GET /api/notifications/stats
pub async fn notification_stats(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
) -> ApiResult<impl IntoResponse> {
    let rows: Vec<(String, i64, i64)> = sqlx::query_as(
        r#"
        SELECT notification_type, COUNT(*), COUNT(*) FILTER (WHERE NOT is_read)
        FROM notifications
        WHERE user_id = $1
        GROUP BY notification_type
        "#,
    )
    .bind(auth.user_id)
    .fetch_all(&state.db)
    .await?;

    let mut by_type = BTreeMap::new();
    let (mut total, mut unread) = (0, 0);
    for (kind, count, unread_count) in rows {
        total += count;
        unread += unread_count;
        by_type.insert(kind, count);
    }

    Ok(DataResponse::new(NotificationStats {
        total,
        unread,
        by_type,
    }))
}

/// GET /api/notifications/preferences
pub async fn get_preferences(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
) -> ApiResult<impl IntoResponse> {
    Ok(DataResponse::new(preferences_for(&state.db, auth.user_id).await?))
}

/// PUT /api/notifications/preferences
pub async fn update_preferences(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Json(req): Json<UpdatePreferencesRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut prefs = preferences_for(&state.db, auth.user_id).await?;
    req.apply(&mut prefs);

    let prefs: NotificationPreference = sqlx::query_as(
        r#"
        INSERT INTO notification_preferences (
            user_id, email_project_updates, email_new_messages, email_applications, email_reviews,
            email_marketing, push_project_updates, push_new_messages, push_applications,
            push_reviews, inapp_project_updates, inapp_new_messages, inapp_applications,
            inapp_reviews)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (user_id) DO UPDATE SET
            email_project_updates = EXCLUDED.email_project_updates,
            email_new_messages = EXCLUDED.email_new_messages,
            email_applications = EXCLUDED.email_applications,
            email_reviews = EXCLUDED.email_reviews,
            email_marketing = EXCLUDED.email_marketing,
            push_project_updates = EXCLUDED.push_project_updates,
            push_new_messages = EXCLUDED.push_new_messages,
            push_applications = EXCLUDED.push_applications,
            push_reviews = EXCLUDED.push_reviews,
            inapp_project_updates = EXCLUDED.inapp_project_updates,
            inapp_new_messages = EXCLUDED.inapp_new_messages,
            inapp_applications = EXCLUDED.inapp_applications,
            inapp_reviews = EXCLUDED.inapp_reviews
        RETURNING *
        "#,
    )
    .bind(auth.user_id)
    .bind(prefs.email_project_updates)
    .bind(prefs.email_new_messages)
    .bind(prefs.email_applications)
    .bind(prefs.email_reviews)
    .bind(prefs.email_marketing)
    .bind(prefs.push_project_updates)
    .bind(prefs.push_new_messages)
    .bind(prefs.push_applications)
    .bind(prefs.push_reviews)
    .bind(prefs.inapp_project_updates)
    .bind(prefs.inapp_new_messages)
    .bind(prefs.inapp_applications)
    .bind(prefs.inapp_reviews)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(user_id = %auth.user_id, "Notification preferences updated");
    Ok(DataResponse::new(prefs))
}
