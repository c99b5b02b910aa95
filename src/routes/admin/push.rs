//! Broadcast push notifications and their templates

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use super::record;
use crate::api::{Created, DataResponse, MessageResponse, NoContent};
use crate::app::AppState;
use crate::auth::{RequireAdmin, RequireAuth};
use crate::domain::accounts::UserSummary;
use crate::domain::admin::*;
use crate::error::{ApiError, ApiResult};
use crate::middleware::ClientIp;
use crate::services::audit::AuditEntry;
use crate::services::jobs::Job;
use crate::services::push::{send_to_user, PushOutcome};
use crate::services::{audience, templates};

const AUDIENCE_SAMPLE: i64 = 10;

#[derive(Debug, Serialize)]
pub struct PushPreview {
    pub title: String,
    pub message: String,
    pub total_recipients: i64,
    pub sample: Vec<UserSummary>,
}

#[derive(Debug, Serialize)]
pub struct TestPushResult {
    pub user_id: Uuid,
    pub delivered_to_device: bool,
}

async fn load_notification(state: &AppState, notification_id: Uuid) -> ApiResult<PushNotification> {
    sqlx::query_as("SELECT * FROM push_notifications WHERE id = $1")
        .bind(notification_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Push notification not found"))
}

async fn insert_notification(
    state: &AppState,
    admin: &RequireAdmin,
    req: &PushNotificationRequest,
) -> ApiResult<PushNotification> {
    let status = if req.scheduled_at.is_some() {
        DeliveryStatus::Scheduled
    } else {
        DeliveryStatus::Draft
    };
    let extra_data = req.extra_data.clone().unwrap_or_else(|| json!({}));

    let notification = sqlx::query_as(
        r#"
        INSERT INTO push_notifications
            (id, title, message, target_audience, target_user_ids, status, scheduled_at, extra_data, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(req.title.trim())
    .bind(req.message.trim())
    .bind(req.target_audience.to_string())
    .bind(sqlx::types::Json(&req.target_user_ids))
    .bind(status.to_string())
    .bind(req.scheduled_at)
    .bind(sqlx::types::Json(extra_data))
    .bind(admin.user_id)
    .fetch_one(&state.db)
    .await?;
    Ok(notification)
}

/// GET /admin/push
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendPushNotifications)?;
    let notifications: Vec<PushNotification> =
        sqlx::query_as("SELECT * FROM push_notifications ORDER BY created_at DESC")
            .fetch_all(&state.db)
            .await?;
    let views: Vec<PushNotificationView> = notifications.into_iter().map(Into::into).collect();
    Ok(DataResponse::new(views))
}

/// POST /admin/push
pub async fn create_notification(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Json(req): Json<PushNotificationRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendPushNotifications)?;
    req.validate()?;
    let notification = insert_notification(&state, &admin, &req).await?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Create, format!("Created push notification {}", notification.title))
            .target("push_notification", notification.id)
            .new_values(json!({ "title": notification.title, "status": notification.status })),
    )
    .await?;

    Ok(Created(PushNotificationView::from(notification)))
}

/// GET /admin/push/:notification_id
pub async fn get_notification(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Path(notification_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendPushNotifications)?;
    let notification = load_notification(&state, notification_id).await?;
    Ok(DataResponse::new(PushNotificationView::from(notification)))
}

/// PUT /admin/push/:notification_id
pub async fn update_notification(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(notification_id): Path<Uuid>,
    Json(req): Json<PushNotificationRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendPushNotifications)?;
    req.validate()?;
    let before = load_notification(&state, notification_id).await?;
    if !before.status().can_edit() {
        return Err(ApiError::bad_request("Sent or sending notifications cannot be edited"));
    }

    let notification: PushNotification = sqlx::query_as(
        r#"
        UPDATE push_notifications
        SET title = $2, message = $3, target_audience = $4, target_user_ids = $5,
            scheduled_at = $6, extra_data = COALESCE($7, extra_data), updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(notification_id)
    .bind(req.title.trim())
    .bind(req.message.trim())
    .bind(req.target_audience.to_string())
    .bind(sqlx::types::Json(&req.target_user_ids))
    .bind(req.scheduled_at)
    .bind(req.extra_data.as_ref().map(sqlx::types::Json))
    .fetch_one(&state.db)
    .await?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Update, format!("Updated push notification {}", notification.title))
            .target("push_notification", notification_id)
            .old_values(json!({ "title": before.title, "message": before.message }))
            .new_values(json!({ "title": notification.title, "message": notification.message })),
    )
    .await?;

    Ok(DataResponse::new(PushNotificationView::from(notification)))
}

/// DELETE /admin/push/:notification_id
pub async fn delete_notification(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(notification_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendPushNotifications)?;
    let notification = load_notification(&state, notification_id).await?;
    if !notification.status().can_delete() {
        return Err(ApiError::bad_request("A notification that is sending cannot be deleted"));
    }

    let deleted = sqlx::query("DELETE FROM push_notifications WHERE id = $1 AND status <> 'sending'")
        .bind(notification_id)
        .execute(&state.db)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(ApiError::bad_request("A notification that is sending cannot be deleted"));
    }

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Delete, format!("Deleted push notification {}", notification.title))
            .target("push_notification", notification_id)
            .old_values(json!({ "title": notification.title, "status": notification.status })),
    )
    .await?;

    Ok(NoContent)
}

/// Moves a draft to `sending` (queued now) or `scheduled`.
async fn dispatch(
    state: &AppState,
    notification: &PushNotification,
    scheduled_at: Option<chrono::DateTime<Utc>>,
) -> ApiResult<DeliveryStatus> {
    if notification.status() != DeliveryStatus::Draft {
        return Err(ApiError::bad_request("Only draft notifications can be sent"));
    }
    let status = match scheduled_at {
        Some(at) if at > Utc::now() => DeliveryStatus::Scheduled,
        Some(_) => return Err(ApiError::field("scheduled_at", "Scheduled time must be in the future.")),
        None => DeliveryStatus::Sending,
    };

    if !claim_draft(&state.db, notification.id, status, scheduled_at).await? {
        return Err(ApiError::bad_request("Notification was already sent"));
    }
    if status == DeliveryStatus::Sending {
        state.jobs.enqueue(Job::SendPushNotification {
            notification_id: notification.id,
        });
    }
    Ok(status)
}

/// Conditional draft -> `status` change; false when another request got
/// there first.
async fn claim_draft(
    db: &PgPool,
    notification_id: Uuid,
    status: DeliveryStatus,
    scheduled_at: Option<chrono::DateTime<Utc>>,
) -> ApiResult<bool> {
    let claimed = sqlx::query(
        r#"
        UPDATE push_notifications
        SET status = $2, scheduled_at = COALESCE($3, scheduled_at), updated_at = NOW()
        WHERE id = $1 AND status = 'draft'
        "#,
    )
    .bind(notification_id)
    .bind(status.to_string())
    .bind(scheduled_at)
    .execute(db)
    .await?;
    Ok(claimed.rows_affected() > 0)
}

/// POST /admin/push/:notification_id/send
pub async fn send_notification(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(notification_id): Path<Uuid>,
    body: Option<Json<SendRequest>>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendPushNotifications)?;
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let notification = load_notification(&state, notification_id).await?;
    let status = dispatch(&state, &notification, req.scheduled_at).await?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Update, format!("Push notification {} {}", notification.title, status))
            .target("push_notification", notification_id)
            .old_values(json!({ "status": notification.status }))
            .new_values(json!({ "status": status, "scheduled_at": req.scheduled_at })),
    )
    .await?;

    let message = match status {
        DeliveryStatus::Scheduled => "Notification scheduled",
        _ => "Notification is being sent",
    };
    Ok(MessageResponse::new(message))
}

/// GET /admin/push/:notification_id/preview
pub async fn preview(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Path(notification_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendPushNotifications)?;
    let notification = load_notification(&state, notification_id).await?;
    let users = &notification.target_user_ids.0;

    let total_recipients = audience::count(&state.db, notification.audience(), users).await?;
    let sample = audience::sample(&state.db, notification.audience(), users, AUDIENCE_SAMPLE).await?;

    Ok(DataResponse::new(PushPreview {
        title: notification.title,
        message: notification.message,
        total_recipients,
        sample,
    }))
}

/// POST /admin/push/:notification_id/test
///
/// Delivers the notification to one user only, the caller by default.
pub async fn test_send(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(notification_id): Path<Uuid>,
    body: Option<Json<TestPushRequest>>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendPushNotifications)?;
    let user_id = body.and_then(|Json(r)| r.user_id).unwrap_or(admin.user_id);
    let notification = load_notification(&state, notification_id).await?;

    let outcome = send_to_user(
        &state,
        user_id,
        &format!("[TEST] {}", notification.title),
        &notification.message,
        &notification.extra_data.0,
    )
    .await
    .map_err(|e| ApiError::bad_request(format!("Test push failed: {}", e)))?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Update, format!("Test push of {}", notification.title))
            .target("push_notification", notification_id)
            .new_values(json!({ "user_id": user_id })),
    )
    .await?;

    Ok(DataResponse::new(TestPushResult {
        user_id,
        delivered_to_device: outcome == PushOutcome::Delivered,
    }))
}

/// POST /admin/push/bulk
pub async fn bulk_action(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Json(req): Json<BulkPushRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendPushNotifications)?;
    if req.ids.is_empty() {
        return Err(ApiError::field("ids", "This list may not be empty."));
    }

    let notifications: Vec<PushNotification> =
        sqlx::query_as("SELECT * FROM push_notifications WHERE id = ANY($1)")
            .bind(&req.ids)
            .fetch_all(&state.db)
            .await?;

    let mut result = BulkResult::default();
    for notification in &notifications {
        let done = match req.action {
            BulkPushAction::Send => {
                notification.status() == DeliveryStatus::Draft
                    && dispatch(&state, notification, None).await.is_ok()
            }
            BulkPushAction::Delete => {
                notification.status().can_delete()
                    && sqlx::query("DELETE FROM push_notifications WHERE id = $1 AND status <> 'sending'")
                        .bind(notification.id)
                        .execute(&state.db)
                        .await?
                        .rows_affected()
                        > 0
            }
        };
        if done {
            result.processed += 1;
        } else {
            result.skipped += 1;
        }
    }
    result.skipped += (req.ids.len() - notifications.len()) as i64;

    let (action, verb) = match req.action {
        BulkPushAction::Send => (AdminActionType::Update, "sent"),
        BulkPushAction::Delete => (AdminActionType::Delete, "deleted"),
    };
    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(action, format!("Bulk {} {} push notifications", verb, result.processed))
            .new_values(json!({ "ids": req.ids, "processed": result.processed, "skipped": result.skipped })),
    )
    .await?;

    Ok(DataResponse::new(result))
}

/// GET /admin/push/analytics
pub async fn analytics(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendPushNotifications)?;
    let notifications: Vec<PushNotification> = sqlx::query_as("SELECT * FROM push_notifications")
        .fetch_all(&state.db)
        .await?;

    let count = |status: DeliveryStatus| {
        notifications.iter().filter(|n| n.status() == status).count() as i64
    };
    let sent: Vec<&PushNotification> = notifications
        .iter()
        .filter(|n| n.status() == DeliveryStatus::Sent)
        .collect();
    let rates: Vec<DeliveryRates> = sent.iter().map(|n| n.rates()).collect();

    Ok(DataResponse::new(PushAnalytics {
        total_notifications: notifications.len() as i64,
        sent_notifications: sent.len() as i64,
        scheduled_notifications: count(DeliveryStatus::Scheduled),
        failed_notifications: count(DeliveryStatus::Failed),
        total_recipients: sent.iter().map(|n| n.total_recipients as i64).sum(),
        total_delivered: sent.iter().map(|n| n.delivered_count as i64).sum(),
        average_rates: DeliveryRates::average(&rates),
    }))
}

async fn track(state: &AppState, notification_id: Uuid, column: &str) -> ApiResult<()> {
    let sql = format!(
        "UPDATE push_notifications SET {column} = {column} + 1 WHERE id = $1 AND status = 'sent'"
    );
    let updated = sqlx::query(&sql)
        .bind(notification_id)
        .execute(&state.db)
        .await?
        .rows_affected();
    if updated == 0 {
        return Err(ApiError::not_found("Push notification not found"));
    }
    Ok(())
}

/// POST /api/push/:notification_id/opened
pub async fn track_open(
    State(state): State<Arc<AppState>>,
    _auth: RequireAuth,
    Path(notification_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    track(&state, notification_id, "opened_count").await?;
    Ok(MessageResponse::new("Open tracked"))
}

/// POST /api/push/:notification_id/clicked
pub async fn track_click(
    State(state): State<Arc<AppState>>,
    _auth: RequireAuth,
    Path(notification_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    track(&state, notification_id, "clicked_count").await?;
    Ok(MessageResponse::new("Click tracked"))
}

// ============================================================================
// Templates
// ============================================================================

async fn load_template(state: &AppState, template_id: Uuid) -> ApiResult<PushNotificationTemplate> {
    sqlx::query_as("SELECT * FROM push_notification_templates WHERE id = $1")
        .bind(template_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Push template not found"))
}

/// GET /admin/push/templates
pub async fn list_templates(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendPushNotifications)?;
    let templates: Vec<PushNotificationTemplate> = sqlx::query_as(
        "SELECT * FROM push_notification_templates ORDER BY usage_count DESC, name",
    )
    .fetch_all(&state.db)
    .await?;
    Ok(DataResponse::new(templates))
}

/// POST /admin/push/templates
pub async fn create_template(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Json(req): Json<PushTemplateRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendPushNotifications)?;
    req.validate()?;

    let template: PushNotificationTemplate = sqlx::query_as(
        r#"
        INSERT INTO push_notification_templates
            (id, name, category, title_template, message_template, available_variables, is_active, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(req.name.trim())
    .bind(req.category.to_string())
    .bind(&req.title_template)
    .bind(&req.message_template)
    .bind(sqlx::types::Json(&req.available_variables))
    .bind(req.is_active)
    .bind(admin.user_id)
    .fetch_one(&state.db)
    .await?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Create, format!("Created push template {}", template.name))
            .target("push_template", template.id)
            .new_values(json!({ "name": template.name, "category": template.category })),
    )
    .await?;

    Ok(Created(template))
}

/// GET /admin/push/templates/:template_id
pub async fn get_template(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Path(template_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendPushNotifications)?;
    Ok(DataResponse::new(load_template(&state, template_id).await?))
}

/// PUT /admin/push/templates/:template_id
pub async fn update_template(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(template_id): Path<Uuid>,
    Json(req): Json<PushTemplateRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendPushNotifications)?;
    req.validate()?;
    let before = load_template(&state, template_id).await?;

    let template: PushNotificationTemplate = sqlx::query_as(
        r#"
        UPDATE push_notification_templates
        SET name = $2, category = $3, title_template = $4, message_template = $5,
            available_variables = $6, is_active = $7, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(template_id)
    .bind(req.name.trim())
    .bind(req.category.to_string())
    .bind(&req.title_template)
    .bind(&req.message_template)
    .bind(sqlx::types::Json(&req.available_variables))
    .bind(req.is_active)
    .fetch_one(&state.db)
    .await?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Update, format!("Updated push template {}", template.name))
            .target("push_template", template_id)
            .old_values(json!({ "name": before.name, "title_template": before.title_template }))
            .new_values(json!({ "name": template.name, "title_template": template.title_template })),
    )
    .await?;

    Ok(DataResponse::new(template))
}

/// DELETE /admin/push/templates/:template_id
pub async fn delete_template(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(template_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendPushNotifications)?;
    let template = load_template(&state, template_id).await?;

    sqlx::query("DELETE FROM push_notification_templates WHERE id = $1")
        .bind(template_id)
        .execute(&state.db)
        .await?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Delete, format!("Deleted push template {}", template.name))
            .target("push_template", template_id)
            .old_values(json!({ "name": template.name })),
    )
    .await?;

    Ok(NoContent)
}

/// POST /admin/push/templates/:template_id/use
///
/// Renders the template into a new draft (or scheduled) notification.
pub async fn use_template(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(template_id): Path<Uuid>,
    Json(req): Json<UsePushTemplateRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::SendPushNotifications)?;
    let template = load_template(&state, template_id).await?;
    if !template.is_active {
        return Err(ApiError::bad_request("Template is inactive"));
    }

    let request = PushNotificationRequest {
        title: templates::render(&template.title_template, &req.context),
        message: templates::render(&template.message_template, &req.context),
        target_audience: req.target_audience,
        target_user_ids: req.target_user_ids,
        scheduled_at: req.scheduled_at,
        extra_data: Some(json!({ "template_id": template_id })),
    };
    request.validate()?;

    let notification = insert_notification(&state, &admin, &request).await?;
    sqlx::query(
        "UPDATE push_notification_templates SET usage_count = usage_count + 1 WHERE id = $1",
    )
    .bind(template_id)
    .execute(&state.db)
    .await?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Create, format!("Created push notification from template {}", template.name))
            .target("push_notification", notification.id)
            .new_values(json!({ "template_id": template_id, "title": notification.title })),
    )
    .await?;

    Ok(Created(PushNotificationView::from(notification)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn second_send_of_a_draft_is_refused(pool: PgPool) {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO push_notifications (id, title, message) VALUES ($1, 'Hello', 'World')")
            .bind(id)
            .execute(&pool)
            .await
            .unwrap();

        assert!(claim_draft(&pool, id, DeliveryStatus::Sending, None).await.unwrap());
        assert!(!claim_draft(&pool, id, DeliveryStatus::Sending, None).await.unwrap());
    }
}
