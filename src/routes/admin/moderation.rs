//! Moderation queue as seen from the admin panel

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::record;
use crate::api::{DataResponse, MessageResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireAdmin;
use crate::domain::admin::*;
use crate::domain::moderation::{
    ActionType, ContentFilter, ContentKind, ModerationAction, QueueItem, QueueStatus,
    QUEUE_PRIORITY_ORDER_SQL,
};
use crate::error::{ApiError, ApiResult};
use crate::middleware::ClientIp;
use crate::services::audit::AuditEntry;
use crate::services::moderation;

#[derive(Debug, Serialize)]
pub struct QueueItemDetail {
    #[serde(flatten)]
    pub item: QueueItem,
    pub content: Option<String>,
    pub content_filter: Option<ContentFilter>,
    pub history: Vec<ModerationAction>,
}

fn item_kind(item: &QueueItem) -> ApiResult<ContentKind> {
    item.content_type
        .parse()
        .map_err(|e: String| ApiError::internal(e))
}

/// GET /admin/moderation
pub async fn list_queue(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<AdminQueueQuery>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ViewContent)?;

    const WHERE: &str = r#"
        WHERE ($1::text IS NULL OR q.status = $1)
          AND ($2::text IS NULL OR q.priority = $2)
          AND ($3::text IS NULL OR q.content_type = $3)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM moderation_queue q {}", WHERE))
        .bind(&filter.status)
        .bind(&filter.priority)
        .bind(&filter.content_type)
        .fetch_one(&state.db)
        .await?;

    let items: Vec<QueueItem> = sqlx::query_as(&format!(
        "SELECT q.* FROM moderation_queue q {} ORDER BY {}, q.created_at DESC LIMIT $4 OFFSET $5",
        WHERE, QUEUE_PRIORITY_ORDER_SQL
    ))
    .bind(&filter.status)
    .bind(&filter.priority)
    .bind(&filter.content_type)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&state.db)
    .await?;

    Ok(Paginated::new(items, &pagination, total))
}

/// GET /admin/moderation/:item_id
pub async fn get_item(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Path(item_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ViewContent)?;
    let item = moderation::get_queue_item(&state.db, item_id).await?;
    let kind = item_kind(&item)?;

    let content = moderation::content_text(&state.db, kind, item.object_id).await?;
    let content_filter: Option<ContentFilter> = match item.content_filter_id {
        Some(id) => sqlx::query_as("SELECT * FROM content_filters WHERE id = $1")
            .bind(id)
            .fetch_optional(&state.db)
            .await?,
        None => None,
    };
    let history = moderation::history(&state.db, kind, item.object_id).await?;

    Ok(DataResponse::new(QueueItemDetail {
        item,
        content,
        content_filter,
        history,
    }))
}

/// POST /admin/moderation/:item_id/assign
///
/// Takes the item for the calling admin.
pub async fn assign(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(item_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ModerateContent)?;
    let item = moderation::assign_queue_item(&state.db, item_id, admin.user_id).await?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Moderate, format!("Took moderation item {}", item_id))
            .target("moderation_queue", item_id)
            .new_values(json!({ "assigned_to": admin.user_id, "status": item.status })),
    )
    .await?;

    Ok(DataResponse::new(item))
}

/// POST /admin/moderation/bulk-assign
pub async fn bulk_assign(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Json(req): Json<BulkQueueAssignRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ModerateContent)?;
    if req.ids.is_empty() {
        return Err(ApiError::field("ids", "This list may not be empty."));
    }

    let assigned = sqlx::query(
        r#"
        UPDATE moderation_queue
        SET assigned_to = $2, assigned_at = NOW(), status = $3, updated_at = NOW()
        WHERE id = ANY($1) AND status <> 'completed'
        "#,
    )
    .bind(&req.ids)
    .bind(req.admin_id)
    .bind(QueueStatus::InProgress.to_string())
    .execute(&state.db)
    .await?
    .rows_affected();

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Moderate, format!("Bulk assigned {} moderation items", assigned))
            .new_values(json!({ "ids": req.ids, "assigned_to": req.admin_id })),
    )
    .await?;

    Ok(MessageResponse::new(format!("{} items assigned", assigned)))
}

/// POST /admin/moderation/:item_id/approve
pub async fn approve(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(item_id): Path<Uuid>,
    body: Option<Json<ModerationDecisionRequest>>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ApproveContent)?;
    let req = body.map(|Json(r)| r).unwrap_or_default();

    let item = moderation::complete_moderation(
        &state.db,
        item_id,
        admin.user_id,
        ActionType::Approved,
        &req.reason,
    )
    .await?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Approve, format!("Approved {} {}", item.content_type, item.object_id))
            .target(&item.content_type, item.object_id)
            .new_values(json!({ "reason": req.reason })),
    )
    .await?;

    Ok(DataResponse::new(item))
}

/// POST /admin/moderation/:item_id/reject
///
/// Completes the item and takes the content out of circulation.
pub async fn reject(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(item_id): Path<Uuid>,
    body: Option<Json<ModerationDecisionRequest>>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::RejectContent)?;
    let req = body.map(|Json(r)| r).unwrap_or_default();

    let item = moderation::complete_moderation(
        &state.db,
        item_id,
        admin.user_id,
        ActionType::Rejected,
        &req.reason,
    )
    .await?;
    let kind = item_kind(&item)?;
    moderation::deactivate_content(&state.db, kind, item.object_id).await?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Reject, format!("Rejected {} {}", item.content_type, item.object_id))
            .target(&item.content_type, item.object_id)
            .new_values(json!({ "reason": req.reason })),
    )
    .await?;

    Ok(DataResponse::new(item))
}

/// POST /admin/moderation/:item_id/needs-review
pub async fn needs_review(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(item_id): Path<Uuid>,
    body: Option<Json<ModerationDecisionRequest>>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ModerateContent)?;
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let item = moderation::escalate(&state.db, item_id, &req.reason).await?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Moderate, format!("Escalated moderation item {}", item_id))
            .target("moderation_queue", item_id)
            .new_values(json!({ "status": item.status, "notes": req.reason })),
    )
    .await?;

    Ok(DataResponse::new(item))
}

/// POST /admin/moderation/scan
pub async fn detect_suspicious(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ModerateContent)?;
    let (scanned, flagged) = moderation::rescan_recent(&state.db).await?;
    let summary = ScanSummary {
        scanned: scanned as i64,
        flagged: flagged as i64,
    };

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Moderate, "Scanned recent content")
            .new_values(json!({ "scanned": summary.scanned, "flagged": summary.flagged })),
    )
    .await?;

    Ok(DataResponse::new(summary))
}
