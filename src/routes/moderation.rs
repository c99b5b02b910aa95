//! Moderation routes
//!
//! Anyone signed in can report content and read their own warnings; the
//! queue, report resolution and warning issue are for staff holding
//! `moderate_content`.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{Created, DataResponse};
use crate::app::AppState;
use crate::auth::{RequireAdmin, RequireAuth};
use crate::domain::admin::Permission;
use crate::domain::moderation::*;
use crate::error::ApiResult;
use crate::services::moderation;

/// POST /api/moderation/reports
pub async fn create_report(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Json(req): Json<CreateReportRequest>,
) -> ApiResult<impl IntoResponse> {
    let report = moderation::create_report(&state.db, auth.user_id, &req).await?;
    Ok(Created(report))
}

/// POST /api/moderation/reports/:report_id/resolve
pub async fn resolve_report(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Path(report_id): Path<Uuid>,
    Json(req): Json<ResolveReportRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ModerateContent)?;
    let report = moderation::resolve_report(&state.db, report_id, admin.user_id, &req).await?;
    Ok(DataResponse::new(report))
}

/// GET /api/moderation/queue/next
pub async fn next_item(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ModerateContent)?;
    Ok(DataResponse::new(moderation::next_item(&state.db).await?))
}

/// POST /api/moderation/queue/:item_id/assign
pub async fn assign_item(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Path(item_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ModerateContent)?;
    let item = moderation::assign_queue_item(&state.db, item_id, admin.user_id).await?;
    Ok(DataResponse::new(item))
}

/// POST /api/moderation/queue/:item_id/complete
pub async fn complete_item(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Path(item_id): Path<Uuid>,
    Json(req): Json<CompleteModerationRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ModerateContent)?;
    let item =
        moderation::complete_moderation(&state.db, item_id, admin.user_id, req.action, &req.reason)
            .await?;
    Ok(DataResponse::new(item))
}

/// POST /api/moderation/queue/:item_id/escalate
pub async fn escalate_item(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Path(item_id): Path<Uuid>,
    req: Option<Json<EscalateRequest>>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ModerateContent)?;
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let item = moderation::escalate(&state.db, item_id, &req.notes).await?;
    Ok(DataResponse::new(item))
}

/// POST /api/moderation/warnings
pub async fn issue_warning(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Json(req): Json<IssueWarningRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ModerateContent)?;
    let outcome = moderation::issue_warning(&state.db, admin.user_id, &req).await?;
    Ok(Created(outcome))
}

/// GET /api/moderation/warnings
pub async fn my_warnings(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
) -> ApiResult<impl IntoResponse> {
    let warnings = moderation::list_warnings(&state.db, auth.user_id).await?;
    Ok(DataResponse::new(warnings))
}

/// POST /api/moderation/warnings/:warning_id/acknowledge
pub async fn acknowledge_warning(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(warning_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let warning = moderation::acknowledge_warning(&state.db, auth.user_id, warning_id).await?;
    Ok(DataResponse::new(warning))
}
