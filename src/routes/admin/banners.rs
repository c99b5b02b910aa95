//! Site banners: admin CRUD plus the public placement feed

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::record;
use crate::api::{Created, DataResponse, MessageResponse, NoContent};
use crate::app::AppState;
use crate::auth::RequireAdmin;
use crate::domain::admin::*;
use crate::error::{ApiError, ApiResult};
use crate::middleware::ClientIp;
use crate::services::audit::AuditEntry;

async fn load_banner(state: &AppState, banner_id: Uuid) -> ApiResult<Banner> {
    sqlx::query_as("SELECT * FROM banners WHERE id = $1")
        .bind(banner_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Banner not found"))
}

fn snapshot(banner: &Banner) -> serde_json::Value {
    json!({
        "title": banner.title,
        "placement": banner.placement,
        "status": banner.status,
        "priority": banner.priority,
        "start_date": banner.start_date,
        "end_date": banner.end_date,
        "is_active": banner.is_active,
    })
}

/// GET /admin/banners
pub async fn list_banners(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Query(filter): Query<BannerQuery>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ManageBanners)?;
    let banners: Vec<Banner> = sqlx::query_as(
        r#"
        SELECT * FROM banners
        WHERE ($1::text IS NULL OR placement = $1)
          AND ($2::text IS NULL OR status = $2)
        ORDER BY priority DESC, created_at DESC
        "#,
    )
    .bind(filter.placement.map(|p| p.to_string()))
    .bind(filter.status.map(|s| s.to_string()))
    .fetch_all(&state.db)
    .await?;

    let views: Vec<BannerView> = banners.into_iter().map(Into::into).collect();
    Ok(DataResponse::new(views))
}

/// POST /admin/banners
pub async fn create_banner(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Json(req): Json<BannerRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ManageBanners)?;
    req.validate()?;

    let banner: Banner = sqlx::query_as(
        r#"
        INSERT INTO banners
            (id, title, image, link_url, alt_text, size, placement, status, priority,
             start_date, end_date, is_active, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(req.title.trim())
    .bind(&req.image)
    .bind(&req.link_url)
    .bind(&req.alt_text)
    .bind(req.size.to_string())
    .bind(req.placement.to_string())
    .bind(req.status.to_string())
    .bind(req.priority)
    .bind(req.start_date)
    .bind(req.end_date)
    .bind(req.is_active)
    .bind(admin.user_id)
    .fetch_one(&state.db)
    .await?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Create, format!("Created banner {}", banner.title))
            .target("banner", banner.id)
            .new_values(snapshot(&banner)),
    )
    .await?;

    Ok(Created(BannerView::from(banner)))
}

/// GET /admin/banners/:banner_id
pub async fn get_banner(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Path(banner_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ManageBanners)?;
    let banner = load_banner(&state, banner_id).await?;
    Ok(DataResponse::new(BannerView::from(banner)))
}

/// PUT /admin/banners/:banner_id
pub async fn update_banner(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(banner_id): Path<Uuid>,
    Json(req): Json<BannerRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ManageBanners)?;
    req.validate()?;
    let before = load_banner(&state, banner_id).await?;

    let banner: Banner = sqlx::query_as(
        r#"
        UPDATE banners
        SET title = $2, image = $3, link_url = $4, alt_text = $5, size = $6, placement = $7,
            status = $8, priority = $9, start_date = $10, end_date = $11, is_active = $12,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(banner_id)
    .bind(req.title.trim())
    .bind(&req.image)
    .bind(&req.link_url)
    .bind(&req.alt_text)
    .bind(req.size.to_string())
    .bind(req.placement.to_string())
    .bind(req.status.to_string())
    .bind(req.priority)
    .bind(req.start_date)
    .bind(req.end_date)
    .bind(req.is_active)
    .fetch_one(&state.db)
    .await?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Update, format!("Updated banner {}", banner.title))
            .target("banner", banner_id)
            .old_values(snapshot(&before))
            .new_values(snapshot(&banner)),
    )
    .await?;

    Ok(DataResponse::new(BannerView::from(banner)))
}

/// DELETE /admin/banners/:banner_id
pub async fn delete_banner(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(banner_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ManageBanners)?;
    let banner = load_banner(&state, banner_id).await?;

    sqlx::query("DELETE FROM banners WHERE id = $1")
        .bind(banner_id)
        .execute(&state.db)
        .await?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Delete, format!("Deleted banner {}", banner.title))
            .target("banner", banner_id)
            .old_values(snapshot(&banner)),
    )
    .await?;

    Ok(NoContent)
}

// ============================================================================
// Public feed
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ActiveBannerQuery {
    pub placement: BannerPlacement,
}

/// Status `active`, flagged active, and inside the date window.
const SERVING_WHERE: &str =
    "status = 'active' AND is_active = TRUE AND start_date <= NOW() AND end_date >= NOW()";

/// GET /api/banners?placement=home
pub async fn active_banners(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ActiveBannerQuery>,
) -> ApiResult<impl IntoResponse> {
    let banners: Vec<Banner> = sqlx::query_as(&format!(
        "SELECT * FROM banners WHERE placement = $1 AND {} ORDER BY priority DESC, created_at DESC",
        SERVING_WHERE
    ))
    .bind(query.placement.to_string())
    .fetch_all(&state.db)
    .await?;

    let views: Vec<BannerView> = banners.into_iter().map(Into::into).collect();
    Ok(DataResponse::new(views))
}

async fn track(state: &AppState, banner_id: Uuid, column: &str) -> ApiResult<()> {
    let sql = format!(
        "UPDATE banners SET {column} = {column} + 1 WHERE id = $1 AND {}",
        SERVING_WHERE
    );
    let updated = sqlx::query(&sql)
        .bind(banner_id)
        .execute(&state.db)
        .await?
        .rows_affected();
    if updated == 0 {
        return Err(ApiError::not_found("Banner not found"));
    }
    Ok(())
}

/// POST /api/banners/:banner_id/impression
pub async fn track_impression(
    State(state): State<Arc<AppState>>,
    Path(banner_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    track(&state, banner_id, "impressions_count").await?;
    Ok(MessageResponse::new("Impression tracked"))
}

/// POST /api/banners/:banner_id/click
pub async fn track_click(
    State(state): State<Arc<AppState>>,
    Path(banner_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    track(&state, banner_id, "clicks_count").await?;
    Ok(MessageResponse::new("Click tracked"))
}
