//! Advertisement routes

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{DataResponse, MessageResponse};
use crate::app::AppState;
use crate::auth::OptionalAuth;
use crate::domain::advertisements::*;
use crate::error::{ApiError, ApiResult};

/// GET /api/ads
pub async fn list_active(
    State(state): State<Arc<AppState>>,
    OptionalAuth(auth): OptionalAuth,
    Query(query): Query<AdvertisementQuery>,
) -> ApiResult<impl IntoResponse> {
    let audiences = visible_audiences(auth.map(|a| a.user_type));
    let position = query.position.map(|p| p.to_string());

    let ads: Vec<Advertisement> = sqlx::query_as(
        r#"
        SELECT * FROM advertisements
        WHERE is_active
          AND start_date <= NOW() AND end_date >= NOW()
          AND target_audience = ANY($1)
          AND ($2::text IS NULL OR position = $2)
        ORDER BY priority DESC, created_at DESC
        "#,
    )
    .bind(&audiences)
    .bind(&position)
    .fetch_all(&state.db)
    .await?;

    let ads: Vec<AdvertisementResponse> = ads.into_iter().map(Into::into).collect();
    Ok(DataResponse::new(ads))
}

/// Bumps one of the counters on a currently running ad.
async fn track(state: &AppState, ad_id: Uuid, column: &str) -> ApiResult<()> {
    // column is one of two literals below, never caller input
    let sql = format!(
        "UPDATE advertisements SET {column} = {column} + 1 \
         WHERE id = $1 AND is_active AND start_date <= NOW() AND end_date >= NOW()"
    );
    let updated = sqlx::query(&sql)
        .bind(ad_id)
        .execute(&state.db)
        .await?
        .rows_affected();
    if updated == 0 {
        return Err(ApiError::not_found("Advertisement not found"));
    }
    Ok(())
}

/// POST /api/ads/:ad_id/impression
pub async fn track_impression(
    State(state): State<Arc<AppState>>,
    Path(ad_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    track(&state, ad_id, "impressions").await?;
    Ok(MessageResponse::new("Impression tracked"))
}

/// POST /api/ads/:ad_id/click
pub async fn track_click(
    State(state): State<Arc<AppState>>,
    Path(ad_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    track(&state, ad_id, "clicks").await?;
    tracing::debug!(ad_id = %ad_id, "Ad click tracked");
    Ok(MessageResponse::new("Click tracked"))
}

/// GET /api/ads/categories
pub async fn list_categories(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let categories: Vec<AdCategory> =
        sqlx::query_as("SELECT * FROM ad_categories WHERE is_active ORDER BY name")
            .fetch_all(&state.db)
            .await?;
    Ok(DataResponse::new(categories))
}
