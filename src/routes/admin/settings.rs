//! Runtime key/value settings

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::record;
use crate::api::DataResponse;
use crate::app::AppState;
use crate::auth::RequireAdmin;
use crate::domain::admin::*;
use crate::error::ApiResult;
use crate::middleware::ClientIp;
use crate::services::audit::AuditEntry;

/// GET /admin/settings
pub async fn list_settings(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ManageSettings)?;
    let settings: Vec<SystemSetting> = sqlx::query_as("SELECT * FROM system_settings ORDER BY key")
        .fetch_all(&state.db)
        .await?;
    Ok(DataResponse::new(settings))
}

/// PUT /admin/settings
///
/// Creates the key or replaces its value.
pub async fn upsert_setting(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Json(req): Json<UpsertSettingRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ManageSettings)?;
    req.validate()?;
    let key = req.key.trim();

    let previous: Option<String> =
        sqlx::query_scalar("SELECT value FROM system_settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&state.db)
            .await?;

    let setting: SystemSetting = sqlx::query_as(
        r#"
        INSERT INTO system_settings (id, key, value, description, is_active, updated_by)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (key) DO UPDATE
        SET value = EXCLUDED.value, description = EXCLUDED.description,
            is_active = EXCLUDED.is_active, updated_by = EXCLUDED.updated_by, updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(key)
    .bind(&req.value)
    .bind(&req.description)
    .bind(req.is_active)
    .bind(admin.user_id)
    .fetch_one(&state.db)
    .await?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::SettingsChange, format!("Setting {} changed", key))
            .target("system_setting", setting.id)
            .old_values(json!({ "value": previous }))
            .new_values(json!({ "value": setting.value, "is_active": setting.is_active })),
    )
    .await?;

    Ok(DataResponse::new(setting))
}
