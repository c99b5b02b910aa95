//! User administration: search, ban, unban and soft delete

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use super::{admin_person, record_in};
use crate::api::{DataResponse, MessageResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireAdmin;
use crate::domain::accounts::{User, UserResponse};
use crate::domain::admin::*;
use crate::domain::contains_pattern;
use crate::error::{ApiError, ApiResult};
use crate::middleware::ClientIp;
use crate::services::audit::AuditEntry;
use crate::services::email::send_template_email;
use crate::services::templates::{Context, Person};

const RECENT_USER_ACTIONS: i64 = 20;

#[derive(Debug, Serialize)]
pub struct AdminUserView {
    #[serde(flatten)]
    pub user: UserResponse,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<User> for AdminUserView {
    fn from(user: User) -> Self {
        let is_active = user.is_active;
        let last_login = user.last_login;
        Self {
            user: user.into(),
            is_active,
            last_login,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AdminUserDetail {
    #[serde(flatten)]
    pub user: AdminUserView,
    pub complaint_count: i64,
    pub recent_actions: Vec<AdminActionLog>,
}

async fn load_user(state: &AppState, user_id: Uuid) -> ApiResult<User> {
    sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

/// GET /admin/users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<AdminUserQuery>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ViewUser)?;

    let search = filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(contains_pattern);
    let is_active = filter.is_active();

    const WHERE: &str = r#"
        WHERE ($1::text IS NULL OR email ILIKE $1 OR first_name ILIKE $1 OR last_name ILIKE $1)
          AND ($2::text IS NULL OR user_type = $2)
          AND ($3::bool IS NULL OR is_active = $3)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM users {}", WHERE))
        .bind(&search)
        .bind(&filter.user_type)
        .bind(is_active)
        .fetch_one(&state.db)
        .await?;

    let users: Vec<User> = sqlx::query_as(&format!(
        "SELECT * FROM users {} ORDER BY date_joined DESC LIMIT $4 OFFSET $5",
        WHERE
    ))
    .bind(&search)
    .bind(&filter.user_type)
    .bind(is_active)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&state.db)
    .await?;

    let users: Vec<AdminUserView> = users.into_iter().map(Into::into).collect();
    Ok(Paginated::new(users, &pagination, total))
}

/// GET /admin/users/:user_id
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Path(user_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ViewUser)?;
    let user = load_user(&state, user_id).await?;

    let complaint_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM complaints WHERE content_type = 'user' AND object_id = $1")
            .bind(user_id)
            .fetch_one(&state.db)
            .await?;

    let recent_actions: Vec<AdminActionLog> = sqlx::query_as(
        r#"
        SELECT * FROM admin_action_logs
        WHERE content_type = 'user' AND object_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(user_id)
    .bind(RECENT_USER_ACTIONS)
    .fetch_all(&state.db)
    .await?;

    Ok(DataResponse::new(AdminUserDetail {
        user: user.into(),
        complaint_count,
        recent_actions,
    }))
}

/// Flips `is_active` and writes the audit row in one transaction. False
/// when the account already had that state, in which case nothing is
/// recorded.
async fn change_active(
    db: &PgPool,
    admin: &RequireAdmin,
    ip: &ClientIp,
    user_id: Uuid,
    active: bool,
    entry: AuditEntry,
) -> ApiResult<bool> {
    let mut tx = db.begin().await?;
    let changed = sqlx::query(
        r#"
        UPDATE users SET is_active = $2, is_online = is_online AND $2
        WHERE id = $1 AND is_active <> $2
        "#,
    )
    .bind(user_id)
    .bind(active)
    .execute(&mut *tx)
    .await?;
    if changed.rows_affected() == 0 {
        return Ok(false);
    }

    record_in(&mut tx, admin, ip, entry).await?;
    tx.commit().await?;
    Ok(true)
}

/// POST /admin/users/:user_id/ban
pub async fn ban_user(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(user_id): Path<Uuid>,
    body: Option<Json<BanRequest>>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::BanUser)?;
    let req = body.map(|Json(r)| r).unwrap_or_default();

    if user_id == admin.user_id {
        return Err(ApiError::bad_request("You cannot ban yourself"));
    }
    let user = load_user(&state, user_id).await?;
    let entry = AuditEntry::new(AdminActionType::Ban, format!("Banned user {}", user.email))
        .target("user", user_id)
        .old_values(json!({ "is_active": true }))
        .new_values(json!({ "is_active": false, "reason": req.reason }));
    if !change_active(&state.db, &admin, &ip, user_id, false, entry).await? {
        return Err(ApiError::bad_request("User is already banned"));
    }

    let mut extra = Context::new();
    extra.insert("reason".into(), req.reason.clone());
    let person = Person {
        first_name: &user.first_name,
        last_name: &user.last_name,
        email: &user.email,
    };
    if let Err(e) = send_template_email(
        &state,
        EmailTemplateType::UserBanned,
        person,
        Some(admin_person(&admin)),
        extra,
    )
    .await
    {
        tracing::error!(user_id = %user_id, error = %e, "Failed to queue ban email");
    }

    tracing::info!(user_id = %user_id, admin_id = %admin.user_id, "User banned");
    Ok(MessageResponse::new("User banned"))
}

/// POST /admin/users/:user_id/unban
pub async fn unban_user(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(user_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::UnbanUser)?;
    let user = load_user(&state, user_id).await?;
    let entry = AuditEntry::new(AdminActionType::Unban, format!("Unbanned user {}", user.email))
        .target("user", user_id)
        .old_values(json!({ "is_active": false }))
        .new_values(json!({ "is_active": true }));
    if !change_active(&state.db, &admin, &ip, user_id, true, entry).await? {
        return Err(ApiError::bad_request("User is not banned"));
    }

    tracing::info!(user_id = %user_id, admin_id = %admin.user_id, "User unbanned");
    Ok(MessageResponse::new("User unbanned"))
}

/// DELETE /admin/users/:user_id
///
/// Soft delete: the account is deactivated and its email renamed so the
/// address can register again.
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(user_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ChangeUser)?;
    if user_id == admin.user_id {
        return Err(ApiError::bad_request("You cannot delete yourself"));
    }
    let user = load_user(&state, user_id).await?;
    let new_email = deleted_email(user_id, &user.email);

    let mut tx = state.db.begin().await?;
    let renamed = sqlx::query(
        "UPDATE users SET is_active = FALSE, is_online = FALSE, email = $2 WHERE id = $1 AND email = $3",
    )
    .bind(user_id)
    .bind(&new_email)
    .bind(&user.email)
    .execute(&mut *tx)
    .await?;
    if renamed.rows_affected() == 0 {
        return Err(ApiError::conflict("User was changed by another request"));
    }

    record_in(
        &mut tx,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Delete, format!("Deleted user {}", user.email))
            .target("user", user_id)
            .old_values(json!({ "email": user.email, "is_active": user.is_active }))
            .new_values(json!({ "email": new_email, "is_active": false })),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(user_id = %user_id, admin_id = %admin.user_id, "User soft deleted");
    Ok(MessageResponse::new("User deleted"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::insert_user;

    fn admin_for(user_id: Uuid) -> RequireAdmin {
        RequireAdmin {
            user_id,
            email: "admin@example.com".into(),
            name: "Admin".into(),
            role: AdminRoleKind::Superadmin,
            session_id: "test".into(),
        }
    }

    fn ban_entry(user_id: Uuid) -> AuditEntry {
        AuditEntry::new(AdminActionType::Ban, "Banned user").target("user", user_id)
    }

    async fn audit_rows(pool: &PgPool, user_id: Uuid) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM admin_action_logs WHERE object_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn ban_twice_records_one_audit_row(pool: PgPool) {
        let admin = admin_for(insert_user(&pool, "client").await);
        let ip = ClientIp("127.0.0.1".into());
        let user = insert_user(&pool, "client").await;

        assert!(change_active(&pool, &admin, &ip, user, false, ban_entry(user)).await.unwrap());
        assert!(!change_active(&pool, &admin, &ip, user, false, ban_entry(user)).await.unwrap());

        assert_eq!(audit_rows(&pool, user).await, 1);
        let active: bool = sqlx::query_scalar("SELECT is_active FROM users WHERE id = $1")
            .bind(user)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(!active);
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn unban_of_an_active_user_changes_nothing(pool: PgPool) {
        let admin = admin_for(insert_user(&pool, "client").await);
        let ip = ClientIp("127.0.0.1".into());
        let user = insert_user(&pool, "client").await;

        let entry = AuditEntry::new(AdminActionType::Unban, "Unbanned user").target("user", user);
        assert!(!change_active(&pool, &admin, &ip, user, true, entry).await.unwrap());
        assert_eq!(audit_rows(&pool, user).await, 0);
    }
}
