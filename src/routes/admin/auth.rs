//! Admin session login and role management

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::record;
use crate::api::{DataResponse, MessageResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::admin_session::{
    clear_session_cookie, create_session, destroy_session, session_cookie,
};
use crate::auth::password::{verify_password, verify_unknown_user};
use crate::auth::RequireAdmin;
use crate::domain::accounts::{normalize_email, User};
use crate::domain::admin::*;
use crate::error::{ApiError, ApiResult};
use crate::middleware::ClientIp;
use crate::services::audit::AuditEntry;
use crate::services::cache::keys;

struct LoginAttempt<'a> {
    user_id: Option<Uuid>,
    email: &'a str,
    ip_address: &'a str,
    user_agent: &'a str,
}

impl LoginAttempt<'_> {
    async fn log(&self, db: &PgPool, failure_reason: Option<&str>) {
        let result = sqlx::query(
            r#"
            INSERT INTO admin_login_logs (id, user_id, email, ip_address, user_agent, success, failure_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(self.user_id)
        .bind(self.email)
        .bind(self.ip_address)
        .bind(self.user_agent)
        .bind(failure_reason.is_none())
        .bind(failure_reason.unwrap_or(""))
        .execute(db)
        .await;

        if let Err(e) = result {
            tracing::error!(email = %self.email, error = %e, "Failed to write admin login log");
        }
    }
}

fn admin_me(admin_user: &User, role: AdminRoleKind) -> AdminMe {
    let name = admin_user.full_name();
    AdminMe {
        user_id: admin_user.id,
        name: if name.is_empty() { admin_user.email.clone() } else { name },
        email: admin_user.email.clone(),
        role,
        permissions: role.permissions().to_vec(),
    }
}

/// POST /admin/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    Json(req): Json<AdminLoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let attempts_key = keys::admin_login_attempts(&ip);
    let failures: i64 = state.cache.get(&attempts_key).await.unwrap_or(0);
    if failures >= MAX_LOGIN_ATTEMPTS {
        tracing::warn!(ip = %ip, "Admin login locked out");
        return Err(ApiError::TooManyRequests(
            "Too many failed login attempts. Try again later.".to_string(),
        ));
    }

    let email = normalize_email(&req.email);
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;

    let mut attempt = LoginAttempt {
        user_id: user.as_ref().map(|u| u.id),
        email: &email,
        ip_address: &ip,
        user_agent,
    };

    let failure = match &user {
        None => {
            verify_unknown_user(req.password.clone()).await?;
            Some("unknown user")
        }
        Some(u) => {
            if !verify_password(req.password.clone(), u.password_hash.clone()).await? {
                Some("wrong password")
            } else if !u.is_active {
                Some("inactive user")
            } else {
                None
            }
        }
    };

    let role = match (&user, failure) {
        (Some(u), None) => {
            let role: Option<AdminRole> =
                sqlx::query_as("SELECT * FROM admin_roles WHERE user_id = $1 AND is_active = TRUE")
                    .bind(u.id)
                    .fetch_optional(&state.db)
                    .await?;
            role.and_then(|r| r.kind())
        }
        _ => None,
    };

    let (Some(user), Some(role)) = (user.as_ref(), role) else {
        let reason = failure.unwrap_or("no admin role");
        attempt.log(&state.db, Some(reason)).await;
        if let Err(e) = state
            .cache
            .increment(&attempts_key, Duration::from_secs(LOGIN_LOCKOUT_SECONDS))
            .await
        {
            tracing::warn!(ip = %ip, error = %e, "Failed to count admin login failure");
        }
        tracing::warn!(email = %email, ip = %ip, reason = reason, "Admin login failed");
        return Err(ApiError::unauthorized("Invalid credentials or insufficient permissions"));
    };

    attempt.user_id = Some(user.id);
    attempt.log(&state.db, None).await;
    if let Err(e) = state.cache.delete(&attempts_key).await {
        tracing::warn!(ip = %ip, error = %e, "Failed to reset admin login failures");
    }

    let ttl = Duration::from_secs(state.settings.admin_session_ttl_hours * 3600);
    let session_id = create_session(&state.cache, user.id, &ip, ttl).await?;
    sqlx::query("UPDATE users SET last_login = NOW() WHERE id = $1")
        .bind(user.id)
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = %user.id, role = %role, "Admin logged in");
    Ok((
        [(header::SET_COOKIE, session_cookie(&session_id, ttl))],
        DataResponse::new(admin_me(user, role)),
    ))
}

/// POST /admin/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
) -> ApiResult<impl IntoResponse> {
    destroy_session(&state.cache, &admin.session_id).await?;
    tracing::info!(user_id = %admin.user_id, "Admin logged out");
    Ok((
        [(header::SET_COOKIE, clear_session_cookie())],
        MessageResponse::new("Logged out"),
    ))
}

/// GET /admin/me
pub async fn me(admin: RequireAdmin) -> ApiResult<impl IntoResponse> {
    Ok(DataResponse::new(AdminMe {
        user_id: admin.user_id,
        email: admin.email.clone(),
        name: admin.name.clone(),
        role: admin.role,
        permissions: admin.role.permissions().to_vec(),
    }))
}

/// GET /admin/roles
pub async fn list_roles(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ManageRoles)?;
    let roles: Vec<AdminRoleWithUser> = sqlx::query_as(
        r#"
        SELECT r.*, u.email, u.first_name, u.last_name
        FROM admin_roles r
        JOIN users u ON u.id = r.user_id
        ORDER BY r.created_at DESC
        "#,
    )
    .fetch_all(&state.db)
    .await?;
    Ok(DataResponse::new(roles))
}

/// POST /admin/roles
pub async fn assign_role(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Json(req): Json<AssignRoleRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ManageRoles)?;
    let kind = req.role_kind()?;

    let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1")
        .bind(req.user_id)
        .fetch_optional(&state.db)
        .await?;
    if exists.is_none() {
        return Err(ApiError::not_found("User not found"));
    }

    let previous: Option<String> =
        sqlx::query_scalar("SELECT role FROM admin_roles WHERE user_id = $1")
            .bind(req.user_id)
            .fetch_optional(&state.db)
            .await?;

    let role: AdminRole = sqlx::query_as(
        r#"
        INSERT INTO admin_roles (id, user_id, role, is_active, created_by)
        VALUES ($1, $2, $3, TRUE, $4)
        ON CONFLICT (user_id) DO UPDATE
            SET role = EXCLUDED.role, is_active = TRUE, updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(req.user_id)
    .bind(kind.to_string())
    .bind(admin.user_id)
    .fetch_one(&state.db)
    .await?;

    let action = if previous.is_some() {
        AdminActionType::Update
    } else {
        AdminActionType::Create
    };
    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(action, format!("Assigned role {} to user {}", kind, req.user_id))
            .target("admin_role", role.id)
            .old_values(json!({ "role": previous }))
            .new_values(json!({ "role": kind })),
    )
    .await?;

    Ok(DataResponse::new(role))
}

/// DELETE /admin/roles/:user_id
pub async fn revoke_role(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(user_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ManageRoles)?;
    if user_id == admin.user_id {
        return Err(ApiError::bad_request("You cannot revoke your own role"));
    }

    let role: AdminRole = sqlx::query_as("DELETE FROM admin_roles WHERE user_id = $1 RETURNING *")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Admin role not found"))?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Delete, format!("Revoked role {} from user {}", role.role, user_id))
            .target("admin_role", role.id)
            .old_values(json!({ "role": role.role, "is_active": role.is_active })),
    )
    .await?;

    Ok(MessageResponse::new("Role revoked"))
}

/// GET /admin/login-logs
///
/// Successful and failed admin logins, newest first.
pub async fn login_logs(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ManageRoles)?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM admin_login_logs")
        .fetch_one(&state.db)
        .await?;
    let logs: Vec<AdminLoginLog> = sqlx::query_as(
        "SELECT * FROM admin_login_logs ORDER BY created_at DESC LIMIT $1 OFFSET $2",
    )
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&state.db)
    .await?;

    Ok(Paginated::new(logs, &pagination, total))
}
