//! Cookie-backed admin panel sessions stored in Redis.

use anyhow::Result;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    RequestPartsExt,
};
use axum_extra::{headers::Cookie, TypedHeader};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::app::AppState;
use crate::domain::accounts::full_name;
use crate::domain::admin::{has_permission, AdminRoleKind, Permission};
use crate::error::ApiError;
use crate::services::cache::{keys, RedisCache};

pub const SESSION_COOKIE: &str = "admin_session";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminSession {
    pub user_id: Uuid,
    pub ip_address: String,
    pub created_at: DateTime<Utc>,
}

/// Stores a new session and returns its id.
pub async fn create_session(
    cache: &RedisCache,
    user_id: Uuid,
    ip_address: &str,
    ttl: Duration,
) -> Result<String> {
    let session_id = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    let session = AdminSession {
        user_id,
        ip_address: ip_address.to_string(),
        created_at: Utc::now(),
    };
    cache
        .set_with_ttl(&keys::admin_session(&session_id), &session, ttl)
        .await?;
    Ok(session_id)
}

pub async fn destroy_session(cache: &RedisCache, session_id: &str) -> Result<()> {
    cache.delete(&keys::admin_session(session_id)).await?;
    Ok(())
}

/// `Set-Cookie` value carrying the session id.
pub fn session_cookie(session_id: &str, ttl: Duration) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/admin; Max-Age={}",
        SESSION_COOKIE,
        session_id,
        ttl.as_secs()
    )
}

/// `Set-Cookie` value expiring the session cookie.
pub fn clear_session_cookie() -> String {
    format!("{}=; HttpOnly; SameSite=Lax; Path=/admin; Max-Age=0", SESSION_COOKIE)
}

#[derive(Debug, FromRow)]
struct AdminIdentityRow {
    email: String,
    first_name: String,
    last_name: String,
    role: String,
}

/// Extractor for an authenticated staff member with an active admin role.
#[derive(Debug, Clone)]
pub struct RequireAdmin {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: AdminRoleKind,
    pub session_id: String,
}

impl RequireAdmin {
    pub fn can(&self, permission: Permission) -> bool {
        has_permission(self.role, true, permission)
    }

    pub fn require(&self, permission: Permission) -> Result<(), ApiError> {
        if self.can(permission) {
            Ok(())
        } else {
            tracing::warn!(
                admin_id = %self.user_id,
                role = %self.role,
                permission = %permission,
                "Admin permission denied"
            );
            Err(ApiError::forbidden(format!("Missing permission: {}", permission)))
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(cookies) = parts
            .extract::<TypedHeader<Cookie>>()
            .await
            .map_err(|_| ApiError::unauthorized("Admin login required"))?;
        let session_id = cookies
            .get(SESSION_COOKIE)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ApiError::unauthorized("Admin login required"))?
            .to_string();

        let session: AdminSession = state
            .cache
            .get(&keys::admin_session(&session_id))
            .await
            .ok_or_else(|| ApiError::unauthorized("Session expired"))?;

        let row: Option<AdminIdentityRow> = sqlx::query_as(
            r#"
            SELECT u.email, u.first_name, u.last_name, r.role
            FROM users u
            JOIN admin_roles r ON r.user_id = u.id
            WHERE u.id = $1 AND u.is_active = TRUE AND r.is_active = TRUE
            "#,
        )
        .bind(session.user_id)
        .fetch_optional(&state.db)
        .await?;

        let row = row.ok_or_else(|| ApiError::forbidden("Admin access revoked"))?;
        let role: AdminRoleKind = row
            .role
            .parse()
            .map_err(|_| ApiError::forbidden("Admin access revoked"))?;

        let name = full_name(&row.first_name, &row.last_name);
        Ok(RequireAdmin {
            user_id: session.user_id,
            name: if name.is_empty() { row.email.clone() } else { name },
            email: row.email,
            role,
            session_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin(role: AdminRoleKind) -> RequireAdmin {
        RequireAdmin {
            user_id: Uuid::new_v4(),
            email: "staff@handshakeme.com".into(),
            name: "Staff".into(),
            role,
            session_id: "sid".into(),
        }
    }

    #[test]
    fn permission_checks_follow_role() {
        assert!(admin(AdminRoleKind::Superadmin).require(Permission::ManageSettings).is_ok());
        assert!(matches!(
            admin(AdminRoleKind::Support).require(Permission::BanUser),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn cookie_attributes() {
        let cookie = session_cookie("abc", Duration::from_secs(3600));
        assert!(cookie.starts_with("admin_session=abc;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Path=/admin"));
        assert!(cookie.contains("Max-Age=3600"));
        assert!(clear_session_cookie().contains("Max-Age=0"));
    }
}
