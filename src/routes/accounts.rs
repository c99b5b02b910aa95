//! Account routes
//!
//! Registration, login and token refresh, the caller's profile, avatar and
//! password, push device token and saved addresses.

use axum::{
    extract::{Multipart, Path, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use sqlx::PgConnection;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::api::{Created, DataResponse, MessageResponse, NoContent};
use crate::app::AppState;
use crate::auth::password::{hash_password, verify_password, verify_unknown_user};
use crate::auth::{RequireAuth, TokenType};
use crate::domain::accounts::*;
use crate::domain::admin::EmailTemplateType;
use crate::error::{ApiError, ApiResult};
use crate::routes::upload::MultipartForm;
use crate::services::cache::keys;
use crate::services::email;
use crate::services::templates::{Context, Person};

async fn load_user(state: &AppState, user_id: Uuid) -> ApiResult<User> {
    sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

fn issue_tokens(state: &AppState, user: &User) -> ApiResult<crate::auth::TokenPair> {
    Ok(state
        .tokens
        .issue_pair(user.id, &user.email, &user.user_type)?)
}

// ============================================================================
// Auth
// ============================================================================

/// POST /api/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    let email = normalize_email(&req.email);
    let password_hash = hash_password(req.password.clone()).await?;

    let mut tx = state.db.begin().await?;

    let user: User = sqlx::query_as(
        r#"
        INSERT INTO users (id, email, password_hash, first_name, last_name, phone, user_type)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&email)
    .bind(&password_hash)
    .bind(req.first_name.trim())
    .bind(req.last_name.trim())
    .bind(req.phone.as_deref().filter(|p| !p.is_empty()))
    .bind(req.user_type.to_string())
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match ApiError::unique_violation(e, "A user with that email already exists.") {
        ApiError::Conflict(msg) => ApiError::field("email", msg),
        other => other,
    })?;

    if req.user_type == UserType::Contractor {
        sqlx::query("INSERT INTO contractor_profiles (id, user_id) VALUES ($1, $2)")
            .bind(Uuid::new_v4())
            .bind(user.id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    tracing::info!(user_id = %user.id, user_type = %user.user_type, "User registered");

    let person = Person {
        first_name: &user.first_name,
        last_name: &user.last_name,
        email: &user.email,
    };
    if let Err(e) =
        email::send_template_email(&state, EmailTemplateType::Welcome, person, None, Context::new())
            .await
    {
        tracing::error!(user_id = %user.id, error = %e, "Failed to queue welcome email");
    }

    let tokens = issue_tokens(&state, &user)?;
    Ok(Created(AuthResponse {
        user: user.into(),
        tokens,
    }))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let (Some(email), Some(password)) = (
        req.email.filter(|e| !e.trim().is_empty()),
        req.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::bad_request("Must include email and password."));
    };

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
        .bind(normalize_email(&email))
        .fetch_optional(&state.db)
        .await?;

    let Some(user) = user else {
        verify_unknown_user(password).await?;
        return Err(ApiError::bad_request("Invalid credentials."));
    };
    if !verify_password(password, user.password_hash.clone()).await? {
        tracing::warn!(user_id = %user.id, "Login with wrong password");
        return Err(ApiError::bad_request("Invalid credentials."));
    }
    if !user.is_active {
        return Err(ApiError::bad_request("User account is disabled."));
    }

    let user: User = sqlx::query_as(
        r#"
        UPDATE users
        SET is_online = TRUE, last_login = NOW(), last_seen = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(user.id)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(user_id = %user.id, "User logged in");

    let tokens = issue_tokens(&state, &user)?;
    Ok(Json(AuthResponse {
        user: user.into(),
        tokens,
    }))
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<impl IntoResponse> {
    let claims = state
        .tokens
        .verify(&req.refresh, TokenType::Refresh)
        .map_err(|_| ApiError::bad_request("Invalid token"))?;
    if !claims.is_for(auth.user_id) {
        tracing::warn!(user_id = %auth.user_id, "Logout with another user's refresh token");
        return Err(ApiError::bad_request("Invalid token"));
    }

    let remaining = claims.exp - Utc::now().timestamp();
    if remaining > 0 {
        state
            .cache
            .set_with_ttl(
                &keys::jwt_blacklist(&claims.jti),
                &true,
                Duration::from_secs(remaining as u64),
            )
            .await?;
    }

    sqlx::query("UPDATE users SET is_online = FALSE, last_seen = NOW() WHERE id = $1")
        .bind(auth.user_id)
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = %auth.user_id, "User logged out");
    Ok(MessageResponse::new("Successfully logged out"))
}

/// POST /api/auth/token/refresh
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<impl IntoResponse> {
    let claims = state
        .tokens
        .verify(&req.refresh, TokenType::Refresh)
        .map_err(|_| ApiError::unauthorized("Token is invalid or expired"))?;

    let blacklisted = state
        .cache
        .exists(&keys::jwt_blacklist(&claims.jti))
        .await?;
    if blacklisted {
        return Err(ApiError::unauthorized("Token is blacklisted"));
    }

    let access = state.tokens.reissue_access(&claims)?;
    Ok(Json(AccessTokenResponse { access }))
}

// ============================================================================
// Profile
// ============================================================================

/// GET /api/auth/profile
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
) -> ApiResult<impl IntoResponse> {
    let user = load_user(&state, auth.user_id).await?;
    Ok(DataResponse::new(UserResponse::from(user)))
}

/// PATCH /api/auth/profile
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    let user: User = sqlx::query_as(
        r#"
        UPDATE users SET
            first_name = COALESCE($2, first_name),
            last_name = COALESCE($3, last_name),
            phone = COALESCE($4, phone),
            bio = COALESCE($5, bio),
            location = COALESCE($6, location),
            skills = COALESCE($7, skills),
            hourly_rate = COALESCE($8, hourly_rate),
            experience_years = COALESCE($9, experience_years)
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(auth.user_id)
    .bind(&req.first_name)
    .bind(&req.last_name)
    .bind(&req.phone)
    .bind(&req.bio)
    .bind(&req.location)
    .bind(req.skills.as_ref().map(sqlx::types::Json))
    .bind(&req.hourly_rate)
    .bind(req.experience_years)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("User not found"))?;

    tracing::info!(user_id = %user.id, "Profile updated");
    Ok(DataResponse::new(UserResponse::from(user)))
}

/// GET /api/auth/profile/stats
pub async fn profile_stats(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
) -> ApiResult<impl IntoResponse> {
    let user = load_user(&state, auth.user_id).await?;

    let stats = if user.kind() == UserType::Contractor {
        let row: Option<(i32, i32, rust_decimal::Decimal)> = sqlx::query_as(
            r#"
            SELECT completed_projects, rating_count, rating_average
            FROM contractor_profiles WHERE user_id = $1
            "#,
        )
        .bind(user.id)
        .fetch_optional(&state.db)
        .await?;
        let (completed, reviews, average) = row.unwrap_or_default();
        ProfileStats {
            completed_projects: completed as i64,
            total_reviews: reviews as i64,
            average_rating: average.to_f64().unwrap_or(0.0),
            member_since: user.date_joined,
        }
    } else {
        let completed: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM projects WHERE client_id = $1 AND status = 'completed'",
        )
        .bind(user.id)
        .fetch_one(&state.db)
        .await?;
        let reviews: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews WHERE client_id = $1")
            .bind(user.id)
            .fetch_one(&state.db)
            .await?;
        ProfileStats {
            completed_projects: completed,
            total_reviews: reviews,
            average_rating: 0.0,
            member_since: user.date_joined,
        }
    };

    Ok(DataResponse::new(stats))
}

/// POST /api/auth/profile/avatar (multipart `avatar`)
pub async fn upload_avatar(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut form = MultipartForm::read(multipart).await?;
    let file = form.take_file("avatar")?;
    validate_avatar(file.content_type.as_deref(), file.size())?;

    let previous = load_user(&state, auth.user_id).await?.avatar;
    let url = state
        .storage
        .save("avatars", &file.file_name, &file.bytes)
        .await?;

    let user: User = sqlx::query_as("UPDATE users SET avatar = $2 WHERE id = $1 RETURNING *")
        .bind(auth.user_id)
        .bind(&url)
        .fetch_one(&state.db)
        .await?;

    if let Some(old) = previous {
        if let Err(e) = state.storage.delete(&old).await {
            tracing::warn!(user_id = %auth.user_id, error = %e, "Failed to remove old avatar");
        }
    }

    tracing::info!(user_id = %auth.user_id, size = file.size(), "Avatar uploaded");
    Ok(DataResponse::new(UserResponse::from(user)))
}

/// POST /api/auth/change-password
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Json(req): Json<ChangePasswordRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = load_user(&state, auth.user_id).await?;
    if !verify_password(req.old_password.clone(), user.password_hash.clone()).await? {
        return Err(ApiError::field("old_password", "Old password is incorrect."));
    }
    req.validate()?;

    let password_hash = hash_password(req.new_password.clone()).await?;
    sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
        .bind(user.id)
        .bind(password_hash)
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = %user.id, "Password changed");
    Ok(MessageResponse::new("Password changed successfully"))
}

/// POST /api/auth/fcm-token
pub async fn update_fcm_token(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Json(req): Json<FcmTokenRequest>,
) -> ApiResult<impl IntoResponse> {
    let token = req.fcm_token.filter(|t| !t.trim().is_empty());
    let registered = token.is_some();

    sqlx::query("UPDATE users SET fcm_token = $2 WHERE id = $1")
        .bind(auth.user_id)
        .bind(token)
        .execute(&state.db)
        .await?;

    tracing::debug!(user_id = %auth.user_id, registered, "Push token updated");
    Ok(MessageResponse::new(if registered {
        "FCM token registered"
    } else {
        "FCM token removed"
    }))
}

// ============================================================================
// Addresses
// ============================================================================

async fn load_address(state: &AppState, user_id: Uuid, address_id: Uuid) -> ApiResult<Address> {
    sqlx::query_as("SELECT * FROM addresses WHERE id = $1 AND user_id = $2")
        .bind(address_id)
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Address not found"))
}

/// GET /api/auth/addresses
pub async fn list_addresses(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
) -> ApiResult<impl IntoResponse> {
    let addresses: Vec<Address> = sqlx::query_as(
        "SELECT * FROM addresses WHERE user_id = $1 ORDER BY is_default DESC, created_at DESC",
    )
    .bind(auth.user_id)
    .fetch_all(&state.db)
    .await?;
    Ok(DataResponse::new(addresses))
}

/// POST /api/auth/addresses
pub async fn create_address(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Json(req): Json<CreateAddressRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    let mut tx = state.db.begin().await?;
    let address = insert_address(&mut tx, auth.user_id, &req).await?;
    tx.commit().await?;

    Ok(Created(DataResponse::new(address)))
}

/// Unsets the user's current default address, except `keep`. The user row
/// is locked first so concurrent default changes queue up behind each other.
async fn clear_default_address(
    conn: &mut PgConnection,
    user_id: Uuid,
    keep: Option<Uuid>,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query(
        r#"
        UPDATE addresses SET is_default = FALSE
        WHERE user_id = $1 AND is_default AND ($2::uuid IS NULL OR id <> $2)
        "#,
    )
    .bind(user_id)
    .bind(keep)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_address(
    conn: &mut PgConnection,
    user_id: Uuid,
    req: &CreateAddressRequest,
) -> Result<Address, sqlx::Error> {
    if req.is_default {
        clear_default_address(&mut *conn, user_id, None).await?;
    }
    sqlx::query_as(
        r#"
        INSERT INTO addresses (id, user_id, title, street_address, city, state, postal_code, country, is_default)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(req.title.trim())
    .bind(req.street_address.trim())
    .bind(req.city.trim())
    .bind(req.state.trim())
    .bind(req.postal_code.trim())
    .bind(req.country.trim())
    .bind(req.is_default)
    .fetch_one(&mut *conn)
    .await
}

/// GET /api/auth/addresses/:address_id
pub async fn get_address(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(address_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let address = load_address(&state, auth.user_id, address_id).await?;
    Ok(DataResponse::new(address))
}

/// PATCH /api/auth/addresses/:address_id
pub async fn update_address(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(address_id): Path<Uuid>,
    Json(req): Json<UpdateAddressRequest>,
) -> ApiResult<impl IntoResponse> {
    load_address(&state, auth.user_id, address_id).await?;

    let mut tx = state.db.begin().await?;
    if req.is_default == Some(true) {
        clear_default_address(&mut tx, auth.user_id, Some(address_id)).await?;
    }
    let address: Address = sqlx::query_as(
        r#"
        UPDATE addresses SET
            title = COALESCE($3, title),
            street_address = COALESCE($4, street_address),
            city = COALESCE($5, city),
            state = COALESCE($6, state),
            postal_code = COALESCE($7, postal_code),
            country = COALESCE($8, country),
            is_default = COALESCE($9, is_default)
        WHERE id = $1 AND user_id = $2
        RETURNING *
        "#,
    )
    .bind(address_id)
    .bind(auth.user_id)
    .bind(&req.title)
    .bind(&req.street_address)
    .bind(&req.city)
    .bind(&req.state)
    .bind(&req.postal_code)
    .bind(&req.country)
    .bind(req.is_default)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(DataResponse::new(address))
}

/// DELETE /api/auth/addresses/:address_id
pub async fn delete_address(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(address_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let result = sqlx::query("DELETE FROM addresses WHERE id = $1 AND user_id = $2")
        .bind(address_id)
        .bind(auth.user_id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Address not found"));
    }
    Ok(NoContent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::insert_user;
    use sqlx::PgPool;

    fn default_address(title: &str) -> CreateAddressRequest {
        serde_json::from_value(serde_json::json!({
            "title": title,
            "street_address": "1 Main St",
            "city": "Denver",
            "state": "CO",
            "postal_code": "80202",
            "is_default": true,
        }))
        .unwrap()
    }

    async fn default_titles(pool: &PgPool, user_id: Uuid) -> Vec<String> {
        sqlx::query_scalar("SELECT title FROM addresses WHERE user_id = $1 AND is_default")
            .bind(user_id)
            .fetch_all(pool)
            .await
            .unwrap()
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn new_default_address_replaces_the_old_one(pool: PgPool) {
        let user = insert_user(&pool, "client").await;
        let mut conn = pool.acquire().await.unwrap();
        insert_address(&mut conn, user, &default_address("Home")).await.unwrap();
        insert_address(&mut conn, user, &default_address("Work")).await.unwrap();
        drop(conn);

        assert_eq!(default_titles(&pool, user).await, vec!["Work".to_string()]);
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn concurrent_default_addresses_leave_one_default(pool: PgPool) {
        let user = insert_user(&pool, "client").await;

        let mut first = pool.begin().await.unwrap();
        insert_address(&mut first, user, &default_address("Home")).await.unwrap();

        // waits on the user row lock held by the first transaction
        let second = tokio::spawn({
            let pool = pool.clone();
            async move {
                let mut tx = pool.begin().await.unwrap();
                insert_address(&mut tx, user, &default_address("Work")).await.unwrap();
                tx.commit().await.unwrap();
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        first.commit().await.unwrap();
        second.await.unwrap();

        assert_eq!(default_titles(&pool, user).await, vec!["Work".to_string()]);
    }
}
