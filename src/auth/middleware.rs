use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use super::{AuthContext, TokenType};
use crate::app::AppState;
use crate::error::ErrorResponse;

/// Extractor that requires a valid access token belonging to an active user.
///
/// Example:
/// ```ignore
/// async fn protected_route(auth: RequireAuth) -> impl IntoResponse {
///     format!("Hello, user {}", auth.user_id)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RequireAuth(pub AuthContext);

impl std::ops::Deref for RequireAuth {
    type Target = AuthContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Authentication when a bearer token is present, anonymous otherwise.
/// A present but invalid token is still rejected.
#[derive(Debug, Clone)]
pub struct OptionalAuth(pub Option<AuthContext>);

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidFormat,
    InvalidToken,
    InactiveUser,
    Unavailable,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AuthError::MissingToken => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Missing authorization token")
            }
            AuthError::InvalidFormat => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Invalid authorization format")
            }
            AuthError::InvalidToken => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Invalid or expired token")
            }
            AuthError::InactiveUser => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "User account is disabled")
            }
            AuthError::Unavailable => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred",
            ),
        };

        (status, Json(ErrorResponse::new(code, message))).into_response()
    }
}

fn bearer_token(parts: &Parts) -> Result<Option<&str>, AuthError> {
    let Some(header) = parts.headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let header = header.to_str().map_err(|_| AuthError::InvalidFormat)?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidFormat)?;
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(Some(token))
}

pub(crate) async fn authenticate(state: &AppState, token: &str) -> Result<AuthContext, AuthError> {
    let claims = state
        .tokens
        .verify(token, TokenType::Access)
        .map_err(|e| {
            tracing::warn!(error = %e, "JWT verification failed");
            AuthError::InvalidToken
        })?;

    let context = AuthContext::from_claims(&claims).map_err(|e| {
        tracing::warn!(error = %e, "Failed to build auth context");
        AuthError::InvalidToken
    })?;

    let is_active: Option<bool> = sqlx::query_scalar("SELECT is_active FROM users WHERE id = $1")
        .bind(context.user_id)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to load user for auth");
            AuthError::Unavailable
        })?;

    match is_active {
        Some(true) => Ok(context),
        Some(false) => {
            tracing::warn!(user_id = %context.user_id, "Inactive user presented a token");
            Err(AuthError::InactiveUser)
        }
        None => Err(AuthError::InvalidToken),
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireAuth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?.ok_or(AuthError::MissingToken)?;
        authenticate(state, token).await.map(RequireAuth)
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for OptionalAuth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match bearer_token(parts)? {
            Some(token) => authenticate(state, token).await.map(|c| OptionalAuth(Some(c))),
            None => Ok(OptionalAuth(None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Request};

    fn parts_with(header: Option<&'static str>) -> Parts {
        let mut builder = Request::builder().uri("/api/ads/");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, HeaderValue::from_static(value));
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn bearer_token_parsing() {
        assert!(matches!(bearer_token(&parts_with(None)), Ok(None)));
        assert!(matches!(
            bearer_token(&parts_with(Some("Bearer abc"))),
            Ok(Some("abc"))
        ));
        assert!(matches!(
            bearer_token(&parts_with(Some("Token abc"))),
            Err(AuthError::InvalidFormat)
        ));
        assert!(matches!(
            bearer_token(&parts_with(Some("Bearer "))),
            Err(AuthError::MissingToken)
        ));
    }
}
