use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub services: ServiceHealth,
}

#[derive(Serialize)]
pub struct ServiceHealth {
    pub database: String,
    pub redis: String,
}

/// Overall status from the two backing services. The database is critical,
/// Redis only degrades the service.
pub fn overall_status(db_ok: bool, redis_ok: bool) -> (&'static str, StatusCode) {
    match (db_ok, redis_ok) {
        (true, true) => ("healthy", StatusCode::OK),
        (true, false) => ("degraded", StatusCode::OK),
        (false, _) => ("unhealthy", StatusCode::SERVICE_UNAVAILABLE),
    }
}

fn service_status(ok: bool) -> String {
    if ok { "ok" } else { "error" }.to_string()
}

/// Health check endpoint - public
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let (db_result, redis_result) = tokio::join!(
        sqlx::query("SELECT 1").fetch_one(&state.db),
        state.cache.health_check(),
    );

    if let Err(e) = &db_result {
        tracing::error!(error = %e, "Database health check failed");
    }
    if let Err(e) = &redis_result {
        tracing::warn!(error = %e, "Redis health check failed");
    }

    let (status, status_code) = overall_status(db_result.is_ok(), redis_result.is_ok());

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            services: ServiceHealth {
                database: service_status(db_result.is_ok()),
                redis: service_status(redis_result.is_ok()),
            },
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_outage_is_unhealthy() {
        assert_eq!(overall_status(true, true), ("healthy", StatusCode::OK));
        assert_eq!(overall_status(true, false), ("degraded", StatusCode::OK));
        assert_eq!(
            overall_status(false, true),
            ("unhealthy", StatusCode::SERVICE_UNAVAILABLE)
        );
    }
}
