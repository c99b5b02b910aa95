//! Dashboard statistics, analytics and the audit log

use axum::{
    extract::{Query, State},
    response::IntoResponse,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::api::{DataResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireAdmin;
use crate::domain::admin::*;
use crate::error::ApiResult;
use crate::services::cache::keys;

const DASHBOARD_TTL: Duration = Duration::from_secs(300);
const RECENT_ACTIONS: i64 = 10;
const ANALYTICS_DAYS: i32 = 30;

async fn compute_stats(state: &AppState) -> ApiResult<DashboardStats> {
    let users: (i64, i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*),
               COUNT(*) FILTER (WHERE is_active),
               COUNT(*) FILTER (WHERE date_joined >= date_trunc('day', NOW())),
               COUNT(*) FILTER (WHERE date_joined >= NOW() - INTERVAL '7 days')
        FROM users
        "#,
    )
    .fetch_one(&state.db)
    .await?;

    let templates: (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COUNT(*) FILTER (WHERE is_active) FROM email_templates",
    )
    .fetch_one(&state.db)
    .await?;

    let campaigns: (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COUNT(*) FILTER (WHERE status = 'sent') FROM email_campaigns",
    )
    .fetch_one(&state.db)
    .await?;

    let pending_complaints: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM complaints WHERE status = 'pending'")
            .fetch_one(&state.db)
            .await?;
    let pending_moderation: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM moderation_queue WHERE status = 'pending'")
            .fetch_one(&state.db)
            .await?;

    Ok(DashboardStats {
        users: UserCounts {
            total: users.0,
            active: users.1,
            new_today: users.2,
            new_this_week: users.3,
        },
        email: EmailCounts {
            templates_total: templates.0,
            templates_active: templates.1,
            campaigns_total: campaigns.0,
            campaigns_sent: campaigns.1,
        },
        pending_complaints,
        pending_moderation,
    })
}

/// GET /admin/dashboard
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ViewAnalytics)?;

    let key = keys::dashboard_stats();
    let stats = match state.cache.get::<DashboardStats>(&key).await {
        Some(stats) => stats,
        None => {
            let stats = compute_stats(&state).await?;
            if let Err(e) = state.cache.set_with_ttl(&key, &stats, DASHBOARD_TTL).await {
                tracing::warn!(error = %e, "Failed to cache dashboard stats");
            }
            stats
        }
    };

    let recent_actions: Vec<AdminActionLog> =
        sqlx::query_as("SELECT * FROM admin_action_logs ORDER BY created_at DESC LIMIT $1")
            .bind(RECENT_ACTIONS)
            .fetch_all(&state.db)
            .await?;

    Ok(DataResponse::new(DashboardResponse {
        stats,
        recent_actions,
    }))
}

/// GET /admin/analytics
pub async fn analytics(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ViewAnalytics)?;

    let registrations: Vec<DailyCount> = sqlx::query_as(
        r#"
        SELECT d.day::date AS day, COUNT(u.id) AS count
        FROM generate_series(
                 date_trunc('day', NOW()) - make_interval(days => $1 - 1),
                 date_trunc('day', NOW()),
                 INTERVAL '1 day') AS d(day)
        LEFT JOIN users u ON date_trunc('day', u.date_joined) = d.day
        GROUP BY d.day
        ORDER BY d.day
        "#,
    )
    .bind(ANALYTICS_DAYS)
    .fetch_all(&state.db)
    .await?;

    let projects: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM projects GROUP BY status")
            .fetch_all(&state.db)
            .await?;
    let complaints: Vec<(String, i64)> =
        sqlx::query_as("SELECT complaint_type, COUNT(*) FROM complaints GROUP BY complaint_type")
            .fetch_all(&state.db)
            .await?;

    Ok(DataResponse::new(AnalyticsResponse {
        registrations,
        projects_by_status: projects.into_iter().collect::<BTreeMap<_, _>>(),
        complaints_by_type: complaints.into_iter().collect::<BTreeMap<_, _>>(),
    }))
}

/// GET /admin/audit-logs
pub async fn audit_logs(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<AuditLogQuery>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ViewAnalytics)?;
    let action = filter.action.map(|a| a.to_string());

    const WHERE: &str = r#"
        WHERE ($1::text IS NULL OR action = $1)
          AND ($2::uuid IS NULL OR admin_user_id = $2)
          AND ($3::timestamptz IS NULL OR created_at >= $3)
          AND ($4::timestamptz IS NULL OR created_at <= $4)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM admin_action_logs {}", WHERE))
        .bind(&action)
        .bind(filter.admin_id)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .fetch_one(&state.db)
        .await?;

    let logs: Vec<AdminActionLog> = sqlx::query_as(&format!(
        "SELECT * FROM admin_action_logs {} ORDER BY created_at DESC LIMIT $5 OFFSET $6",
        WHERE
    ))
    .bind(&action)
    .bind(filter.admin_id)
    .bind(filter.date_from)
    .bind(filter.date_to)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&state.db)
    .await?;

    Ok(Paginated::new(logs, &pagination, total))
}
