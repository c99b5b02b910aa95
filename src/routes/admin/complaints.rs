//! Complaints: filed by API users, handled by staff

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::{admin_person, record};
use crate::api::{Created, DataResponse, MessageResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::{RequireAdmin, RequireAuth};
use crate::domain::admin::*;
use crate::error::{ApiError, ApiResult};
use crate::middleware::ClientIp;
use crate::services::audit::AuditEntry;
use crate::services::email::send_template_email;
use crate::services::templates::{Context, Person};

async fn load_complaint(state: &AppState, complaint_id: Uuid) -> ApiResult<Complaint> {
    sqlx::query_as("SELECT * FROM complaints WHERE id = $1")
        .bind(complaint_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Complaint not found"))
}

async fn require_staff(state: &AppState, user_id: Uuid) -> ApiResult<()> {
    let staff: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM admin_roles WHERE user_id = $1 AND is_active = TRUE)",
    )
    .bind(user_id)
    .fetch_one(&state.db)
    .await?;
    if staff {
        Ok(())
    } else {
        Err(ApiError::field("admin_id", "Assignee must be an active staff member."))
    }
}

/// POST /api/complaints
pub async fn create_complaint(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Json(req): Json<CreateComplaintRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    let complaint: Complaint = sqlx::query_as(
        r#"
        INSERT INTO complaints (id, complainant_id, complaint_type, content_type, object_id, description, evidence)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(auth.user_id)
    .bind(req.complaint_type.to_string())
    .bind(req.content_type.trim())
    .bind(req.object_id)
    .bind(req.description.trim())
    .bind(sqlx::types::Json(&req.evidence))
    .fetch_one(&state.db)
    .await?;

    tracing::info!(complaint_id = %complaint.id, user_id = %auth.user_id, "Complaint filed");
    Ok(Created(complaint))
}

/// GET /admin/complaints
pub async fn list_complaints(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<ComplaintQuery>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ViewComplaint)?;

    let assignee = match filter.assigned_to.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            AssigneeFilter::parse(raw)
                .ok_or_else(|| ApiError::field("assigned_to", "Expected me, unassigned or an id."))?,
        ),
        None => None,
    };
    let (assigned_to, unassigned) = match assignee {
        Some(AssigneeFilter::Me) => (Some(admin.user_id), false),
        Some(AssigneeFilter::User(id)) => (Some(id), false),
        Some(AssigneeFilter::Unassigned) => (None, true),
        None => (None, false),
    };
    let status = filter.status.map(|s| s.to_string());
    let kind = filter.complaint_type.map(|t| t.to_string());

    const WHERE: &str = r#"
        WHERE ($1::text IS NULL OR status = $1)
          AND ($2::text IS NULL OR complaint_type = $2)
          AND ($3::uuid IS NULL OR assigned_to = $3)
          AND (NOT $4 OR assigned_to IS NULL)
          AND ($5::timestamptz IS NULL OR created_at >= $5)
          AND ($6::timestamptz IS NULL OR created_at <= $6)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM complaints {}", WHERE))
        .bind(&status)
        .bind(&kind)
        .bind(assigned_to)
        .bind(unassigned)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .fetch_one(&state.db)
        .await?;

    let complaints: Vec<Complaint> = sqlx::query_as(&format!(
        "SELECT * FROM complaints {} ORDER BY created_at DESC LIMIT $7 OFFSET $8",
        WHERE
    ))
    .bind(&status)
    .bind(&kind)
    .bind(assigned_to)
    .bind(unassigned)
    .bind(filter.date_from)
    .bind(filter.date_to)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&state.db)
    .await?;

    Ok(Paginated::new(complaints, &pagination, total))
}

/// GET /admin/complaints/stats
pub async fn complaint_stats(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ViewComplaint)?;

    let row: (i64, i64, i64, i64, i64, Option<f64>) = sqlx::query_as(
        r#"
        SELECT COUNT(*),
               COUNT(*) FILTER (WHERE status = 'pending'),
               COUNT(*) FILTER (WHERE status = 'in_review'),
               COUNT(*) FILTER (WHERE status = 'resolved'),
               COUNT(*) FILTER (WHERE status = 'rejected'),
               AVG(EXTRACT(EPOCH FROM (resolved_at - created_at)) / 3600.0)::float8
        FROM complaints
        "#,
    )
    .fetch_one(&state.db)
    .await?;

    Ok(DataResponse::new(ComplaintStats {
        total: row.0,
        pending: row.1,
        in_review: row.2,
        resolved: row.3,
        rejected: row.4,
        avg_processing_hours: crate::domain::round2(row.5.unwrap_or(0.0)),
    }))
}

/// GET /admin/complaints/:complaint_id
pub async fn get_complaint(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Path(complaint_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ViewComplaint)?;
    let complaint = load_complaint(&state, complaint_id).await?;

    let complainant_email: String = sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
        .bind(complaint.complainant_id)
        .fetch_one(&state.db)
        .await?;
    let assigned_to_email: Option<String> = match complaint.assigned_to {
        Some(id) => sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&state.db)
            .await?,
        None => None,
    };

    Ok(DataResponse::new(ComplaintDetail {
        complaint,
        complainant_email,
        assigned_to_email,
    }))
}

/// POST /admin/complaints/:complaint_id/decision
///
/// Moves a complaint to in_review, resolved or rejected. Closing it emails
/// the complainant.
pub async fn decide(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(complaint_id): Path<Uuid>,
    Json(req): Json<ComplaintDecisionRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::ResolveComplaint)?;
    req.validate()?;

    let complaint = load_complaint(&state, complaint_id).await?;
    let before = complaint.status();
    if before.is_closed() {
        return Err(ApiError::bad_request("Complaint is already closed"));
    }

    let closing = req.status.is_closed();
    let complaint: Complaint = sqlx::query_as(
        r#"
        UPDATE complaints
        SET status = $2,
            resolution = CASE WHEN $3 = '' THEN resolution ELSE $3 END,
            assigned_to = COALESCE(assigned_to, $4),
            resolved_at = CASE WHEN $5 THEN NOW() ELSE resolved_at END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(complaint_id)
    .bind(req.status.to_string())
    .bind(req.resolution.trim())
    .bind(admin.user_id)
    .bind(closing)
    .fetch_one(&state.db)
    .await?;

    let action = match req.status {
        ComplaintStatus::Resolved => AdminActionType::Approve,
        ComplaintStatus::Rejected => AdminActionType::Reject,
        _ => AdminActionType::Update,
    };
    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(action, format!("Complaint {} marked {}", complaint_id, req.status))
            .target("complaint", complaint_id)
            .old_values(json!({ "status": before }))
            .new_values(json!({ "status": req.status, "resolution": complaint.resolution })),
    )
    .await?;

    if closing {
        let complainant: Option<(String, String, String)> =
            sqlx::query_as("SELECT first_name, last_name, email FROM users WHERE id = $1")
                .bind(complaint.complainant_id)
                .fetch_optional(&state.db)
                .await?;
        if let Some((first_name, last_name, email)) = complainant {
            let mut extra = Context::new();
            extra.insert("resolution".into(), complaint.resolution.clone());
            extra.insert("complaint_id".into(), complaint.id.to_string());
            let person = Person {
                first_name: &first_name,
                last_name: &last_name,
                email: &email,
            };
            if let Err(e) = send_template_email(
                &state,
                EmailTemplateType::ComplaintResolved,
                person,
                Some(admin_person(&admin)),
                extra,
            )
            .await
            {
                tracing::error!(complaint_id = %complaint_id, error = %e, "Failed to queue resolution email");
            }
        }
    }

    Ok(DataResponse::new(complaint))
}

/// POST /admin/complaints/:complaint_id/assign
pub async fn assign(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(complaint_id): Path<Uuid>,
    Json(req): Json<AssignRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::AssignComplaint)?;
    require_staff(&state, req.admin_id).await?;
    let before = load_complaint(&state, complaint_id).await?;

    let complaint: Complaint = sqlx::query_as(
        "UPDATE complaints SET assigned_to = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(complaint_id)
    .bind(req.admin_id)
    .fetch_one(&state.db)
    .await?;

    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Update, format!("Assigned complaint {}", complaint_id))
            .target("complaint", complaint_id)
            .old_values(json!({ "assigned_to": before.assigned_to }))
            .new_values(json!({ "assigned_to": req.admin_id })),
    )
    .await?;

    Ok(DataResponse::new(complaint))
}

/// POST /admin/complaints/bulk-assign
pub async fn bulk_assign(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Json(req): Json<BulkAssignRequest>,
) -> ApiResult<impl IntoResponse> {
    admin.require(Permission::AssignComplaint)?;
    if req.ids.is_empty() {
        return Err(ApiError::field("ids", "This list may not be empty."));
    }

    let assignments: Vec<(Uuid, Uuid)> = match req.assignee()? {
        Some(admin_id) => {
            require_staff(&state, admin_id).await?;
            req.ids.iter().map(|id| (*id, admin_id)).collect()
        }
        None => {
            let loads: Vec<(Uuid, i64)> = sqlx::query_as(
                r#"
                SELECT r.user_id, COUNT(c.id)
                FROM admin_roles r
                LEFT JOIN complaints c
                  ON c.assigned_to = r.user_id AND c.status IN ('pending', 'in_review')
                WHERE r.role = 'moderator' AND r.is_active = TRUE
                GROUP BY r.user_id
                ORDER BY r.user_id
                "#,
            )
            .fetch_all(&state.db)
            .await?;
            if loads.is_empty() {
                return Err(ApiError::bad_request("No active moderators to assign to"));
            }
            round_robin_assign(&req.ids, &loads)
        }
    };

    let mut tx = state.db.begin().await?;
    let mut assigned = 0u64;
    for (complaint_id, assignee) in &assignments {
        assigned += sqlx::query(
            "UPDATE complaints SET assigned_to = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(complaint_id)
        .bind(assignee)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }
    tx.commit().await?;

    let mapping: serde_json::Map<String, serde_json::Value> = assignments
        .iter()
        .map(|(c, a)| (c.to_string(), json!(a)))
        .collect();
    record(
        &state,
        &admin,
        &ip,
        AuditEntry::new(AdminActionType::Update, format!("Bulk assigned {} complaints", assigned))
            .new_values(serde_json::Value::Object(mapping)),
    )
    .await?;

    Ok(MessageResponse::new(format!("{} complaints assigned", assigned)))
}
