//! Project routes
//!
//! Postings, the application workflow, milestones, progress updates,
//! documents and the project directory stats.

use axum::{
    extract::{Multipart, Path, Query, State},
    response::IntoResponse,
    Json,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgPool};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::api::{Created, DataResponse, MessageResponse, NoContent, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::{OptionalAuth, RequireAuth};
use crate::domain::accounts::UserSummary;
use crate::domain::moderation::ContentKind;
use crate::domain::notifications::{NewNotification, NotificationType};
use crate::domain::projects::*;
use crate::domain::{contains_pattern, escape_like};
use crate::error::{ApiError, ApiResult};
use crate::routes::contractors::require_contractor_profile;
use crate::routes::upload::MultipartForm;
use crate::services::cache::keys;
use crate::services::{moderation, notifications};

const STATS_TTL: Duration = Duration::from_secs(3600);
const RECOMMENDED_LIMIT: i64 = 10;
const DOCUMENT_MAX_BYTES: usize = 20 * 1024 * 1024;

async fn load_project(db: &PgPool, project_id: Uuid) -> ApiResult<Project> {
    sqlx::query_as("SELECT * FROM projects WHERE id = $1")
        .bind(project_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Project not found"))
}

async fn load_owned_project(db: &PgPool, project_id: Uuid, user_id: Uuid) -> ApiResult<Project> {
    let project = load_project(db, project_id).await?;
    if !project.is_owner(user_id) {
        return Err(ApiError::forbidden("Only the project owner can do this"));
    }
    Ok(project)
}

/// User id behind the project's assigned contractor profile.
async fn assigned_contractor_user(db: &PgPool, project: &Project) -> Result<Option<Uuid>, sqlx::Error> {
    match project.contractor_id {
        Some(contractor_id) => {
            sqlx::query_scalar("SELECT user_id FROM contractor_profiles WHERE id = $1")
                .bind(contractor_id)
                .fetch_optional(db)
                .await
        }
        None => Ok(None),
    }
}

async fn invalidate_stats(state: &AppState) {
    if let Err(e) = state.cache.delete(&keys::project_stats()).await {
        tracing::warn!(error = %e, "Failed to invalidate project stats");
    }
}

// ============================================================================
// Projects
// ============================================================================

/// GET /api/projects
pub async fn list_projects(
    State(state): State<Arc<AppState>>,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<ProjectSearchQuery>,
) -> ApiResult<impl IntoResponse> {
    let search = filter
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(contains_pattern);
    let statuses = filter.statuses();
    let city = filter.city.as_deref().map(escape_like);
    let region = filter.state.as_deref().map(escape_like);

    const WHERE: &str = r#"
        WHERE p.is_active = TRUE
          AND ($1::text IS NULL OR p.title ILIKE $1 OR p.description ILIKE $1)
          AND ($2::uuid IS NULL OR p.category_id = $2)
          AND ($3::text[] IS NULL OR p.status = ANY($3))
          AND ($4::text IS NULL OR p.priority = $4)
          AND ($5::numeric IS NULL OR p.budget_max >= $5)
          AND ($6::numeric IS NULL OR p.budget_min <= $6)
          AND ($7::text IS NULL OR p.city ILIKE $7)
          AND ($8::text IS NULL OR p.state ILIKE $8)
          AND ($9::uuid IS NULL OR p.client_id = $9)
          AND ($10::uuid IS NULL OR p.contractor_id = $10)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM projects p {}", WHERE))
        .bind(&search)
        .bind(filter.category)
        .bind(&statuses)
        .bind(filter.priority.map(|p| p.to_string()))
        .bind(filter.min_budget)
        .bind(filter.max_budget)
        .bind(&city)
        .bind(&region)
        .bind(filter.client)
        .bind(filter.contractor)
        .fetch_one(&state.db)
        .await?;

    let projects: Vec<Project> = sqlx::query_as(&format!(
        "SELECT p.* FROM projects p {} ORDER BY {}, p.created_at DESC LIMIT $11 OFFSET $12",
        WHERE, PRIORITY_ORDER_SQL
    ))
    .bind(&search)
    .bind(filter.category)
    .bind(&statuses)
    .bind(filter.priority.map(|p| p.to_string()))
    .bind(filter.min_budget)
    .bind(filter.max_budget)
    .bind(&city)
    .bind(&region)
    .bind(filter.client)
    .bind(filter.contractor)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&state.db)
    .await?;

    Ok(Paginated::new(projects, &pagination, total))
}

/// POST /api/projects
pub async fn create_project(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Json(req): Json<CreateProjectRequest>,
) -> ApiResult<impl IntoResponse> {
    if auth.is_contractor() {
        return Err(ApiError::forbidden("Only clients can create projects"));
    }
    req.validate()?;

    let project: Project = sqlx::query_as(
        r#"
        INSERT INTO projects
            (id, client_id, title, description, category_id, budget_min, budget_max, status,
             priority, address, city, state, postal_code, latitude, longitude,
             start_date, end_date, deadline)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'draft', $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(auth.user_id)
    .bind(req.title.trim())
    .bind(req.description.trim())
    .bind(req.category_id)
    .bind(req.budget_min)
    .bind(req.budget_max)
    .bind(req.priority.to_string())
    .bind(&req.address)
    .bind(&req.city)
    .bind(&req.state)
    .bind(&req.postal_code)
    .bind(req.latitude)
    .bind(req.longitude)
    .bind(req.start_date)
    .bind(req.end_date)
    .bind(req.deadline)
    .fetch_one(&state.db)
    .await?;

    moderation::auto_moderate(
        &state.db,
        ContentKind::Project,
        project.id,
        &format!("{} {}", project.title, project.description),
    )
    .await;
    invalidate_stats(&state).await;

    tracing::info!(user_id = %auth.user_id, project_id = %project.id, "Project created");
    Ok(Created(DataResponse::new(project)))
}

/// GET /api/projects/:project_id
pub async fn get_project(
    State(state): State<Arc<AppState>>,
    OptionalAuth(viewer): OptionalAuth,
    Path(project_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let mut project = load_project(&state.db, project_id).await?;

    let is_owner = viewer.as_ref().is_some_and(|v| project.is_owner(v.user_id));
    if !is_owner {
        sqlx::query("UPDATE projects SET views_count = views_count + 1 WHERE id = $1")
            .bind(project_id)
            .execute(&state.db)
            .await?;
        project.views_count += 1;
    }

    let client: Option<UserSummary> = sqlx::query_as(
        "SELECT id, email, first_name, last_name, avatar, user_type FROM users WHERE id = $1",
    )
    .bind(project.client_id)
    .fetch_optional(&state.db)
    .await?;

    let images: Vec<ProjectImage> = sqlx::query_as(
        "SELECT * FROM project_images WHERE project_id = $1 ORDER BY is_primary DESC, created_at",
    )
    .bind(project_id)
    .fetch_all(&state.db)
    .await?;

    let milestones: Vec<ProjectMilestone> = sqlx::query_as(
        "SELECT * FROM project_milestones WHERE project_id = $1 ORDER BY sort_order, due_date",
    )
    .bind(project_id)
    .fetch_all(&state.db)
    .await?;

    Ok(DataResponse::new(ProjectDetailResponse {
        project,
        client,
        images,
        milestones,
    }))
}

/// PATCH /api/projects/:project_id
pub async fn update_project(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(project_id): Path<Uuid>,
    Json(req): Json<UpdateProjectRequest>,
) -> ApiResult<impl IntoResponse> {
    let current = load_owned_project(&state.db, project_id, auth.user_id).await?;
    req.validate(&current)?;

    let project: Project = sqlx::query_as(
        r#"
        UPDATE projects SET
            title = COALESCE($2, title),
            description = COALESCE($3, description),
            category_id = COALESCE($4, category_id),
            budget_min = COALESCE($5, budget_min),
            budget_max = COALESCE($6, budget_max),
            priority = COALESCE($7, priority),
            address = COALESCE($8, address),
            city = COALESCE($9, city),
            state = COALESCE($10, state),
            postal_code = COALESCE($11, postal_code),
            start_date = COALESCE($12, start_date),
            end_date = COALESCE($13, end_date),
            deadline = COALESCE($14, deadline),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(project_id)
    .bind(&req.title)
    .bind(&req.description)
    .bind(req.category_id)
    .bind(req.budget_min)
    .bind(req.budget_max)
    .bind(req.priority.map(|p| p.to_string()))
    .bind(&req.address)
    .bind(&req.city)
    .bind(&req.state)
    .bind(&req.postal_code)
    .bind(req.start_date)
    .bind(req.end_date)
    .bind(req.deadline)
    .fetch_one(&state.db)
    .await?;

    Ok(DataResponse::new(project))
}

/// DELETE /api/projects/:project_id
pub async fn delete_project(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(project_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    load_owned_project(&state.db, project_id, auth.user_id).await?;

    sqlx::query("DELETE FROM projects WHERE id = $1")
        .bind(project_id)
        .execute(&state.db)
        .await?;
    invalidate_stats(&state).await;

    tracing::info!(user_id = %auth.user_id, project_id = %project_id, "Project deleted");
    Ok(NoContent)
}

/// PATCH /api/projects/:project_id/status
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(project_id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> ApiResult<impl IntoResponse> {
    let project = load_owned_project(&state.db, project_id, auth.user_id).await?;
    let current = project.status();
    if !current.can_transition_to(req.status) {
        return Err(ApiError::bad_request(format!(
            "Cannot change status from {} to {}",
            current, req.status
        )));
    }

    let mut tx = state.db.begin().await?;
    let project = transition_status(&mut tx, project_id, current, req.status).await?;
    tx.commit().await?;
    invalidate_stats(&state).await;

    tracing::info!(project_id = %project_id, from = %current, to = %req.status, "Project status changed");
    Ok(DataResponse::new(project))
}

/// Move a project from `from` to `to`, failing if another request changed
/// it first. Cancelling also closes every pending application.
async fn transition_status(
    conn: &mut PgConnection,
    project_id: Uuid,
    from: ProjectStatus,
    to: ProjectStatus,
) -> ApiResult<Project> {
    let project: Project = sqlx::query_as(
        r#"
        UPDATE projects SET status = $3, updated_at = NOW()
        WHERE id = $1 AND status = $2
        RETURNING *
        "#,
    )
    .bind(project_id)
    .bind(from.to_string())
    .bind(to.to_string())
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| ApiError::conflict("Project status changed, reload and try again"))?;

    if to == ProjectStatus::Cancelled {
        sqlx::query(
            r#"
            UPDATE project_applications SET status = 'rejected', updated_at = NOW()
            WHERE project_id = $1 AND status = 'pending'
            "#,
        )
        .bind(project_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(project)
}

// ============================================================================
// Applications
// ============================================================================

/// POST /api/projects/:project_id/apply
pub async fn apply(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(project_id): Path<Uuid>,
    Json(req): Json<ApplyRequest>,
) -> ApiResult<impl IntoResponse> {
    let contractor = require_contractor_profile(&state.db, auth.user_id).await?;
    let project = load_project(&state.db, project_id).await?;
    if !project.status().accepts_applications() {
        return Err(ApiError::bad_request("This project is not accepting applications"));
    }
    req.validate()?;

    let mut tx = state.db.begin().await?;
    let application: ProjectApplication = sqlx::query_as(
        r#"
        INSERT INTO project_applications
            (id, project_id, contractor_id, cover_letter, proposed_budget, proposed_timeline)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(project_id)
    .bind(contractor.id)
    .bind(req.cover_letter.trim())
    .bind(req.proposed_budget)
    .bind(req.proposed_timeline)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| ApiError::unique_violation(e, "You have already applied to this project"))?;

    sqlx::query("UPDATE projects SET applications_count = applications_count + 1 WHERE id = $1")
        .bind(project_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    notifications::notify(
        &state,
        NewNotification::new(
            project.client_id,
            NotificationType::ProjectApplication,
            "New project application",
            format!("A contractor applied to your project \"{}\".", project.title),
        )
        .related_to("project", project.id),
    )
    .await;

    tracing::info!(project_id = %project_id, contractor_id = %contractor.id, "Application submitted");
    Ok(Created(DataResponse::new(application)))
}

const APPLICATION_SELECT_SQL: &str = r#"
    SELECT a.*, cp.user_id AS contractor_user_id,
           TRIM(u.first_name || ' ' || u.last_name) AS contractor_name,
           cp.rating_average AS contractor_rating
    FROM project_applications a
    JOIN contractor_profiles cp ON cp.id = a.contractor_id
    JOIN users u ON u.id = cp.user_id
"#;

/// GET /api/projects/:project_id/applications
pub async fn list_applications(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(project_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    load_owned_project(&state.db, project_id, auth.user_id).await?;

    let applications: Vec<ApplicationWithContractor> = sqlx::query_as(&format!(
        "{} WHERE a.project_id = $1 ORDER BY a.applied_at DESC",
        APPLICATION_SELECT_SQL
    ))
    .bind(project_id)
    .fetch_all(&state.db)
    .await?;

    Ok(DataResponse::new(applications))
}

/// The application and its project, checked for ownership and pending status.
async fn pending_application_for_owner(
    db: &PgPool,
    application_id: Uuid,
    user_id: Uuid,
) -> ApiResult<(ApplicationWithContractor, Project)> {
    let application: ApplicationWithContractor =
        sqlx::query_as(&format!("{} WHERE a.id = $1", APPLICATION_SELECT_SQL))
            .bind(application_id)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| ApiError::not_found("Application not found"))?;

    let project = load_owned_project(db, application.application.project_id, user_id).await?;
    if application.application.status() != ApplicationStatus::Pending {
        return Err(ApiError::bad_request("Only pending applications can be processed"));
    }
    Ok((application, project))
}

/// POST /api/projects/applications/:application_id/accept
pub async fn accept_application(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(application_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let (application, project) =
        pending_application_for_owner(&state.db, application_id, auth.user_id).await?;

    let mut tx = state.db.begin().await?;
    let rejected_users = award_application(
        &mut tx,
        project.id,
        application_id,
        application.application.contractor_id,
    )
    .await?;
    tx.commit().await?;
    invalidate_stats(&state).await;

    notifications::notify(
        &state,
        NewNotification::new(
            application.contractor_user_id,
            NotificationType::ApplicationAccepted,
            "Application accepted",
            format!("Your application for \"{}\" was accepted.", project.title),
        )
        .related_to("project", project.id),
    )
    .await;

    let not_selected = NewNotification::new(
        Uuid::nil(),
        NotificationType::ApplicationRejected,
        "Application not selected",
        format!("Another contractor was selected for \"{}\".", project.title),
    )
    .related_to("project", project.id);
    if let Err(e) = notifications::create_bulk(&state, &rejected_users, &not_selected).await {
        tracing::error!(project_id = %project.id, error = %e, "Failed to notify rejected applicants");
    }

    tracing::info!(
        project_id = %project.id,
        application_id = %application_id,
        rejected = rejected_users.len(),
        "Application accepted"
    );
    Ok(MessageResponse::new("Application accepted"))
}

/// Accept one pending application on a published project, start the project
/// with that contractor and reject the remaining applications. Returns the
/// user ids of the rejected applicants.
async fn award_application(
    conn: &mut PgConnection,
    project_id: Uuid,
    application_id: Uuid,
    contractor_id: Uuid,
) -> ApiResult<Vec<Uuid>> {
    let started = sqlx::query(
        r#"
        UPDATE projects
        SET contractor_id = $2, status = 'in_progress', updated_at = NOW()
        WHERE id = $1 AND status = 'published'
        "#,
    )
    .bind(project_id)
    .bind(contractor_id)
    .execute(&mut *conn)
    .await?;
    if started.rows_affected() == 0 {
        return Err(ApiError::bad_request("Project is not open for applications"));
    }

    let accepted = sqlx::query(
        r#"
        UPDATE project_applications SET status = 'accepted', updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(application_id)
    .execute(&mut *conn)
    .await?;
    if accepted.rows_affected() == 0 {
        return Err(ApiError::bad_request("Only pending applications can be processed"));
    }

    let rejected_users: Vec<Uuid> = sqlx::query_scalar(
        r#"
        WITH rejected AS (
            UPDATE project_applications
            SET status = 'rejected', updated_at = NOW()
            WHERE project_id = $1 AND status = 'pending' AND id <> $2
            RETURNING contractor_id
        )
        SELECT cp.user_id FROM rejected r JOIN contractor_profiles cp ON cp.id = r.contractor_id
        "#,
    )
    .bind(project_id)
    .bind(application_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rejected_users)
}

/// POST /api/projects/applications/:application_id/reject
pub async fn reject_application(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(application_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let (application, project) =
        pending_application_for_owner(&state.db, application_id, auth.user_id).await?;

    let rejected = sqlx::query(
        r#"
        UPDATE project_applications SET status = 'rejected', updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(application_id)
    .execute(&state.db)
    .await?;
    if rejected.rows_affected() == 0 {
        return Err(ApiError::bad_request("Only pending applications can be processed"));
    }

    notifications::notify(
        &state,
        NewNotification::new(
            application.contractor_user_id,
            NotificationType::ApplicationRejected,
            "Application rejected",
            format!("Your application for \"{}\" was rejected.", project.title),
        )
        .related_to("project", project.id),
    )
    .await;

    Ok(MessageResponse::new("Application rejected"))
}

// ============================================================================
// Images and milestones
// ============================================================================

/// POST /api/projects/:project_id/images (multipart `image`, `caption`,
/// `is_primary`)
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(project_id): Path<Uuid>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    load_owned_project(&state.db, project_id, auth.user_id).await?;

    let mut form = MultipartForm::read(multipart).await?;
    let file = form.take_file("image")?;
    crate::domain::accounts::validate_avatar(file.content_type.as_deref(), file.size())
        .map_err(|_| ApiError::field("image", "Upload a valid image up to 5MB."))?;
    let caption = form.text("caption").unwrap_or_default().to_string();
    let is_primary = form.flag("is_primary");

    let url = state.storage.save("projects", &file.file_name, &file.bytes).await?;

    let mut tx = state.db.begin().await?;
    if is_primary {
        sqlx::query("UPDATE project_images SET is_primary = FALSE WHERE project_id = $1")
            .bind(project_id)
            .execute(&mut *tx)
            .await?;
    }
    let image: ProjectImage = sqlx::query_as(
        r#"
        INSERT INTO project_images (id, project_id, image, caption, is_primary)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(project_id)
    .bind(&url)
    .bind(&caption)
    .bind(is_primary)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(Created(DataResponse::new(image)))
}

/// GET /api/projects/:project_id/milestones
pub async fn list_milestones(
    State(state): State<Arc<AppState>>,
    _auth: RequireAuth,
    Path(project_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    load_project(&state.db, project_id).await?;
    let milestones: Vec<ProjectMilestone> = sqlx::query_as(
        "SELECT * FROM project_milestones WHERE project_id = $1 ORDER BY sort_order, due_date",
    )
    .bind(project_id)
    .fetch_all(&state.db)
    .await?;
    Ok(DataResponse::new(milestones))
}

/// POST /api/projects/:project_id/milestones
pub async fn create_milestone(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(project_id): Path<Uuid>,
    Json(req): Json<MilestoneRequest>,
) -> ApiResult<impl IntoResponse> {
    load_owned_project(&state.db, project_id, auth.user_id).await?;
    if req.title.trim().is_empty() {
        return Err(ApiError::field("title", "This field may not be blank."));
    }
    check_payment_percentage(Some(req.payment_percentage))?;

    let milestone: ProjectMilestone = sqlx::query_as(
        r#"
        INSERT INTO project_milestones
            (id, project_id, title, description, due_date, payment_percentage, sort_order)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(project_id)
    .bind(req.title.trim())
    .bind(&req.description)
    .bind(req.due_date)
    .bind(req.payment_percentage)
    .bind(req.order)
    .fetch_one(&state.db)
    .await?;

    Ok(Created(DataResponse::new(milestone)))
}

async fn owned_milestone(db: &PgPool, milestone_id: Uuid, user_id: Uuid) -> ApiResult<ProjectMilestone> {
    let milestone: ProjectMilestone = sqlx::query_as("SELECT * FROM project_milestones WHERE id = $1")
        .bind(milestone_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Milestone not found"))?;
    load_owned_project(db, milestone.project_id, user_id).await?;
    Ok(milestone)
}

/// PATCH /api/projects/milestones/:milestone_id
pub async fn update_milestone(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(milestone_id): Path<Uuid>,
    Json(req): Json<UpdateMilestoneRequest>,
) -> ApiResult<impl IntoResponse> {
    owned_milestone(&state.db, milestone_id, auth.user_id).await?;
    check_payment_percentage(req.payment_percentage)?;

    // completion_date follows the status: set on completion, cleared otherwise.
    let completion = req.status.map(|s| s == MilestoneStatus::Completed);

    let milestone: ProjectMilestone = sqlx::query_as(
        r#"
        UPDATE project_milestones SET
            title = COALESCE($2, title),
            description = COALESCE($3, description),
            due_date = COALESCE($4, due_date),
            status = COALESCE($5, status),
            payment_percentage = COALESCE($6, payment_percentage),
            sort_order = COALESCE($7, sort_order),
            completion_date = CASE
                WHEN $8::bool IS NULL THEN completion_date
                WHEN $8 THEN COALESCE(completion_date, CURRENT_DATE)
                ELSE NULL END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(milestone_id)
    .bind(&req.title)
    .bind(&req.description)
    .bind(req.due_date)
    .bind(req.status.map(|s| s.to_string()))
    .bind(req.payment_percentage)
    .bind(req.order)
    .bind(completion)
    .fetch_one(&state.db)
    .await?;

    Ok(DataResponse::new(milestone))
}

/// DELETE /api/projects/milestones/:milestone_id
pub async fn delete_milestone(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(milestone_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    owned_milestone(&state.db, milestone_id, auth.user_id).await?;
    sqlx::query("DELETE FROM project_milestones WHERE id = $1")
        .bind(milestone_id)
        .execute(&state.db)
        .await?;
    Ok(NoContent)
}

// ============================================================================
// Progress updates
// ============================================================================

/// Project plus the assigned contractor's user, for callers that must be
/// the client or that contractor.
async fn project_for_participant(
    db: &PgPool,
    project_id: Uuid,
    user_id: Uuid,
) -> ApiResult<(Project, Option<Uuid>)> {
    let project = load_project(db, project_id).await?;
    let contractor_user = assigned_contractor_user(db, &project).await?;
    if !project.is_owner(user_id) && contractor_user != Some(user_id) {
        return Err(ApiError::forbidden(
            "Only the client or the assigned contractor can access this",
        ));
    }
    Ok((project, contractor_user))
}

/// GET /api/projects/:project_id/updates
pub async fn list_updates(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(project_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    project_for_participant(&state.db, project_id, auth.user_id).await?;
    let updates: Vec<ProjectUpdate> = sqlx::query_as(
        "SELECT * FROM project_updates WHERE project_id = $1 ORDER BY created_at DESC",
    )
    .bind(project_id)
    .fetch_all(&state.db)
    .await?;
    Ok(DataResponse::new(updates))
}

/// POST /api/projects/:project_id/updates
pub async fn create_update(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(project_id): Path<Uuid>,
    Json(req): Json<CreateProjectUpdateRequest>,
) -> ApiResult<impl IntoResponse> {
    let (project, contractor_user) =
        project_for_participant(&state.db, project_id, auth.user_id).await?;
    req.validate()?;

    let completes = req
        .progress_percentage
        .is_some_and(|p| progress_completes(project.status(), p));

    let mut tx = state.db.begin().await?;
    let update: ProjectUpdate = sqlx::query_as(
        r#"
        INSERT INTO project_updates
            (id, project_id, author_id, title, content, progress_percentage, is_milestone_update, milestone_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(project_id)
    .bind(auth.user_id)
    .bind(req.title.trim())
    .bind(req.content.trim())
    .bind(req.progress_percentage)
    .bind(req.is_milestone_update)
    .bind(req.milestone_id)
    .fetch_one(&mut *tx)
    .await?;

    if let Some(progress) = req.progress_percentage {
        sqlx::query(
            r#"
            UPDATE projects SET
                progress_percentage = $2,
                status = CASE WHEN $3 THEN 'completed' ELSE status END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(project_id)
        .bind(progress)
        .bind(completes)
        .execute(&mut *tx)
        .await?;
    }

    if completes {
        if let Some(contractor_id) = project.contractor_id {
            sqlx::query(
                "UPDATE contractor_profiles SET completed_projects = completed_projects + 1 WHERE id = $1",
            )
            .bind(contractor_id)
            .execute(&mut *tx)
            .await?;
        }
    }
    tx.commit().await?;

    // The counterpart hears about the update.
    let recipient = if project.is_owner(auth.user_id) {
        contractor_user
    } else {
        Some(project.client_id)
    };
    if let Some(recipient) = recipient {
        notifications::notify(
            &state,
            NewNotification::new(
                recipient,
                NotificationType::ProjectUpdate,
                format!("Project update: {}", update.title),
                format!("There is a new update on \"{}\".", project.title),
            )
            .related_to("project", project.id),
        )
        .await;
    }

    if completes {
        invalidate_stats(&state).await;
        notifications::notify(
            &state,
            NewNotification::new(
                project.client_id,
                NotificationType::ProjectCompleted,
                "Project completed",
                format!("Your project \"{}\" has been completed.", project.title),
            )
            .related_to("project", project.id),
        )
        .await;
        tracing::info!(project_id = %project_id, "Project completed through progress update");
    }

    Ok(Created(DataResponse::new(update)))
}

// ============================================================================
// Documents
// ============================================================================

/// GET /api/projects/:project_id/documents
pub async fn list_documents(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(project_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let project = load_project(&state.db, project_id).await?;
    let contractor_user = assigned_contractor_user(&state.db, &project).await?;

    let documents: Vec<ProjectDocument> = sqlx::query_as(
        "SELECT * FROM project_documents WHERE project_id = $1 ORDER BY created_at DESC",
    )
    .bind(project_id)
    .fetch_all(&state.db)
    .await?;

    let visible: Vec<ProjectDocument> = documents
        .into_iter()
        .filter(|doc| can_view_document(doc, auth.user_id, project.client_id, contractor_user))
        .collect();
    Ok(DataResponse::new(visible))
}

/// POST /api/projects/:project_id/documents (multipart `file`, `title`,
/// `document_type`, `description`, `is_private`)
pub async fn upload_document(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(project_id): Path<Uuid>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    project_for_participant(&state.db, project_id, auth.user_id).await?;

    let mut form = MultipartForm::read(multipart).await?;
    let file = form.take_file("file")?;
    if file.size() > DOCUMENT_MAX_BYTES {
        return Err(ApiError::field("file", "File size cannot exceed 20MB."));
    }
    let title = form
        .text("title")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| file.file_name.clone());
    let document_type: DocumentType = match form.text("document_type") {
        Some(raw) => raw
            .parse()
            .map_err(|_| ApiError::field("document_type", format!("\"{}\" is not a valid choice.", raw)))?,
        None => DocumentType::default(),
    };
    let description = form.text("description").unwrap_or_default().to_string();
    let is_private = form.flag("is_private");

    let url = state
        .storage
        .save("project_documents", &file.file_name, &file.bytes)
        .await?;

    let document: ProjectDocument = sqlx::query_as(
        r#"
        INSERT INTO project_documents
            (id, project_id, title, document_type, file, description, uploaded_by, is_private)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(project_id)
    .bind(&title)
    .bind(document_type.to_string())
    .bind(&url)
    .bind(&description)
    .bind(auth.user_id)
    .bind(is_private)
    .fetch_one(&state.db)
    .await?;

    Ok(Created(DataResponse::new(document)))
}

/// DELETE /api/projects/documents/:document_id
pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(document_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let document: ProjectDocument = sqlx::query_as("SELECT * FROM project_documents WHERE id = $1")
        .bind(document_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Document not found"))?;
    let project = load_project(&state.db, document.project_id).await?;
    if document.uploaded_by != auth.user_id && !project.is_owner(auth.user_id) {
        return Err(ApiError::forbidden("You cannot delete this document"));
    }

    sqlx::query("DELETE FROM project_documents WHERE id = $1")
        .bind(document_id)
        .execute(&state.db)
        .await?;
    if let Err(e) = state.storage.delete(&document.file).await {
        tracing::warn!(document_id = %document_id, error = %e, "Failed to remove document file");
    }
    Ok(NoContent)
}

// ============================================================================
// Stats and recommendations
// ============================================================================

#[derive(Debug, FromRow)]
struct ProjectStatsRow {
    total_projects: i64,
    active_projects: i64,
    completed_projects: i64,
    avg_budget: Option<Decimal>,
    total_applications: i64,
}

/// GET /api/projects/stats
pub async fn project_stats(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let key = keys::project_stats();
    if let Some(stats) = state.cache.get::<ProjectStats>(&key).await {
        return Ok(DataResponse::new(stats));
    }

    let row: ProjectStatsRow = sqlx::query_as(
        r#"
        SELECT
            COUNT(*) AS total_projects,
            COUNT(*) FILTER (WHERE status IN ('published', 'in_progress')) AS active_projects,
            COUNT(*) FILTER (WHERE status = 'completed') AS completed_projects,
            AVG((budget_min + budget_max) / 2) AS avg_budget,
            (SELECT COUNT(*) FROM project_applications) AS total_applications
        FROM projects
        WHERE is_active = TRUE
        "#,
    )
    .fetch_one(&state.db)
    .await?;

    let avg_applications = if row.total_projects > 0 {
        row.total_applications as f64 / row.total_projects as f64
    } else {
        0.0
    };

    let stats = ProjectStats {
        total_projects: row.total_projects,
        active_projects: row.active_projects,
        completed_projects: row.completed_projects,
        avg_budget: crate::domain::round2(row.avg_budget.and_then(|d| d.to_f64()).unwrap_or(0.0)),
        total_applications: row.total_applications,
        avg_applications_per_project: crate::domain::round2(avg_applications),
    };

    if let Err(e) = state.cache.set_with_ttl(&key, &stats, STATS_TTL).await {
        tracing::warn!(error = %e, "Failed to cache project stats");
    }
    Ok(DataResponse::new(stats))
}

/// GET /api/projects/recommended
pub async fn recommended_projects(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
) -> ApiResult<impl IntoResponse> {
    let contractor = require_contractor_profile(&state.db, auth.user_id).await?;
    let (budget_low, budget_high) = recommended_budget_window(contractor.average_hourly_rate());

    let projects: Vec<Project> = sqlx::query_as(&format!(
        r#"
        SELECT p.* FROM projects p
        WHERE p.is_active = TRUE
          AND p.status = 'published'
          AND p.category_id IN (
                SELECT category_id FROM contractor_categories WHERE contractor_id = $1)
          AND p.budget_max >= $2
          AND p.budget_min <= $3
          AND NOT EXISTS (
                SELECT 1 FROM project_applications a
                WHERE a.project_id = p.id AND a.contractor_id = $1)
        ORDER BY {}, p.created_at DESC
        LIMIT $4
        "#,
        PRIORITY_ORDER_SQL
    ))
    .bind(contractor.id)
    .bind(budget_low)
    .bind(budget_high)
    .bind(RECOMMENDED_LIMIT)
    .fetch_all(&state.db)
    .await?;

    Ok(DataResponse::new(projects))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn award_refuses_a_cancelled_project(pool: PgPool) {
        let client = insert_user(&pool, "client").await;
        let (_, contractor) = insert_contractor(&pool).await;
        let project = insert_project(&pool, client, "cancelled").await;
        let application = insert_application(&pool, project, contractor).await;

        let mut conn = pool.acquire().await.unwrap();
        let err = award_application(&mut conn, project, application, contractor)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        drop(conn);

        assert_eq!(status_of(&pool, "projects", project).await, "cancelled");
        assert_eq!(status_of(&pool, "project_applications", application).await, "pending");
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn award_starts_the_project_and_rejects_the_rest(pool: PgPool) {
        let client = insert_user(&pool, "client").await;
        let (_, chosen) = insert_contractor(&pool).await;
        let (other_user, other) = insert_contractor(&pool).await;
        let project = insert_project(&pool, client, "published").await;
        let winning = insert_application(&pool, project, chosen).await;
        let losing = insert_application(&pool, project, other).await;

        let mut conn = pool.acquire().await.unwrap();
        let rejected = award_application(&mut conn, project, winning, chosen).await.unwrap();
        drop(conn);

        assert_eq!(rejected, vec![other_user]);
        assert_eq!(status_of(&pool, "projects", project).await, "in_progress");
        assert_eq!(status_of(&pool, "project_applications", winning).await, "accepted");
        assert_eq!(status_of(&pool, "project_applications", losing).await, "rejected");
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn cancelling_closes_pending_applications(pool: PgPool) {
        let client = insert_user(&pool, "client").await;
        let (_, contractor) = insert_contractor(&pool).await;
        let project = insert_project(&pool, client, "published").await;
        let application = insert_application(&pool, project, contractor).await;

        let mut conn = pool.acquire().await.unwrap();
        let cancelled =
            transition_status(&mut conn, project, ProjectStatus::Published, ProjectStatus::Cancelled)
                .await
                .unwrap();
        assert_eq!(cancelled.status(), ProjectStatus::Cancelled);

        // a second request still holding the old status loses
        let stale =
            transition_status(&mut conn, project, ProjectStatus::Published, ProjectStatus::InProgress)
                .await
                .unwrap_err();
        assert!(matches!(stale, ApiError::Conflict(_)));
        drop(conn);

        assert_eq!(status_of(&pool, "project_applications", application).await, "rejected");
    }
}
