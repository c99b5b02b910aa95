//! Contractor routes
//!
//! Public directory (categories, skills, search, detail, stats and
//! recommendations) and the contractor's own profile, portfolio and
//! certifications.

use axum::{
    extract::{Multipart, Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::api::{Created, DataResponse, NoContent, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::contractors::*;
use crate::domain::contains_pattern;
use crate::error::{ApiError, ApiResult};
use crate::routes::upload::MultipartForm;
use crate::services::cache::keys;

const STATS_TTL: Duration = Duration::from_secs(3600);
const RECOMMENDED_LIMIT: i64 = 10;

/// Orders by rating tier, then rating, then completed projects.
const CONTRACTOR_ORDER_SQL: &str = r#"
    CASE WHEN cp.rating_average >= 4.5 THEN 3
         WHEN cp.rating_average >= 4.0 THEN 2
         WHEN cp.rating_average >= 3.5 THEN 1
         ELSE 0 END DESC,
    cp.rating_average DESC,
    cp.completed_projects DESC
"#;

const CONTRACTOR_SELECT_SQL: &str = r#"
    SELECT cp.*, u.first_name, u.last_name, u.email, u.avatar, u.bio, u.location,
           u.is_verified, u.is_online
    FROM contractor_profiles cp
    JOIN users u ON u.id = cp.user_id
"#;

#[derive(Debug, FromRow)]
struct CategoryLink {
    contractor_id: Uuid,
    #[sqlx(flatten)]
    category: Category,
}

#[derive(Debug, FromRow)]
struct SkillLink {
    contractor_id: Uuid,
    #[sqlx(flatten)]
    skill: Skill,
}

/// Loads the category and skill sets of the given rows and builds responses.
pub(crate) async fn with_taxonomy(
    db: &PgPool,
    rows: Vec<ContractorRow>,
) -> Result<Vec<ContractorResponse>, sqlx::Error> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = rows.iter().map(|r| r.profile.id).collect();

    let category_links: Vec<CategoryLink> = sqlx::query_as(
        r#"
        SELECT cc.contractor_id, c.*
        FROM contractor_categories cc
        JOIN categories c ON c.id = cc.category_id
        WHERE cc.contractor_id = ANY($1)
        ORDER BY c.name
        "#,
    )
    .bind(&ids)
    .fetch_all(db)
    .await?;

    let skill_links: Vec<SkillLink> = sqlx::query_as(
        r#"
        SELECT cs.contractor_id, s.*
        FROM contractor_skills cs
        JOIN skills s ON s.id = cs.skill_id
        WHERE cs.contractor_id = ANY($1)
        ORDER BY s.name
        "#,
    )
    .bind(&ids)
    .fetch_all(db)
    .await?;

    let mut categories: HashMap<Uuid, Vec<Category>> = HashMap::new();
    for link in category_links {
        categories.entry(link.contractor_id).or_default().push(link.category);
    }
    let mut skills: HashMap<Uuid, Vec<Skill>> = HashMap::new();
    for link in skill_links {
        skills.entry(link.contractor_id).or_default().push(link.skill);
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let id = row.profile.id;
            ContractorResponse::new(
                row,
                categories.remove(&id).unwrap_or_default(),
                skills.remove(&id).unwrap_or_default(),
            )
        })
        .collect())
}

/// The caller's contractor profile; 403 for users without one.
pub(crate) async fn require_contractor_profile(
    db: &PgPool,
    user_id: Uuid,
) -> ApiResult<ContractorProfile> {
    sqlx::query_as("SELECT * FROM contractor_profiles WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::forbidden("Contractor profile required"))
}

// ============================================================================
// Directory
// ============================================================================

/// GET /api/contractors/categories
pub async fn list_categories(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let categories: Vec<Category> =
        sqlx::query_as("SELECT * FROM categories WHERE is_active = TRUE ORDER BY name")
            .fetch_all(&state.db)
            .await?;
    Ok(DataResponse::new(categories))
}

/// GET /api/contractors/skills
pub async fn list_skills(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SkillQuery>,
) -> ApiResult<impl IntoResponse> {
    let skills: Vec<Skill> = sqlx::query_as(
        r#"
        SELECT * FROM skills
        WHERE is_active = TRUE AND ($1::uuid IS NULL OR category_id = $1)
        ORDER BY name
        "#,
    )
    .bind(query.category)
    .fetch_all(&state.db)
    .await?;
    Ok(DataResponse::new(skills))
}

/// Rows scanned when the result must also be filtered by distance
const DISTANCE_SCAN_LIMIT: i64 = 1000;

/// SQL LIMIT/OFFSET for a search. A distance search pages in memory after
/// filtering, so it reads a fixed slice from the start instead.
fn search_window(by_distance: bool, pagination: &PaginationParams) -> (i64, i64) {
    if by_distance {
        (DISTANCE_SCAN_LIMIT, 0)
    } else {
        (pagination.limit(), pagination.offset())
    }
}

/// GET /api/contractors
pub async fn search_contractors(
    State(state): State<Arc<AppState>>,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<ContractorSearchQuery>,
) -> ApiResult<impl IntoResponse> {
    let categories = Some(filter.category_ids()).filter(|ids| !ids.is_empty());
    let skills = Some(filter.skill_ids()).filter(|ids| !ids.is_empty());
    let search = filter
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(contains_pattern);

    const WHERE: &str = r#"
        WHERE u.is_active = TRUE
          AND ($1::text IS NULL OR u.first_name ILIKE $1 OR u.last_name ILIKE $1
               OR cp.business_name ILIKE $1 OR u.bio ILIKE $1)
          AND ($2::uuid[] IS NULL OR EXISTS (
                SELECT 1 FROM contractor_categories cc
                WHERE cc.contractor_id = cp.id AND cc.category_id = ANY($2)))
          AND ($3::uuid[] IS NULL OR EXISTS (
                SELECT 1 FROM contractor_skills cs
                WHERE cs.contractor_id = cp.id AND cs.skill_id = ANY($3)))
          AND ($4::numeric IS NULL OR cp.rating_average >= $4)
          AND ($5::numeric IS NULL OR cp.hourly_rate_min >= $5)
          AND ($6::numeric IS NULL OR cp.hourly_rate_max <= $6)
          AND ($7::bool IS NOT TRUE OR cp.availability = TRUE)
          AND ($8::text IS NULL OR cp.experience_level = $8)
          AND ($9::bool IS NOT TRUE OR u.is_verified = TRUE)
          AND ($10::bool IS NOT TRUE OR u.location <> '')
    "#;

    let distance_filter = filter.distance_filter();
    let (limit, offset) = search_window(distance_filter.is_some(), &pagination);
    let experience_level = filter.experience_level.map(|l| l.to_string());

    let rows: Vec<ContractorRow> = sqlx::query_as(&format!(
        "{} {} ORDER BY {} LIMIT $11 OFFSET $12",
        CONTRACTOR_SELECT_SQL, WHERE, CONTRACTOR_ORDER_SQL
    ))
    .bind(&search)
    .bind(&categories)
    .bind(&skills)
    .bind(filter.min_rating)
    .bind(filter.min_hourly_rate)
    .bind(filter.max_hourly_rate)
    .bind(filter.availability_only)
    .bind(&experience_level)
    .bind(filter.verified_only)
    .bind(distance_filter.is_some())
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.db)
    .await?;

    let Some((origin, max_distance)) = distance_filter else {
        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM contractor_profiles cp JOIN users u ON u.id = cp.user_id {}",
            WHERE
        ))
        .bind(&search)
        .bind(&categories)
        .bind(&skills)
        .bind(filter.min_rating)
        .bind(filter.min_hourly_rate)
        .bind(filter.max_hourly_rate)
        .bind(filter.availability_only)
        .bind(&experience_level)
        .bind(filter.verified_only)
        .bind(false)
        .fetch_one(&state.db)
        .await?;

        let contractors = with_taxonomy(&state.db, rows).await?;
        return Ok(Paginated::new(contractors, &pagination, total));
    };

    // Distance needs the parsed user location, so it is applied to a bounded
    // slice of the best-ranked matches after the SQL filters.
    if rows.len() as i64 == DISTANCE_SCAN_LIMIT {
        tracing::warn!(limit = DISTANCE_SCAN_LIMIT, "Distance search hit its scan limit");
    }
    let mut distances: HashMap<Uuid, f64> = HashMap::new();
    let rows: Vec<ContractorRow> = rows
        .into_iter()
        .filter(|row| {
            let Some(location) = parse_location(&row.location) else {
                return false;
            };
            let distance = haversine_miles(origin, location);
            if distance <= max_distance {
                distances.insert(row.profile.id, distance);
                true
            } else {
                false
            }
        })
        .collect();

    let total = rows.len() as i64;
    let page: Vec<ContractorRow> = rows
        .into_iter()
        .skip(pagination.offset() as usize)
        .take(pagination.limit() as usize)
        .collect();

    let mut contractors = with_taxonomy(&state.db, page).await?;
    for contractor in &mut contractors {
        contractor.distance = distances.get(&contractor.id).copied();
    }

    Ok(Paginated::new(contractors, &pagination, total))
}

#[derive(Debug, Serialize)]
pub struct ContractorDetail {
    #[serde(flatten)]
    pub contractor: ContractorResponse,
    pub portfolio: Vec<PortfolioItemResponse>,
    pub certifications: Vec<CertificationResponse>,
}

async fn portfolio_with_images(
    db: &PgPool,
    items: Vec<PortfolioItem>,
) -> Result<Vec<PortfolioItemResponse>, sqlx::Error> {
    let ids: Vec<Uuid> = items.iter().map(|i| i.id).collect();
    let images: Vec<PortfolioImage> = sqlx::query_as(
        r#"
        SELECT * FROM portfolio_images
        WHERE portfolio_item_id = ANY($1)
        ORDER BY is_primary DESC, created_at
        "#,
    )
    .bind(&ids)
    .fetch_all(db)
    .await?;

    let mut by_item: HashMap<Uuid, Vec<PortfolioImage>> = HashMap::new();
    for image in images {
        by_item.entry(image.portfolio_item_id).or_default().push(image);
    }

    Ok(items
        .into_iter()
        .map(|item| PortfolioItemResponse {
            images: by_item.remove(&item.id).unwrap_or_default(),
            item,
        })
        .collect())
}

/// GET /api/contractors/:contractor_id
pub async fn get_contractor(
    State(state): State<Arc<AppState>>,
    Path(contractor_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let row: ContractorRow = sqlx::query_as(&format!(
        "{} WHERE cp.id = $1 AND u.is_active = TRUE",
        CONTRACTOR_SELECT_SQL
    ))
    .bind(contractor_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Contractor not found"))?;

    let items: Vec<PortfolioItem> = sqlx::query_as(
        r#"
        SELECT * FROM portfolio_items
        WHERE contractor_id = $1
        ORDER BY is_featured DESC, project_date DESC
        "#,
    )
    .bind(contractor_id)
    .fetch_all(&state.db)
    .await?;

    let certifications: Vec<Certification> = sqlx::query_as(
        "SELECT * FROM certifications WHERE contractor_id = $1 ORDER BY issue_date DESC",
    )
    .bind(contractor_id)
    .fetch_all(&state.db)
    .await?;

    let contractor = with_taxonomy(&state.db, vec![row])
        .await?
        .pop()
        .ok_or_else(|| ApiError::not_found("Contractor not found"))?;

    Ok(DataResponse::new(ContractorDetail {
        contractor,
        portfolio: portfolio_with_images(&state.db, items).await?,
        certifications: certifications.into_iter().map(Into::into).collect(),
    }))
}

#[derive(Debug, FromRow)]
struct ContractorStatsRow {
    total_contractors: i64,
    verified_contractors: i64,
    available_contractors: i64,
    avg_rating: Option<f64>,
}

/// GET /api/contractors/stats
pub async fn contractor_stats(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let key = keys::contractor_stats();
    if let Some(stats) = state.cache.get::<ContractorStats>(&key).await {
        return Ok(DataResponse::new(stats));
    }

    let row: ContractorStatsRow = sqlx::query_as(
        r#"
        SELECT
            COUNT(*) AS total_contractors,
            COUNT(*) FILTER (WHERE u.is_verified) AS verified_contractors,
            COUNT(*) FILTER (WHERE cp.availability) AS available_contractors,
            AVG(cp.rating_average)::float8 AS avg_rating
        FROM contractor_profiles cp
        JOIN users u ON u.id = cp.user_id
        WHERE u.is_active = TRUE
        "#,
    )
    .fetch_one(&state.db)
    .await?;

    let categories_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM categories WHERE is_active = TRUE")
            .fetch_one(&state.db)
            .await?;
    let skills_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM skills WHERE is_active = TRUE")
        .fetch_one(&state.db)
        .await?;

    let stats = ContractorStats {
        total_contractors: row.total_contractors,
        verified_contractors: row.verified_contractors,
        available_contractors: row.available_contractors,
        avg_rating: crate::domain::round2(row.avg_rating.unwrap_or(0.0)),
        categories_count,
        skills_count,
    };

    if let Err(e) = state.cache.set_with_ttl(&key, &stats, STATS_TTL).await {
        tracing::warn!(error = %e, "Failed to cache contractor stats");
    }
    Ok(DataResponse::new(stats))
}

/// GET /api/contractors/recommended
pub async fn recommended_contractors(
    State(state): State<Arc<AppState>>,
) -> ApiResult<impl IntoResponse> {
    let rows: Vec<ContractorRow> = sqlx::query_as(&format!(
        r#"
        {}
        WHERE u.is_active = TRUE AND cp.availability = TRUE AND cp.rating_average >= 4.0
        ORDER BY cp.rating_average DESC, cp.completed_projects DESC
        LIMIT $1
        "#,
        CONTRACTOR_SELECT_SQL
    ))
    .bind(RECOMMENDED_LIMIT)
    .fetch_all(&state.db)
    .await?;

    Ok(DataResponse::new(with_taxonomy(&state.db, rows).await?))
}

// ============================================================================
// Own profile
// ============================================================================

async fn own_contractor_response(state: &AppState, user_id: Uuid) -> ApiResult<ContractorResponse> {
    let row: ContractorRow = sqlx::query_as(&format!("{} WHERE cp.user_id = $1", CONTRACTOR_SELECT_SQL))
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::forbidden("Contractor profile required"))?;
    with_taxonomy(&state.db, vec![row])
        .await?
        .pop()
        .ok_or_else(|| ApiError::forbidden("Contractor profile required"))
}

/// GET /api/contractors/profile
pub async fn get_own_profile(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
) -> ApiResult<impl IntoResponse> {
    Ok(DataResponse::new(own_contractor_response(&state, auth.user_id).await?))
}

/// PATCH /api/contractors/profile
pub async fn update_own_profile(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Json(req): Json<UpdateContractorProfileRequest>,
) -> ApiResult<impl IntoResponse> {
    let profile = require_contractor_profile(&state.db, auth.user_id).await?;
    req.validate(&profile)?;

    let mut tx = state.db.begin().await?;

    sqlx::query(
        r#"
        UPDATE contractor_profiles SET
            business_name = COALESCE($2, business_name),
            license_number = COALESCE($3, license_number),
            insurance_info = COALESCE($4, insurance_info),
            experience_level = COALESCE($5, experience_level),
            hourly_rate_min = COALESCE($6, hourly_rate_min),
            hourly_rate_max = COALESCE($7, hourly_rate_max),
            availability = COALESCE($8, availability),
            response_time_hours = COALESCE($9, response_time_hours),
            service_radius = COALESCE($10, service_radius),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(profile.id)
    .bind(&req.business_name)
    .bind(&req.license_number)
    .bind(&req.insurance_info)
    .bind(req.experience_level.map(|l| l.to_string()))
    .bind(req.hourly_rate_min)
    .bind(req.hourly_rate_max)
    .bind(req.availability)
    .bind(req.response_time_hours)
    .bind(req.service_radius)
    .execute(&mut *tx)
    .await?;

    if let Some(category_ids) = &req.category_ids {
        sqlx::query("DELETE FROM contractor_categories WHERE contractor_id = $1")
            .bind(profile.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO contractor_categories (contractor_id, category_id)
            SELECT $1, id FROM categories WHERE id = ANY($2)
            "#,
        )
        .bind(profile.id)
        .bind(category_ids)
        .execute(&mut *tx)
        .await?;
    }

    if let Some(skill_ids) = &req.skill_ids {
        sqlx::query("DELETE FROM contractor_skills WHERE contractor_id = $1")
            .bind(profile.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO contractor_skills (contractor_id, skill_id)
            SELECT $1, id FROM skills WHERE id = ANY($2)
            "#,
        )
        .bind(profile.id)
        .bind(skill_ids)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    if let Err(e) = state.cache.delete(&keys::contractor_stats()).await {
        tracing::warn!(error = %e, "Failed to invalidate contractor stats");
    }

    tracing::info!(user_id = %auth.user_id, contractor_id = %profile.id, "Contractor profile updated");
    Ok(DataResponse::new(own_contractor_response(&state, auth.user_id).await?))
}

// ============================================================================
// Portfolio
// ============================================================================

async fn own_portfolio_item(
    db: &PgPool,
    contractor_id: Uuid,
    item_id: Uuid,
) -> ApiResult<PortfolioItem> {
    sqlx::query_as("SELECT * FROM portfolio_items WHERE id = $1 AND contractor_id = $2")
        .bind(item_id)
        .bind(contractor_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Portfolio item not found"))
}

/// GET /api/contractors/portfolio
pub async fn list_portfolio(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
) -> ApiResult<impl IntoResponse> {
    let profile = require_contractor_profile(&state.db, auth.user_id).await?;
    let items: Vec<PortfolioItem> = sqlx::query_as(
        "SELECT * FROM portfolio_items WHERE contractor_id = $1 ORDER BY project_date DESC",
    )
    .bind(profile.id)
    .fetch_all(&state.db)
    .await?;
    Ok(DataResponse::new(portfolio_with_images(&state.db, items).await?))
}

/// POST /api/contractors/portfolio
pub async fn create_portfolio_item(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Json(req): Json<CreatePortfolioItemRequest>,
) -> ApiResult<impl IntoResponse> {
    let profile = require_contractor_profile(&state.db, auth.user_id).await?;
    req.validate()?;

    let item: PortfolioItem = sqlx::query_as(
        r#"
        INSERT INTO portfolio_items
            (id, contractor_id, title, description, category_id, project_date, budget, client_name, is_featured)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(profile.id)
    .bind(req.title.trim())
    .bind(req.description.trim())
    .bind(req.category_id)
    .bind(req.project_date)
    .bind(req.budget)
    .bind(&req.client_name)
    .bind(req.is_featured)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(contractor_id = %profile.id, item_id = %item.id, "Portfolio item created");
    Ok(Created(DataResponse::new(PortfolioItemResponse {
        item,
        images: Vec::new(),
    })))
}

/// GET /api/contractors/portfolio/:item_id
pub async fn get_portfolio_item(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(item_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let profile = require_contractor_profile(&state.db, auth.user_id).await?;
    let item = own_portfolio_item(&state.db, profile.id, item_id).await?;
    let mut items = portfolio_with_images(&state.db, vec![item]).await?;
    items
        .pop()
        .map(DataResponse::new)
        .ok_or_else(|| ApiError::not_found("Portfolio item not found"))
}

/// PATCH /api/contractors/portfolio/:item_id
pub async fn update_portfolio_item(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(item_id): Path<Uuid>,
    Json(req): Json<UpdatePortfolioItemRequest>,
) -> ApiResult<impl IntoResponse> {
    let profile = require_contractor_profile(&state.db, auth.user_id).await?;
    own_portfolio_item(&state.db, profile.id, item_id).await?;

    if matches!(req.budget, Some(b) if b < rust_decimal::Decimal::ZERO) {
        return Err(ApiError::field("budget", "Ensure this value is greater than or equal to 0."));
    }

    let item: PortfolioItem = sqlx::query_as(
        r#"
        UPDATE portfolio_items SET
            title = COALESCE($2, title),
            description = COALESCE($3, description),
            category_id = COALESCE($4, category_id),
            project_date = COALESCE($5, project_date),
            budget = COALESCE($6, budget),
            client_name = COALESCE($7, client_name),
            is_featured = COALESCE($8, is_featured),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(item_id)
    .bind(&req.title)
    .bind(&req.description)
    .bind(req.category_id)
    .bind(req.project_date)
    .bind(req.budget)
    .bind(&req.client_name)
    .bind(req.is_featured)
    .fetch_one(&state.db)
    .await?;

    let mut items = portfolio_with_images(&state.db, vec![item]).await?;
    items
        .pop()
        .map(DataResponse::new)
        .ok_or_else(|| ApiError::not_found("Portfolio item not found"))
}

/// DELETE /api/contractors/portfolio/:item_id
pub async fn delete_portfolio_item(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(item_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let profile = require_contractor_profile(&state.db, auth.user_id).await?;
    own_portfolio_item(&state.db, profile.id, item_id).await?;

    let images: Vec<String> =
        sqlx::query_scalar("SELECT image FROM portfolio_images WHERE portfolio_item_id = $1")
            .bind(item_id)
            .fetch_all(&state.db)
            .await?;

    sqlx::query("DELETE FROM portfolio_items WHERE id = $1")
        .bind(item_id)
        .execute(&state.db)
        .await?;

    for image in images {
        if let Err(e) = state.storage.delete(&image).await {
            tracing::warn!(item_id = %item_id, error = %e, "Failed to remove portfolio image");
        }
    }

    Ok(NoContent)
}

/// POST /api/contractors/portfolio/:item_id/images (multipart `image`,
/// `caption`, `is_primary`)
pub async fn upload_portfolio_image(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(item_id): Path<Uuid>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let profile = require_contractor_profile(&state.db, auth.user_id).await?;
    own_portfolio_item(&state.db, profile.id, item_id).await?;

    let mut form = MultipartForm::read(multipart).await?;
    let file = form.take_file("image")?;
    crate::domain::accounts::validate_avatar(file.content_type.as_deref(), file.size())
        .map_err(|_| ApiError::field("image", "Upload a valid image up to 5MB."))?;
    let caption = form.text("caption").unwrap_or_default().to_string();
    let is_primary = form.flag("is_primary");

    let url = state
        .storage
        .save("portfolio", &file.file_name, &file.bytes)
        .await?;

    let mut tx = state.db.begin().await?;
    if is_primary {
        sqlx::query(
            "UPDATE portfolio_images SET is_primary = FALSE WHERE portfolio_item_id = $1 AND is_primary",
        )
        .bind(item_id)
        .execute(&mut *tx)
        .await?;
    }
    let image: PortfolioImage = sqlx::query_as(
        r#"
        INSERT INTO portfolio_images (id, portfolio_item_id, image, caption, is_primary)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(item_id)
    .bind(&url)
    .bind(&caption)
    .bind(is_primary)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(Created(DataResponse::new(image)))
}

// ============================================================================
// Certifications
// ============================================================================

/// GET /api/contractors/certifications
pub async fn list_certifications(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
) -> ApiResult<impl IntoResponse> {
    let profile = require_contractor_profile(&state.db, auth.user_id).await?;
    let certifications: Vec<Certification> = sqlx::query_as(
        "SELECT * FROM certifications WHERE contractor_id = $1 ORDER BY issue_date DESC",
    )
    .bind(profile.id)
    .fetch_all(&state.db)
    .await?;
    let data: Vec<CertificationResponse> = certifications.into_iter().map(Into::into).collect();
    Ok(DataResponse::new(data))
}

/// POST /api/contractors/certifications
pub async fn create_certification(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Json(req): Json<CertificationRequest>,
) -> ApiResult<impl IntoResponse> {
    let profile = require_contractor_profile(&state.db, auth.user_id).await?;
    req.validate()?;

    let certification: Certification = sqlx::query_as(
        r#"
        INSERT INTO certifications
            (id, contractor_id, name, issuing_organization, issue_date, expiry_date, certificate_number)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(profile.id)
    .bind(req.name.trim())
    .bind(req.issuing_organization.trim())
    .bind(req.issue_date)
    .bind(req.expiry_date)
    .bind(&req.certificate_number)
    .fetch_one(&state.db)
    .await?;

    Ok(Created(DataResponse::new(CertificationResponse::from(certification))))
}

async fn own_certification(
    db: &PgPool,
    contractor_id: Uuid,
    certification_id: Uuid,
) -> ApiResult<Certification> {
    sqlx::query_as("SELECT * FROM certifications WHERE id = $1 AND contractor_id = $2")
        .bind(certification_id)
        .bind(contractor_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Certification not found"))
}

/// GET /api/contractors/certifications/:certification_id
pub async fn get_certification(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(certification_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let profile = require_contractor_profile(&state.db, auth.user_id).await?;
    let certification = own_certification(&state.db, profile.id, certification_id).await?;
    Ok(DataResponse::new(CertificationResponse::from(certification)))
}

/// PUT /api/contractors/certifications/:certification_id
pub async fn update_certification(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(certification_id): Path<Uuid>,
    Json(req): Json<CertificationRequest>,
) -> ApiResult<impl IntoResponse> {
    let profile = require_contractor_profile(&state.db, auth.user_id).await?;
    own_certification(&state.db, profile.id, certification_id).await?;
    req.validate()?;

    let certification: Certification = sqlx::query_as(
        r#"
        UPDATE certifications SET
            name = $2, issuing_organization = $3, issue_date = $4,
            expiry_date = $5, certificate_number = $6
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(certification_id)
    .bind(req.name.trim())
    .bind(req.issuing_organization.trim())
    .bind(req.issue_date)
    .bind(req.expiry_date)
    .bind(&req.certificate_number)
    .fetch_one(&state.db)
    .await?;

    Ok(DataResponse::new(CertificationResponse::from(certification)))
}

/// DELETE /api/contractors/certifications/:certification_id
pub async fn delete_certification(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(certification_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let profile = require_contractor_profile(&state.db, auth.user_id).await?;
    let certification = own_certification(&state.db, profile.id, certification_id).await?;

    sqlx::query("DELETE FROM certifications WHERE id = $1")
        .bind(certification_id)
        .execute(&state.db)
        .await?;

    if let Some(file) = certification.certificate_file {
        if let Err(e) = state.storage.delete(&file).await {
            tracing::warn!(certification_id = %certification_id, error = %e, "Failed to remove certificate file");
        }
    }
    Ok(NoContent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_search_pages_in_sql() {
        let pagination = PaginationParams {
            page: Some(3),
            per_page: Some(20),
        };
        assert_eq!(search_window(false, &pagination), (20, 40));
    }

    #[test]
    fn distance_search_scans_a_bounded_slice() {
        let pagination = PaginationParams {
            page: Some(50),
            per_page: Some(100),
        };
        assert_eq!(search_window(true, &pagination), (DISTANCE_SCAN_LIMIT, 0));
    }
}
