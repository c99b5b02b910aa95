//! Review routes

use axum::{
    extract::{Multipart, Path, Query, State},
    response::IntoResponse,
    Json,
};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgPool};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::api::{Created, DataResponse, NoContent, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::{OptionalAuth, RequireAuth};
use crate::domain::contractors::{rolling_rating, ContractorProfile};
use crate::domain::moderation::ContentKind;
use crate::domain::notifications::{NewNotification, NotificationType};
use crate::domain::projects::{Project, ProjectStatus};
use crate::domain::reviews::*;
use crate::domain::round2;
use crate::error::{ApiError, ApiResult};
use crate::routes::upload::MultipartForm;
use crate::services::cache::keys;
use crate::services::{moderation, notifications};

const STATS_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, FromRow)]
struct ReviewRow {
    #[sqlx(flatten)]
    review: Review,
    client_name: String,
    helpful_count: i64,
    not_helpful_count: i64,
}

const REVIEW_SELECT_SQL: &str = r#"
    SELECT r.*,
           TRIM(u.first_name || ' ' || u.last_name) AS client_name,
           (SELECT COUNT(*) FROM review_helpful h WHERE h.review_id = r.id AND h.is_helpful) AS helpful_count,
           (SELECT COUNT(*) FROM review_helpful h WHERE h.review_id = r.id AND NOT h.is_helpful) AS not_helpful_count
    FROM reviews r
    JOIN users u ON u.id = r.client_id
"#;

async fn with_details(db: &PgPool, rows: Vec<ReviewRow>) -> Result<Vec<ReviewDetail>, sqlx::Error> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.review.id).collect();

    let images: Vec<ReviewImage> = sqlx::query_as(
        "SELECT * FROM review_images WHERE review_id = ANY($1) ORDER BY created_at",
    )
    .bind(&ids)
    .fetch_all(db)
    .await?;
    let responses: Vec<ReviewResponse> =
        sqlx::query_as("SELECT * FROM review_responses WHERE review_id = ANY($1)")
            .bind(&ids)
            .fetch_all(db)
            .await?;

    let mut images_by_review: HashMap<Uuid, Vec<ReviewImage>> = HashMap::new();
    for image in images {
        images_by_review.entry(image.review_id).or_default().push(image);
    }
    let mut responses: HashMap<Uuid, ReviewResponse> =
        responses.into_iter().map(|r| (r.review_id, r)).collect();

    Ok(rows
        .into_iter()
        .map(|row| {
            let id = row.review.id;
            ReviewDetail {
                average_category_rating: row.review.average_category_rating(),
                client_name: row.client_name,
                helpful_count: row.helpful_count,
                not_helpful_count: row.not_helpful_count,
                images: images_by_review.remove(&id).unwrap_or_default(),
                response: responses.remove(&id),
                review: row.review,
            }
        })
        .collect())
}

async fn review_detail(db: &PgPool, review_id: Uuid) -> ApiResult<ReviewDetail> {
    let row: ReviewRow = sqlx::query_as(&format!("{} WHERE r.id = $1", REVIEW_SELECT_SQL))
        .bind(review_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Review not found"))?;
    with_details(db, vec![row])
        .await?
        .pop()
        .ok_or_else(|| ApiError::not_found("Review not found"))
}

async fn load_review(db: &PgPool, review_id: Uuid) -> ApiResult<Review> {
    sqlx::query_as("SELECT * FROM reviews WHERE id = $1")
        .bind(review_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Review not found"))
}

async fn load_authored_review(db: &PgPool, review_id: Uuid, user_id: Uuid) -> ApiResult<Review> {
    let review = load_review(db, review_id).await?;
    if review.client_id != user_id {
        return Err(ApiError::forbidden("You can only modify your own reviews"));
    }
    Ok(review)
}

async fn contractor_user_id(db: &PgPool, contractor_id: Uuid) -> Result<Option<Uuid>, sqlx::Error> {
    sqlx::query_scalar("SELECT user_id FROM contractor_profiles WHERE id = $1")
        .bind(contractor_id)
        .fetch_optional(db)
        .await
}

/// Recomputes the contractor's rating from every review they have.
async fn recompute_rating(db: &PgPool, contractor_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE contractor_profiles cp SET
            rating_average = COALESCE(s.avg, 0),
            rating_count = s.count,
            updated_at = NOW()
        FROM (
            SELECT ROUND(AVG(rating)::numeric, 2) AS avg, COUNT(*)::int AS count
            FROM reviews WHERE contractor_id = $1
        ) s
        WHERE cp.id = $1
        "#,
    )
    .bind(contractor_id)
    .execute(db)
    .await?;
    Ok(())
}

async fn invalidate_stats(state: &AppState) {
    if let Err(e) = state.cache.delete_pattern(&keys::review_stats_pattern()).await {
        tracing::warn!(error = %e, "Failed to invalidate review stats");
    }
    if let Err(e) = state.cache.delete(&keys::contractor_stats()).await {
        tracing::warn!(error = %e, "Failed to invalidate contractor stats");
    }
}

async fn list_public(
    db: &PgPool,
    contractor_id: Option<Uuid>,
    pagination: &PaginationParams,
    filter: &ReviewQuery,
) -> ApiResult<Paginated<ReviewDetail>> {
    const WHERE: &str = r#"
        WHERE r.is_public = TRUE
          AND ($1::uuid IS NULL OR r.contractor_id = $1)
          AND ($2::int IS NULL OR r.rating = $2)
          AND ($3::bool IS NULL OR r.is_verified = $3)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM reviews r {}", WHERE))
        .bind(contractor_id)
        .bind(filter.rating)
        .bind(filter.is_verified)
        .fetch_one(db)
        .await?;

    let rows: Vec<ReviewRow> = sqlx::query_as(&format!(
        "{} {} ORDER BY r.created_at DESC LIMIT $4 OFFSET $5",
        REVIEW_SELECT_SQL, WHERE
    ))
    .bind(contractor_id)
    .bind(filter.rating)
    .bind(filter.is_verified)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(db)
    .await?;

    Ok(Paginated::new(with_details(db, rows).await?, pagination, total))
}

/// GET /api/reviews
pub async fn list_reviews(
    State(state): State<Arc<AppState>>,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<ReviewQuery>,
) -> ApiResult<impl IntoResponse> {
    list_public(&state.db, None, &pagination, &filter).await
}

/// GET /api/reviews/contractor/:contractor_id
pub async fn list_contractor_reviews(
    State(state): State<Arc<AppState>>,
    Path(contractor_id): Path<Uuid>,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<ReviewQuery>,
) -> ApiResult<impl IntoResponse> {
    list_public(&state.db, Some(contractor_id), &pagination, &filter).await
}

/// Fold one new rating into the contractor's running average. The profile
/// row stays locked until the surrounding transaction ends.
async fn add_rating(
    conn: &mut PgConnection,
    contractor_id: Uuid,
    rating: i32,
) -> Result<(Decimal, i32), sqlx::Error> {
    let (average, count): (Decimal, i32) = sqlx::query_as(
        "SELECT rating_average, rating_count FROM contractor_profiles WHERE id = $1 FOR UPDATE",
    )
    .bind(contractor_id)
    .fetch_one(&mut *conn)
    .await?;
    let (rating_average, rating_count) = rolling_rating(average, count, rating);

    sqlx::query(
        r#"
        UPDATE contractor_profiles
        SET rating_average = $2, rating_count = $3, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(contractor_id)
    .bind(rating_average)
    .bind(rating_count)
    .execute(&mut *conn)
    .await?;
    Ok((rating_average, rating_count))
}

/// POST /api/reviews
pub async fn create_review(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Json(req): Json<CreateReviewRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    let contractor: ContractorProfile =
        sqlx::query_as("SELECT * FROM contractor_profiles WHERE id = $1")
            .bind(req.contractor_id)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(|| ApiError::field("contractor_id", "Contractor not found."))?;
    if contractor.user_id == auth.user_id {
        return Err(ApiError::bad_request("You cannot review yourself"));
    }

    let mut is_verified = false;
    if let Some(project_id) = req.project_id {
        let project: Project = sqlx::query_as("SELECT * FROM projects WHERE id = $1")
            .bind(project_id)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(|| ApiError::field("project_id", "Project not found."))?;
        is_verified = project.status() == ProjectStatus::Completed
            && project.is_owner(auth.user_id)
            && project.contractor_id == Some(contractor.id);
    }

    let mut tx = state.db.begin().await?;
    let review: Review = sqlx::query_as(
        r#"
        INSERT INTO reviews
            (id, client_id, contractor_id, project_id, rating, quality_rating, communication_rating,
             timeliness_rating, professionalism_rating, title, comment, is_verified)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(auth.user_id)
    .bind(contractor.id)
    .bind(req.project_id)
    .bind(req.rating)
    .bind(req.quality_rating)
    .bind(req.communication_rating)
    .bind(req.timeliness_rating)
    .bind(req.professionalism_rating)
    .bind(req.title.trim())
    .bind(req.comment.trim())
    .bind(is_verified)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| ApiError::unique_violation(e, "You have already reviewed this contractor for this project"))?;

    add_rating(&mut tx, contractor.id, req.rating).await?;
    tx.commit().await?;

    invalidate_stats(&state).await;
    moderation::auto_moderate(
        &state.db,
        ContentKind::Review,
        review.id,
        &format!("{} {}", review.title, review.comment),
    )
    .await;

    notifications::notify(
        &state,
        NewNotification::new(
            contractor.user_id,
            NotificationType::ReviewReceived,
            "New review",
            format!("You received a {}-star review.", review.rating),
        )
        .related_to("review", review.id),
    )
    .await;

    tracing::info!(review_id = %review.id, contractor_id = %contractor.id, rating = review.rating, "Review created");
    Ok(Created(DataResponse::new(review_detail(&state.db, review.id).await?)))
}

/// GET /api/reviews/:review_id
pub async fn get_review(
    State(state): State<Arc<AppState>>,
    OptionalAuth(viewer): OptionalAuth,
    Path(review_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let detail = review_detail(&state.db, review_id).await?;
    if !detail.review.is_public {
        let viewer_id = viewer.map(|v| v.user_id);
        let contractor_user = contractor_user_id(&state.db, detail.review.contractor_id).await?;
        if viewer_id.is_none()
            || (viewer_id != Some(detail.review.client_id) && viewer_id != contractor_user)
        {
            return Err(ApiError::not_found("Review not found"));
        }
    }
    Ok(DataResponse::new(detail))
}

/// PATCH /api/reviews/:review_id
pub async fn update_review(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(review_id): Path<Uuid>,
    Json(req): Json<UpdateReviewRequest>,
) -> ApiResult<impl IntoResponse> {
    let current = load_authored_review(&state.db, review_id, auth.user_id).await?;
    req.validate()?;

    sqlx::query(
        r#"
        UPDATE reviews SET
            rating = COALESCE($2, rating),
            quality_rating = COALESCE($3, quality_rating),
            communication_rating = COALESCE($4, communication_rating),
            timeliness_rating = COALESCE($5, timeliness_rating),
            professionalism_rating = COALESCE($6, professionalism_rating),
            title = COALESCE($7, title),
            comment = COALESCE($8, comment),
            is_public = COALESCE($9, is_public),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(review_id)
    .bind(req.rating)
    .bind(req.quality_rating)
    .bind(req.communication_rating)
    .bind(req.timeliness_rating)
    .bind(req.professionalism_rating)
    .bind(&req.title)
    .bind(&req.comment)
    .bind(req.is_public)
    .execute(&state.db)
    .await?;

    if req.rating.is_some_and(|r| r != current.rating) {
        recompute_rating(&state.db, current.contractor_id).await?;
    }
    invalidate_stats(&state).await;

    Ok(DataResponse::new(review_detail(&state.db, review_id).await?))
}

/// DELETE /api/reviews/:review_id
pub async fn delete_review(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(review_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let review = load_authored_review(&state.db, review_id, auth.user_id).await?;

    let images: Vec<String> = sqlx::query_scalar("SELECT image FROM review_images WHERE review_id = $1")
        .bind(review_id)
        .fetch_all(&state.db)
        .await?;

    sqlx::query("DELETE FROM reviews WHERE id = $1")
        .bind(review_id)
        .execute(&state.db)
        .await?;
    recompute_rating(&state.db, review.contractor_id).await?;
    invalidate_stats(&state).await;

    for image in images {
        if let Err(e) = state.storage.delete(&image).await {
            tracing::warn!(review_id = %review_id, error = %e, "Failed to remove review image");
        }
    }

    tracing::info!(review_id = %review_id, contractor_id = %review.contractor_id, "Review deleted");
    Ok(NoContent)
}

/// POST /api/reviews/:review_id/response
pub async fn respond(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(review_id): Path<Uuid>,
    Json(req): Json<RespondRequest>,
) -> ApiResult<impl IntoResponse> {
    let review = load_review(&state.db, review_id).await?;
    if contractor_user_id(&state.db, review.contractor_id).await? != Some(auth.user_id) {
        return Err(ApiError::forbidden("Only the reviewed contractor can respond"));
    }
    if req.response_text.trim().is_empty() {
        return Err(ApiError::field("response_text", "This field may not be blank."));
    }

    let response: ReviewResponse = sqlx::query_as(
        r#"
        INSERT INTO review_responses (id, review_id, contractor_user_id, response_text)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(review_id)
    .bind(auth.user_id)
    .bind(req.response_text.trim())
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::unique_violation(e, "You have already responded to this review"))?;

    Ok(Created(DataResponse::new(response)))
}

/// POST /api/reviews/:review_id/helpful
pub async fn vote_helpful(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(review_id): Path<Uuid>,
    Json(req): Json<HelpfulVoteRequest>,
) -> ApiResult<impl IntoResponse> {
    load_review(&state.db, review_id).await?;

    sqlx::query(
        r#"
        INSERT INTO review_helpful (review_id, user_id, is_helpful)
        VALUES ($1, $2, $3)
        ON CONFLICT (review_id, user_id) DO UPDATE SET is_helpful = EXCLUDED.is_helpful
        "#,
    )
    .bind(review_id)
    .bind(auth.user_id)
    .bind(req.is_helpful)
    .execute(&state.db)
    .await?;

    Ok(DataResponse::new(review_detail(&state.db, review_id).await?))
}

/// POST /api/reviews/:review_id/images (multipart `image`, `caption`)
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(review_id): Path<Uuid>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    load_authored_review(&state.db, review_id, auth.user_id).await?;

    let mut form = MultipartForm::read(multipart).await?;
    let file = form.take_file("image")?;
    crate::domain::accounts::validate_avatar(file.content_type.as_deref(), file.size())
        .map_err(|_| ApiError::field("image", "Upload a valid image up to 5MB."))?;
    let caption = form.text("caption").unwrap_or_default().to_string();

    let url = state.storage.save("reviews", &file.file_name, &file.bytes).await?;
    let image: ReviewImage = sqlx::query_as(
        r#"
        INSERT INTO review_images (id, review_id, image, caption)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(review_id)
    .bind(&url)
    .bind(&caption)
    .fetch_one(&state.db)
    .await?;

    Ok(Created(DataResponse::new(image)))
}

// ============================================================================
// Stats
// ============================================================================

async fn compute_stats(db: &PgPool, contractor_id: Option<Uuid>) -> Result<ReviewStats, sqlx::Error> {
    let counts: Vec<(i32, i64)> = sqlx::query_as(
        r#"
        SELECT rating, COUNT(*) FROM reviews
        WHERE is_public = TRUE AND ($1::uuid IS NULL OR contractor_id = $1)
        GROUP BY rating
        "#,
    )
    .bind(contractor_id)
    .fetch_all(db)
    .await?;

    let total_reviews: i64 = counts.iter().map(|(_, c)| c).sum();
    let weighted: i64 = counts.iter().map(|(r, c)| *r as i64 * c).sum();
    let average_rating = if total_reviews > 0 {
        round2(weighted as f64 / total_reviews as f64)
    } else {
        0.0
    };

    let category_ratings = match contractor_id {
        Some(id) => Some(
            sqlx::query_as::<_, CategoryRatings>(
                r#"
                SELECT
                    AVG(quality_rating)::float8 AS quality,
                    AVG(communication_rating)::float8 AS communication,
                    AVG(timeliness_rating)::float8 AS timeliness,
                    AVG(professionalism_rating)::float8 AS professionalism
                FROM reviews
                WHERE is_public = TRUE AND contractor_id = $1
                "#,
            )
            .bind(id)
            .fetch_one(db)
            .await
            .map(|c| CategoryRatings {
                quality: c.quality.map(round2),
                communication: c.communication.map(round2),
                timeliness: c.timeliness.map(round2),
                professionalism: c.professionalism.map(round2),
            })?,
        ),
        None => None,
    };

    Ok(ReviewStats {
        total_reviews,
        average_rating,
        rating_distribution: rating_distribution(&counts),
        category_ratings,
    })
}

async fn cached_stats(state: &AppState, key: String, contractor_id: Option<Uuid>) -> ApiResult<ReviewStats> {
    if let Some(stats) = state.cache.get::<ReviewStats>(&key).await {
        return Ok(stats);
    }
    let stats = compute_stats(&state.db, contractor_id).await?;
    if let Err(e) = state.cache.set_with_ttl(&key, &stats, STATS_TTL).await {
        tracing::warn!(error = %e, "Failed to cache review stats");
    }
    Ok(stats)
}

/// GET /api/reviews/stats
pub async fn review_stats(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let stats = cached_stats(&state, keys::global_review_stats(), None).await?;
    Ok(DataResponse::new(stats))
}

/// GET /api/reviews/contractor/:contractor_id/stats
pub async fn contractor_review_stats(
    State(state): State<Arc<AppState>>,
    Path(contractor_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM contractor_profiles WHERE id = $1)")
            .bind(contractor_id)
            .fetch_one(&state.db)
            .await?;
    if !exists {
        return Err(ApiError::not_found("Contractor not found"));
    }
    let stats = cached_stats(&state, keys::review_stats(contractor_id), Some(contractor_id)).await?;
    Ok(DataResponse::new(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::insert_contractor;
    use std::str::FromStr;

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn concurrent_reviews_both_count(pool: PgPool) {
        let (_, contractor) = insert_contractor(&pool).await;

        let mut first = pool.begin().await.unwrap();
        add_rating(&mut first, contractor, 4).await.unwrap();

        // blocks on the row lock until the first transaction commits
        let second = tokio::spawn({
            let pool = pool.clone();
            async move {
                let mut tx = pool.begin().await.unwrap();
                let result = add_rating(&mut tx, contractor, 5).await.unwrap();
                tx.commit().await.unwrap();
                result
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        first.commit().await.unwrap();

        let (average, count) = second.await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(average, Decimal::from_str("4.50").unwrap());
    }
}
