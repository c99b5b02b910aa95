//! Review domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{ApiError, FieldErrors};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Review {
    pub id: Uuid,
    pub client_id: Uuid,
    pub contractor_id: Uuid,
    pub project_id: Option<Uuid>,
    pub rating: i32,
    pub quality_rating: Option<i32>,
    pub communication_rating: Option<i32>,
    pub timeliness_rating: Option<i32>,
    pub professionalism_rating: Option<i32>,
    pub title: String,
    pub comment: String,
    pub is_verified: bool,
    pub is_featured: bool,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Review {
    /// Mean of the category ratings that were given.
    pub fn average_category_rating(&self) -> Option<f64> {
        let given: Vec<i32> = [
            self.quality_rating,
            self.communication_rating,
            self.timeliness_rating,
            self.professionalism_rating,
        ]
        .into_iter()
        .flatten()
        .collect();
        if given.is_empty() {
            None
        } else {
            Some(given.iter().sum::<i32>() as f64 / given.len() as f64)
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ReviewImage {
    pub id: Uuid,
    pub review_id: Uuid,
    pub image: String,
    pub caption: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ReviewResponse {
    pub id: Uuid,
    pub review_id: Uuid,
    pub contractor_user_id: Uuid,
    pub response_text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewDetail {
    #[serde(flatten)]
    pub review: Review,
    pub client_name: String,
    pub average_category_rating: Option<f64>,
    pub helpful_count: i64,
    pub not_helpful_count: i64,
    pub images: Vec<ReviewImage>,
    pub response: Option<ReviewResponse>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReviewQuery {
    #[serde(default)]
    pub rating: Option<i32>,
    #[serde(default)]
    pub is_verified: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateReviewRequest {
    pub contractor_id: Uuid,
    #[serde(default)]
    pub project_id: Option<Uuid>,
    pub rating: i32,
    #[serde(default)]
    pub quality_rating: Option<i32>,
    #[serde(default)]
    pub communication_rating: Option<i32>,
    #[serde(default)]
    pub timeliness_rating: Option<i32>,
    #[serde(default)]
    pub professionalism_rating: Option<i32>,
    #[serde(default)]
    pub title: String,
    pub comment: String,
}

impl CreateReviewRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        check_rating(&mut errors, "rating", Some(self.rating));
        check_rating(&mut errors, "quality_rating", self.quality_rating);
        check_rating(&mut errors, "communication_rating", self.communication_rating);
        check_rating(&mut errors, "timeliness_rating", self.timeliness_rating);
        check_rating(&mut errors, "professionalism_rating", self.professionalism_rating);
        if self.comment.trim().is_empty() {
            errors.add("comment", "This field may not be blank.");
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateReviewRequest {
    #[serde(default)]
    pub rating: Option<i32>,
    #[serde(default)]
    pub quality_rating: Option<i32>,
    #[serde(default)]
    pub communication_rating: Option<i32>,
    #[serde(default)]
    pub timeliness_rating: Option<i32>,
    #[serde(default)]
    pub professionalism_rating: Option<i32>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub is_public: Option<bool>,
}

impl UpdateReviewRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        check_rating(&mut errors, "rating", self.rating);
        check_rating(&mut errors, "quality_rating", self.quality_rating);
        check_rating(&mut errors, "communication_rating", self.communication_rating);
        check_rating(&mut errors, "timeliness_rating", self.timeliness_rating);
        check_rating(&mut errors, "professionalism_rating", self.professionalism_rating);
        errors.into_result()
    }
}

fn check_rating(errors: &mut FieldErrors, field: &str, value: Option<i32>) {
    if matches!(value, Some(r) if !(1..=5).contains(&r)) {
        errors.add(field, "Rating must be between 1 and 5.");
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RespondRequest {
    pub response_text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelpfulVoteRequest {
    pub is_helpful: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewStats {
    pub total_reviews: i64,
    pub average_rating: f64,
    pub rating_distribution: BTreeMap<String, i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_ratings: Option<CategoryRatings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CategoryRatings {
    pub quality: Option<f64>,
    pub communication: Option<f64>,
    pub timeliness: Option<f64>,
    pub professionalism: Option<f64>,
}

/// Fills the 1-5 distribution, zero for ratings nobody gave.
pub fn rating_distribution(counts: &[(i32, i64)]) -> BTreeMap<String, i64> {
    (1..=5)
        .map(|r| {
            let count = counts
                .iter()
                .find(|(rating, _)| *rating == r)
                .map(|(_, c)| *c)
                .unwrap_or(0);
            (r.to_string(), count)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review() -> Review {
        let now = Utc::now();
        Review {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            contractor_id: Uuid::new_v4(),
            project_id: None,
            rating: 4,
            quality_rating: Some(5),
            communication_rating: None,
            timeliness_rating: Some(3),
            professionalism_rating: None,
            title: String::new(),
            comment: "Solid work".into(),
            is_verified: false,
            is_featured: false,
            is_public: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn category_average_ignores_missing() {
        assert_eq!(review().average_category_rating(), Some(4.0));
        let mut r = review();
        r.quality_rating = None;
        r.timeliness_rating = None;
        assert_eq!(r.average_category_rating(), None);
    }

    #[test]
    fn ratings_are_bounded() {
        let req = CreateReviewRequest {
            contractor_id: Uuid::new_v4(),
            project_id: None,
            rating: 6,
            quality_rating: Some(0),
            communication_rating: None,
            timeliness_rating: None,
            professionalism_rating: None,
            title: String::new(),
            comment: "ok".into(),
        };
        match req.validate() {
            Err(ApiError::Validation(errors)) => {
                assert!(errors.contains("rating"));
                assert!(errors.contains("quality_rating"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn distribution_has_all_buckets() {
        let dist = rating_distribution(&[(5, 3), (2, 1)]);
        assert_eq!(dist.len(), 5);
        assert_eq!(dist["5"], 3);
        assert_eq!(dist["2"], 1);
        assert_eq!(dist["1"], 0);
    }
}
