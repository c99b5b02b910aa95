//! Contractor domain types
//!
//! Profiles, categories and skills, portfolio and certifications, plus the
//! rating and distance maths used by search.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{ApiError, FieldErrors};

/// Earth radius in miles
pub const EARTH_RADIUS_MILES: f64 = 3959.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceLevel {
    #[default]
    Beginner,
    Intermediate,
    Experienced,
    Expert,
}

string_enum!(ExperienceLevel);

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub icon: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Skill {
    pub id: Uuid,
    pub name: String,
    pub category_id: Uuid,
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SkillQuery {
    #[serde(default)]
    pub category: Option<Uuid>,
}

/// Contractor profile entity
#[derive(Debug, Clone, FromRow)]
pub struct ContractorProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub business_name: String,
    pub license_number: String,
    pub insurance_info: String,
    pub insurance_verified: bool,
    pub experience_level: String,
    pub hourly_rate_min: Decimal,
    pub hourly_rate_max: Decimal,
    pub availability: bool,
    pub response_time_hours: i32,
    pub rating_average: Decimal,
    pub rating_count: i32,
    pub completed_projects: i32,
    pub service_radius: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContractorProfile {
    /// Mean of the hourly window.
    pub fn average_hourly_rate(&self) -> Decimal {
        (self.hourly_rate_min + self.hourly_rate_max) / Decimal::from(2)
    }
}

/// Profile joined with the owning user, as returned by list and detail
/// queries.
#[derive(Debug, Clone, FromRow)]
pub struct ContractorRow {
    #[sqlx(flatten)]
    pub profile: ContractorProfile,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub avatar: Option<String>,
    pub bio: String,
    pub location: String,
    pub is_verified: bool,
    pub is_online: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractorResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub full_name: String,
    pub email: String,
    pub avatar: Option<String>,
    pub bio: String,
    pub location: String,
    pub is_verified: bool,
    pub is_online: bool,
    pub business_name: String,
    pub license_number: String,
    pub insurance_info: String,
    pub insurance_verified: bool,
    pub experience_level: String,
    pub hourly_rate_min: Decimal,
    pub hourly_rate_max: Decimal,
    pub availability: bool,
    pub response_time_hours: i32,
    pub rating_average: Decimal,
    pub rating_count: i32,
    pub completed_projects: i32,
    pub service_radius: i32,
    pub categories: Vec<Category>,
    pub skills: Vec<Skill>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

impl ContractorResponse {
    pub fn new(row: ContractorRow, categories: Vec<Category>, skills: Vec<Skill>) -> Self {
        let p = row.profile;
        Self {
            id: p.id,
            user_id: p.user_id,
            full_name: crate::domain::accounts::full_name(&row.first_name, &row.last_name),
            email: row.email,
            avatar: row.avatar,
            bio: row.bio,
            location: row.location,
            is_verified: row.is_verified,
            is_online: row.is_online,
            business_name: p.business_name,
            license_number: p.license_number,
            insurance_info: p.insurance_info,
            insurance_verified: p.insurance_verified,
            experience_level: p.experience_level,
            hourly_rate_min: p.hourly_rate_min,
            hourly_rate_max: p.hourly_rate_max,
            availability: p.availability,
            response_time_hours: p.response_time_hours,
            rating_average: p.rating_average,
            rating_count: p.rating_count,
            completed_projects: p.completed_projects,
            service_radius: p.service_radius,
            categories,
            skills,
            distance: None,
        }
    }
}

/// Search filters for contractor listing
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ContractorSearchQuery {
    #[serde(default)]
    pub q: Option<String>,
    /// Comma-separated category ids
    #[serde(default)]
    pub categories: Option<String>,
    /// Comma-separated skill ids
    #[serde(default)]
    pub skills: Option<String>,
    #[serde(default)]
    pub min_rating: Option<Decimal>,
    #[serde(default)]
    pub min_hourly_rate: Option<Decimal>,
    #[serde(default)]
    pub max_hourly_rate: Option<Decimal>,
    #[serde(default)]
    pub availability_only: Option<bool>,
    #[serde(default)]
    pub experience_level: Option<ExperienceLevel>,
    #[serde(default)]
    pub verified_only: Option<bool>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    /// Miles
    #[serde(default)]
    pub max_distance: Option<f64>,
}

impl ContractorSearchQuery {
    pub fn category_ids(&self) -> Vec<Uuid> {
        parse_id_list(self.categories.as_deref())
    }

    pub fn skill_ids(&self) -> Vec<Uuid> {
        parse_id_list(self.skills.as_deref())
    }

    /// Origin and radius when a distance filter was requested.
    pub fn distance_filter(&self) -> Option<((f64, f64), f64)> {
        match (self.lat, self.lng, self.max_distance) {
            (Some(lat), Some(lng), Some(max)) => Some(((lat, lng), max)),
            _ => None,
        }
    }
}

/// Parses `a,b,c` into UUIDs, skipping anything malformed.
pub fn parse_id_list(raw: Option<&str>) -> Vec<Uuid> {
    raw.map(|s| {
        s.split(',')
            .filter_map(|part| Uuid::parse_str(part.trim()).ok())
            .collect()
    })
    .unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractorStats {
    pub total_contractors: i64,
    pub verified_contractors: i64,
    pub available_contractors: i64,
    pub avg_rating: f64,
    pub categories_count: i64,
    pub skills_count: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateContractorProfileRequest {
    #[serde(default)]
    pub business_name: Option<String>,
    #[serde(default)]
    pub license_number: Option<String>,
    #[serde(default)]
    pub insurance_info: Option<String>,
    #[serde(default)]
    pub experience_level: Option<ExperienceLevel>,
    #[serde(default)]
    pub hourly_rate_min: Option<Decimal>,
    #[serde(default)]
    pub hourly_rate_max: Option<Decimal>,
    #[serde(default)]
    pub availability: Option<bool>,
    #[serde(default)]
    pub response_time_hours: Option<i32>,
    #[serde(default)]
    pub service_radius: Option<i32>,
    /// Replaces the full category set when present
    #[serde(default)]
    pub category_ids: Option<Vec<Uuid>>,
    /// Replaces the full skill set when present
    #[serde(default)]
    pub skill_ids: Option<Vec<Uuid>>,
}

impl UpdateContractorProfileRequest {
    /// Validates against the profile's current hourly window.
    pub fn validate(&self, current: &ContractorProfile) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        let min = self.hourly_rate_min.unwrap_or(current.hourly_rate_min);
        let max = self.hourly_rate_max.unwrap_or(current.hourly_rate_max);

        if min < Decimal::ZERO {
            errors.add("hourly_rate_min", "Ensure this value is greater than or equal to 0.");
        }
        if max < Decimal::ZERO {
            errors.add("hourly_rate_max", "Ensure this value is greater than or equal to 0.");
        }
        if min > max {
            errors.add(
                "hourly_rate_max",
                "Maximum hourly rate must be greater than or equal to the minimum.",
            );
        }
        if matches!(self.response_time_hours, Some(h) if h < 0) {
            errors.add("response_time_hours", "Ensure this value is greater than or equal to 0.");
        }
        if matches!(self.service_radius, Some(r) if r < 0) {
            errors.add("service_radius", "Ensure this value is greater than or equal to 0.");
        }

        errors.into_result()
    }
}

// ============================================================================
// Portfolio
// ============================================================================

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PortfolioItem {
    pub id: Uuid,
    pub contractor_id: Uuid,
    pub title: String,
    pub description: String,
    pub category_id: Option<Uuid>,
    pub project_date: NaiveDate,
    pub budget: Option<Decimal>,
    pub client_name: String,
    pub is_featured: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PortfolioImage {
    pub id: Uuid,
    pub portfolio_item_id: Uuid,
    pub image: String,
    pub caption: String,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioItemResponse {
    #[serde(flatten)]
    pub item: PortfolioItem,
    pub images: Vec<PortfolioImage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePortfolioItemRequest {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub category_id: Option<Uuid>,
    pub project_date: NaiveDate,
    #[serde(default)]
    pub budget: Option<Decimal>,
    #[serde(default)]
    pub client_name: String,
    #[serde(default)]
    pub is_featured: bool,
}

impl CreatePortfolioItemRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        if self.title.trim().is_empty() {
            errors.add("title", "This field may not be blank.");
        }
        if self.description.trim().is_empty() {
            errors.add("description", "This field may not be blank.");
        }
        if matches!(self.budget, Some(b) if b < Decimal::ZERO) {
            errors.add("budget", "Ensure this value is greater than or equal to 0.");
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdatePortfolioItemRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub project_date: Option<NaiveDate>,
    #[serde(default)]
    pub budget: Option<Decimal>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub is_featured: Option<bool>,
}

// ============================================================================
// Certifications
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct Certification {
    pub id: Uuid,
    pub contractor_id: Uuid,
    pub name: String,
    pub issuing_organization: String,
    pub issue_date: NaiveDate,
    pub expiry_date: Option<NaiveDate>,
    pub certificate_number: String,
    pub certificate_file: Option<String>,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl Certification {
    pub fn is_expired_on(&self, today: NaiveDate) -> bool {
        self.expiry_date.map(|d| d < today).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CertificationResponse {
    pub id: Uuid,
    pub name: String,
    pub issuing_organization: String,
    pub issue_date: NaiveDate,
    pub expiry_date: Option<NaiveDate>,
    pub certificate_number: String,
    pub certificate_file: Option<String>,
    pub is_verified: bool,
    pub is_expired: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Certification> for CertificationResponse {
    fn from(c: Certification) -> Self {
        let is_expired = c.is_expired_on(Utc::now().date_naive());
        Self {
            id: c.id,
            name: c.name,
            issuing_organization: c.issuing_organization,
            issue_date: c.issue_date,
            expiry_date: c.expiry_date,
            certificate_number: c.certificate_number,
            certificate_file: c.certificate_file,
            is_verified: c.is_verified,
            is_expired,
            created_at: c.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CertificationRequest {
    pub name: String,
    pub issuing_organization: String,
    pub issue_date: NaiveDate,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default)]
    pub certificate_number: String,
}

impl CertificationRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        if self.name.trim().is_empty() {
            errors.add("name", "This field may not be blank.");
        }
        if self.issuing_organization.trim().is_empty() {
            errors.add("issuing_organization", "This field may not be blank.");
        }
        if matches!(self.expiry_date, Some(exp) if exp < self.issue_date) {
            errors.add("expiry_date", "Expiry date cannot be before the issue date.");
        }
        errors.into_result()
    }
}

// ============================================================================
// Rating and search maths
// ============================================================================

/// Rolling average after one more rating.
pub fn rolling_rating(average: Decimal, count: i32, new_rating: i32) -> (Decimal, i32) {
    let count = count.max(0);
    let total = average * Decimal::from(count) + Decimal::from(new_rating);
    let new_count = count + 1;
    ((total / Decimal::from(new_count)).round_dp(2), new_count)
}

/// Search ordering tier: 3 for ≥4.5, 2 for ≥4.0, 1 for ≥3.5, else 0.
pub fn priority_score(rating: Decimal) -> i32 {
    let rating = rating.to_f64().unwrap_or(0.0);
    if rating >= 4.5 {
        3
    } else if rating >= 4.0 {
        2
    } else if rating >= 3.5 {
        1
    } else {
        0
    }
}

/// Parses a `"lat,lng"` location string.
pub fn parse_location(location: &str) -> Option<(f64, f64)> {
    let (lat, lng) = location.split_once(',')?;
    Some((lat.trim().parse().ok()?, lng.trim().parse().ok()?))
}

/// Great-circle distance in miles.
pub fn haversine_miles(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lng1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lng2) = (b.0.to_radians(), b.1.to_radians());
    let d_lat = lat2 - lat1;
    let d_lng = lng2 - lng1;

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_MILES * c
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn rolling_average_matches_formula() {
        let (avg, count) = rolling_rating(Decimal::ZERO, 0, 5);
        assert_eq!(avg, dec("5"));
        assert_eq!(count, 1);

        let (avg, count) = rolling_rating(dec("4.00"), 3, 2);
        assert_eq!(avg, dec("3.50"));
        assert_eq!(count, 4);
    }

    #[test]
    fn priority_tiers() {
        assert_eq!(priority_score(dec("4.8")), 3);
        assert_eq!(priority_score(dec("4.5")), 3);
        assert_eq!(priority_score(dec("4.2")), 2);
        assert_eq!(priority_score(dec("3.5")), 1);
        assert_eq!(priority_score(dec("3.49")), 0);
    }

    #[test]
    fn location_parsing() {
        assert_eq!(parse_location("39.7392, -104.9903"), Some((39.7392, -104.9903)));
        assert_eq!(parse_location("Denver, CO"), None);
        assert_eq!(parse_location(""), None);
    }

    #[test]
    fn haversine_known_distance() {
        // Denver to Boulder is roughly 24 miles
        let denver = (39.7392, -104.9903);
        let boulder = (40.01499, -105.27055);
        let d = haversine_miles(denver, boulder);
        assert!((d - 24.0).abs() < 1.5, "distance was {}", d);
        assert!(haversine_miles(denver, denver).abs() < 1e-9);
    }

    #[test]
    fn hourly_window_must_be_ordered() {
        let now = Utc::now();
        let current = ContractorProfile {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            business_name: String::new(),
            license_number: String::new(),
            insurance_info: String::new(),
            insurance_verified: false,
            experience_level: "beginner".into(),
            hourly_rate_min: dec("40"),
            hourly_rate_max: dec("60"),
            availability: true,
            response_time_hours: 24,
            rating_average: Decimal::ZERO,
            rating_count: 0,
            completed_projects: 0,
            service_radius: 25,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(current.average_hourly_rate(), dec("50"));

        let bad = UpdateContractorProfileRequest {
            hourly_rate_min: Some(dec("80")),
            ..Default::default()
        };
        assert!(bad.validate(&current).is_err());

        let ok = UpdateContractorProfileRequest {
            hourly_rate_min: Some(dec("80")),
            hourly_rate_max: Some(dec("90")),
            ..Default::default()
        };
        assert!(ok.validate(&current).is_ok());
    }

    #[test]
    fn id_lists_skip_garbage() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let raw = format!("{}, nope,{}", a, b);
        assert_eq!(parse_id_list(Some(&raw)), vec![a, b]);
        assert!(parse_id_list(None).is_empty());
    }

    #[test]
    fn certification_expiry() {
        let cert = Certification {
            id: Uuid::new_v4(),
            contractor_id: Uuid::new_v4(),
            name: "Electrician".into(),
            issuing_organization: "State Board".into(),
            issue_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            expiry_date: NaiveDate::from_ymd_opt(2022, 1, 1),
            certificate_number: "E-1".into(),
            certificate_file: None,
            is_verified: false,
            created_at: Utc::now(),
        };
        assert!(cert.is_expired_on(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()));
        assert!(!cert.is_expired_on(NaiveDate::from_ymd_opt(2021, 6, 1).unwrap()));
    }
}
