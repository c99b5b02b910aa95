//! Account domain types
//!
//! Users, addresses and the request/response shapes of the auth and
//! profile endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::auth::TokenPair;
use crate::auth::password::check_password_strength;
use crate::error::{ApiError, FieldErrors};

pub const BIO_MAX_LENGTH: usize = 500;
pub const LOCATION_MAX_LENGTH: usize = 100;
pub const HOURLY_RATE_MAX_LENGTH: usize = 50;
pub const AVATAR_MAX_BYTES: usize = 5 * 1024 * 1024;
pub const AVATAR_CONTENT_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/gif", "image/webp"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    #[default]
    Client,
    Contractor,
}

string_enum!(UserType);

impl UserType {
    /// Unknown values are treated as clients.
    pub fn from_db(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }
}

/// User entity
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub user_type: String,
    pub avatar: Option<String>,
    pub bio: String,
    pub location: String,
    pub skills: sqlx::types::Json<Vec<String>>,
    pub hourly_rate: String,
    pub experience_years: Option<i32>,
    pub is_verified: bool,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub fcm_token: Option<String>,
    pub last_login: Option<DateTime<Utc>>,
    pub date_joined: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        full_name(&self.first_name, &self.last_name)
    }

    /// Full name, or the email when no name is set.
    pub fn display_name(&self) -> String {
        let name = self.full_name();
        if name.is_empty() {
            self.email.clone()
        } else {
            name
        }
    }

    pub fn kind(&self) -> UserType {
        UserType::from_db(&self.user_type)
    }
}

pub fn full_name(first: &str, last: &str) -> String {
    format!("{} {}", first.trim(), last.trim()).trim().to_string()
}

/// Response DTO for user
#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub user_type: String,
    pub avatar: Option<String>,
    pub bio: String,
    pub location: String,
    pub skills: Vec<String>,
    pub hourly_rate: String,
    pub experience_years: Option<i32>,
    pub is_verified: bool,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub date_joined: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        let full_name = u.full_name();
        Self {
            id: u.id,
            email: u.email,
            first_name: u.first_name,
            last_name: u.last_name,
            full_name,
            phone: u.phone,
            user_type: u.user_type,
            avatar: u.avatar,
            bio: u.bio,
            location: u.location,
            skills: u.skills.0,
            hourly_rate: u.hourly_rate,
            experience_years: u.experience_years,
            is_verified: u.is_verified,
            is_online: u.is_online,
            last_seen: u.last_seen,
            date_joined: u.date_joined,
        }
    }
}

/// Compact user reference embedded in other responses
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
    pub user_type: String,
}

// ============================================================================
// Auth requests
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub password_confirm: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub user_type: UserType,
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();

        if !is_valid_email(&self.email) {
            errors.add("email", "Enter a valid email address.");
        }
        check_password_strength("password", &self.password, &mut errors);
        if self.password != self.password_confirm {
            errors.add("password_confirm", "Passwords don't match.");
        }
        if let Some(phone) = self.phone.as_deref().filter(|p| !p.is_empty()) {
            if !is_valid_phone(phone) {
                errors.add("phone", PHONE_FORMAT_MESSAGE);
            }
        }

        errors.into_result()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub tokens: TokenPair,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessTokenResponse {
    pub access: String,
}

// ============================================================================
// Profile
// ============================================================================

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub skills: Option<Vec<String>>,
    #[serde(default)]
    pub hourly_rate: Option<String>,
    #[serde(default)]
    pub experience_years: Option<i32>,
}

impl UpdateProfileRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();

        if let Some(phone) = self.phone.as_deref().filter(|p| !p.is_empty()) {
            if !is_valid_phone(phone) {
                errors.add("phone", PHONE_FORMAT_MESSAGE);
            }
        }
        check_max_len(&mut errors, "bio", self.bio.as_deref(), BIO_MAX_LENGTH);
        check_max_len(
            &mut errors,
            "location",
            self.location.as_deref(),
            LOCATION_MAX_LENGTH,
        );
        check_max_len(
            &mut errors,
            "hourly_rate",
            self.hourly_rate.as_deref(),
            HOURLY_RATE_MAX_LENGTH,
        );
        if matches!(self.experience_years, Some(y) if y < 0) {
            errors.add("experience_years", "Ensure this value is greater than or equal to 0.");
        }

        errors.into_result()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileStats {
    pub completed_projects: i64,
    pub total_reviews: i64,
    pub average_rating: f64,
    pub member_since: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
    pub new_password_confirm: String,
}

impl ChangePasswordRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        check_password_strength("new_password", &self.new_password, &mut errors);
        if self.new_password != self.new_password_confirm {
            errors.add("new_password_confirm", "New passwords don't match.");
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FcmTokenRequest {
    #[serde(default)]
    pub fcm_token: Option<String>,
}

/// Accepts image uploads up to 5 MB in the four common web formats.
pub fn validate_avatar(content_type: Option<&str>, size: usize) -> Result<(), ApiError> {
    let allowed = content_type
        .map(|ct| AVATAR_CONTENT_TYPES.contains(&ct))
        .unwrap_or(false);
    if !allowed {
        return Err(ApiError::field(
            "avatar",
            "Unsupported file type. Use JPEG, PNG, GIF or WebP.",
        ));
    }
    if size > AVATAR_MAX_BYTES {
        return Err(ApiError::field("avatar", "File too large. Maximum size is 5MB."));
    }
    Ok(())
}

// ============================================================================
// Addresses
// ============================================================================

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Address {
    pub id: Uuid,
    #[serde(skip)]
    pub user_id: Uuid,
    pub title: String,
    pub street_address: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAddressRequest {
    pub title: String,
    pub street_address: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default)]
    pub is_default: bool,
}

fn default_country() -> String {
    "USA".to_string()
}

impl CreateAddressRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        for (field, value) in [
            ("title", &self.title),
            ("street_address", &self.street_address),
            ("city", &self.city),
            ("state", &self.state),
            ("postal_code", &self.postal_code),
        ] {
            if value.trim().is_empty() {
                errors.add(field, "This field may not be blank.");
            }
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateAddressRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub street_address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub is_default: Option<bool>,
}

// ============================================================================
// Validation helpers
// ============================================================================

pub const PHONE_FORMAT_MESSAGE: &str =
    "Phone number must be entered in the format: '+999999999'. Up to 15 digits allowed.";

/// Optional `+`, optional leading `1`, then 9 to 15 digits.
pub fn is_valid_phone(phone: &str) -> bool {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    match digits.len() {
        9..=15 => true,
        16 => digits.starts_with('1'),
        _ => false,
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

pub(crate) fn check_max_len(errors: &mut FieldErrors, field: &str, value: Option<&str>, max: usize) {
    if let Some(v) = value {
        if v.chars().count() > max {
            errors.add(
                field,
                format!("Ensure this field has no more than {} characters.", max),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_format() {
        assert!(is_valid_phone("+14155552671"));
        assert!(is_valid_phone("123456789"));
        assert!(is_valid_phone("1123456789012345"));
        assert!(!is_valid_phone("12345678"));
        assert!(!is_valid_phone("2123456789012345"));
        assert!(!is_valid_phone("+1 415 555"));
        assert!(!is_valid_phone("+"));
    }

    #[test]
    fn email_is_normalized_and_checked() {
        assert_eq!(normalize_email("  Bob@Example.COM "), "bob@example.com");
        assert!(is_valid_email("bob@example.com"));
        assert!(!is_valid_email("bob@example"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("bob smith@example.com"));
    }

    #[test]
    fn registration_collects_field_errors() {
        let req = RegisterRequest {
            email: "not-an-email".into(),
            password: "1234".into(),
            password_confirm: "12345".into(),
            first_name: "A".into(),
            last_name: "B".into(),
            phone: Some("abc".into()),
            user_type: UserType::Client,
        };
        match req.validate() {
            Err(ApiError::Validation(errors)) => {
                assert!(errors.contains("email"));
                assert!(errors.contains("password"));
                assert!(errors.contains("password_confirm"));
                assert!(errors.contains("phone"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn profile_update_length_limits() {
        let req = UpdateProfileRequest {
            bio: Some("x".repeat(BIO_MAX_LENGTH + 1)),
            location: Some("Denver".into()),
            ..Default::default()
        };
        assert!(req.validate().is_err());

        let req = UpdateProfileRequest {
            bio: Some("x".repeat(BIO_MAX_LENGTH)),
            ..Default::default()
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn avatar_type_and_size() {
        assert!(validate_avatar(Some("image/png"), 1024).is_ok());
        assert!(validate_avatar(Some("application/pdf"), 1024).is_err());
        assert!(validate_avatar(None, 1024).is_err());
        assert!(validate_avatar(Some("image/jpeg"), AVATAR_MAX_BYTES + 1).is_err());
    }

    #[test]
    fn display_name_falls_back_to_email() {
        assert_eq!(full_name(" Ann ", "Lee"), "Ann Lee");
        assert_eq!(full_name("", ""), "");
        assert_eq!(UserType::from_db("contractor"), UserType::Contractor);
        assert_eq!(UserType::from_db("weird"), UserType::Client);
        assert_eq!(UserType::Contractor.to_string(), "contractor");
    }
}
