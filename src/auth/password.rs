//! Password hashing and strength rules.

use anyhow::{Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use tokio::sync::OnceCell;

use crate::error::FieldErrors;

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Hash on the blocking pool; bcrypt is CPU bound.
pub async fn hash_password(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hash(password, DEFAULT_COST))
        .await
        .context("Password hashing task panicked")?
        .context("Failed to hash password")
}

pub async fn verify_password(password: String, password_hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || verify(password, &password_hash))
        .await
        .context("Password verification task panicked")?
        .context("Failed to verify password")
}

static DUMMY_HASH: OnceCell<String> = OnceCell::const_new();

/// Runs one bcrypt verification against a throwaway hash so a login for an
/// unknown email takes as long as one with a wrong password.
pub async fn verify_unknown_user(password: String) -> Result<()> {
    let dummy = DUMMY_HASH
        .get_or_try_init(|| hash_password("not-a-real-account".to_string()))
        .await?;
    verify_password(password, dummy.clone()).await?;
    Ok(())
}

/// Adds strength violations for `field` into `errors`.
pub fn check_password_strength(field: &str, password: &str, errors: &mut FieldErrors) {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        errors.add(
            field,
            format!(
                "This password is too short. It must contain at least {} characters.",
                MIN_PASSWORD_LENGTH
            ),
        );
    }
    if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
        errors.add(field, "This password is entirely numeric.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_and_numeric_passwords_are_rejected() {
        let mut errors = FieldErrors::new();
        check_password_strength("password", "1234", &mut errors);
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json["password"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn reasonable_password_passes() {
        let mut errors = FieldErrors::new();
        check_password_strength("password", "correct horse 42", &mut errors);
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn hash_round_trip() {
        let hashed = hash_password("s3cret-pass".to_string()).await.unwrap();
        assert!(verify_password("s3cret-pass".to_string(), hashed.clone())
            .await
            .unwrap());
        assert!(!verify_password("wrong-pass".to_string(), hashed).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_user_check_pays_for_a_real_hash() {
        verify_unknown_user("guess".to_string()).await.unwrap();
        let dummy = DUMMY_HASH.get().unwrap();
        assert!(dummy.starts_with("$2"));
        assert!(dummy.contains(&format!("${}$", DEFAULT_COST)));
        assert!(!verify_password("guess".to_string(), dummy.clone()).await.unwrap());
    }
}
