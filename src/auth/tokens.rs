//! HS256 access/refresh token issuance and verification.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::{Claims, TokenType};
use crate::config::Settings;

const ISSUER: &str = "handshakeme";

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Signs and verifies the service's JWTs
#[derive(Clone)]
pub struct TokenService {
    inner: Arc<TokenKeys>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenService {
    pub fn new(secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(TokenKeys {
                encoding: EncodingKey::from_secret(secret.as_bytes()),
                decoding: DecodingKey::from_secret(secret.as_bytes()),
            }),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            &settings.jwt_secret,
            Duration::minutes(settings.jwt_access_ttl_minutes),
            Duration::days(settings.jwt_refresh_ttl_days),
        )
    }

    fn issue(
        &self,
        user_id: Uuid,
        email: &str,
        user_type: &str,
        token_type: TokenType,
    ) -> Result<String> {
        let now = Utc::now();
        let ttl = match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        };
        let claims = Claims {
            sub: user_id.to_string(),
            iss: ISSUER.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_type,
            email: Some(email.to_string()),
            user_type: Some(user_type.to_string()),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.inner.encoding)
            .context("Failed to sign JWT")
    }

    pub fn issue_pair(&self, user_id: Uuid, email: &str, user_type: &str) -> Result<TokenPair> {
        Ok(TokenPair {
            access: self.issue(user_id, email, user_type, TokenType::Access)?,
            refresh: self.issue(user_id, email, user_type, TokenType::Refresh)?,
        })
    }

    /// Issue a fresh access token from verified refresh claims.
    pub fn reissue_access(&self, refresh_claims: &Claims) -> Result<String> {
        let user_id = Uuid::parse_str(&refresh_claims.sub).context("Invalid subject")?;
        self.issue(
            user_id,
            refresh_claims.email.as_deref().unwrap_or_default(),
            refresh_claims.user_type.as_deref().unwrap_or("client"),
            TokenType::Access,
        )
    }

    /// Verify signature, expiry, issuer and token type.
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.validate_exp = true;
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.inner.decoding, &validation)
            .context("JWT validation failed")?;

        if data.claims.token_type != expected {
            anyhow::bail!("Unexpected token type");
        }

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(
            "unit-test-secret-unit-test-secret",
            Duration::minutes(5),
            Duration::days(1),
        )
    }

    #[test]
    fn issued_pair_verifies_with_matching_type() {
        let svc = service();
        let user_id = Uuid::new_v4();
        let pair = svc.issue_pair(user_id, "a@example.com", "contractor").unwrap();

        let access = svc.verify(&pair.access, TokenType::Access).unwrap();
        assert_eq!(access.sub, user_id.to_string());
        assert_eq!(access.user_type.as_deref(), Some("contractor"));

        let refresh = svc.verify(&pair.refresh, TokenType::Refresh).unwrap();
        assert_ne!(access.jti, refresh.jti);
    }

    #[test]
    fn refresh_token_belongs_to_its_subject_only() {
        let svc = service();
        let owner = Uuid::new_v4();
        let pair = svc.issue_pair(owner, "a@example.com", "client").unwrap();
        let refresh = svc.verify(&pair.refresh, TokenType::Refresh).unwrap();
        assert!(refresh.is_for(owner));
        assert!(!refresh.is_for(Uuid::new_v4()));
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let svc = service();
        let pair = svc.issue_pair(Uuid::new_v4(), "a@example.com", "client").unwrap();
        assert!(svc.verify(&pair.refresh, TokenType::Access).is_err());
        assert!(svc.verify(&pair.access, TokenType::Refresh).is_err());
    }

    #[test]
    fn tokens_from_other_secret_are_rejected() {
        let pair = service()
            .issue_pair(Uuid::new_v4(), "a@example.com", "client")
            .unwrap();
        let other = TokenService::new(
            "a-completely-different-secret-value",
            Duration::minutes(5),
            Duration::days(1),
        );
        assert!(other.verify(&pair.access, TokenType::Access).is_err());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let svc = TokenService::new(
            "unit-test-secret-unit-test-secret",
            Duration::minutes(-5),
            Duration::days(1),
        );
        let pair = svc.issue_pair(Uuid::new_v4(), "a@example.com", "client").unwrap();
        assert!(svc.verify(&pair.access, TokenType::Access).is_err());
    }

    #[test]
    fn reissued_access_keeps_identity() {
        let svc = service();
        let user_id = Uuid::new_v4();
        let pair = svc.issue_pair(user_id, "b@example.com", "client").unwrap();
        let refresh = svc.verify(&pair.refresh, TokenType::Refresh).unwrap();
        let access = svc.reissue_access(&refresh).unwrap();
        let claims = svc.verify(&access, TokenType::Access).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.email.as_deref(), Some("b@example.com"));
    }
}
