use super::Claims;
use uuid::Uuid;

use crate::domain::accounts::UserType;

/// Authenticated user context extracted from an access token
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub user_type: UserType,
}

impl AuthContext {
    pub fn from_claims(claims: &Claims) -> Result<Self, &'static str> {
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| "Invalid user ID in token")?;
        let user_type = claims
            .user_type
            .as_deref()
            .map(UserType::from_db)
            .unwrap_or(UserType::Client);

        Ok(Self {
            user_id,
            email: claims.email.clone(),
            user_type,
        })
    }

    pub fn is_contractor(&self) -> bool {
        self.user_type == UserType::Contractor
    }
}
