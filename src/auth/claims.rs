use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which half of a token pair a JWT is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims issued by this service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    /// Issuer
    pub iss: String,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration (Unix timestamp)
    pub exp: i64,

    /// Token id, used for refresh-token blacklisting
    pub jti: String,

    pub token_type: TokenType,

    #[serde(default)]
    pub email: Option<String>,

    /// `client` or `contractor`
    #[serde(default)]
    pub user_type: Option<String>,
}

impl Claims {
    /// Whether the token was issued to `user_id`.
    pub fn is_for(&self, user_id: Uuid) -> bool {
        self.sub.parse::<Uuid>().map_or(false, |sub| sub == user_id)
    }
}
