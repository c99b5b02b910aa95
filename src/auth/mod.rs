pub mod admin_session;
pub mod claims;
pub mod context;
pub mod middleware;
pub mod password;
pub mod tokens;

pub use admin_session::RequireAdmin;
pub use claims::{Claims, TokenType};
pub use context::AuthContext;
pub use middleware::{OptionalAuth, RequireAuth};
pub use tokens::{TokenPair, TokenService};
