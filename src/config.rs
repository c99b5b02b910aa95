use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "prod" | "production" => Self::Prod,
            "staging" => Self::Staging,
            _ => Self::Dev,
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, Self::Dev)
    }

    pub fn is_prod(&self) -> bool {
        matches!(self, Self::Prod)
    }
}

/// SMTP relay settings. Absent when `SMTP_HOST` is unset, in which case
/// outgoing mail is written to the log instead.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub env: Environment,
    pub server_addr: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Redis
    pub redis_url: String,
    pub redis_cache_ttl_seconds: u64,

    // CORS
    pub cors_allow_origins: Vec<String>,

    // Auth
    pub jwt_secret: String,
    pub jwt_access_ttl_minutes: i64,
    pub jwt_refresh_ttl_days: i64,
    pub admin_session_ttl_hours: u64,

    // Email
    pub smtp: Option<SmtpSettings>,
    pub default_from_email: String,
    pub site_name: String,
    pub site_url: String,

    // Push (FCM)
    pub fcm_url: String,
    pub fcm_server_key: Option<String>,

    // Media uploads
    pub media_root: String,
    pub media_url: String,

    // Background jobs
    pub job_retry_base_seconds: u64,
    pub job_max_retries: u32,
    pub scheduler_interval_seconds: u64,
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let env = Environment::from_str(&env::var("ENV").unwrap_or_else(|_| "dev".to_string()));
        let server_addr = env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());

        // Database
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_connections = parse_or("DATABASE_MAX_CONNECTIONS", 10);

        // Redis
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string());
        let redis_cache_ttl_seconds = parse_or("REDIS_CACHE_TTL_SECONDS", 3600);

        // CORS
        let cors_allow_origins = env::var("CORS_ALLOW_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        // Auth
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        if jwt_secret.len() < 32 && env.is_prod() {
            anyhow::bail!("JWT_SECRET must be at least 32 characters in production");
        }
        let jwt_access_ttl_minutes = parse_or("JWT_ACCESS_TTL_MINUTES", 60);
        let jwt_refresh_ttl_days = parse_or("JWT_REFRESH_TTL_DAYS", 7);
        let admin_session_ttl_hours = parse_or("ADMIN_SESSION_TTL_HOURS", 8);

        // Email
        let smtp = match non_empty("SMTP_HOST") {
            Some(host) => Some(SmtpSettings {
                host,
                port: parse_or("SMTP_PORT", 587),
                username: non_empty("SMTP_USERNAME"),
                password: non_empty("SMTP_PASSWORD"),
            }),
            None => None,
        };
        let default_from_email = env::var("DEFAULT_FROM_EMAIL")
            .unwrap_or_else(|_| "noreply@handshakeme.com".to_string());
        let site_name = env::var("SITE_NAME").unwrap_or_else(|_| "HandshakeMe".to_string());
        let site_url =
            env::var("SITE_URL").unwrap_or_else(|_| "https://handshakeme.com".to_string());

        // Push
        let fcm_url =
            env::var("FCM_URL").unwrap_or_else(|_| "https://fcm.googleapis.com/fcm/send".to_string());
        let fcm_server_key = non_empty("FCM_SERVER_KEY");

        // Media
        let media_root = env::var("MEDIA_ROOT").unwrap_or_else(|_| "./media".to_string());
        let media_url = env::var("MEDIA_URL").unwrap_or_else(|_| "/media".to_string());

        // Background jobs
        let job_retry_base_seconds = parse_or("JOB_RETRY_BASE_SECONDS", 60);
        let job_max_retries = parse_or("JOB_MAX_RETRIES", 3);
        let scheduler_interval_seconds = parse_or("SCHEDULER_INTERVAL_SECONDS", 60);

        Ok(Settings {
            env,
            server_addr,
            database_url,
            database_max_connections,
            redis_url,
            redis_cache_ttl_seconds,
            cors_allow_origins,
            jwt_secret,
            jwt_access_ttl_minutes,
            jwt_refresh_ttl_days,
            admin_session_ttl_hours,
            smtp,
            default_from_email,
            site_name,
            site_url,
            fcm_url,
            fcm_server_key,
            media_root,
            media_url,
            job_retry_base_seconds,
            job_max_retries,
            scheduler_interval_seconds,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Settings suitable for unit tests; nothing here touches the network.
    pub(crate) fn test_settings() -> Settings {
        Settings {
            env: Environment::Dev,
            server_addr: "127.0.0.1:0".to_string(),
            database_url: "postgres://localhost/handshakeme_test".to_string(),
            database_max_connections: 1,
            redis_url: "redis://127.0.0.1:6379/15".to_string(),
            redis_cache_ttl_seconds: 60,
            cors_allow_origins: vec!["http://localhost:3000".to_string()],
            jwt_secret: "test-secret-that-is-long-enough-for-hs256".to_string(),
            jwt_access_ttl_minutes: 60,
            jwt_refresh_ttl_days: 7,
            admin_session_ttl_hours: 8,
            smtp: None,
            default_from_email: "noreply@handshakeme.com".to_string(),
            site_name: "HandshakeMe".to_string(),
            site_url: "https://handshakeme.com".to_string(),
            fcm_url: "http://127.0.0.1:9/fcm/send".to_string(),
            fcm_server_key: None,
            media_root: "./media".to_string(),
            media_url: "/media".to_string(),
            job_retry_base_seconds: 60,
            job_max_retries: 3,
            scheduler_interval_seconds: 60,
        }
    }

    #[test]
    fn environment_parsing_is_case_insensitive() {
        assert_eq!(Environment::from_str("PRODUCTION"), Environment::Prod);
        assert_eq!(Environment::from_str("prod"), Environment::Prod);
        assert_eq!(Environment::from_str("Staging"), Environment::Staging);
        assert_eq!(Environment::from_str("anything-else"), Environment::Dev);
    }

    #[test]
    fn environment_flags() {
        assert!(Environment::Dev.is_dev());
        assert!(!Environment::Dev.is_prod());
        assert!(Environment::Prod.is_prod());
    }
}
