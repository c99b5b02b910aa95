//! Redis-backed cache, session and counter store.
//!
//! Holds aggregate statistics, admin sessions, admin-login attempt counters
//! and the refresh-token blacklist. Values are JSON-encoded via serde.

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Redis cache client with connection pooling.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    default_ttl: Duration,
}

impl RedisCache {
    /// Create a new Redis cache connection.
    pub async fn new(redis_url: &str, default_ttl_seconds: u64) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        tracing::info!("Redis cache connected");

        Ok(Self {
            conn,
            default_ttl: Duration::from_secs(default_ttl_seconds),
        })
    }

    /// Get a value from cache.
    #[instrument(skip(self), fields(cache_hit))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.conn.clone();

        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(data)) => {
                match serde_json::from_str(&data) {
                    Ok(value) => {
                        debug!(key = key, "Cache hit");
                        tracing::Span::current().record("cache_hit", true);
                        Some(value)
                    }
                    Err(e) => {
                        warn!(key = key, error = %e, "Failed to deserialize cached value");
                        tracing::Span::current().record("cache_hit", false);
                        None
                    }
                }
            }
            Ok(None) => {
                debug!(key = key, "Cache miss");
                tracing::Span::current().record("cache_hit", false);
                None
            }
            Err(e) => {
                error!(key = key, error = %e, "Redis get error");
                tracing::Span::current().record("cache_hit", false);
                None
            }
        }
    }

    /// Set a value in cache with default TTL.
    #[instrument(skip(self, value))]
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set_with_ttl(key, value, self.default_ttl).await
    }

    /// Set a value in cache with custom TTL.
    #[instrument(skip(self, value))]
    pub async fn set_with_ttl<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        let mut conn = self.conn.clone();

        let data = serde_json::to_string(value)
            .context("Failed to serialize value for cache")?;

        conn.set_ex::<_, _, ()>(key, data, ttl.as_secs())
            .await
            .context("Failed to set cache value")?;

        debug!(key = key, ttl_secs = ttl.as_secs(), "Cached value");
        Ok(())
    }

    /// Delete a specific key from cache.
    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();

        let deleted: i32 = conn.del(key).await.context("Failed to delete cache key")?;

        debug!(key = key, deleted = deleted > 0, "Cache delete");
        Ok(deleted > 0)
    }

    /// Delete all keys matching a pattern (e.g., "project:123:*").
    #[instrument(skip(self))]
    pub async fn delete_pattern(&self, pattern: &str) -> Result<usize> {
        let mut conn = self.conn.clone();

        // Use SCAN to find keys matching pattern (production-safe)
        let keys: Vec<String> = redis::cmd("SCAN")
            .cursor_arg(0)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(1000)
            .query_async(&mut conn)
            .await
            .map(|(_, keys): (u64, Vec<String>)| keys)
            .unwrap_or_default();

        if keys.is_empty() {
            return Ok(0);
        }

        let deleted: i32 = conn.del(&keys).await.context("Failed to delete cache keys")?;

        debug!(pattern = pattern, deleted = deleted, "Cache pattern delete");
        Ok(deleted as usize)
    }

    /// Increment a counter, starting its TTL on first use.
    #[instrument(skip(self))]
    pub async fn increment(&self, key: &str, ttl: Duration) -> Result<i64> {
        let mut conn = self.conn.clone();

        let count: i64 = conn.incr(key, 1).await.context("Failed to increment counter")?;
        if count == 1 {
            conn.expire::<_, ()>(key, ttl.as_secs() as i64)
                .await
                .context("Failed to set counter expiry")?;
        }

        debug!(key = key, count = count, "Counter incremented");
        Ok(count)
    }

    /// Whether a key is present.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        conn.exists(key).await.context("Failed to check cache key")
    }

    /// Check if Redis is healthy.
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis health check failed")?;
        Ok(())
    }
}

/// Key builders for everything stored in Redis.
pub mod keys {
    use uuid::Uuid;

    pub fn admin_session(session_id: &str) -> String {
        format!("admin_session:{}", session_id)
    }

    pub fn admin_login_attempts(ip: &str) -> String {
        format!("admin_login_attempts:{}", ip)
    }

    pub fn jwt_blacklist(jti: &str) -> String {
        format!("jwt:blacklist:{}", jti)
    }

    pub fn contractor_stats() -> String {
        "stats:contractors".to_string()
    }

    pub fn review_stats(contractor_id: Uuid) -> String {
        format!("stats:reviews:contractor:{}", contractor_id)
    }

    pub fn project_stats() -> String {
        "stats:projects".to_string()
    }

    pub fn global_review_stats() -> String {
        "stats:reviews:global".to_string()
    }

    /// Pattern covering every cached review statistic
    pub fn review_stats_pattern() -> String {
        "stats:reviews:*".to_string()
    }

    pub fn dashboard_stats() -> String {
        "stats:admin:dashboard".to_string()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn key_formats() {
            assert_eq!(admin_login_attempts("10.0.0.1"), "admin_login_attempts:10.0.0.1");
            assert_eq!(jwt_blacklist("abc"), "jwt:blacklist:abc");
            let id = Uuid::nil();
            assert_eq!(
                review_stats(id),
                "stats:reviews:contractor:00000000-0000-0000-0000-000000000000"
            );
        }
    }
}
