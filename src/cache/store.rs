use redis::AsyncCommands;
use std::time::Duration;
use tracing::debug;

use super::{CacheError, RedisPool};

/// Thin get/set/delete wrapper over the Redis pool. Values are opaque
/// strings; callers serialize as they see fit.
#[derive(Clone)]
pub struct CacheStore {
    pool: RedisPool,
}

impl CacheStore {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    /// Fetch a value. Returns `Ok(None)` for a missing key.
    pub async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        let value: Option<String> = conn.get(key).await?;
        debug!(key, hit = value.is_some(), "cache get");
        Ok(value)
    }

    /// Store a value with a TTL.
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        let _: () = conn.set_ex(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    /// Delete a key. Deleting a missing key is not an error.
    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        let _: () = conn.del(key).await?;
        Ok(())
    }
}
