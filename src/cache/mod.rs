//! Redis-backed caching and distributed locking
//!
//! The cache is a shared remote resource: every read degrades to a miss on
//! failure so a Redis outage never fails a business operation on its own.

pub mod keys;
pub mod lock;
pub mod store;

use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::RedisConfig;

/// Redis connection pool type alias
pub type RedisPool = Pool<RedisConnectionManager>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis connection error: {0}")]
    Connection(String),
    #[error("Redis command error: {0}")]
    Command(#[from] redis::RedisError),
}

/// Initialize the Redis connection pool. An unreachable Redis at startup is
/// logged but not fatal, matching the degrade-to-miss policy.
pub async fn init_redis_pool(config: &RedisConfig) -> Result<RedisPool, CacheError> {
    info!(
        pool_size = config.pool_size,
        "initializing redis connection pool"
    );

    let manager = RedisConnectionManager::new(config.url.clone()).map_err(|e| {
        error!("failed to create redis connection manager: {}", e);
        CacheError::Connection(e.to_string())
    })?;

    let pool = Pool::builder()
        .max_size(config.pool_size)
        .build(manager)
        .await
        .map_err(|e| {
            error!("failed to build redis connection pool: {}", e);
            CacheError::Connection(e.to_string())
        })?;

    if let Err(e) = ping(&pool).await {
        warn!("initial redis ping failed, continuing degraded: {}", e);
    } else {
        info!("redis connection pool initialized");
    }

    Ok(pool)
}

/// Connectivity probe used by the health endpoint.
pub async fn ping(pool: &RedisPool) -> Result<(), CacheError> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| CacheError::Connection(e.to_string()))?;

    let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
    Ok(())
}
