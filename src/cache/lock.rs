//! Token-based distributed lock over Redis
//!
//! A lock is `SET key <random-token> NX PX <ttl>`; release and refresh are
//! Lua scripts that compare the stored token first, so an expired lock that
//! was re-acquired by another holder is never deleted or extended by the
//! old one. The TTL is an upper bound on the critical section: a holder
//! whose lock expired must not assume mutual exclusion past it.

use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{CacheError, RedisPool};

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

const REFRESH_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pexpire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock store error: {0}")]
    Store(#[from] CacheError),
    #[error("failed to acquire lock after {0} retries")]
    Exhausted(usize),
    #[error("lock not held or already expired")]
    NotHeld,
}

/// Single-holder mutex on a named key.
pub struct RedisLock {
    pool: RedisPool,
    key: String,
    token: String,
    ttl: Duration,
}

impl RedisLock {
    pub fn new(pool: RedisPool, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            pool,
            key: format!("lock:{}", key.into()),
            token: Uuid::new_v4().to_string(),
            ttl,
        }
    }

    /// One atomic set-if-absent attempt. Returns whether the lock was taken.
    pub async fn acquire(&self) -> Result<bool, LockError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        let result: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(&self.token)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl.as_millis() as u64)
            .query_async(&mut *conn)
            .await
            .map_err(CacheError::from)?;

        Ok(result.is_some())
    }

    /// Acquire with bounded retries, sleeping `interval` between attempts.
    pub async fn try_acquire(&self, retries: usize, interval: Duration) -> Result<(), LockError> {
        for attempt in 0..retries {
            if self.acquire().await? {
                debug!(key = %self.key, attempt, "lock acquired");
                return Ok(());
            }
            tokio::time::sleep(interval).await;
        }
        Err(LockError::Exhausted(retries))
    }

    /// Release if still held. Releasing a lock that expired or was taken
    /// over is reported as [`LockError::NotHeld`] — callers treat it as
    /// non-fatal.
    pub async fn release(&self) -> Result<(), LockError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(&mut *conn)
            .await
            .map_err(CacheError::from)?;

        if deleted == 0 {
            return Err(LockError::NotHeld);
        }
        Ok(())
    }

    /// Extend the TTL if still held.
    pub async fn refresh(&self) -> Result<(), LockError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        let extended: i64 = redis::Script::new(REFRESH_SCRIPT)
            .key(&self.key)
            .arg(&self.token)
            .arg(self.ttl.as_millis() as u64)
            .invoke_async(&mut *conn)
            .await
            .map_err(CacheError::from)?;

        if extended == 0 {
            return Err(LockError::NotHeld);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_keys_are_namespaced_and_tokens_unique() {
        // Construction needs no live Redis; only network calls do.
        let manager =
            bb8_redis::RedisConnectionManager::new("redis://127.0.0.1:6379").expect("manager");
        let pool = bb8::Pool::builder().build_unchecked(manager);

        let a = RedisLock::new(pool.clone(), "payment:create:M-1", Duration::from_secs(30));
        let b = RedisLock::new(pool, "payment:create:M-1", Duration::from_secs(30));

        assert_eq!(a.key, "lock:payment:create:M-1");
        assert_ne!(a.token, b.token);
    }
}
