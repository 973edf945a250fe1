//! API-key authentication with a read-through user cache.

use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::keys::UserKey;
use crate::cache::store::CacheStore;
use crate::database::user_repository::{User, UserRepository};
use crate::error::{AppError, AppResult, ErrorCode};

const USER_CACHE_TTL: Duration = Duration::from_secs(600);

pub struct AuthService {
    users: Arc<UserRepository>,
    cache: CacheStore,
}

impl AuthService {
    pub fn new(users: Arc<UserRepository>, cache: CacheStore) -> Self {
        Self { users, cache }
    }

    /// Resolve an API key to an active user. Cache hits still enforce the
    /// status check so a disabled user cannot ride out the TTL; cache
    /// failures and undecodable entries degrade to a database read.
    pub async fn validate_api_key(&self, api_key: &str) -> AppResult<User> {
        let cache_key = UserKey::new(api_key).to_string();

        match self.cache.get(&cache_key).await {
            Ok(Some(cached)) => {
                if let Ok(user) = serde_json::from_str::<User>(&cached) {
                    if !user.is_active() {
                        return Err(AppError::new(ErrorCode::FORBIDDEN, "user is disabled"));
                    }
                    debug!(user_id = user.id, "api key cache hit");
                    return Ok(user);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "user cache read failed, falling back to database"),
        }

        let user = self
            .users
            .get_by_api_key(api_key)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::UNAUTHORIZED, "invalid api key"))?;

        if !user.is_active() {
            return Err(AppError::new(ErrorCode::FORBIDDEN, "user is disabled"));
        }

        if let Ok(encoded) = serde_json::to_string(&user) {
            if let Err(e) = self.cache.set(&cache_key, &encoded, USER_CACHE_TTL).await {
                warn!(error = %e, "failed to cache user");
            }
        }

        Ok(user)
    }

    /// Verify both halves of the credential pair. The secret comparison
    /// goes through bcrypt, never the cache.
    pub async fn validate_api_key_and_secret(
        &self,
        api_key: &str,
        api_secret: &str,
    ) -> AppResult<User> {
        let user = self
            .users
            .get_by_api_key(api_key)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::UNAUTHORIZED, "invalid api key or secret"))?;

        if !user.is_active() {
            return Err(AppError::new(ErrorCode::FORBIDDEN, "user is disabled"));
        }

        let matches = bcrypt::verify(api_secret, &user.api_secret)
            .map_err(|e| AppError::wrap(ErrorCode::INTERNAL_SERVER, "credential check failed", e))?;
        if !matches {
            return Err(AppError::new(ErrorCode::UNAUTHORIZED, "invalid api key or secret"));
        }

        Ok(user)
    }

    /// Mint a user. The plaintext secret is returned exactly once; only
    /// its bcrypt hash is stored.
    pub async fn create_user(&self, username: &str, email: &str) -> AppResult<(User, String)> {
        let api_key = generate_api_key();
        let api_secret = generate_api_secret();
        let hashed = bcrypt::hash(&api_secret, bcrypt::DEFAULT_COST)
            .map_err(|e| AppError::wrap(ErrorCode::INTERNAL_SERVER, "failed to hash secret", e))?;

        let user = self
            .users
            .create(username, email, &api_key, &hashed)
            .await
            .map_err(|e| {
                if e.is_unique_violation() {
                    AppError::new(ErrorCode::CONFLICT, "username or email already exists")
                } else {
                    e.into()
                }
            })?;

        Ok((user, api_secret))
    }

    /// Must be called right after any write that changes a user's status
    /// or credentials; the TTL alone is not relied on for security state.
    pub async fn invalidate_user_cache(&self, api_key: &str) {
        let cache_key = UserKey::new(api_key).to_string();
        if let Err(e) = self.cache.delete(&cache_key).await {
            warn!(error = %e, "failed to invalidate user cache");
        }
    }
}

fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("ak_{}", hex::encode(bytes))
}

fn generate_api_secret() -> String {
    let mut bytes = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_keys_are_prefixed_and_unique() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert!(a.starts_with("ak_"));
        assert_eq!(a.len(), 3 + 64);
        assert_ne!(a, b);
    }

    #[test]
    fn api_secrets_are_long_enough() {
        let secret = generate_api_secret();
        assert_eq!(secret.len(), 128);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
