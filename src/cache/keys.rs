//! Type-safe cache key builders

use std::fmt;

pub const NAMESPACE: &str = "unipay";

/// Key for the `api_key -> user` cache.
#[derive(Debug, Clone)]
pub struct UserKey<'a> {
    pub api_key: &'a str,
}

impl<'a> UserKey<'a> {
    pub fn new(api_key: &'a str) -> Self {
        Self { api_key }
    }
}

impl fmt::Display for UserKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:auth:user:{}", NAMESPACE, self.api_key)
    }
}

/// Key for the `(user_id, provider) -> active config` cache.
#[derive(Debug, Clone)]
pub struct ConfigKey<'a> {
    pub user_id: i64,
    pub provider: &'a str,
}

impl<'a> ConfigKey<'a> {
    pub fn new(user_id: i64, provider: &'a str) -> Self {
        Self { user_id, provider }
    }
}

impl fmt::Display for ConfigKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:payment:config:{}:{}",
            NAMESPACE, self.user_id, self.provider
        )
    }
}

/// Key for the create-payment idempotency lock.
#[derive(Debug, Clone)]
pub struct CreateLockKey<'a> {
    pub out_trade_no: &'a str,
}

impl<'a> CreateLockKey<'a> {
    pub fn new(out_trade_no: &'a str) -> Self {
        Self { out_trade_no }
    }
}

impl fmt::Display for CreateLockKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "payment:create:{}", self.out_trade_no)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_key_format() {
        let key = UserKey::new("ak_123abc");
        assert_eq!(key.to_string(), "unipay:auth:user:ak_123abc");
    }

    #[test]
    fn config_key_format() {
        let key = ConfigKey::new(7, "alipay");
        assert_eq!(key.to_string(), "unipay:payment:config:7:alipay");
    }

    #[test]
    fn create_lock_key_format() {
        let key = CreateLockKey::new("M-100");
        assert_eq!(key.to_string(), "payment:create:M-100");
    }
}
