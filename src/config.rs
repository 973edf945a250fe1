//! Application configuration
//! Handles environment variable loading, configuration validation, and
//! application settings.

use std::env;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub notify: NotifyConfig,
    pub logging: LoggingConfig,
    pub admin: AdminConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64, // seconds
}

/// Redis configuration (cache + distributed lock store)
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub pool_size: u32,
}

/// Merchant notification delivery configuration
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub worker_count: usize,
    pub retry_interval: u64, // seconds between worker ticks
    pub max_retry: i32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Admin API configuration
#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub token: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            redis: RedisConfig::from_env()?,
            notify: NotifyConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            admin: AdminConfig::from_env()?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.redis.validate()?;
        self.notify.validate()?;
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, ConfigError> {
    env_or(key, default)
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env_or("SERVER_HOST", "0.0.0.0"),
            port: parse_env("SERVER_PORT", "8080")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }
        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: parse_env("DB_MAX_CONNECTIONS", "20")?,
            min_connections: parse_env("DB_MIN_CONNECTIONS", "5")?,
            connection_timeout: parse_env("DB_CONNECTION_TIMEOUT", "30")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }
        Ok(())
    }
}

impl RedisConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(RedisConfig {
            url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            pool_size: parse_env("REDIS_POOL_SIZE", "10")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.url.starts_with("redis://") && !self.url.starts_with("rediss://") {
            return Err(ConfigError::InvalidValue(
                "REDIS_URL must start with redis:// or rediss://".to_string(),
            ));
        }
        Ok(())
    }
}

impl NotifyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(NotifyConfig {
            worker_count: parse_env("NOTIFY_WORKER_COUNT", "3")?,
            retry_interval: parse_env("NOTIFY_RETRY_INTERVAL", "10")?,
            max_retry: parse_env("NOTIFY_MAX_RETRY", "5")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::InvalidValue(
                "NOTIFY_WORKER_COUNT cannot be 0".to_string(),
            ));
        }
        if self.retry_interval == 0 {
            return Err(ConfigError::InvalidValue(
                "NOTIFY_RETRY_INTERVAL cannot be 0".to_string(),
            ));
        }
        if self.max_retry <= 0 {
            return Err(ConfigError::InvalidValue(
                "NOTIFY_MAX_RETRY must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env_or("LOG_LEVEL", "info"),
            format: match env_or("LOG_FORMAT", "plain").as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }
}

impl AdminConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(AdminConfig {
            token: env_or("ADMIN_TOKEN", ""),
        })
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
        };
        assert!(config.validate().is_ok());

        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn database_pool_bounds_are_checked() {
        let config = DatabaseConfig {
            url: "postgres://localhost/unipay".to_string(),
            max_connections: 5,
            min_connections: 10,
            connection_timeout: 30,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn notify_defaults_are_sane() {
        let config = NotifyConfig {
            worker_count: 3,
            retry_interval: 10,
            max_retry: 5,
        };
        assert!(config.validate().is_ok());

        let config = NotifyConfig {
            worker_count: 0,
            retry_interval: 10,
            max_retry: 5,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn redis_url_scheme_is_enforced() {
        let config = RedisConfig {
            url: "http://127.0.0.1:6379".to_string(),
            pool_size: 10,
        };
        assert!(config.validate().is_err());
    }
}
