pub mod api_log_repository;
pub mod config_repository;
pub mod error;
pub mod notify_queue_repository;
pub mod order_repository;
pub mod payment_log_repository;
pub mod user_repository;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{error as log_error, info};

use self::error::DatabaseError;
use crate::config::DatabaseConfig;

/// Initialize the database connection pool.
pub async fn init_pool(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "initializing database pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout))
        .connect(&config.url)
        .await
        .map_err(|e| {
            log_error!("failed to initialize database pool: {}", e);
            DatabaseError::query(e)
        })?;

    info!("database pool initialized");
    Ok(pool)
}

/// Connection pool health check.
pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(DatabaseError::query)?;
    Ok(())
}
