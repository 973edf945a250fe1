use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::database::error::DatabaseError;

pub const CONFIG_STATUS_ACTIVE: i16 = 1;

/// Per-merchant provider credentials. `config_data` is opaque to the core;
/// only the matching adapter interprets its keys.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaymentConfig {
    pub id: i64,
    pub user_id: i64,
    pub provider: String,
    pub config_name: String,
    pub config_data: serde_json::Value,
    pub status: i16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct ConfigRepository {
    pool: PgPool,
}

impl ConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        user_id: i64,
        provider: &str,
        config_name: &str,
        config_data: serde_json::Value,
    ) -> Result<PaymentConfig, DatabaseError> {
        sqlx::query_as::<_, PaymentConfig>(
            "INSERT INTO payment_configs (user_id, provider, config_name, config_data, status)
             VALUES ($1, $2, $3, $4, 1)
             RETURNING id, user_id, provider, config_name, config_data, status, created_at, updated_at",
        )
        .bind(user_id)
        .bind(provider)
        .bind(config_name)
        .bind(config_data)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::insert)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<PaymentConfig>, DatabaseError> {
        sqlx::query_as::<_, PaymentConfig>(
            "SELECT id, user_id, provider, config_name, config_data, status, created_at, updated_at
             FROM payment_configs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::query)
    }

    /// The active config for a `(user, provider)` pair. If more than one is
    /// active the lowest id wins, deterministically.
    pub async fn get_active_by_user_and_provider(
        &self,
        user_id: i64,
        provider: &str,
    ) -> Result<Option<PaymentConfig>, DatabaseError> {
        sqlx::query_as::<_, PaymentConfig>(
            "SELECT id, user_id, provider, config_name, config_data, status, created_at, updated_at
             FROM payment_configs
             WHERE user_id = $1 AND provider = $2 AND status = 1
             ORDER BY id ASC
             LIMIT 1",
        )
        .bind(user_id)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::query)
    }

    pub async fn list_by_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<PaymentConfig>, DatabaseError> {
        sqlx::query_as::<_, PaymentConfig>(
            "SELECT id, user_id, provider, config_name, config_data, status, created_at, updated_at
             FROM payment_configs WHERE user_id = $1 ORDER BY id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::query)
    }

    pub async fn update(
        &self,
        id: i64,
        config_name: &str,
        config_data: serde_json::Value,
        status: i16,
    ) -> Result<Option<PaymentConfig>, DatabaseError> {
        sqlx::query_as::<_, PaymentConfig>(
            "UPDATE payment_configs
             SET config_name = $2, config_data = $3, status = $4, updated_at = NOW()
             WHERE id = $1
             RETURNING id, user_id, provider, config_name, config_data, status, created_at, updated_at",
        )
        .bind(id)
        .bind(config_name)
        .bind(config_data)
        .bind(status)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::update)
    }

    pub async fn delete(&self, id: i64) -> Result<Option<PaymentConfig>, DatabaseError> {
        sqlx::query_as::<_, PaymentConfig>(
            "DELETE FROM payment_configs WHERE id = $1
             RETURNING id, user_id, provider, config_name, config_data, status, created_at, updated_at",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::delete)
    }
}
