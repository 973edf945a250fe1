use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::database::error::DatabaseError;

pub const USER_STATUS_ACTIVE: i16 = 1;

/// Merchant account. `api_secret` holds the bcrypt hash, never the
/// plaintext, and is excluded from serialized views.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub api_key: String,
    #[serde(skip_serializing)]
    pub api_secret: String,
    pub status: i16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == USER_STATUS_ACTIVE
    }
}

pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        username: &str,
        email: &str,
        api_key: &str,
        api_secret_hash: &str,
    ) -> Result<User, DatabaseError> {
        sqlx::query_as::<_, User>(
            "INSERT INTO users (username, email, api_key, api_secret, status)
             VALUES ($1, $2, $3, $4, 1)
             RETURNING id, username, email, api_key, api_secret, status, created_at, updated_at",
        )
        .bind(username)
        .bind(email)
        .bind(api_key)
        .bind(api_secret_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::insert)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, DatabaseError> {
        sqlx::query_as::<_, User>(
            "SELECT id, username, email, api_key, api_secret, status, created_at, updated_at
             FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::query)
    }

    pub async fn get_by_api_key(&self, api_key: &str) -> Result<Option<User>, DatabaseError> {
        sqlx::query_as::<_, User>(
            "SELECT id, username, email, api_key, api_secret, status, created_at, updated_at
             FROM users WHERE api_key = $1",
        )
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::query)
    }

    pub async fn set_status(&self, id: i64, status: i16) -> Result<Option<User>, DatabaseError> {
        sqlx::query_as::<_, User>(
            "UPDATE users SET status = $2, updated_at = NOW()
             WHERE id = $1
             RETURNING id, username, email, api_key, api_secret, status, created_at, updated_at",
        )
        .bind(id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::update)
    }
}
