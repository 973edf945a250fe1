use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::database::error::DatabaseError;

/// Append-only audit record of a provider exchange. Written for every
/// create/query/notify call, success or failure; never read by the core.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaymentLog {
    pub id: i64,
    pub order_id: i64,
    pub order_no: String,
    pub action: String,
    pub provider: String,
    pub request_data: Option<serde_json::Value>,
    pub response_data: Option<serde_json::Value>,
    pub status: String,
    pub error_msg: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Column values for a new log row.
pub struct NewPaymentLog<'a> {
    pub order_id: i64,
    pub order_no: &'a str,
    pub action: &'a str,
    pub provider: &'a str,
    pub request_data: Option<serde_json::Value>,
    pub response_data: Option<serde_json::Value>,
    pub status: &'a str,
    pub error_msg: Option<&'a str>,
}

pub struct PaymentLogRepository {
    pool: PgPool,
}

impl PaymentLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, log: NewPaymentLog<'_>) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO payment_logs
                 (order_id, order_no, action, provider, request_data, response_data, status, error_msg)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(log.order_id)
        .bind(log.order_no)
        .bind(log.action)
        .bind(log.provider)
        .bind(log.request_data)
        .bind(log.response_data)
        .bind(log.status)
        .bind(log.error_msg)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::insert)?;
        Ok(())
    }

    pub async fn list_by_order(
        &self,
        order_id: i64,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<PaymentLog>, i64), DatabaseError> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM payment_logs WHERE order_id = $1")
                .bind(order_id)
                .fetch_one(&self.pool)
                .await
                .map_err(DatabaseError::query)?;

        let offset = (page.max(1) - 1) * page_size;
        let logs = sqlx::query_as::<_, PaymentLog>(
            "SELECT id, order_id, order_no, action, provider, request_data, response_data,
                    status, error_msg, created_at
             FROM payment_logs WHERE order_id = $1
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(order_id)
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::query)?;

        Ok((logs, total))
    }
}
