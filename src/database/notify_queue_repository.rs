use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::fmt;
use std::str::FromStr;

use crate::database::error::DatabaseError;

/// Delivery state of a merchant notification task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl NotifyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyStatus::Pending => "pending",
            NotifyStatus::Processing => "processing",
            NotifyStatus::Success => "success",
            NotifyStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for NotifyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotifyStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(NotifyStatus::Pending),
            "processing" => Ok(NotifyStatus::Processing),
            "success" => Ok(NotifyStatus::Success),
            "failed" => Ok(NotifyStatus::Failed),
            other => Err(format!("unknown notify status: {}", other)),
        }
    }
}

/// One at-least-once webhook delivery task.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotifyTask {
    pub id: i64,
    pub order_id: i64,
    pub order_no: String,
    pub notify_url: String,
    pub notify_data: serde_json::Value,
    pub retry_count: i32,
    pub max_retry: i32,
    pub status: String,
    pub last_error: Option<String>,
    pub next_retry_time: Option<DateTime<Utc>>,
    pub success_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotifyTask {
    /// Typed view of the stored status. An unreadable value is treated as
    /// `Failed` so it can never be claimed again.
    pub fn notify_status(&self) -> NotifyStatus {
        NotifyStatus::from_str(&self.status).unwrap_or(NotifyStatus::Failed)
    }
}

const TASK_COLUMNS: &str = "id, order_id, order_no, notify_url, notify_data, retry_count, \
     max_retry, status, last_error, next_retry_time, success_time, created_at, updated_at";

pub struct NotifyQueueRepository {
    pool: PgPool,
}

impl NotifyQueueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        order_id: i64,
        order_no: &str,
        notify_url: &str,
        notify_data: serde_json::Value,
        max_retry: i32,
    ) -> Result<NotifyTask, DatabaseError> {
        sqlx::query_as::<_, NotifyTask>(&format!(
            "INSERT INTO notify_queue (order_id, order_no, notify_url, notify_data, max_retry, status)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            TASK_COLUMNS
        ))
        .bind(order_id)
        .bind(order_no)
        .bind(notify_url)
        .bind(notify_data)
        .bind(max_retry)
        .bind(NotifyStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::insert)
    }

    /// Atomically claim up to `limit` due tasks. The select and the flip to
    /// `processing` run in one transaction with `FOR UPDATE SKIP LOCKED`,
    /// so concurrent workers never claim the same row: a row locked by one
    /// worker's transaction is skipped by the others.
    pub async fn claim_pending(&self, limit: i64) -> Result<Vec<NotifyTask>, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::query)?;

        let tasks = sqlx::query_as::<_, NotifyTask>(&format!(
            "SELECT {} FROM notify_queue
             WHERE status = $1
               AND retry_count < max_retry
               AND (next_retry_time IS NULL OR next_retry_time <= NOW())
             ORDER BY created_at ASC
             LIMIT $2
             FOR UPDATE SKIP LOCKED",
            TASK_COLUMNS
        ))
        .bind(NotifyStatus::Pending.as_str())
        .bind(limit)
        .fetch_all(&mut *tx)
        .await
        .map_err(DatabaseError::query)?;

        if tasks.is_empty() {
            tx.commit().await.map_err(DatabaseError::query)?;
            return Ok(tasks);
        }

        let ids: Vec<i64> = tasks.iter().map(|t| t.id).collect();
        sqlx::query(
            "UPDATE notify_queue SET status = $2, updated_at = NOW()
             WHERE id = ANY($1)",
        )
        .bind(&ids)
        .bind(NotifyStatus::Processing.as_str())
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::update)?;

        tx.commit().await.map_err(DatabaseError::update)?;
        Ok(tasks)
    }

    /// Record a successful delivery. `success_time` is written exactly once,
    /// at this transition.
    pub async fn mark_success(&self, id: i64) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE notify_queue
             SET status = $2, success_time = NOW(), updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(NotifyStatus::Success.as_str())
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::update)?;
        Ok(())
    }

    /// Record a failed attempt that still has retries left.
    pub async fn mark_retry(
        &self,
        id: i64,
        retry_count: i32,
        last_error: &str,
        next_retry_time: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE notify_queue
             SET status = $5, retry_count = $2, last_error = $3,
                 next_retry_time = $4, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(retry_count)
        .bind(last_error)
        .bind(next_retry_time)
        .bind(NotifyStatus::Pending.as_str())
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::update)?;
        Ok(())
    }

    /// Record the final failed attempt once `retry_count` reached
    /// `max_retry`.
    pub async fn mark_exhausted(
        &self,
        id: i64,
        retry_count: i32,
        last_error: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE notify_queue
             SET status = $4, retry_count = $2, last_error = $3, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(retry_count)
        .bind(last_error)
        .bind(NotifyStatus::Failed.as_str())
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::update)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            NotifyStatus::Pending,
            NotifyStatus::Processing,
            NotifyStatus::Success,
            NotifyStatus::Failed,
        ] {
            assert_eq!(NotifyStatus::from_str(status.as_str()), Ok(status));
        }
        assert!(NotifyStatus::from_str("paused").is_err());
    }
}
