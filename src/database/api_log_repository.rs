use sqlx::PgPool;

use crate::database::error::DatabaseError;

/// Column values for one API-call audit row.
pub struct NewApiLog<'a> {
    pub user_id: Option<i64>,
    pub api_key: Option<&'a str>,
    pub method: &'a str,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub request_body: Option<&'a str>,
    pub response_status: i32,
    pub ip: Option<&'a str>,
    pub user_agent: Option<&'a str>,
    pub duration_ms: i32,
}

pub struct ApiLogRepository {
    pool: PgPool,
}

impl ApiLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, log: NewApiLog<'_>) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO api_logs
                 (user_id, api_key, method, path, query, request_body, response_status,
                  ip, user_agent, duration_ms)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(log.user_id)
        .bind(log.api_key)
        .bind(log.method)
        .bind(log.path)
        .bind(log.query)
        .bind(log.request_body)
        .bind(log.response_status)
        .bind(log.ip)
        .bind(log.user_agent)
        .bind(log.duration_ms)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::insert)?;
        Ok(())
    }
}
