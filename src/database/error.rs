use thiserror::Error;

use crate::error::{AppError, ErrorCode};

/// Persistence-layer error classified by the failed operation.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database query error: {0}")]
    Query(sqlx::Error),
    #[error("database insert error: {0}")]
    Insert(sqlx::Error),
    #[error("database update error: {0}")]
    Update(sqlx::Error),
    #[error("database delete error: {0}")]
    Delete(sqlx::Error),
}

impl DatabaseError {
    pub fn query(e: sqlx::Error) -> Self {
        DatabaseError::Query(e)
    }

    pub fn insert(e: sqlx::Error) -> Self {
        DatabaseError::Insert(e)
    }

    pub fn update(e: sqlx::Error) -> Self {
        DatabaseError::Update(e)
    }

    pub fn delete(e: sqlx::Error) -> Self {
        DatabaseError::Delete(e)
    }

    /// True when the failure is a unique-constraint violation.
    pub fn is_unique_violation(&self) -> bool {
        let inner = match self {
            DatabaseError::Query(e)
            | DatabaseError::Insert(e)
            | DatabaseError::Update(e)
            | DatabaseError::Delete(e) => e,
        };
        matches!(
            inner,
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
        )
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        let code = match &err {
            DatabaseError::Query(_) => ErrorCode::DATABASE_QUERY,
            DatabaseError::Insert(_) => ErrorCode::DATABASE_INSERT,
            DatabaseError::Update(_) => ErrorCode::DATABASE_UPDATE,
            DatabaseError::Delete(_) => ErrorCode::DATABASE_DELETE,
        };
        AppError::wrap(code, "database operation failed", err)
    }
}
