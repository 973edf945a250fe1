//! Application error model
//!
//! Every fallible layer maps into [`AppError`], which carries a stable
//! numeric code (grouped by subsystem) and a user-facing message. Code
//! groups: 1xxx general, 2xxx payment, 3xxx persistence, 4xxx cache.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// Stable error codes returned to API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorCode(pub u16);

impl ErrorCode {
    // General errors 1000-1999
    pub const INTERNAL_SERVER: ErrorCode = ErrorCode(1000);
    pub const INVALID_PARAM: ErrorCode = ErrorCode(1001);
    pub const UNAUTHORIZED: ErrorCode = ErrorCode(1002);
    pub const FORBIDDEN: ErrorCode = ErrorCode(1003);
    pub const NOT_FOUND: ErrorCode = ErrorCode(1004);
    pub const CONFLICT: ErrorCode = ErrorCode(1005);
    pub const TOO_MANY_REQUESTS: ErrorCode = ErrorCode(1006);

    // Payment errors 2000-2999
    pub const PAYMENT_CREATE: ErrorCode = ErrorCode(2000);
    pub const PAYMENT_QUERY: ErrorCode = ErrorCode(2001);
    pub const PAYMENT_NOTIFY: ErrorCode = ErrorCode(2002);
    pub const PAYMENT_REFUND: ErrorCode = ErrorCode(2003);
    pub const PAYMENT_CANCEL: ErrorCode = ErrorCode(2004);
    pub const PROVIDER_NOT_FOUND: ErrorCode = ErrorCode(2005);
    pub const CONFIG_NOT_FOUND: ErrorCode = ErrorCode(2006);
    pub const ORDER_NOT_FOUND: ErrorCode = ErrorCode(2007);
    pub const ORDER_STATUS: ErrorCode = ErrorCode(2008);
    pub const AMOUNT_INVALID: ErrorCode = ErrorCode(2009);

    // Database errors 3000-3999
    pub const DATABASE_QUERY: ErrorCode = ErrorCode(3000);
    pub const DATABASE_INSERT: ErrorCode = ErrorCode(3001);
    pub const DATABASE_UPDATE: ErrorCode = ErrorCode(3002);
    pub const DATABASE_DELETE: ErrorCode = ErrorCode(3003);

    // Cache errors 4000-4999
    pub const CACHE_GET: ErrorCode = ErrorCode(4000);
    pub const CACHE_SET: ErrorCode = ErrorCode(4001);
    pub const CACHE_DEL: ErrorCode = ErrorCode(4002);
    pub const CACHE_LOCK: ErrorCode = ErrorCode(4003);
}

/// Unified application error.
#[derive(Debug)]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn wrap(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Map the error code group to an HTTP status.
    pub fn status_code(&self) -> StatusCode {
        match self.code {
            ErrorCode::UNAUTHORIZED => StatusCode::UNAUTHORIZED,
            ErrorCode::FORBIDDEN => StatusCode::FORBIDDEN,
            ErrorCode::TOO_MANY_REQUESTS => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::INTERNAL_SERVER => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode(code) if (3000..5000).contains(&code) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Message safe to show to API clients. Internal and storage errors get
    /// a generic message; expected business errors pass through.
    pub fn user_message(&self) -> &str {
        match self.code {
            ErrorCode::INTERNAL_SERVER => "internal server error",
            ErrorCode(code) if (3000..5000).contains(&code) => "internal server error",
            _ => &self.message,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "[{}] {}: {}", self.code.0, self.message, source),
            None => write!(f, "[{}] {}", self.code.0, self.message),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// JSON error envelope returned by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code.0, error = %self, "request failed");
        } else {
            tracing::warn!(code = self.code.0, error = %self, "request rejected");
        }

        let body = ErrorBody {
            code: self.code.0,
            message: self.user_message().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_code_groups() {
        assert_eq!(
            AppError::new(ErrorCode::INVALID_PARAM, "bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::new(ErrorCode::UNAUTHORIZED, "no key").status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::new(ErrorCode::DATABASE_QUERY, "boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::new(ErrorCode::CACHE_LOCK, "busy").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::new(ErrorCode::ORDER_NOT_FOUND, "order not found").status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let err = AppError::new(ErrorCode::DATABASE_QUERY, "SELECT blew up on table users");
        assert_eq!(err.user_message(), "internal server error");

        let err = AppError::new(ErrorCode::ORDER_NOT_FOUND, "order not found");
        assert_eq!(err.user_message(), "order not found");
    }

    #[test]
    fn display_includes_code_and_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "broken pipe");
        let err = AppError::wrap(ErrorCode::PAYMENT_CREATE, "provider call failed", io);
        let rendered = err.to_string();
        assert!(rendered.contains("[2000]"));
        assert!(rendered.contains("broken pipe"));
    }
}
