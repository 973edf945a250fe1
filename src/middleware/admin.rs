//! Static-token guard for the admin surface.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::api::AppState;
use crate::error::{AppError, ErrorCode};
use crate::payments::utils::secure_eq;

pub async fn admin_guard(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    // An unset token disables the whole admin surface.
    if state.admin_token.is_empty() {
        return Err(AppError::new(
            ErrorCode::FORBIDDEN,
            "admin api is not enabled",
        ));
    }

    let presented = request
        .headers()
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !secure_eq(presented.as_bytes(), state.admin_token.as_bytes()) {
        return Err(AppError::new(ErrorCode::UNAUTHORIZED, "invalid admin token"));
    }

    Ok(next.run(request).await)
}
