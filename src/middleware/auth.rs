//! API-key authentication middleware.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::api::{AppState, CurrentUser};
use crate::error::{AppError, ErrorCode};

/// Resolve `X-API-Key` (or the `api_key` query parameter) to an active
/// user and stash the identity in request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let api_key = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .or_else(|| query_param(request.uri().query(), "api_key"));

    let Some(api_key) = api_key.filter(|k| !k.is_empty()) else {
        return Err(AppError::new(ErrorCode::UNAUTHORIZED, "missing api key"));
    };

    let user = state.auth.validate_api_key(&api_key).await?;

    request.extensions_mut().insert(CurrentUser {
        id: user.id,
        api_key,
    });

    Ok(next.run(request).await)
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_param_extraction() {
        assert_eq!(
            query_param(Some("api_key=ak_123&x=1"), "api_key"),
            Some("ak_123".to_string())
        );
        assert_eq!(query_param(Some("x=1"), "api_key"), None);
        assert_eq!(query_param(None, "api_key"), None);
    }
}
