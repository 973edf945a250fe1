//! API-call audit middleware.
//!
//! Records one row per authenticated request. The write runs on a
//! detached task with its own timeout so it survives request
//! cancellation, and failures never affect the response.

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::api::{AppState, CurrentUser};
use crate::database::api_log_repository::NewApiLog;

const BODY_CAPTURE_LIMIT: usize = 1024 * 1024;
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn api_log_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();

    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(|q| q.to_string());
    let user = request.extensions().get::<CurrentUser>().cloned();
    let user_agent = request
        .headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let ip = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string());

    // Buffer the body so it can be both logged and handed on.
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, BODY_CAPTURE_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => Bytes::new(),
    };
    let request_body = if bytes.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(&bytes).into_owned())
    };
    let request = Request::from_parts(parts, Body::from(bytes));

    let response = next.run(request).await;
    let status = response.status().as_u16() as i32;
    let duration_ms = started.elapsed().as_millis() as i32;

    let repo = state.api_logs.clone();
    tokio::spawn(async move {
        let write = repo.create(NewApiLog {
            user_id: user.as_ref().map(|u| u.id),
            api_key: user.as_ref().map(|u| u.api_key.as_str()),
            method: &method,
            path: &path,
            query: query.as_deref(),
            request_body: request_body.as_deref(),
            response_status: status,
            ip: ip.as_deref(),
            user_agent: user_agent.as_deref(),
            duration_ms,
        });

        match tokio::time::timeout(WRITE_TIMEOUT, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(path = %path, error = %e, "failed to write api log"),
            Err(_) => warn!(path = %path, "api log write timed out"),
        }
    });

    response
}
