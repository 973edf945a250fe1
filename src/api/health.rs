use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::api::AppState;
use crate::{cache, database};

/// GET /health
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let database_up = database::health_check(&state.db).await.is_ok();
    let redis_up = cache::ping(&state.redis).await.is_ok();

    // Redis degradation is tolerated at runtime; the database is not.
    let status = if database_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if database_up { "ok" } else { "degraded" },
            "database": if database_up { "up" } else { "down" },
            "redis": if redis_up { "up" } else { "down" },
        })),
    )
}
