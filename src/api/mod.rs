pub mod admin;
pub mod health;
pub mod notify;
pub mod payment;

use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{middleware as axum_middleware, Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::cache::RedisPool;
use crate::database::api_log_repository::ApiLogRepository;
use crate::middleware::{admin_guard, api_log_middleware, auth_middleware};
use crate::payments::registry::ProviderRegistry;
use crate::services::admin::AdminService;
use crate::services::auth::AuthService;
use crate::services::payment::PaymentService;

#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub payment: Arc<PaymentService>,
    pub admin: Arc<AdminService>,
    pub registry: Arc<ProviderRegistry>,
    pub api_logs: Arc<ApiLogRepository>,
    pub db: PgPool,
    pub redis: RedisPool,
    pub admin_token: String,
}

/// Authenticated caller identity, inserted by the auth middleware.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: i64,
    pub api_key: String,
}

/// JSON success envelope shared by every endpoint.
pub fn success<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "code": 0,
        "message": "success",
        "data": data,
    }))
}

pub fn router(state: AppState) -> Router {
    let merchant_routes = Router::new()
        .route("/payment/create", post(payment::create_payment))
        .route("/payment/query/:order_no", get(payment::query_payment))
        .route("/payment/refund", post(payment::refund_payment))
        .route("/payment/close", post(payment::close_payment))
        .route("/payment/providers", get(payment::list_providers))
        .route("/orders", get(payment::list_orders))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            api_log_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let admin_routes = Router::new()
        .route("/admin/users", post(admin::create_user))
        .route("/admin/users/:id/status", put(admin::set_user_status))
        .route("/admin/users/:id/configs", get(admin::list_configs))
        .route("/admin/configs", post(admin::create_config))
        .route("/admin/configs/:id", put(admin::update_config))
        .route("/admin/configs/:id", delete(admin::delete_config))
        .route("/admin/orders", get(admin::list_orders))
        .route("/admin/orders/:id/logs", get(admin::list_order_logs))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            admin_guard,
        ));

    Router::new()
        .nest("/api/v1", merchant_routes.merge(admin_routes))
        .route(
            "/public/notify/:provider/:config_id",
            post(notify::handle_notify),
        )
        .route("/health", get(health::health))
        // Recovery barrier: a panicking handler becomes a 500 envelope,
        // never a dead connection.
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> axum::response::Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %detail, "request handler panicked");

    crate::error::AppError::new(
        crate::error::ErrorCode::INTERNAL_SERVER,
        "internal server error",
    )
    .into_response()
}
