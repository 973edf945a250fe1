use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::api::payment::PageQuery;
use crate::api::{success, AppState};
use crate::error::{AppError, AppResult, ErrorCode};

#[derive(Debug, Deserialize)]
pub struct CreateUserBody {
    pub username: String,
    pub email: String,
}

/// POST /api/v1/admin/users
pub async fn create_user(
    State(state): State<AppState>,
    Json(body): Json<CreateUserBody>,
) -> AppResult<Json<serde_json::Value>> {
    if body.username.trim().is_empty() || body.email.trim().is_empty() {
        return Err(AppError::new(
            ErrorCode::INVALID_PARAM,
            "username and email are required",
        ));
    }

    let (user, api_secret) = state.admin.create_user(&body.username, &body.email).await?;
    Ok(success(serde_json::json!({
        "user": user,
        // Shown exactly once; only the hash is stored.
        "api_secret": api_secret,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SetStatusBody {
    pub status: i16,
}

/// PUT /api/v1/admin/users/:id/status
pub async fn set_user_status(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(body): Json<SetStatusBody>,
) -> AppResult<Json<serde_json::Value>> {
    let user = state.admin.set_user_status(user_id, body.status).await?;
    Ok(success(user))
}

/// GET /api/v1/admin/users/:id/configs
pub async fn list_configs(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    let configs = state.admin.list_configs(user_id).await?;
    Ok(success(configs))
}

#[derive(Debug, Deserialize)]
pub struct CreateConfigBody {
    pub user_id: i64,
    pub provider: String,
    pub config_name: String,
    pub config_data: serde_json::Value,
}

/// POST /api/v1/admin/configs
pub async fn create_config(
    State(state): State<AppState>,
    Json(body): Json<CreateConfigBody>,
) -> AppResult<Json<serde_json::Value>> {
    if body.provider.trim().is_empty() {
        return Err(AppError::new(ErrorCode::INVALID_PARAM, "provider is required"));
    }
    let config = state
        .admin
        .create_config(
            body.user_id,
            &body.provider,
            &body.config_name,
            body.config_data,
        )
        .await?;
    Ok(success(config))
}

#[derive(Debug, Deserialize)]
pub struct UpdateConfigBody {
    pub config_name: String,
    pub config_data: serde_json::Value,
    pub status: i16,
}

/// PUT /api/v1/admin/configs/:id
pub async fn update_config(
    State(state): State<AppState>,
    Path(config_id): Path<i64>,
    Json(body): Json<UpdateConfigBody>,
) -> AppResult<Json<serde_json::Value>> {
    let config = state
        .admin
        .update_config(config_id, &body.config_name, body.config_data, body.status)
        .await?;
    Ok(success(config))
}

/// DELETE /api/v1/admin/configs/:id
pub async fn delete_config(
    State(state): State<AppState>,
    Path(config_id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    state.admin.delete_config(config_id).await?;
    Ok(success(serde_json::json!({"deleted": config_id})))
}

#[derive(Debug, Deserialize)]
pub struct AdminOrdersQuery {
    pub user_id: i64,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// GET /api/v1/admin/orders
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<AdminOrdersQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(20).clamp(1, 100);
    let (orders, total) = state.admin.list_orders(query.user_id, page, page_size).await?;
    Ok(success(serde_json::json!({
        "orders": orders,
        "total": total,
        "page": page,
        "page_size": page_size,
    })))
}

/// GET /api/v1/admin/orders/:id/logs
pub async fn list_order_logs(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let (logs, total) = state
        .admin
        .list_order_logs(order_id, query.page(), query.page_size())
        .await?;
    Ok(success(serde_json::json!({
        "logs": logs,
        "total": total,
        "page": query.page(),
        "page_size": query.page_size(),
    })))
}
