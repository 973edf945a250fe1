use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::{Extension, Json};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::api::{success, AppState, CurrentUser};
use crate::error::{AppError, AppResult, ErrorCode};
use crate::services::payment::{CreatePaymentParams, RefundParams};

#[derive(Debug, Deserialize)]
pub struct CreatePaymentBody {
    pub provider: String,
    pub out_trade_no: String,
    pub subject: String,
    pub body: Option<String>,
    pub amount: Decimal,
    pub currency: Option<String>,
    pub notify_url: Option<String>,
    pub return_url: Option<String>,
    pub extra_params: Option<serde_json::Value>,
}

/// POST /api/v1/payment/create
pub async fn create_payment(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    headers: HeaderMap,
    Json(body): Json<CreatePaymentBody>,
) -> AppResult<Json<serde_json::Value>> {
    for (value, name) in [
        (&body.provider, "provider"),
        (&body.out_trade_no, "out_trade_no"),
        (&body.subject, "subject"),
    ] {
        if value.trim().is_empty() {
            return Err(AppError::new(
                ErrorCode::INVALID_PARAM,
                format!("{} is required", name),
            ));
        }
    }
    if body.amount <= Decimal::ZERO {
        return Err(AppError::new(
            ErrorCode::INVALID_PARAM,
            "amount must be greater than zero",
        ));
    }

    let result = state
        .payment
        .create_payment(
            user.id,
            CreatePaymentParams {
                provider: body.provider,
                out_trade_no: body.out_trade_no,
                subject: body.subject,
                body: body.body,
                amount: body.amount,
                currency: body.currency.unwrap_or_else(|| "CNY".to_string()),
                notify_url: body.notify_url,
                return_url: body.return_url,
                client_ip: client_ip(&headers),
                extra_params: body.extra_params,
            },
        )
        .await?;

    Ok(success(result))
}

/// GET /api/v1/payment/query/:order_no
pub async fn query_payment(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(order_no): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let order = state.payment.query_payment(user.id, &order_no).await?;
    Ok(success(order))
}

#[derive(Debug, Deserialize)]
pub struct RefundBody {
    pub order_no: String,
    pub refund_no: String,
    pub refund_amount: Decimal,
    pub reason: Option<String>,
}

/// POST /api/v1/payment/refund
pub async fn refund_payment(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<RefundBody>,
) -> AppResult<Json<serde_json::Value>> {
    if body.refund_amount <= Decimal::ZERO {
        return Err(AppError::new(
            ErrorCode::INVALID_PARAM,
            "refund_amount must be greater than zero",
        ));
    }

    let result = state
        .payment
        .refund_payment(
            user.id,
            RefundParams {
                order_no: body.order_no,
                refund_no: body.refund_no,
                refund_amount: body.refund_amount,
                reason: body.reason,
            },
        )
        .await?;

    Ok(success(serde_json::json!({
        "refund_no": result.refund_no,
        "trade_no": result.trade_no,
        "status": result.status,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CloseBody {
    pub order_no: String,
}

/// POST /api/v1/payment/close
pub async fn close_payment(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<CloseBody>,
) -> AppResult<Json<serde_json::Value>> {
    state.payment.close_payment(user.id, &body.order_no).await?;
    Ok(success(serde_json::json!({"order_no": body.order_no})))
}

/// GET /api/v1/payment/providers
pub async fn list_providers(State(state): State<AppState>) -> Json<serde_json::Value> {
    success(state.registry.names())
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl PageQuery {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> i64 {
        self.page_size.unwrap_or(20).clamp(1, 100)
    }
}

/// GET /api/v1/orders
pub async fn list_orders(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let (orders, total) = state
        .admin
        .list_orders(user.id, query.page(), query.page_size())
        .await?;
    Ok(success(serde_json::json!({
        "orders": orders,
        "total": total,
        "page": query.page(),
        "page_size": query.page_size(),
    })))
}

/// Best-effort client address from proxy headers.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "10.0.0.2".parse().unwrap());
        assert_eq!(client_ip(&headers), Some("203.0.113.7".to_string()));
    }

    #[test]
    fn client_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "198.51.100.4".parse().unwrap());
        assert_eq!(client_ip(&headers), Some("198.51.100.4".to_string()));
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn page_query_clamps_bounds() {
        let query = PageQuery {
            page: Some(0),
            page_size: Some(1000),
        };
        assert_eq!(query.page(), 1);
        assert_eq!(query.page_size(), 100);

        let query = PageQuery {
            page: None,
            page_size: None,
        };
        assert_eq!(query.page(), 1);
        assert_eq!(query.page_size(), 20);
    }
}
