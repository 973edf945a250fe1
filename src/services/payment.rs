//! Order orchestration.
//!
//! Owns the order lifecycle: idempotent creation under a distributed
//! lock, provider dispatch, and the state machine driven by client polls
//! and provider callbacks. Terminal transitions into `success` enqueue a
//! merchant notification.

use chrono::Utc;
use rand::RngCore;
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::cache::keys::{ConfigKey, CreateLockKey};
use crate::cache::lock::{LockError, RedisLock};
use crate::cache::store::CacheStore;
use crate::cache::RedisPool;
use crate::database::config_repository::{ConfigRepository, PaymentConfig};
use crate::database::order_repository::{NewOrder, OrderRepository, OrderStatus, PaymentOrder};
use crate::error::{AppError, AppResult, ErrorCode};
use crate::payments::registry::ProviderRegistry;
use crate::payments::types::{
    ClosePaymentRequest, CreatePaymentRequest, NotifyRequest, NotifyResponse, PaymentStatus,
    ProviderName, QueryPaymentRequest, RefundRequest, RefundResponse,
};
use crate::services::audit::{AuditEntry, AuditLogger};
use crate::services::notify::NotifyService;

const CREATE_LOCK_TTL: Duration = Duration::from_secs(30);
const CREATE_LOCK_RETRIES: usize = 3;
const CREATE_LOCK_INTERVAL: Duration = Duration::from_millis(100);
const CONFIG_CACHE_TTL: Duration = Duration::from_secs(300);

pub struct PaymentService {
    orders: Arc<OrderRepository>,
    configs: Arc<ConfigRepository>,
    registry: Arc<ProviderRegistry>,
    audit: Arc<AuditLogger>,
    notify: Arc<NotifyService>,
    redis: RedisPool,
    cache: CacheStore,
}

#[derive(Debug, Clone)]
pub struct CreatePaymentParams {
    pub provider: String,
    pub out_trade_no: String,
    pub subject: String,
    pub body: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub notify_url: Option<String>,
    pub return_url: Option<String>,
    pub client_ip: Option<String>,
    pub extra_params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatePaymentResult {
    pub order_no: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
    pub payment_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct RefundParams {
    pub order_no: String,
    pub refund_no: String,
    pub refund_amount: Decimal,
    pub reason: Option<String>,
}

impl PaymentService {
    pub fn new(
        orders: Arc<OrderRepository>,
        configs: Arc<ConfigRepository>,
        registry: Arc<ProviderRegistry>,
        audit: Arc<AuditLogger>,
        notify: Arc<NotifyService>,
        redis: RedisPool,
        cache: CacheStore,
    ) -> Self {
        Self {
            orders,
            configs,
            registry,
            audit,
            notify,
            redis,
            cache,
        }
    }

    /// Create a payment. Idempotent on `(user_id, out_trade_no)`:
    /// concurrent attempts are linearized by a distributed lock and
    /// observe the same order. A repeat call for an existing non-failed
    /// order returns only its `order_no`; callers re-fetch artifacts via
    /// query.
    pub async fn create_payment(
        &self,
        user_id: i64,
        params: CreatePaymentParams,
    ) -> AppResult<CreatePaymentResult> {
        if params.amount <= Decimal::ZERO {
            return Err(AppError::new(
                ErrorCode::INVALID_PARAM,
                "amount must be greater than zero",
            ));
        }
        let provider_name = ProviderName::from_str(&params.provider).map_err(AppError::from)?;

        let lock_key = CreateLockKey::new(&params.out_trade_no).to_string();
        let lock = RedisLock::new(self.redis.clone(), lock_key, CREATE_LOCK_TTL);
        if let Err(e) = lock
            .try_acquire(CREATE_LOCK_RETRIES, CREATE_LOCK_INTERVAL)
            .await
        {
            return Err(match e {
                LockError::Exhausted(_) => AppError::new(
                    ErrorCode::TOO_MANY_REQUESTS,
                    "payment creation already in progress, please retry",
                ),
                other => AppError::wrap(ErrorCode::CACHE_LOCK, "failed to acquire lock", other),
            });
        }

        let result = self
            .create_payment_locked(user_id, provider_name, params)
            .await;

        // Safe after expiry: release reports NotHeld instead of touching a
        // lock someone else now owns.
        if let Err(e) = lock.release().await {
            warn!(error = %e, "failed to release create-payment lock");
        }

        result
    }

    async fn create_payment_locked(
        &self,
        user_id: i64,
        provider_name: ProviderName,
        params: CreatePaymentParams,
    ) -> AppResult<CreatePaymentResult> {
        if let Some(existing) = self
            .orders
            .get_by_user_and_out_trade_no(user_id, &params.out_trade_no)
            .await?
        {
            info!(
                out_trade_no = %params.out_trade_no,
                order_no = %existing.order_no,
                status = %existing.status,
                "payment order already exists"
            );
            // A failed creation may be retried; anything else is served
            // from the existing order.
            if existing.order_status() != OrderStatus::Failed {
                return Ok(CreatePaymentResult {
                    order_no: existing.order_no,
                    payment_url: None,
                    payment_id: String::new(),
                    qr_code: None,
                    extra_data: None,
                });
            }
        }

        let config = self
            .active_config_cached(user_id, &params.provider)
            .await?;

        let order_no = generate_order_no();
        let order = self
            .orders
            .create(NewOrder {
                order_no: &order_no,
                user_id,
                provider: &params.provider,
                config_id: config.id,
                out_trade_no: &params.out_trade_no,
                subject: &params.subject,
                body: params.body.as_deref(),
                amount: params.amount,
                currency: &params.currency,
                notify_url: params.notify_url.as_deref(),
                return_url: params.return_url.as_deref(),
                client_ip: params.client_ip.as_deref(),
                extra_data: params.extra_params.clone(),
            })
            .await
            .map_err(|e| {
                if e.is_unique_violation() {
                    AppError::new(ErrorCode::CONFLICT, "order already exists, please retry")
                } else {
                    e.into()
                }
            })?;

        let request = CreatePaymentRequest {
            out_trade_no: params.out_trade_no.clone(),
            subject: params.subject.clone(),
            body: params.body.clone(),
            amount: params.amount,
            currency: params.currency.clone(),
            notify_url: params.notify_url.clone(),
            return_url: params.return_url.clone(),
            client_ip: params.client_ip.clone(),
            config: config.config_data.clone(),
            extra_params: params.extra_params.clone(),
        };
        let request_data = create_request_json(&request);

        let adapter = match self.registry.get(provider_name) {
            Ok(adapter) => adapter,
            Err(e) => {
                self.audit.record(AuditEntry {
                    order_id: order.id,
                    order_no: order_no.clone(),
                    action: "create",
                    provider: params.provider.clone(),
                    request_data: Some(request_data),
                    response_data: None,
                    success: false,
                    error_msg: Some(e.to_string()),
                });
                if let Err(db_err) = self.orders.mark_failed(order.id).await {
                    error!(order_no = %order_no, error = %db_err, "failed to mark order failed");
                }
                return Err(e.into());
            }
        };

        match adapter.create_payment(&request).await {
            Ok(response) => {
                self.audit.record(AuditEntry {
                    order_id: order.id,
                    order_no: order_no.clone(),
                    action: "create",
                    provider: params.provider.clone(),
                    request_data: Some(request_data),
                    response_data: Some(serde_json::json!({
                        "payment_url": response.payment_url,
                        "payment_id": response.payment_id,
                        "trade_no": response.trade_no,
                        "qr_code": response.qr_code,
                    })),
                    success: true,
                    error_msg: None,
                });

                if let Some(trade_no) = &response.trade_no {
                    if let Err(e) = self.orders.mark_processing(order.id, trade_no).await {
                        error!(order_no = %order_no, error = %e, "failed to mark order processing");
                    }
                }

                Ok(CreatePaymentResult {
                    order_no,
                    payment_url: response.payment_url,
                    payment_id: response.payment_id,
                    qr_code: response.qr_code,
                    extra_data: response.extra_data,
                })
            }
            Err(e) => {
                self.audit.record(AuditEntry {
                    order_id: order.id,
                    order_no: order_no.clone(),
                    action: "create",
                    provider: params.provider.clone(),
                    request_data: Some(request_data),
                    response_data: None,
                    success: false,
                    error_msg: Some(e.to_string()),
                });
                if let Err(db_err) = self.orders.mark_failed(order.id).await {
                    error!(order_no = %order_no, error = %db_err, "failed to mark order failed");
                }
                Err(e.into())
            }
        }
    }

    /// Query an order, refreshing its state from the provider when it is
    /// not yet terminal. Cross-tenant lookups answer exactly like missing
    /// orders.
    pub async fn query_payment(&self, user_id: i64, order_no: &str) -> AppResult<PaymentOrder> {
        let order = self
            .orders
            .get_by_order_no(order_no)
            .await?
            .filter(|order| order.user_id == user_id)
            .ok_or_else(|| AppError::new(ErrorCode::ORDER_NOT_FOUND, "order not found"))?;

        if matches!(
            order.order_status(),
            OrderStatus::Success | OrderStatus::Closed
        ) {
            return Ok(order);
        }

        let config = self
            .configs
            .get_by_id(order.config_id)
            .await?
            .ok_or_else(|| {
                AppError::new(ErrorCode::CONFIG_NOT_FOUND, "payment config not found")
            })?;

        let provider_name = ProviderName::from_str(&order.provider).map_err(AppError::from)?;
        let adapter = self.registry.get(provider_name).map_err(AppError::from)?;

        let request = QueryPaymentRequest {
            out_trade_no: order.out_trade_no.clone(),
            trade_no: order.trade_no.clone(),
            config: config.config_data.clone(),
        };

        let response = match adapter.query_payment(&request).await {
            Ok(response) => response,
            Err(e) => {
                self.audit.record(AuditEntry {
                    order_id: order.id,
                    order_no: order.order_no.clone(),
                    action: "query",
                    provider: order.provider.clone(),
                    request_data: Some(serde_json::json!({
                        "out_trade_no": request.out_trade_no,
                        "trade_no": request.trade_no,
                    })),
                    response_data: None,
                    success: false,
                    error_msg: Some(e.to_string()),
                });
                // Degrade: the caller gets the current state and may retry.
                return Ok(order);
            }
        };

        self.audit.record(AuditEntry {
            order_id: order.id,
            order_no: order.order_no.clone(),
            action: "query",
            provider: order.provider.clone(),
            request_data: Some(serde_json::json!({
                "out_trade_no": request.out_trade_no,
                "trade_no": request.trade_no,
            })),
            response_data: Some(serde_json::json!({
                "trade_no": response.trade_no,
                "status": response.status,
                "amount": response.amount,
            })),
            success: true,
            error_msg: None,
        });

        let updated = self
            .apply_reported_status(&order, response.status, response.trade_no.as_deref())
            .await?;

        Ok(updated.unwrap_or(order))
    }

    /// Process a provider callback. Verification happens inside the
    /// adapter before any state is read; the adapter's `return_body` is
    /// handed back verbatim even when the order is unknown, so the
    /// provider stops retransmitting.
    pub async fn handle_notify(
        &self,
        provider: &str,
        request: NotifyRequest,
    ) -> AppResult<NotifyResponse> {
        let provider_name = ProviderName::from_str(provider).map_err(AppError::from)?;
        let adapter = self.registry.get(provider_name).map_err(AppError::from)?;

        let response = adapter.handle_notify(&request).await.map_err(|e| {
            error!(provider, error = %e, "handle notify failed");
            AppError::from(e)
        })?;

        let Some(out_trade_no) = response.out_trade_no.clone() else {
            return Ok(response);
        };

        // The callback carries no user id; the order may legitimately be
        // unknown in a race. Ack regardless.
        let Some(order) = self.orders.get_by_out_trade_no(&out_trade_no).await? else {
            warn!(out_trade_no = %out_trade_no, "notification for unknown order");
            return Ok(response);
        };

        self.audit.record(AuditEntry {
            order_id: order.id,
            order_no: order.order_no.clone(),
            action: "notify",
            provider: provider.to_string(),
            request_data: Some(serde_json::json!({
                "request_url": request.request_url,
            })),
            response_data: Some(serde_json::json!({
                "trade_no": response.trade_no,
                "out_trade_no": response.out_trade_no,
                "status": response.status,
                "amount": response.amount,
            })),
            success: true,
            error_msg: None,
        });

        if let Some(reported) = response.status {
            self.apply_reported_status(&order, reported, response.trade_no.as_deref())
                .await?;
        }

        Ok(response)
    }

    /// Refund pass-through: the gateway keeps no refund state beyond the
    /// audit log.
    pub async fn refund_payment(
        &self,
        user_id: i64,
        params: RefundParams,
    ) -> AppResult<RefundResponse> {
        let order = self
            .orders
            .get_by_order_no(&params.order_no)
            .await?
            .filter(|order| order.user_id == user_id)
            .ok_or_else(|| AppError::new(ErrorCode::ORDER_NOT_FOUND, "order not found"))?;

        if order.order_status() != OrderStatus::Success {
            return Err(AppError::new(
                ErrorCode::ORDER_STATUS,
                "only successful orders can be refunded",
            ));
        }

        let config = self
            .configs
            .get_by_id(order.config_id)
            .await?
            .ok_or_else(|| {
                AppError::new(ErrorCode::CONFIG_NOT_FOUND, "payment config not found")
            })?;

        let provider_name = ProviderName::from_str(&order.provider).map_err(AppError::from)?;
        let adapter = self.registry.get(provider_name).map_err(AppError::from)?;

        let request = RefundRequest {
            out_trade_no: order.out_trade_no.clone(),
            trade_no: order.trade_no.clone(),
            refund_no: params.refund_no.clone(),
            refund_amount: params.refund_amount,
            total_amount: order.amount,
            reason: params.reason.clone(),
            config: config.config_data.clone(),
        };

        match adapter.refund_payment(&request).await {
            Ok(response) => {
                self.audit.record(AuditEntry {
                    order_id: order.id,
                    order_no: order.order_no.clone(),
                    action: "refund",
                    provider: order.provider.clone(),
                    request_data: Some(serde_json::json!({
                        "refund_no": params.refund_no,
                        "refund_amount": params.refund_amount,
                        "reason": params.reason,
                    })),
                    response_data: Some(serde_json::json!({
                        "refund_no": response.refund_no,
                        "trade_no": response.trade_no,
                        "status": response.status,
                    })),
                    success: true,
                    error_msg: None,
                });
                Ok(response)
            }
            Err(e) => {
                self.audit.record(AuditEntry {
                    order_id: order.id,
                    order_no: order.order_no.clone(),
                    action: "refund",
                    provider: order.provider.clone(),
                    request_data: Some(serde_json::json!({
                        "refund_no": params.refund_no,
                        "refund_amount": params.refund_amount,
                    })),
                    response_data: None,
                    success: false,
                    error_msg: Some(e.to_string()),
                });
                Err(e.into())
            }
        }
    }

    /// Close pass-through. The order itself settles to `closed` through
    /// the normal poll/callback paths.
    pub async fn close_payment(&self, user_id: i64, order_no: &str) -> AppResult<()> {
        let order = self
            .orders
            .get_by_order_no(order_no)
            .await?
            .filter(|order| order.user_id == user_id)
            .ok_or_else(|| AppError::new(ErrorCode::ORDER_NOT_FOUND, "order not found"))?;

        if order.order_status().is_terminal() {
            return Err(AppError::new(
                ErrorCode::ORDER_STATUS,
                "order is already settled",
            ));
        }

        let config = self
            .configs
            .get_by_id(order.config_id)
            .await?
            .ok_or_else(|| {
                AppError::new(ErrorCode::CONFIG_NOT_FOUND, "payment config not found")
            })?;

        let provider_name = ProviderName::from_str(&order.provider).map_err(AppError::from)?;
        let adapter = self.registry.get(provider_name).map_err(AppError::from)?;

        let request = ClosePaymentRequest {
            out_trade_no: order.out_trade_no.clone(),
            trade_no: order.trade_no.clone(),
            config: config.config_data.clone(),
        };

        let result = adapter.close_payment(&request).await;
        self.audit.record(AuditEntry {
            order_id: order.id,
            order_no: order.order_no.clone(),
            action: "close",
            provider: order.provider.clone(),
            request_data: Some(serde_json::json!({
                "out_trade_no": order.out_trade_no,
                "trade_no": order.trade_no,
            })),
            response_data: None,
            success: result.is_ok(),
            error_msg: result.as_ref().err().map(|e| e.to_string()),
        });
        result.map_err(AppError::from)?;

        if let Some(updated) = self
            .apply_reported_status(&order, PaymentStatus::Closed, None)
            .await?
        {
            debug!(order_no = %updated.order_no, "order closed");
        }
        Ok(())
    }

    /// Cache-bypassing config read for the callback path: the HTTP layer
    /// resolves the `config_id` baked into the notify URL.
    pub async fn get_config_by_id(&self, config_id: i64) -> AppResult<serde_json::Value> {
        let config = self
            .configs
            .get_by_id(config_id)
            .await?
            .ok_or_else(|| {
                AppError::new(ErrorCode::CONFIG_NOT_FOUND, "payment config not found")
            })?;
        Ok(config.config_data)
    }

    /// Must be called right after any config write commits.
    pub async fn invalidate_config_cache(&self, user_id: i64, provider: &str) {
        let key = ConfigKey::new(user_id, provider).to_string();
        if let Err(e) = self.cache.delete(&key).await {
            warn!(error = %e, "failed to invalidate config cache");
        }
    }

    /// Apply the state machine for a provider-reported status. Returns the
    /// updated order when a transition happened, `None` for no-ops. On the
    /// first transition into `success` with a notify URL configured, a
    /// merchant notification is enqueued; the database predicate makes the
    /// transition single-shot even under a poll/callback race.
    async fn apply_reported_status(
        &self,
        order: &PaymentOrder,
        reported: PaymentStatus,
        trade_no: Option<&str>,
    ) -> AppResult<Option<PaymentOrder>> {
        let current = order.order_status();
        let Some(next) = current.advance(reported) else {
            return Ok(None);
        };

        let payment_time = (next == OrderStatus::Success).then(Utc::now);
        let Some(updated) = self
            .orders
            .apply_transition(order.id, next, trade_no, payment_time)
            .await?
        else {
            // Lost the race against a concurrent transition; terminal-ignore
            // already holds, nothing to do.
            return Ok(None);
        };

        info!(
            order_no = %updated.order_no,
            from = %current,
            to = %next,
            "order state advanced"
        );

        if next == OrderStatus::Success {
            if let Some(notify_url) = updated.notify_url.clone().filter(|u| !u.is_empty()) {
                let payload = notify_payload(&updated);
                match self
                    .notify
                    .add_notify(updated.id, &updated.order_no, &notify_url, payload)
                    .await
                {
                    Ok(_) => {
                        info!(order_no = %updated.order_no, notify_url, "notify task added")
                    }
                    Err(e) => {
                        // Delivery is best-effort from the orchestrator's
                        // point of view; the transition stands.
                        error!(order_no = %updated.order_no, error = %e, "failed to add notify task")
                    }
                }
            }
        }

        Ok(Some(updated))
    }

    /// Read-through cache for the active `(user, provider)` config.
    async fn active_config_cached(
        &self,
        user_id: i64,
        provider: &str,
    ) -> AppResult<PaymentConfig> {
        let key = ConfigKey::new(user_id, provider).to_string();

        match self.cache.get(&key).await {
            Ok(Some(cached)) => {
                if let Ok(config) = serde_json::from_str::<PaymentConfig>(&cached) {
                    debug!(user_id, provider, "payment config cache hit");
                    return Ok(config);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "config cache read failed, falling back to database"),
        }

        let config = self
            .configs
            .get_active_by_user_and_provider(user_id, provider)
            .await?
            .ok_or_else(|| {
                AppError::new(ErrorCode::CONFIG_NOT_FOUND, "active payment config not found")
            })?;

        if let Ok(encoded) = serde_json::to_string(&config) {
            if let Err(e) = self.cache.set(&key, &encoded, CONFIG_CACHE_TTL).await {
                warn!(error = %e, "failed to cache payment config");
            }
        }

        Ok(config)
    }
}

/// `UNI` + 19-digit nanosecond timestamp + 12 random hex characters.
/// Unique under concurrent creation: the random suffix disambiguates
/// same-nanosecond collisions.
fn generate_order_no() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let mut suffix = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut suffix);
    format!("UNI{}{}", nanos, hex::encode(suffix))
}

fn create_request_json(request: &CreatePaymentRequest) -> serde_json::Value {
    serde_json::json!({
        "out_trade_no": request.out_trade_no,
        "subject": request.subject,
        "body": request.body,
        "amount": request.amount,
        "currency": request.currency,
        "notify_url": request.notify_url,
        "return_url": request.return_url,
        "client_ip": request.client_ip,
        "config": request.config,
        "extra_params": request.extra_params,
    })
}

/// Webhook body delivered to the merchant. Identical for every delivery
/// of a given terminal transition, so receivers can deduplicate on
/// `order_no`.
fn notify_payload(order: &PaymentOrder) -> serde_json::Value {
    serde_json::json!({
        "order_no": order.order_no,
        "out_trade_no": order.out_trade_no,
        "trade_no": order.trade_no,
        "amount": order.amount,
        "currency": order.currency,
        "status": order.status,
        "payment_time": order.payment_time,
        "subject": order.subject,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_no_matches_contract_shape() {
        let order_no = generate_order_no();
        assert!(order_no.starts_with("UNI"));
        let rest = &order_no[3..];
        assert_eq!(rest.len(), 19 + 12);
        assert!(rest[..19].chars().all(|c| c.is_ascii_digit()));
        assert!(rest[19..]
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn order_nos_are_unique_under_bursts() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(generate_order_no()));
        }
    }

    #[test]
    fn notify_payload_carries_the_settlement_fields() {
        let order = PaymentOrder {
            id: 1,
            order_no: "UNI17000000000000000001abcdef123456".to_string(),
            user_id: 7,
            provider: "alipay".to_string(),
            config_id: 42,
            out_trade_no: "M-100".to_string(),
            trade_no: Some("TX-1".to_string()),
            subject: "Hat".to_string(),
            body: None,
            amount: Decimal::new(990, 2),
            currency: "CNY".to_string(),
            status: "success".to_string(),
            notify_url: Some("https://m.example/ipn".to_string()),
            return_url: None,
            client_ip: None,
            extra_data: None,
            payment_time: Some(Utc::now()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let payload = notify_payload(&order);
        assert_eq!(payload["order_no"], order.order_no.as_str());
        assert_eq!(payload["out_trade_no"], "M-100");
        assert_eq!(payload["trade_no"], "TX-1");
        assert_eq!(payload["status"], "success");
        assert_eq!(payload["subject"], "Hat");
        assert!(payload["payment_time"].is_string());
    }

    #[test]
    fn create_request_json_includes_config_for_redaction() {
        let request = CreatePaymentRequest {
            out_trade_no: "M-100".to_string(),
            subject: "Hat".to_string(),
            body: None,
            amount: Decimal::new(990, 2),
            currency: "CNY".to_string(),
            notify_url: None,
            return_url: None,
            client_ip: None,
            config: serde_json::json!({"private_key": "PK"}),
            extra_params: None,
        };
        let data = create_request_json(&request);
        assert_eq!(data["config"]["private_key"], "PK");
        assert_eq!(data["out_trade_no"], "M-100");
    }
}
