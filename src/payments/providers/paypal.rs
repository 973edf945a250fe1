//! PayPal adapter (Orders v2).
//!
//! REST calls authenticate with an OAuth client-credentials token.
//! Webhook verification delegates to PayPal's verify endpoint using the
//! transmission headers and fails closed when any required header is
//! missing or the remote verdict is not `SUCCESS`.
//!
//! Status mapping (order status): `CREATED` / `SAVED` / `APPROVED` /
//! `PAYER_ACTION_REQUIRED` -> pending, `COMPLETED` -> success, `VOIDED` /
//! `CANCELLED` -> closed, anything else -> failed.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    ClosePaymentRequest, CreatePaymentRequest, CreatePaymentResponse, NotifyRequest,
    NotifyResponse, PaymentStatus, ProviderName, QueryPaymentRequest, QueryPaymentResponse,
    RefundRequest, RefundResponse,
};
use crate::payments::utils::{ProviderHttpClient, RequestBody};

const API_BASE_LIVE: &str = "https://api-m.paypal.com";
const API_BASE_SANDBOX: &str = "https://api-m.sandbox.paypal.com";

const TRANSMISSION_HEADERS: [&str; 5] = [
    "paypal-transmission-id",
    "paypal-transmission-time",
    "paypal-transmission-sig",
    "paypal-cert-url",
    "paypal-auth-algo",
];

#[derive(Debug, Clone)]
struct PaypalConfig {
    client_id: String,
    secret: String,
    webhook_id: Option<String>,
    live: bool,
}

impl PaypalConfig {
    fn from_value(config: &serde_json::Value) -> PaymentResult<Self> {
        let client_id = config
            .get("client_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PaymentError::config("client_id not found in config"))?
            .to_string();
        let secret = config
            .get("secret")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PaymentError::config("secret not found in config"))?
            .to_string();
        let webhook_id = config
            .get("webhook_id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        let live = config.get("mode").and_then(|v| v.as_str()) == Some("live");

        Ok(Self {
            client_id,
            secret,
            webhook_id,
            live,
        })
    }

    fn api_base(&self) -> &'static str {
        if self.live {
            API_BASE_LIVE
        } else {
            API_BASE_SANDBOX
        }
    }
}

pub struct PaypalProvider {
    http: ProviderHttpClient,
}

impl PaypalProvider {
    pub fn new() -> PaymentResult<Self> {
        Ok(Self {
            http: ProviderHttpClient::new(Duration::from_secs(30), 3)?,
        })
    }

    async fn access_token(&self, config: &PaypalConfig) -> PaymentResult<String> {
        let basic = BASE64.encode(format!("{}:{}", config.client_id, config.secret));
        let fields = [(
            "grant_type".to_string(),
            "client_credentials".to_string(),
        )];

        let response: serde_json::Value = self
            .http
            .request_json(
                reqwest::Method::POST,
                &format!("{}/v1/oauth2/token", config.api_base()),
                &[("Authorization", format!("Basic {}", basic))],
                RequestBody::Form(&fields),
            )
            .await?;

        response
            .get("access_token")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| PaymentError::config("paypal token response missing access_token"))
    }

    async fn api_json(
        &self,
        config: &PaypalConfig,
        method: reqwest::Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> PaymentResult<serde_json::Value> {
        let token = self.access_token(config).await?;
        let headers = [("Authorization", format!("Bearer {}", token))];
        let body = match body {
            Some(payload) => RequestBody::Json(payload),
            None => RequestBody::Empty,
        };
        self.http
            .request_json(
                method,
                &format!("{}{}", config.api_base(), path),
                &headers,
                body,
            )
            .await
    }

    fn convert_status(order_status: &str) -> PaymentStatus {
        match order_status {
            "CREATED" | "SAVED" | "APPROVED" | "PAYER_ACTION_REQUIRED" => PaymentStatus::Pending,
            "COMPLETED" => PaymentStatus::Success,
            "VOIDED" | "CANCELLED" => PaymentStatus::Closed,
            _ => PaymentStatus::Failed,
        }
    }

    /// Remote webhook verification with the transmission headers.
    async fn verify_webhook(
        &self,
        config: &PaypalConfig,
        webhook_id: &str,
        request: &NotifyRequest,
    ) -> PaymentResult<()> {
        let mut header_values = Vec::with_capacity(TRANSMISSION_HEADERS.len());
        for name in TRANSMISSION_HEADERS {
            match request.header(name) {
                Some(value) => header_values.push(value.to_string()),
                None => {
                    return Err(PaymentError::notify(
                        "paypal",
                        format!("missing webhook header: {}", name),
                    ));
                }
            }
        }

        let event: serde_json::Value = serde_json::from_slice(&request.raw_body)
            .map_err(|e| PaymentError::notify("paypal", format!("invalid event JSON: {}", e)))?;

        let body = serde_json::json!({
            "transmission_id": header_values[0],
            "transmission_time": header_values[1],
            "transmission_sig": header_values[2],
            "cert_url": header_values[3],
            "auth_algo": header_values[4],
            "webhook_id": webhook_id,
            "webhook_event": event,
        });

        let verdict = self
            .api_json(
                config,
                reqwest::Method::POST,
                "/v1/notifications/verify-webhook-signature",
                Some(&body),
            )
            .await?;

        match verdict.get("verification_status").and_then(|v| v.as_str()) {
            Some("SUCCESS") => Ok(()),
            other => Err(PaymentError::notify(
                "paypal",
                format!(
                    "webhook signature verification failed: {}",
                    other.unwrap_or("no verdict")
                ),
            )),
        }
    }

    fn amount_from(value: &serde_json::Value) -> Option<Decimal> {
        value
            .get("amount")
            .and_then(|a| a.get("value"))
            .and_then(|v| v.as_str())
            .and_then(|s| Decimal::from_str(s).ok())
    }

    /// Extract order fields from a webhook event. Unknown event types
    /// yield no status and leave the order untouched.
    fn interpret_event(
        event: &serde_json::Value,
    ) -> (
        Option<String>,
        Option<String>,
        Option<PaymentStatus>,
        Option<Decimal>,
        Option<String>,
    ) {
        let event_type = event
            .get("event_type")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let resource = event
            .get("resource")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let trade_no = resource
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        match event_type {
            "PAYMENT.CAPTURE.COMPLETED" => {
                let out_trade_no = resource
                    .get("supplementary_data")
                    .and_then(|s| s.get("related_ids"))
                    .and_then(|r| r.get("order_id"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                let payment_time = resource
                    .get("create_time")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                (
                    trade_no,
                    out_trade_no,
                    Some(PaymentStatus::Success),
                    Self::amount_from(&resource),
                    payment_time,
                )
            }
            "PAYMENT.CAPTURE.DENIED" | "PAYMENT.CAPTURE.FAILED" => {
                (trade_no, None, Some(PaymentStatus::Failed), None, None)
            }
            "CHECKOUT.ORDER.APPROVED" | "CHECKOUT.ORDER.COMPLETED" => {
                let status = if event_type == "CHECKOUT.ORDER.COMPLETED" {
                    PaymentStatus::Success
                } else {
                    PaymentStatus::Pending
                };
                let unit = resource
                    .get("purchase_units")
                    .and_then(|u| u.as_array())
                    .and_then(|a| a.first())
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                let out_trade_no = unit
                    .get("reference_id")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                (
                    trade_no,
                    out_trade_no,
                    Some(status),
                    Self::amount_from(&unit),
                    None,
                )
            }
            _ => (None, None, None, None, None),
        }
    }
}

#[async_trait]
impl PaymentProvider for PaypalProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Paypal
    }

    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> PaymentResult<CreatePaymentResponse> {
        let config = PaypalConfig::from_value(&request.config)?;

        let body = serde_json::json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": request.out_trade_no,
                "description": request.subject,
                "amount": {
                    "currency_code": request.currency,
                    "value": format!("{:.2}", request.amount),
                },
            }],
            "application_context": {
                "return_url": request.return_url,
                "cancel_url": request.return_url,
            },
        });

        let order = self
            .api_json(&config, reqwest::Method::POST, "/v2/checkout/orders", Some(&body))
            .await
            .map_err(|e| PaymentError::create("paypal", e.to_string()))?;

        let order_id = order
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PaymentError::create("paypal", "response missing order id"))?;

        let approve_url = order
            .get("links")
            .and_then(|l| l.as_array())
            .and_then(|links| {
                links.iter().find(|link| {
                    link.get("rel").and_then(|v| v.as_str()) == Some("approve")
                })
            })
            .and_then(|link| link.get("href"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        info!(out_trade_no = %request.out_trade_no, order_id, "paypal order created");

        Ok(CreatePaymentResponse {
            payment_url: approve_url,
            payment_id: order_id.to_string(),
            trade_no: Some(order_id.to_string()),
            ..Default::default()
        })
    }

    async fn query_payment(
        &self,
        request: &QueryPaymentRequest,
    ) -> PaymentResult<QueryPaymentResponse> {
        let config = PaypalConfig::from_value(&request.config)?;
        let order_id = request
            .trade_no
            .as_deref()
            .ok_or_else(|| PaymentError::query("paypal", "order id unknown for this payment"))?;

        let order = self
            .api_json(
                &config,
                reqwest::Method::GET,
                &format!("/v2/checkout/orders/{}", order_id),
                None,
            )
            .await
            .map_err(|e| PaymentError::query("paypal", e.to_string()))?;

        let status = order.get("status").and_then(|v| v.as_str()).unwrap_or("");
        let unit = order
            .get("purchase_units")
            .and_then(|u| u.as_array())
            .and_then(|a| a.first())
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        Ok(QueryPaymentResponse {
            trade_no: Some(order_id.to_string()),
            out_trade_no: unit
                .get("reference_id")
                .and_then(|v| v.as_str())
                .unwrap_or(&request.out_trade_no)
                .to_string(),
            status: Self::convert_status(status),
            amount: Self::amount_from(&unit),
            payment_time: order
                .get("update_time")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            buyer_info: order
                .get("payer")
                .and_then(|p| p.get("email_address"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        })
    }

    async fn handle_notify(&self, request: &NotifyRequest) -> PaymentResult<NotifyResponse> {
        let config = PaypalConfig::from_value(&request.config)?;

        match &config.webhook_id {
            Some(webhook_id) => {
                self.verify_webhook(&config, webhook_id, request).await?;
            }
            None => {
                warn!("paypal webhook_id not configured, accepting unverified event");
            }
        }

        let event: serde_json::Value = serde_json::from_slice(&request.raw_body)
            .map_err(|e| PaymentError::notify("paypal", format!("invalid event JSON: {}", e)))?;

        let (trade_no, out_trade_no, status, amount, payment_time) =
            Self::interpret_event(&event);

        Ok(NotifyResponse {
            trade_no,
            out_trade_no,
            status,
            amount,
            payment_time,
            buyer_info: event
                .get("resource")
                .and_then(|r| r.get("payer"))
                .and_then(|p| p.get("email_address"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            return_body: br#"{"status": "success"}"#.to_vec(),
            content_type: "application/json",
        })
    }

    async fn refund_payment(&self, request: &RefundRequest) -> PaymentResult<RefundResponse> {
        let config = PaypalConfig::from_value(&request.config)?;
        let capture_id = request
            .trade_no
            .as_deref()
            .ok_or_else(|| PaymentError::refund("paypal", "capture id unknown"))?;

        let body = serde_json::json!({
            "amount": {
                "currency_code": "USD",
                "value": format!("{:.2}", request.refund_amount),
            },
        });

        let refund = self
            .api_json(
                &config,
                reqwest::Method::POST,
                &format!("/v2/payments/captures/{}/refund", capture_id),
                Some(&body),
            )
            .await
            .map_err(|e| PaymentError::refund("paypal", e.to_string()))?;

        Ok(RefundResponse {
            refund_no: request.refund_no.clone(),
            trade_no: refund
                .get("id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            status: "success".to_string(),
        })
    }

    async fn close_payment(&self, _request: &ClosePaymentRequest) -> PaymentResult<()> {
        // Unapproved PayPal orders expire on their own; there is no close
        // call to make.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_config() -> serde_json::Value {
        serde_json::json!({
            "client_id": "client",
            "secret": "shh",
            "mode": "sandbox",
            "webhook_id": "WH-123",
        })
    }

    #[test]
    fn config_mode_selects_api_base() {
        let sandbox = PaypalConfig::from_value(&test_config()).unwrap();
        assert_eq!(sandbox.api_base(), API_BASE_SANDBOX);

        let mut raw = test_config();
        raw["mode"] = serde_json::Value::String("live".to_string());
        let live = PaypalConfig::from_value(&raw).unwrap();
        assert_eq!(live.api_base(), API_BASE_LIVE);
    }

    #[test]
    fn status_mapping_is_deterministic() {
        for pending in ["CREATED", "SAVED", "APPROVED", "PAYER_ACTION_REQUIRED"] {
            assert_eq!(PaypalProvider::convert_status(pending), PaymentStatus::Pending);
        }
        assert_eq!(
            PaypalProvider::convert_status("COMPLETED"),
            PaymentStatus::Success
        );
        assert_eq!(
            PaypalProvider::convert_status("VOIDED"),
            PaymentStatus::Closed
        );
        assert_eq!(
            PaypalProvider::convert_status("DECLINED"),
            PaymentStatus::Failed
        );
    }

    #[test]
    fn capture_completed_event_extracts_order_reference() {
        let event = serde_json::json!({
            "event_type": "PAYMENT.CAPTURE.COMPLETED",
            "resource": {
                "id": "CAP-1",
                "amount": {"value": "9.90", "currency_code": "USD"},
                "create_time": "2026-01-01T00:00:00Z",
                "supplementary_data": {"related_ids": {"order_id": "ORD-1"}},
            },
        });
        let (trade_no, out_trade_no, status, amount, payment_time) =
            PaypalProvider::interpret_event(&event);
        assert_eq!(trade_no.as_deref(), Some("CAP-1"));
        assert_eq!(out_trade_no.as_deref(), Some("ORD-1"));
        assert_eq!(status, Some(PaymentStatus::Success));
        assert_eq!(amount, Some(Decimal::from_str("9.90").unwrap()));
        assert_eq!(payment_time.as_deref(), Some("2026-01-01T00:00:00Z"));
    }

    #[test]
    fn order_approved_event_is_pending() {
        let event = serde_json::json!({
            "event_type": "CHECKOUT.ORDER.APPROVED",
            "resource": {
                "id": "ORD-2",
                "purchase_units": [{
                    "reference_id": "M-300",
                    "amount": {"value": "25.00"},
                }],
            },
        });
        let (trade_no, out_trade_no, status, amount, _) =
            PaypalProvider::interpret_event(&event);
        assert_eq!(trade_no.as_deref(), Some("ORD-2"));
        assert_eq!(out_trade_no.as_deref(), Some("M-300"));
        assert_eq!(status, Some(PaymentStatus::Pending));
        assert_eq!(amount, Some(Decimal::from_str("25.00").unwrap()));
    }

    #[test]
    fn unknown_event_type_carries_no_status() {
        let event = serde_json::json!({
            "event_type": "BILLING.SUBSCRIPTION.CREATED",
            "resource": {"id": "SUB-1"},
        });
        let (_, _, status, _, _) = PaypalProvider::interpret_event(&event);
        assert_eq!(status, None);
    }

    #[tokio::test]
    async fn notify_with_webhook_id_and_missing_headers_fails_closed() {
        let provider = PaypalProvider::new().unwrap();
        let request = NotifyRequest {
            raw_body: br#"{"event_type":"PAYMENT.CAPTURE.COMPLETED","resource":{}}"#.to_vec(),
            form_data: HashMap::new(),
            headers: HashMap::from([(
                "paypal-transmission-id".to_string(),
                "tid".to_string(),
            )]),
            request_url: "/public/notify/paypal/3".to_string(),
            config: test_config(),
        };
        let err = provider.handle_notify(&request).await.unwrap_err();
        assert!(err.to_string().contains("missing webhook header"));
    }
}
