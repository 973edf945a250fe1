//! Stripe adapter (Checkout Sessions).
//!
//! REST calls authenticate with the secret key; webhooks carry a
//! `Stripe-Signature` header (`t=<unix>,v1=<hmac>`) verified with
//! HMAC-SHA256 over `"{t}.{payload}"`. Signatures older than the 300s
//! tolerance are rejected. Amounts cross the boundary in minor units.
//!
//! Status mapping (checkout session `payment_status`): `paid` -> success,
//! `unpaid` -> pending, anything else -> failed.

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn};

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    ClosePaymentRequest, CreatePaymentRequest, CreatePaymentResponse, NotifyRequest,
    NotifyResponse, PaymentStatus, ProviderName, QueryPaymentRequest, QueryPaymentResponse,
    RefundRequest, RefundResponse,
};
use crate::payments::utils::{
    from_minor_units, hmac_sha256_hex, secure_eq, to_minor_units, ProviderHttpClient, RequestBody,
};

const API_BASE: &str = "https://api.stripe.com";

/// Maximum accepted signature age, matching the SDK default.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
struct StripeConfig {
    secret_key: String,
    webhook_secret: Option<String>,
}

impl StripeConfig {
    fn from_value(config: &serde_json::Value) -> PaymentResult<Self> {
        let secret_key = config
            .get("secret_key")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PaymentError::config("secret_key not found in config"))?
            .to_string();
        let webhook_secret = config
            .get("webhook_secret")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        Ok(Self {
            secret_key,
            webhook_secret,
        })
    }
}

pub struct StripeProvider {
    http: ProviderHttpClient,
}

impl StripeProvider {
    pub fn new() -> PaymentResult<Self> {
        Ok(Self {
            http: ProviderHttpClient::new(Duration::from_secs(30), 3)?,
        })
    }

    async fn api_form(
        &self,
        config: &StripeConfig,
        path: &str,
        fields: &[(String, String)],
    ) -> PaymentResult<serde_json::Value> {
        self.http
            .request_json(
                reqwest::Method::POST,
                &format!("{}{}", API_BASE, path),
                &[("Authorization", format!("Bearer {}", config.secret_key))],
                RequestBody::Form(fields),
            )
            .await
    }

    async fn api_get(
        &self,
        config: &StripeConfig,
        path: &str,
    ) -> PaymentResult<serde_json::Value> {
        self.http
            .request_json(
                reqwest::Method::GET,
                &format!("{}{}", API_BASE, path),
                &[("Authorization", format!("Bearer {}", config.secret_key))],
                RequestBody::Empty,
            )
            .await
    }

    fn convert_payment_status(payment_status: &str) -> PaymentStatus {
        match payment_status {
            "paid" => PaymentStatus::Success,
            "unpaid" => PaymentStatus::Pending,
            _ => PaymentStatus::Failed,
        }
    }

    /// Verify a `Stripe-Signature` header value against the payload.
    fn verify_signature(
        secret: &str,
        payload: &[u8],
        header: &str,
        now_epoch: i64,
    ) -> PaymentResult<()> {
        let mut timestamp: Option<i64> = None;
        let mut candidates: Vec<&str> = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| PaymentError::notify("stripe", "malformed Stripe-Signature header"))?;
        if candidates.is_empty() {
            return Err(PaymentError::notify(
                "stripe",
                "Stripe-Signature header carries no v1 signature",
            ));
        }
        if (now_epoch - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(PaymentError::notify(
                "stripe",
                "Stripe-Signature timestamp outside tolerance",
            ));
        }

        let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
        let expected = hmac_sha256_hex(secret, signed_payload.as_bytes());
        if candidates
            .iter()
            .any(|candidate| secure_eq(expected.as_bytes(), candidate.as_bytes()))
        {
            Ok(())
        } else {
            Err(PaymentError::notify(
                "stripe",
                "webhook signature verification failed",
            ))
        }
    }

    /// Extract `(trade_no, out_trade_no, status, amount_minor, created)`
    /// from a webhook event. Unknown event types yield no status.
    fn interpret_event(
        event: &serde_json::Value,
    ) -> (
        Option<String>,
        Option<String>,
        Option<PaymentStatus>,
        Option<i64>,
        Option<i64>,
    ) {
        let event_type = event.get("type").and_then(|v| v.as_str()).unwrap_or("");
        let object = event
            .get("data")
            .and_then(|d| d.get("object"))
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        let id = object
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let created = object.get("created").and_then(|v| v.as_i64());
        let metadata_out_trade_no = object
            .get("metadata")
            .and_then(|m| m.get("out_trade_no"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        match event_type {
            "checkout.session.completed" => {
                let status = object
                    .get("payment_status")
                    .and_then(|v| v.as_str())
                    .map(Self::convert_payment_status);
                let out_trade_no = object
                    .get("client_reference_id")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                let amount = object.get("amount_total").and_then(|v| v.as_i64());
                (id, out_trade_no, status, amount, created)
            }
            "payment_intent.succeeded" | "charge.succeeded" => {
                let amount = object.get("amount").and_then(|v| v.as_i64());
                (
                    id,
                    metadata_out_trade_no,
                    Some(PaymentStatus::Success),
                    amount,
                    created,
                )
            }
            "payment_intent.payment_failed" | "charge.failed" => {
                let amount = object.get("amount").and_then(|v| v.as_i64());
                (
                    id,
                    metadata_out_trade_no,
                    Some(PaymentStatus::Failed),
                    amount,
                    created,
                )
            }
            _ => (None, None, None, None, None),
        }
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Stripe
    }

    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> PaymentResult<CreatePaymentResponse> {
        let config = StripeConfig::from_value(&request.config)?;
        let return_url = request
            .return_url
            .clone()
            .unwrap_or_else(|| "https://example.com/return".to_string());

        let fields: Vec<(String, String)> = vec![
            (
                "payment_method_types[0]".to_string(),
                "card".to_string(),
            ),
            (
                "line_items[0][price_data][currency]".to_string(),
                request.currency.to_lowercase(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                request.subject.clone(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                to_minor_units(request.amount)?.to_string(),
            ),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), return_url.clone()),
            ("cancel_url".to_string(), return_url),
            (
                "client_reference_id".to_string(),
                request.out_trade_no.clone(),
            ),
        ];

        let session = self
            .api_form(&config, "/v1/checkout/sessions", &fields)
            .await
            .map_err(|e| PaymentError::create("stripe", e.to_string()))?;

        let session_id = session
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PaymentError::create("stripe", "response missing session id"))?;

        info!(out_trade_no = %request.out_trade_no, session_id, "stripe checkout session created");

        Ok(CreatePaymentResponse {
            payment_url: session
                .get("url")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            payment_id: session_id.to_string(),
            trade_no: Some(session_id.to_string()),
            ..Default::default()
        })
    }

    async fn query_payment(
        &self,
        request: &QueryPaymentRequest,
    ) -> PaymentResult<QueryPaymentResponse> {
        let config = StripeConfig::from_value(&request.config)?;
        let session_id = request
            .trade_no
            .as_deref()
            .ok_or_else(|| PaymentError::query("stripe", "session id unknown for this order"))?;

        let session = self
            .api_get(&config, &format!("/v1/checkout/sessions/{}", session_id))
            .await
            .map_err(|e| PaymentError::query("stripe", e.to_string()))?;

        let payment_status = session
            .get("payment_status")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        Ok(QueryPaymentResponse {
            trade_no: Some(session_id.to_string()),
            out_trade_no: session
                .get("client_reference_id")
                .and_then(|v| v.as_str())
                .unwrap_or(&request.out_trade_no)
                .to_string(),
            status: Self::convert_payment_status(payment_status),
            amount: session
                .get("amount_total")
                .and_then(|v| v.as_i64())
                .map(from_minor_units),
            payment_time: None,
            buyer_info: session
                .get("customer_details")
                .and_then(|c| c.get("email"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        })
    }

    async fn handle_notify(&self, request: &NotifyRequest) -> PaymentResult<NotifyResponse> {
        let config = StripeConfig::from_value(&request.config)?;

        match &config.webhook_secret {
            Some(secret) => {
                let header = request.header("stripe-signature").ok_or_else(|| {
                    PaymentError::notify("stripe", "missing Stripe-Signature header")
                })?;
                Self::verify_signature(secret, &request.raw_body, header, Utc::now().timestamp())?;
            }
            None => {
                warn!("stripe webhook_secret not configured, accepting unverified event");
            }
        }

        let event: serde_json::Value = serde_json::from_slice(&request.raw_body)
            .map_err(|e| PaymentError::notify("stripe", format!("invalid event JSON: {}", e)))?;

        let (trade_no, out_trade_no, status, amount_minor, created) =
            Self::interpret_event(&event);

        Ok(NotifyResponse {
            trade_no,
            out_trade_no,
            status,
            amount: amount_minor.map(from_minor_units),
            payment_time: created.map(|c| c.to_string()),
            buyer_info: event
                .get("data")
                .and_then(|d| d.get("object"))
                .and_then(|o| o.get("customer_details"))
                .and_then(|c| c.get("email"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            return_body: br#"{"received": true}"#.to_vec(),
            content_type: "application/json",
        })
    }

    async fn refund_payment(&self, request: &RefundRequest) -> PaymentResult<RefundResponse> {
        let config = StripeConfig::from_value(&request.config)?;
        let payment_intent = request
            .trade_no
            .as_deref()
            .ok_or_else(|| PaymentError::refund("stripe", "payment reference unknown"))?;

        let fields: Vec<(String, String)> = vec![
            ("payment_intent".to_string(), payment_intent.to_string()),
            (
                "amount".to_string(),
                to_minor_units(request.refund_amount)?.to_string(),
            ),
        ];

        let refund = self
            .api_form(&config, "/v1/refunds", &fields)
            .await
            .map_err(|e| PaymentError::refund("stripe", e.to_string()))?;

        Ok(RefundResponse {
            refund_no: request.refund_no.clone(),
            trade_no: refund
                .get("id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            status: "success".to_string(),
        })
    }

    async fn close_payment(&self, request: &ClosePaymentRequest) -> PaymentResult<()> {
        let config = StripeConfig::from_value(&request.config)?;
        let session_id = request
            .trade_no
            .as_deref()
            .ok_or_else(|| PaymentError::cancel("stripe", "session id unknown for this order"))?;

        self.api_form(
            &config,
            &format!("/v1/checkout/sessions/{}/expire", session_id),
            &[],
        )
        .await
        .map_err(|e| PaymentError::cancel("stripe", e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn signature_header(secret: &str, payload: &[u8], timestamp: i64) -> String {
        let signed = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
        format!("t={},v1={}", timestamp, hmac_sha256_hex(secret, signed.as_bytes()))
    }

    #[test]
    fn valid_signature_within_tolerance_passes() {
        let payload = br#"{"type":"charge.succeeded"}"#;
        let header = signature_header("whsec_test", payload, 1_700_000_000);
        assert!(
            StripeProvider::verify_signature("whsec_test", payload, &header, 1_700_000_100)
                .is_ok()
        );
    }

    #[test]
    fn stale_signature_is_rejected() {
        let payload = br#"{"type":"charge.succeeded"}"#;
        let header = signature_header("whsec_test", payload, 1_700_000_000);
        let err =
            StripeProvider::verify_signature("whsec_test", payload, &header, 1_700_000_400)
                .unwrap_err();
        assert!(err.to_string().contains("tolerance"));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let payload = br#"{"type":"charge.succeeded"}"#;
        let header = signature_header("whsec_other", payload, 1_700_000_000);
        assert!(
            StripeProvider::verify_signature("whsec_test", payload, &header, 1_700_000_000)
                .is_err()
        );
    }

    #[test]
    fn malformed_header_is_rejected() {
        let err = StripeProvider::verify_signature("whsec_test", b"{}", "v1=deadbeef", 0)
            .unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }

    #[test]
    fn checkout_completed_event_maps_to_success() {
        let event = serde_json::json!({
            "type": "checkout.session.completed",
            "data": {"object": {
                "id": "cs_test_123",
                "client_reference_id": "M-100",
                "payment_status": "paid",
                "amount_total": 990,
                "created": 1700000000,
            }},
        });
        let (trade_no, out_trade_no, status, amount, _) =
            StripeProvider::interpret_event(&event);
        assert_eq!(trade_no.as_deref(), Some("cs_test_123"));
        assert_eq!(out_trade_no.as_deref(), Some("M-100"));
        assert_eq!(status, Some(PaymentStatus::Success));
        assert_eq!(amount, Some(990));
    }

    #[test]
    fn unknown_event_type_carries_no_status() {
        let event = serde_json::json!({
            "type": "customer.created",
            "data": {"object": {"id": "cus_1"}},
        });
        let (_, _, status, _, _) = StripeProvider::interpret_event(&event);
        assert_eq!(status, None);
    }

    #[test]
    fn payment_failed_event_maps_to_failed() {
        let event = serde_json::json!({
            "type": "payment_intent.payment_failed",
            "data": {"object": {
                "id": "pi_123",
                "amount": 990,
                "metadata": {"out_trade_no": "M-100"},
            }},
        });
        let (trade_no, out_trade_no, status, _, _) = StripeProvider::interpret_event(&event);
        assert_eq!(trade_no.as_deref(), Some("pi_123"));
        assert_eq!(out_trade_no.as_deref(), Some("M-100"));
        assert_eq!(status, Some(PaymentStatus::Failed));
    }

    #[tokio::test]
    async fn notify_with_secret_but_no_header_fails_closed() {
        let provider = StripeProvider::new().unwrap();
        let request = NotifyRequest {
            raw_body: br#"{"type":"charge.succeeded"}"#.to_vec(),
            form_data: HashMap::new(),
            headers: HashMap::new(),
            request_url: "/public/notify/stripe/9".to_string(),
            config: serde_json::json!({
                "secret_key": "sk_test",
                "webhook_secret": "whsec_test",
            }),
        };
        let err = provider.handle_notify(&request).await.unwrap_err();
        assert!(err.to_string().contains("Stripe-Signature"));
    }
}
