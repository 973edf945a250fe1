//! Callback handling across the four adapters: acknowledgement bodies are
//! byte-exact, status mapping lands on the core alphabet, and signature
//! verification fails closed where a secret is configured.

use std::collections::HashMap;
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use unipay::payments::provider::PaymentProvider;
use unipay::payments::providers::{
    AlipayProvider, PaypalProvider, StripeProvider, WechatProvider,
};
use unipay::payments::registry::ProviderRegistry;
use unipay::payments::types::{NotifyRequest, PaymentStatus, ProviderName};

fn notify_request(
    raw_body: &[u8],
    form_data: HashMap<String, String>,
    headers: HashMap<String, String>,
    config: serde_json::Value,
) -> NotifyRequest {
    NotifyRequest {
        raw_body: raw_body.to_vec(),
        form_data,
        headers,
        request_url: "/public/notify/test/1".to_string(),
        config,
    }
}

#[test]
fn all_four_adapters_register() {
    let registry = ProviderRegistry::with_providers(vec![
        Arc::new(AlipayProvider::new().unwrap()) as Arc<dyn PaymentProvider>,
        Arc::new(WechatProvider::new().unwrap()),
        Arc::new(StripeProvider::new().unwrap()),
        Arc::new(PaypalProvider::new().unwrap()),
    ]);

    assert_eq!(
        registry.names(),
        vec![
            ProviderName::Alipay,
            ProviderName::Paypal,
            ProviderName::Stripe,
            ProviderName::Wechat,
        ]
    );
}

#[tokio::test]
async fn alipay_ack_is_the_literal_success() {
    let provider = AlipayProvider::new().unwrap();
    let form = HashMap::from([
        ("trade_status".to_string(), "TRADE_SUCCESS".to_string()),
        ("out_trade_no".to_string(), "M-100".to_string()),
        ("trade_no".to_string(), "TX-1".to_string()),
        ("total_amount".to_string(), "9.90".to_string()),
    ]);
    let request = notify_request(
        b"",
        form,
        HashMap::new(),
        serde_json::json!({"app_id": "2021", "private_key": "PK"}),
    );

    let response = provider.handle_notify(&request).await.unwrap();
    assert_eq!(response.return_body, b"success");
    assert_eq!(response.content_type, "text/plain");
    assert_eq!(response.status, Some(PaymentStatus::Success));
    assert_eq!(response.trade_no.as_deref(), Some("TX-1"));
}

#[tokio::test]
async fn wechat_ack_matches_expected_json_bytes() {
    let api_v3_key = "0123456789abcdef0123456789abcdef";
    let nonce = "abcdef123456";
    let transaction = serde_json::json!({
        "out_trade_no": "M-200",
        "transaction_id": "WX-9",
        "trade_state": "SUCCESS",
        "amount": {"total": 1500},
    });
    let cipher = Aes256Gcm::new_from_slice(api_v3_key.as_bytes()).unwrap();
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(nonce.as_bytes()),
            Payload {
                msg: transaction.to_string().as_bytes(),
                aad: b"transaction",
            },
        )
        .unwrap();
    let body = serde_json::json!({
        "resource": {
            "ciphertext": BASE64.encode(ciphertext),
            "nonce": nonce,
            "associated_data": "transaction",
        },
    });

    let provider = WechatProvider::new().unwrap();
    let request = notify_request(
        body.to_string().as_bytes(),
        HashMap::new(),
        HashMap::new(),
        serde_json::json!({
            "app_id": "wx1234",
            "mch_id": "1900000001",
            "serial_no": "SER",
            "api_v3_key": api_v3_key,
            "private_key": "PK",
        }),
    );

    let response = provider.handle_notify(&request).await.unwrap();
    assert_eq!(
        response.return_body,
        r#"{"code":"SUCCESS","message":"成功"}"#.as_bytes()
    );
    assert_eq!(response.content_type, "application/json");
    assert_eq!(response.status, Some(PaymentStatus::Success));
    assert_eq!(response.out_trade_no.as_deref(), Some("M-200"));
    assert_eq!(response.trade_no.as_deref(), Some("WX-9"));
    assert_eq!(
        response.amount,
        Some(rust_decimal::Decimal::new(1500, 2))
    );
}

#[tokio::test]
async fn stripe_unknown_event_acks_without_status() {
    let provider = StripeProvider::new().unwrap();
    let body = serde_json::json!({
        "type": "customer.created",
        "data": {"object": {"id": "cus_1"}},
    });
    let request = notify_request(
        body.to_string().as_bytes(),
        HashMap::new(),
        HashMap::new(),
        serde_json::json!({"secret_key": "sk_test"}),
    );

    let response = provider.handle_notify(&request).await.unwrap();
    assert_eq!(response.return_body, br#"{"received": true}"#);
    assert_eq!(response.status, None);
}

#[tokio::test]
async fn stripe_rejects_missing_signature_when_secret_configured() {
    let provider = StripeProvider::new().unwrap();
    let request = notify_request(
        br#"{"type":"charge.succeeded"}"#,
        HashMap::new(),
        HashMap::new(),
        serde_json::json!({"secret_key": "sk_test", "webhook_secret": "whsec"}),
    );
    assert!(provider.handle_notify(&request).await.is_err());
}

#[tokio::test]
async fn paypal_fails_closed_without_transmission_headers() {
    let provider = PaypalProvider::new().unwrap();
    let body = serde_json::json!({
        "event_type": "PAYMENT.CAPTURE.COMPLETED",
        "resource": {"id": "CAP-1"},
    });
    let request = notify_request(
        body.to_string().as_bytes(),
        HashMap::new(),
        HashMap::new(),
        serde_json::json!({
            "client_id": "cid",
            "secret": "shh",
            "webhook_id": "WH-1",
        }),
    );
    let err = provider.handle_notify(&request).await.unwrap_err();
    assert!(err.to_string().contains("missing webhook header"));
}

#[tokio::test]
async fn paypal_unverified_mode_extracts_capture_fields() {
    let provider = PaypalProvider::new().unwrap();
    let body = serde_json::json!({
        "event_type": "PAYMENT.CAPTURE.COMPLETED",
        "resource": {
            "id": "CAP-1",
            "amount": {"value": "9.90", "currency_code": "USD"},
            "supplementary_data": {"related_ids": {"order_id": "ORD-1"}},
        },
    });
    let request = notify_request(
        body.to_string().as_bytes(),
        HashMap::new(),
        HashMap::new(),
        serde_json::json!({"client_id": "cid", "secret": "shh"}),
    );

    let response = provider.handle_notify(&request).await.unwrap();
    assert_eq!(response.return_body, br#"{"status": "success"}"#);
    assert_eq!(response.status, Some(PaymentStatus::Success));
    assert_eq!(response.out_trade_no.as_deref(), Some("ORD-1"));
}
