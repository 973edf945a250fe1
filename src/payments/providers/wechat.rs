//! WeChat Pay adapter (Native / QR, API v3).
//!
//! Requests are signed with the merchant private key
//! (`WECHATPAY2-SHA256-RSA2048`); notifications are verified against the
//! platform public key when configured and their `resource` payload is
//! decrypted with AES-256-GCM under the APIv3 key. Amounts cross the
//! boundary in minor units (fen).
//!
//! Status mapping: `SUCCESS` / `REFUND` -> success, `NOTPAY` /
//! `USERPAYING` -> pending, `CLOSED` / `REVOKED` -> closed, `PAYERROR` and
//! anything else -> failed.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use rand::Rng;
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
    from_minor_units, parse_rsa_private_key, parse_rsa_public_key, rsa_sha256_sign_base64,
    rsa_sha256_verify_base64, to_minor_units, ProviderHttpClient, RequestBody,
};

const API_BASE: &str = "https://api.mch.weixin.qq.com";

#[derive(Debug, Clone)]
struct WechatConfig {
    app_id: String,
    mch_id: String,
    serial_no: String,
    api_v3_key: String,
    private_key: String,
    /// Platform public key for notification signature checks. Optional:
    /// absence downgrades verification to a logged warning.
    platform_public_key: Option<String>,
}

impl WechatConfig {
    fn from_value(config: &serde_json::Value) -> PaymentResult<Self> {
        let field = |name: &str| -> PaymentResult<String> {
            config
                .get(name)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| PaymentError::config(format!("{} not found in config", name)))
        };

        Ok(Self {
            app_id: field("app_id")?,
            mch_id: field("mch_id")?,
            serial_no: field("serial_no")?,
            api_v3_key: field("api_v3_key")?,
            private_key: field("private_key")?,
            platform_public_key: config
                .get("platform_public_key")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
        })
    }
}

pub struct WechatProvider {
    http: ProviderHttpClient,
}

impl WechatProvider {
    pub fn new() -> PaymentResult<Self> {
        Ok(Self {
            http: ProviderHttpClient::new(Duration::from_secs(30), 3)?,
        })
    }

    /// `Authorization` header for an API v3 request. The signature covers
    /// `method\npath\ntimestamp\nnonce\nbody\n`.
    fn auth_header(
        config: &WechatConfig,
        method: &str,
        path: &str,
        body: &str,
    ) -> PaymentResult<String> {
        let timestamp = Utc::now().timestamp();
        let nonce: String = rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();

        let message = format!("{}\n{}\n{}\n{}\n{}\n", method, path, timestamp, nonce, body);
        let key = parse_rsa_private_key(&config.private_key)?;
        let signature = rsa_sha256_sign_base64(&key, message.as_bytes());

        Ok(format!(
            "WECHATPAY2-SHA256-RSA2048 mchid=\"{}\",nonce_str=\"{}\",signature=\"{}\",timestamp=\"{}\",serial_no=\"{}\"",
            config.mch_id, nonce, signature, timestamp, config.serial_no
        ))
    }

    async fn api_post(
        &self,
        config: &WechatConfig,
        path: &str,
        body: &serde_json::Value,
    ) -> PaymentResult<(u16, String)> {
        let body_text = body.to_string();
        let auth = Self::auth_header(config, "POST", path, &body_text)?;
        self.http
            .request_raw(
                reqwest::Method::POST,
                &format!("{}{}", API_BASE, path),
                &[
                    ("Authorization", auth),
                    ("Accept", "application/json".to_string()),
                ],
                RequestBody::Json(body),
            )
            .await
    }

    async fn api_get(&self, config: &WechatConfig, path: &str) -> PaymentResult<(u16, String)> {
        let auth = Self::auth_header(config, "GET", path, "")?;
        self.http
            .request_raw(
                reqwest::Method::GET,
                &format!("{}{}", API_BASE, path),
                &[
                    ("Authorization", auth),
                    ("Accept", "application/json".to_string()),
                ],
                RequestBody::Empty,
            )
            .await
    }

    fn convert_trade_state(trade_state: &str) -> PaymentStatus {
        match trade_state {
            // A refunded payment was still paid.
            "SUCCESS" | "REFUND" => PaymentStatus::Success,
            "NOTPAY" | "USERPAYING" => PaymentStatus::Pending,
            "CLOSED" | "REVOKED" => PaymentStatus::Closed,
            _ => PaymentStatus::Failed,
        }
    }

    /// AES-256-GCM decryption of the notification `resource` block.
    fn decrypt_resource(
        api_v3_key: &str,
        resource: &serde_json::Value,
    ) -> PaymentResult<serde_json::Value> {
        let ciphertext_b64 = resource
            .get("ciphertext")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PaymentError::notify("wechat", "notification missing ciphertext"))?;
        let nonce = resource
            .get("nonce")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PaymentError::notify("wechat", "notification missing nonce"))?;
        let aad = resource
            .get("associated_data")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        let ciphertext = BASE64
            .decode(ciphertext_b64)
            .map_err(|e| PaymentError::notify("wechat", format!("invalid ciphertext: {}", e)))?;

        let cipher = Aes256Gcm::new_from_slice(api_v3_key.as_bytes())
            .map_err(|_| PaymentError::config("api_v3_key must be 32 bytes"))?;
        let plain = cipher
            .decrypt(
                Nonce::from_slice(nonce.as_bytes()),
                Payload {
                    msg: &ciphertext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| PaymentError::notify("wechat", "resource decryption failed"))?;

        serde_json::from_slice(&plain)
            .map_err(|e| PaymentError::notify("wechat", format!("invalid transaction JSON: {}", e)))
    }
}

#[async_trait]
impl PaymentProvider for WechatProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Wechat
    }

    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> PaymentResult<CreatePaymentResponse> {
        let config = WechatConfig::from_value(&request.config)?;

        let body = serde_json::json!({
            "appid": config.app_id,
            "mchid": config.mch_id,
            "description": request.subject,
            "out_trade_no": request.out_trade_no,
            "notify_url": request.notify_url,
            "amount": {
                "total": to_minor_units(request.amount)?,
                "currency": "CNY",
            },
        });

        let (status, text) = self
            .api_post(&config, "/v3/pay/transactions/native", &body)
            .await?;
        if !(200..300).contains(&status) {
            return Err(PaymentError::create(
                "wechat",
                format!("prepay failed with HTTP {}: {}", status, text),
            ));
        }

        let response: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| PaymentError::create("wechat", format!("invalid response: {}", e)))?;
        let code_url = response
            .get("code_url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PaymentError::create("wechat", "response missing code_url"))?;

        info!(out_trade_no = %request.out_trade_no, "wechat native payment created");

        Ok(CreatePaymentResponse {
            qr_code: Some(code_url.to_string()),
            payment_id: request.out_trade_no.clone(),
            ..Default::default()
        })
    }

    async fn query_payment(
        &self,
        request: &QueryPaymentRequest,
    ) -> PaymentResult<QueryPaymentResponse> {
        let config = WechatConfig::from_value(&request.config)?;

        let path = format!(
            "/v3/pay/transactions/out-trade-no/{}?mchid={}",
            request.out_trade_no, config.mch_id
        );
        let (status, text) = self.api_get(&config, &path).await?;
        if !(200..300).contains(&status) {
            return Err(PaymentError::query(
                "wechat",
                format!("query failed with HTTP {}: {}", status, text),
            ));
        }

        let tx: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| PaymentError::query("wechat", format!("invalid response: {}", e)))?;

        let trade_state = tx.get("trade_state").and_then(|v| v.as_str()).unwrap_or("");

        Ok(QueryPaymentResponse {
            trade_no: tx
                .get("transaction_id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            out_trade_no: tx
                .get("out_trade_no")
                .and_then(|v| v.as_str())
                .unwrap_or(&request.out_trade_no)
                .to_string(),
            status: Self::convert_trade_state(trade_state),
            amount: tx
                .get("amount")
                .and_then(|a| a.get("total"))
                .and_then(|v| v.as_i64())
                .map(from_minor_units),
            payment_time: tx
                .get("success_time")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            buyer_info: tx
                .get("payer")
                .and_then(|p| p.get("openid"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        })
    }

    async fn handle_notify(&self, request: &NotifyRequest) -> PaymentResult<NotifyResponse> {
        let config = WechatConfig::from_value(&request.config)?;

        match &config.platform_public_key {
            Some(raw_key) => {
                let timestamp = request.header("wechatpay-timestamp").ok_or_else(|| {
                    PaymentError::notify("wechat", "missing Wechatpay-Timestamp header")
                })?;
                let nonce = request.header("wechatpay-nonce").ok_or_else(|| {
                    PaymentError::notify("wechat", "missing Wechatpay-Nonce header")
                })?;
                let signature = request.header("wechatpay-signature").ok_or_else(|| {
                    PaymentError::notify("wechat", "missing Wechatpay-Signature header")
                })?;

                let message = format!(
                    "{}\n{}\n{}\n",
                    timestamp,
                    nonce,
                    String::from_utf8_lossy(&request.raw_body)
                );
                let key = parse_rsa_public_key(raw_key)?;
                if !rsa_sha256_verify_base64(&key, message.as_bytes(), signature) {
                    return Err(PaymentError::notify(
                        "wechat",
                        "notification signature verification failed",
                    ));
                }
            }
            None => {
                warn!("wechat platform_public_key not configured, skipping signature check");
            }
        }

        let envelope: serde_json::Value = serde_json::from_slice(&request.raw_body)
            .map_err(|e| PaymentError::notify("wechat", format!("invalid notification: {}", e)))?;
        let resource = envelope
            .get("resource")
            .ok_or_else(|| PaymentError::notify("wechat", "notification missing resource"))?;

        let tx = Self::decrypt_resource(&config.api_v3_key, resource)?;
        let trade_state = tx.get("trade_state").and_then(|v| v.as_str()).unwrap_or("");

        Ok(NotifyResponse {
            trade_no: tx
                .get("transaction_id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            out_trade_no: tx
                .get("out_trade_no")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            status: Some(Self::convert_trade_state(trade_state)),
            amount: tx
                .get("amount")
                .and_then(|a| a.get("total"))
                .and_then(|v| v.as_i64())
                .map(from_minor_units),
            payment_time: tx
                .get("success_time")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            buyer_info: tx
                .get("payer")
                .and_then(|p| p.get("openid"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            return_body: r#"{"code":"SUCCESS","message":"成功"}"#.as_bytes().to_vec(),
            content_type: "application/json",
        })
    }

    async fn refund_payment(&self, request: &RefundRequest) -> PaymentResult<RefundResponse> {
        let config = WechatConfig::from_value(&request.config)?;

        let body = serde_json::json!({
            "out_trade_no": request.out_trade_no,
            "out_refund_no": request.refund_no,
            "reason": request.reason,
            "amount": {
                "refund": to_minor_units(request.refund_amount)?,
                "total": to_minor_units(request.total_amount)?,
                "currency": "CNY",
            },
        });

        let (status, text) = self
            .api_post(&config, "/v3/refund/domestic/refunds", &body)
            .await?;
        if !(200..300).contains(&status) {
            return Err(PaymentError::refund(
                "wechat",
                format!("refund failed with HTTP {}: {}", status, text),
            ));
        }

        let response: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| PaymentError::refund("wechat", format!("invalid response: {}", e)))?;

        Ok(RefundResponse {
            refund_no: request.refund_no.clone(),
            trade_no: response
                .get("transaction_id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            status: "success".to_string(),
        })
    }

    async fn close_payment(&self, request: &ClosePaymentRequest) -> PaymentResult<()> {
        let config = WechatConfig::from_value(&request.config)?;

        let path = format!(
            "/v3/pay/transactions/out-trade-no/{}/close",
            request.out_trade_no
        );
        let body = serde_json::json!({ "mchid": config.mch_id });

        let (status, text) = self.api_post(&config, &path, &body).await?;
        // Close returns 204 No Content on success.
        if !(200..300).contains(&status) {
            return Err(PaymentError::cancel(
                "wechat",
                format!("close failed with HTTP {}: {}", status, text),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_config() -> serde_json::Value {
        serde_json::json!({
            "app_id": "wx1234",
            "mch_id": "1900000001",
            "serial_no": "5157F09EFDC096DE15EBE81A47057A72",
            "api_v3_key": "0123456789abcdef0123456789abcdef",
            "private_key": "PK",
        })
    }

    #[test]
    fn config_requires_all_merchant_fields() {
        assert!(WechatConfig::from_value(&test_config()).is_ok());

        let mut incomplete = test_config();
        incomplete.as_object_mut().unwrap().remove("api_v3_key");
        let err = WechatConfig::from_value(&incomplete).unwrap_err();
        assert!(err.to_string().contains("api_v3_key"));
    }

    #[test]
    fn trade_state_mapping_is_deterministic() {
        assert_eq!(
            WechatProvider::convert_trade_state("SUCCESS"),
            PaymentStatus::Success
        );
        assert_eq!(
            WechatProvider::convert_trade_state("REFUND"),
            PaymentStatus::Success
        );
        assert_eq!(
            WechatProvider::convert_trade_state("NOTPAY"),
            PaymentStatus::Pending
        );
        assert_eq!(
            WechatProvider::convert_trade_state("USERPAYING"),
            PaymentStatus::Pending
        );
        assert_eq!(
            WechatProvider::convert_trade_state("CLOSED"),
            PaymentStatus::Closed
        );
        assert_eq!(
            WechatProvider::convert_trade_state("REVOKED"),
            PaymentStatus::Closed
        );
        assert_eq!(
            WechatProvider::convert_trade_state("PAYERROR"),
            PaymentStatus::Failed
        );
    }

    #[test]
    fn resource_round_trips_through_aes_gcm() {
        let key = "0123456789abcdef0123456789abcdef";
        let nonce = "abcdef123456"; // 12 bytes, as WeChat sends
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).unwrap();
        let transaction = serde_json::json!({
            "out_trade_no": "M-200",
            "transaction_id": "WX-9",
            "trade_state": "SUCCESS",
            "amount": {"total": 990},
        });
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(nonce.as_bytes()),
                Payload {
                    msg: transaction.to_string().as_bytes(),
                    aad: b"transaction",
                },
            )
            .unwrap();

        let resource = serde_json::json!({
            "ciphertext": BASE64.encode(ciphertext),
            "nonce": nonce,
            "associated_data": "transaction",
        });

        let tx = WechatProvider::decrypt_resource(key, &resource).unwrap();
        assert_eq!(tx["out_trade_no"], "M-200");
        assert_eq!(tx["trade_state"], "SUCCESS");
        assert_eq!(tx["amount"]["total"], 990);
    }

    #[test]
    fn tampered_ciphertext_fails_decryption() {
        let key = "0123456789abcdef0123456789abcdef";
        let resource = serde_json::json!({
            "ciphertext": BASE64.encode(b"tampered bytes"),
            "nonce": "abcdef123456",
            "associated_data": "transaction",
        });
        let err = WechatProvider::decrypt_resource(key, &resource).unwrap_err();
        assert!(matches!(err, PaymentError::Notify { .. }));
    }

    #[test]
    fn wrong_length_api_v3_key_is_a_config_error() {
        let resource = serde_json::json!({
            "ciphertext": BASE64.encode(b"junk"),
            "nonce": "123456789012",
            "associated_data": "transaction",
        });
        let err = WechatProvider::decrypt_resource("short-key", &resource).unwrap_err();
        assert!(matches!(err, PaymentError::ConfigInvalid { .. }));
    }

    #[tokio::test]
    async fn notify_with_verification_configured_requires_headers() {
        let provider = WechatProvider::new().unwrap();
        let mut config = test_config();
        config["platform_public_key"] = serde_json::Value::String("PLATFORM".to_string());

        let request = NotifyRequest {
            raw_body: b"{}".to_vec(),
            form_data: HashMap::new(),
            headers: HashMap::new(),
            request_url: "/public/notify/wechat/55".to_string(),
            config,
        };
        let err = provider.handle_notify(&request).await.unwrap_err();
        assert!(err.to_string().contains("Wechatpay-Timestamp"));
    }
}
