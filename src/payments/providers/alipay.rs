//! Alipay adapter (page pay).
//!
//! All gateway calls go through `gateway.do` with RSA2 (SHA256-with-RSA)
//! request signing; async notifications arrive form-encoded and are
//! verified against the Alipay public key.
//!
//! Status mapping: `WAIT_BUYER_PAY` -> pending, `TRADE_SUCCESS` /
//! `TRADE_FINISHED` -> success, `TRADE_CLOSED` -> closed, anything else ->
//! failed.

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
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
use crate::payments::utils::{
    parse_rsa_private_key, parse_rsa_public_key, rsa_sha256_sign_base64,
    rsa_sha256_verify_base64, ProviderHttpClient, RequestBody,
};

const PRODUCTION_GATEWAY: &str = "https://openapi.alipay.com/gateway.do";
const SANDBOX_GATEWAY: &str = "https://openapi.alipaydev.com/gateway.do";

#[derive(Debug, Clone)]
struct AlipayConfig {
    app_id: String,
    private_key: String,
    public_key: Option<String>,
    is_production: bool,
}

impl AlipayConfig {
    fn from_value(config: &serde_json::Value) -> PaymentResult<Self> {
        let app_id = config
            .get("app_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PaymentError::config("app_id not found in config"))?
            .to_string();
        let private_key = config
            .get("private_key")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PaymentError::config("private_key not found in config"))?
            .to_string();
        let public_key = config
            .get("public_key")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        let is_production = config
            .get("is_production")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        Ok(Self {
            app_id,
            private_key,
            public_key,
            is_production,
        })
    }

    fn gateway(&self) -> &'static str {
        if self.is_production {
            PRODUCTION_GATEWAY
        } else {
            SANDBOX_GATEWAY
        }
    }
}

pub struct AlipayProvider {
    http: ProviderHttpClient,
}

impl AlipayProvider {
    pub fn new() -> PaymentResult<Self> {
        Ok(Self {
            http: ProviderHttpClient::new(Duration::from_secs(30), 3)?,
        })
    }

    /// Common gateway parameters plus the signature over the sorted
    /// `key=value` pairs.
    fn signed_params(
        config: &AlipayConfig,
        method: &str,
        biz_content: &serde_json::Value,
        notify_url: Option<&str>,
        return_url: Option<&str>,
    ) -> PaymentResult<Vec<(String, String)>> {
        let timestamp = Utc::now()
            .with_timezone(&FixedOffset::east_opt(8 * 3600).expect("fixed offset"))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();

        let mut params: Vec<(String, String)> = vec![
            ("app_id".to_string(), config.app_id.clone()),
            ("method".to_string(), method.to_string()),
            ("format".to_string(), "JSON".to_string()),
            ("charset".to_string(), "utf-8".to_string()),
            ("sign_type".to_string(), "RSA2".to_string()),
            ("timestamp".to_string(), timestamp),
            ("version".to_string(), "1.0".to_string()),
            ("biz_content".to_string(), biz_content.to_string()),
        ];
        if let Some(url) = notify_url {
            params.push(("notify_url".to_string(), url.to_string()));
        }
        if let Some(url) = return_url {
            params.push(("return_url".to_string(), url.to_string()));
        }

        params.sort_by(|a, b| a.0.cmp(&b.0));
        let to_sign = join_pairs(&params);

        let key = parse_rsa_private_key(&config.private_key)?;
        let sign = rsa_sha256_sign_base64(&key, to_sign.as_bytes());
        params.push(("sign".to_string(), sign));
        Ok(params)
    }

    /// POST signed params to the gateway and unwrap the
    /// `<method>_response` envelope. Gateway code `10000` is success.
    async fn gateway_call(
        &self,
        config: &AlipayConfig,
        method: &str,
        biz_content: serde_json::Value,
        error: fn(&str, String) -> PaymentError,
    ) -> PaymentResult<serde_json::Value> {
        let params = Self::signed_params(config, method, &biz_content, None, None)?;
        let envelope: serde_json::Value = self
            .http
            .request_json(
                reqwest::Method::POST,
                config.gateway(),
                &[],
                RequestBody::Form(&params),
            )
            .await?;

        let response_key = format!("{}_response", method.replace('.', "_"));
        let response = envelope
            .get(&response_key)
            .cloned()
            .ok_or_else(|| error("alipay", "malformed gateway response".to_string()))?;

        let code = response.get("code").and_then(|v| v.as_str()).unwrap_or("");
        if code != "10000" {
            let msg = response
                .get("sub_msg")
                .or_else(|| response.get("msg"))
                .and_then(|v| v.as_str())
                .unwrap_or("gateway rejected request");
            return Err(error("alipay", msg.to_string()));
        }
        Ok(response)
    }

    fn convert_status(trade_status: &str) -> PaymentStatus {
        match trade_status {
            "WAIT_BUYER_PAY" => PaymentStatus::Pending,
            "TRADE_SUCCESS" | "TRADE_FINISHED" => PaymentStatus::Success,
            "TRADE_CLOSED" => PaymentStatus::Closed,
            _ => PaymentStatus::Failed,
        }
    }
}

#[async_trait]
impl PaymentProvider for AlipayProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Alipay
    }

    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> PaymentResult<CreatePaymentResponse> {
        let config = AlipayConfig::from_value(&request.config)?;

        let biz_content = serde_json::json!({
            "out_trade_no": request.out_trade_no,
            "total_amount": format!("{:.2}", request.amount),
            "subject": request.subject,
            "product_code": "FAST_INSTANT_TRADE_PAY",
        });

        let params = Self::signed_params(
            &config,
            "alipay.trade.page.pay",
            &biz_content,
            request.notify_url.as_deref(),
            request.return_url.as_deref(),
        )?;

        let payment_url = format!("{}?{}", config.gateway(), encode_pairs(&params));
        info!(out_trade_no = %request.out_trade_no, "alipay page payment created");

        Ok(CreatePaymentResponse {
            payment_url: Some(payment_url),
            payment_id: request.out_trade_no.clone(),
            ..Default::default()
        })
    }

    async fn query_payment(
        &self,
        request: &QueryPaymentRequest,
    ) -> PaymentResult<QueryPaymentResponse> {
        let config = AlipayConfig::from_value(&request.config)?;

        let mut biz = serde_json::Map::new();
        if !request.out_trade_no.is_empty() {
            biz.insert(
                "out_trade_no".to_string(),
                serde_json::Value::String(request.out_trade_no.clone()),
            );
        }
        if let Some(trade_no) = &request.trade_no {
            biz.insert(
                "trade_no".to_string(),
                serde_json::Value::String(trade_no.clone()),
            );
        }

        let response = self
            .gateway_call(
                &config,
                "alipay.trade.query",
                serde_json::Value::Object(biz),
                |p, m| PaymentError::query(p, m),
            )
            .await?;

        let trade_status = response
            .get("trade_status")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        Ok(QueryPaymentResponse {
            trade_no: response
                .get("trade_no")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            out_trade_no: response
                .get("out_trade_no")
                .and_then(|v| v.as_str())
                .unwrap_or(&request.out_trade_no)
                .to_string(),
            status: Self::convert_status(trade_status),
            amount: response
                .get("total_amount")
                .and_then(|v| v.as_str())
                .and_then(|s| Decimal::from_str(s).ok()),
            payment_time: response
                .get("send_pay_date")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            buyer_info: response
                .get("buyer_logon_id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        })
    }

    async fn handle_notify(&self, request: &NotifyRequest) -> PaymentResult<NotifyResponse> {
        let config = AlipayConfig::from_value(&request.config)?;

        match &config.public_key {
            Some(raw_key) => {
                let sign = request
                    .form_data
                    .get("sign")
                    .ok_or_else(|| PaymentError::notify("alipay", "missing sign parameter"))?;

                // Signature covers every form field except sign/sign_type,
                // sorted by key, raw values.
                let mut pairs: Vec<(String, String)> = request
                    .form_data
                    .iter()
                    .filter(|(k, _)| k.as_str() != "sign" && k.as_str() != "sign_type")
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                pairs.sort_by(|a, b| a.0.cmp(&b.0));
                let to_verify = join_pairs(&pairs);

                let key = parse_rsa_public_key(raw_key)?;
                if !rsa_sha256_verify_base64(&key, to_verify.as_bytes(), sign) {
                    return Err(PaymentError::notify(
                        "alipay",
                        "notification signature verification failed",
                    ));
                }
            }
            None => {
                warn!("alipay public_key not configured, accepting unverified notification");
            }
        }

        let trade_status = request
            .form_data
            .get("trade_status")
            .map(|s| s.as_str())
            .unwrap_or("");

        Ok(NotifyResponse {
            trade_no: request.form_data.get("trade_no").cloned(),
            out_trade_no: request.form_data.get("out_trade_no").cloned(),
            status: Some(Self::convert_status(trade_status)),
            amount: request
                .form_data
                .get("total_amount")
                .and_then(|s| Decimal::from_str(s).ok()),
            payment_time: request.form_data.get("gmt_payment").cloned(),
            buyer_info: request.form_data.get("buyer_logon_id").cloned(),
            return_body: b"success".to_vec(),
            content_type: "text/plain",
        })
    }

    async fn refund_payment(&self, request: &RefundRequest) -> PaymentResult<RefundResponse> {
        let config = AlipayConfig::from_value(&request.config)?;

        let mut biz = serde_json::Map::new();
        if !request.out_trade_no.is_empty() {
            biz.insert(
                "out_trade_no".to_string(),
                serde_json::Value::String(request.out_trade_no.clone()),
            );
        }
        if let Some(trade_no) = &request.trade_no {
            biz.insert(
                "trade_no".to_string(),
                serde_json::Value::String(trade_no.clone()),
            );
        }
        biz.insert(
            "refund_amount".to_string(),
            serde_json::Value::String(format!("{:.2}", request.refund_amount)),
        );
        biz.insert(
            "out_request_no".to_string(),
            serde_json::Value::String(request.refund_no.clone()),
        );
        if let Some(reason) = &request.reason {
            biz.insert(
                "refund_reason".to_string(),
                serde_json::Value::String(reason.clone()),
            );
        }

        let response = self
            .gateway_call(
                &config,
                "alipay.trade.refund",
                serde_json::Value::Object(biz),
                |p, m| PaymentError::refund(p, m),
            )
            .await?;

        Ok(RefundResponse {
            refund_no: request.refund_no.clone(),
            trade_no: response
                .get("trade_no")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            status: "success".to_string(),
        })
    }

    async fn close_payment(&self, request: &ClosePaymentRequest) -> PaymentResult<()> {
        let config = AlipayConfig::from_value(&request.config)?;

        let mut biz = serde_json::Map::new();
        if !request.out_trade_no.is_empty() {
            biz.insert(
                "out_trade_no".to_string(),
                serde_json::Value::String(request.out_trade_no.clone()),
            );
        }
        if let Some(trade_no) = &request.trade_no {
            biz.insert(
                "trade_no".to_string(),
                serde_json::Value::String(trade_no.clone()),
            );
        }

        self.gateway_call(
            &config,
            "alipay.trade.close",
            serde_json::Value::Object(biz),
            |p, m| PaymentError::cancel(p, m),
        )
        .await?;
        Ok(())
    }
}

/// `k=v` pairs joined with `&`, raw values — the RSA2 signing base.
fn join_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-encoded query string for the redirect URL.
fn encode_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_config() -> serde_json::Value {
        serde_json::json!({
            "app_id": "2021",
            "private_key": "PK",
            "public_key": "PUB",
            "is_production": false
        })
    }

    #[test]
    fn config_requires_app_id_and_private_key() {
        assert!(AlipayConfig::from_value(&test_config()).is_ok());
        assert!(AlipayConfig::from_value(&serde_json::json!({"app_id": "2021"})).is_err());
        assert!(AlipayConfig::from_value(&serde_json::json!({"private_key": "PK"})).is_err());
    }

    #[test]
    fn sandbox_and_production_gateways_differ() {
        let sandbox = AlipayConfig::from_value(&test_config()).unwrap();
        assert_eq!(sandbox.gateway(), SANDBOX_GATEWAY);

        let mut raw = test_config();
        raw["is_production"] = serde_json::Value::Bool(true);
        let production = AlipayConfig::from_value(&raw).unwrap();
        assert_eq!(production.gateway(), PRODUCTION_GATEWAY);
    }

    #[test]
    fn status_mapping_is_deterministic() {
        assert_eq!(
            AlipayProvider::convert_status("WAIT_BUYER_PAY"),
            PaymentStatus::Pending
        );
        assert_eq!(
            AlipayProvider::convert_status("TRADE_SUCCESS"),
            PaymentStatus::Success
        );
        assert_eq!(
            AlipayProvider::convert_status("TRADE_FINISHED"),
            PaymentStatus::Success
        );
        assert_eq!(
            AlipayProvider::convert_status("TRADE_CLOSED"),
            PaymentStatus::Closed
        );
        assert_eq!(
            AlipayProvider::convert_status("SOMETHING_ELSE"),
            PaymentStatus::Failed
        );
    }

    #[test]
    fn signing_base_is_sorted_and_excludes_signature_fields() {
        let mut pairs = vec![
            ("total_amount".to_string(), "9.90".to_string()),
            ("out_trade_no".to_string(), "M-100".to_string()),
            ("app_id".to_string(), "2021".to_string()),
        ];
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            join_pairs(&pairs),
            "app_id=2021&out_trade_no=M-100&total_amount=9.90"
        );
    }

    #[test]
    fn percent_encoding_covers_reserved_characters() {
        assert_eq!(percent_encode("a b&c=d"), "a%20b%26c%3Dd");
        assert_eq!(percent_encode("safe-._~09AZ"), "safe-._~09AZ");
    }

    #[tokio::test]
    async fn notify_without_sign_parameter_is_rejected() {
        let provider = AlipayProvider::new().unwrap();
        let request = NotifyRequest {
            raw_body: Vec::new(),
            form_data: HashMap::from([(
                "trade_status".to_string(),
                "TRADE_SUCCESS".to_string(),
            )]),
            headers: HashMap::new(),
            request_url: "/public/notify/alipay/42".to_string(),
            config: test_config(),
        };
        let err = provider.handle_notify(&request).await.unwrap_err();
        assert!(matches!(err, PaymentError::Notify { .. }));
    }

    #[tokio::test]
    async fn notify_without_configured_public_key_is_accepted_with_warning() {
        let provider = AlipayProvider::new().unwrap();
        let request = NotifyRequest {
            raw_body: Vec::new(),
            form_data: HashMap::from([
                ("trade_status".to_string(), "TRADE_SUCCESS".to_string()),
                ("out_trade_no".to_string(), "M-100".to_string()),
                ("trade_no".to_string(), "TX-1".to_string()),
                ("total_amount".to_string(), "9.90".to_string()),
            ]),
            headers: HashMap::new(),
            request_url: "/public/notify/alipay/42".to_string(),
            config: serde_json::json!({"app_id": "2021", "private_key": "PK"}),
        };
        let response = provider.handle_notify(&request).await.unwrap();
        assert_eq!(response.status, Some(PaymentStatus::Success));
        assert_eq!(response.out_trade_no.as_deref(), Some("M-100"));
        assert_eq!(response.return_body, b"success");
    }
}
