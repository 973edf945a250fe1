//! Uniform request/response vocabulary shared by every provider adapter.
//!
//! The status alphabet here belongs to the core: adapters translate each
//! provider's own states into [`PaymentStatus`] at the boundary and the
//! mapping is documented per adapter.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::payments::error::PaymentError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    Alipay,
    Wechat,
    Stripe,
    Paypal,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Alipay => "alipay",
            ProviderName::Wechat => "wechat",
            ProviderName::Stripe => "stripe",
            ProviderName::Paypal => "paypal",
        }
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "alipay" => Ok(ProviderName::Alipay),
            "wechat" | "wechatpay" => Ok(ProviderName::Wechat),
            "stripe" => Ok(ProviderName::Stripe),
            "paypal" => Ok(ProviderName::Paypal),
            _ => Err(PaymentError::ProviderNotFound {
                provider: value.to_string(),
            }),
        }
    }
}

/// Provider-reported payment state, normalized.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Closed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CreatePaymentRequest {
    pub out_trade_no: String,
    pub subject: String,
    pub body: Option<String>,
    /// Major units, two fraction digits. Adapters that bill in minor units
    /// convert at the boundary.
    pub amount: Decimal,
    pub currency: String,
    pub notify_url: Option<String>,
    pub return_url: Option<String>,
    pub client_ip: Option<String>,
    /// Opaque per-merchant provider credentials; only the adapter reads it.
    pub config: serde_json::Value,
    pub extra_params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct CreatePaymentResponse {
    /// Redirect URL for hosted-page providers.
    pub payment_url: Option<String>,
    pub payment_id: String,
    /// Provider-side transaction id, when assigned at creation.
    pub trade_no: Option<String>,
    /// QR payload for scan-to-pay providers.
    pub qr_code: Option<String>,
    /// Pre-rendered form for form-post providers.
    pub form_data: Option<String>,
    pub extra_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct QueryPaymentRequest {
    pub out_trade_no: String,
    pub trade_no: Option<String>,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct QueryPaymentResponse {
    pub trade_no: Option<String>,
    pub out_trade_no: String,
    pub status: PaymentStatus,
    pub amount: Option<Decimal>,
    pub payment_time: Option<String>,
    pub buyer_info: Option<String>,
}

/// Raw inbound callback, as received by the public notify endpoint.
#[derive(Debug, Clone)]
pub struct NotifyRequest {
    pub raw_body: Vec<u8>,
    pub form_data: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub request_url: String,
    pub config: serde_json::Value,
}

impl NotifyRequest {
    /// Case-insensitive header lookup; callers store header names
    /// lowercased.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|v| v.as_str())
    }
}

/// Verified callback content plus the byte-exact acknowledgement the
/// provider expects back.
#[derive(Debug, Clone)]
pub struct NotifyResponse {
    pub trade_no: Option<String>,
    pub out_trade_no: Option<String>,
    /// `None` for event types that carry no payment state; the order is
    /// left untouched.
    pub status: Option<PaymentStatus>,
    pub amount: Option<Decimal>,
    pub payment_time: Option<String>,
    pub buyer_info: Option<String>,
    pub return_body: Vec<u8>,
    pub content_type: &'static str,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub out_trade_no: String,
    pub trade_no: Option<String>,
    pub refund_no: String,
    pub refund_amount: Decimal,
    pub total_amount: Decimal,
    pub reason: Option<String>,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct RefundResponse {
    pub refund_no: String,
    pub trade_no: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct ClosePaymentRequest {
    pub out_trade_no: String,
    pub trade_no: Option<String>,
    pub config: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_name_parsing_works() {
        assert!(matches!(
            ProviderName::from_str("alipay"),
            Ok(ProviderName::Alipay)
        ));
        assert!(matches!(
            ProviderName::from_str("WeChat"),
            Ok(ProviderName::Wechat)
        ));
        assert!(ProviderName::from_str("square").is_err());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&PaymentStatus::Success).unwrap(),
            "\"success\""
        );
        assert_eq!(PaymentStatus::Closed.as_str(), "closed");
    }

    #[test]
    fn notify_header_lookup_is_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("stripe-signature".to_string(), "t=1,v1=abc".to_string());
        let req = NotifyRequest {
            raw_body: Vec::new(),
            form_data: HashMap::new(),
            headers,
            request_url: "/public/notify/stripe/1".to_string(),
            config: serde_json::json!({}),
        };
        assert_eq!(req.header("Stripe-Signature"), Some("t=1,v1=abc"));
        assert_eq!(req.header("Paypal-Cert-Url"), None);
    }
}
