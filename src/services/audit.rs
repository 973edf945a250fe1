//! Payment audit log writer.
//!
//! Every provider exchange is recorded, success or failure. Writes are
//! detached from the originating request with their own timeout so a
//! cancelled request still leaves its audit trail, and failures are
//! swallowed with a warning: audit loss must not fail the business
//! operation. Credential material is redacted before storage.

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::database::payment_log_repository::{NewPaymentLog, PaymentLogRepository};

const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

const SENSITIVE_KEYS: [&str; 8] = [
    "private_key",
    "public_key",
    "platform_public_key",
    "secret",
    "secret_key",
    "api_key",
    "api_v3_key",
    "webhook_secret",
];

/// Owned snapshot of one provider exchange.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub order_id: i64,
    pub order_no: String,
    pub action: &'static str,
    pub provider: String,
    pub request_data: Option<serde_json::Value>,
    pub response_data: Option<serde_json::Value>,
    pub success: bool,
    pub error_msg: Option<String>,
}

pub struct AuditLogger {
    logs: Arc<PaymentLogRepository>,
}

impl AuditLogger {
    pub fn new(logs: Arc<PaymentLogRepository>) -> Self {
        Self { logs }
    }

    /// Queue one audit row. Returns immediately; the write happens on a
    /// detached task.
    pub fn record(&self, mut entry: AuditEntry) {
        if let Some(data) = entry.request_data.as_mut() {
            redact(data);
        }
        if let Some(data) = entry.response_data.as_mut() {
            redact(data);
        }

        let logs = self.logs.clone();
        tokio::spawn(async move {
            let write = logs.create(NewPaymentLog {
                order_id: entry.order_id,
                order_no: &entry.order_no,
                action: entry.action,
                provider: &entry.provider,
                request_data: entry.request_data.clone(),
                response_data: entry.response_data.clone(),
                status: if entry.success { "success" } else { "failed" },
                error_msg: entry.error_msg.as_deref(),
            });

            match tokio::time::timeout(WRITE_TIMEOUT, write).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(order_no = %entry.order_no, error = %e, "failed to write payment log")
                }
                Err(_) => {
                    warn!(order_no = %entry.order_no, "payment log write timed out")
                }
            }
        });
    }
}

/// Replace credential values anywhere in the JSON tree.
fn redact(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if SENSITIVE_KEYS.contains(&key.as_str()) {
                    *entry = serde_json::Value::String("[REDACTED]".to_string());
                } else {
                    redact(entry);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter_mut() {
                redact(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redaction_masks_credentials_at_any_depth() {
        let mut data = serde_json::json!({
            "out_trade_no": "M-100",
            "config": {
                "app_id": "2021",
                "private_key": "PK",
                "nested": {"webhook_secret": "whsec"},
            },
            "items": [{"secret_key": "sk_live"}],
        });
        redact(&mut data);

        assert_eq!(data["out_trade_no"], "M-100");
        assert_eq!(data["config"]["app_id"], "2021");
        assert_eq!(data["config"]["private_key"], "[REDACTED]");
        assert_eq!(data["config"]["nested"]["webhook_secret"], "[REDACTED]");
        assert_eq!(data["items"][0]["secret_key"], "[REDACTED]");
    }

    #[test]
    fn redaction_leaves_scalars_alone() {
        let mut data = serde_json::json!("plain string");
        redact(&mut data);
        assert_eq!(data, "plain string");
    }
}
