use thiserror::Error;

use crate::error::{AppError, ErrorCode};

pub type PaymentResult<T> = Result<T, PaymentError>;

/// Adapter-layer error, one variant per contract operation plus the
/// config-shape failure surfaced when a required credential is missing or
/// of the wrong kind.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("failed to create payment via {provider}: {message}")]
    Create { provider: String, message: String },

    #[error("failed to query payment via {provider}: {message}")]
    Query { provider: String, message: String },

    #[error("failed to process payment notification via {provider}: {message}")]
    Notify { provider: String, message: String },

    #[error("failed to refund payment via {provider}: {message}")]
    Refund { provider: String, message: String },

    #[error("failed to close payment via {provider}: {message}")]
    Cancel { provider: String, message: String },

    #[error("invalid provider config: {message}")]
    ConfigInvalid { message: String },

    #[error("payment provider not found: {provider}")]
    ProviderNotFound { provider: String },

    #[error("provider request failed: {message}")]
    Network { message: String },
}

impl PaymentError {
    pub fn create(provider: &str, message: impl Into<String>) -> Self {
        PaymentError::Create {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn query(provider: &str, message: impl Into<String>) -> Self {
        PaymentError::Query {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn notify(provider: &str, message: impl Into<String>) -> Self {
        PaymentError::Notify {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn refund(provider: &str, message: impl Into<String>) -> Self {
        PaymentError::Refund {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn cancel(provider: &str, message: impl Into<String>) -> Self {
        PaymentError::Cancel {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        PaymentError::ConfigInvalid {
            message: message.into(),
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        let code = match &err {
            PaymentError::Create { .. } => ErrorCode::PAYMENT_CREATE,
            PaymentError::Query { .. } => ErrorCode::PAYMENT_QUERY,
            PaymentError::Notify { .. } => ErrorCode::PAYMENT_NOTIFY,
            PaymentError::Refund { .. } => ErrorCode::PAYMENT_REFUND,
            PaymentError::Cancel { .. } => ErrorCode::PAYMENT_CANCEL,
            PaymentError::ConfigInvalid { .. } => ErrorCode::CONFIG_NOT_FOUND,
            PaymentError::ProviderNotFound { .. } => ErrorCode::PROVIDER_NOT_FOUND,
            PaymentError::Network { .. } => ErrorCode::PAYMENT_CREATE,
        };
        let message = err.to_string();
        AppError::wrap(code, message, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_payment_code_range() {
        let err: AppError = PaymentError::create("alipay", "gateway rejected").into();
        assert_eq!(err.code, ErrorCode::PAYMENT_CREATE);

        let err: AppError = PaymentError::ProviderNotFound {
            provider: "square".to_string(),
        }
        .into();
        assert_eq!(err.code, ErrorCode::PROVIDER_NOT_FOUND);

        let err: AppError = PaymentError::config("app_id not found in config").into();
        assert_eq!(err.code, ErrorCode::CONFIG_NOT_FOUND);
    }
}
