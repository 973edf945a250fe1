use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::ProviderName;

/// Process-wide `provider name -> adapter` mapping.
///
/// Populated once by the composition root at startup; read-heavy
/// afterwards. Registration is last-write-wins.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<ProviderName, Arc<dyn PaymentProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from an explicit adapter list.
    pub fn with_providers(adapters: Vec<Arc<dyn PaymentProvider>>) -> Self {
        let registry = Self::new();
        for adapter in adapters {
            registry.register(adapter);
        }
        registry
    }

    pub fn register(&self, adapter: Arc<dyn PaymentProvider>) {
        let name = adapter.name();
        self.providers
            .write()
            .expect("provider registry lock poisoned")
            .insert(name, adapter);
    }

    pub fn get(&self, name: ProviderName) -> PaymentResult<Arc<dyn PaymentProvider>> {
        self.providers
            .read()
            .expect("provider registry lock poisoned")
            .get(&name)
            .cloned()
            .ok_or(PaymentError::ProviderNotFound {
                provider: name.to_string(),
            })
    }

    pub fn contains(&self, name: ProviderName) -> bool {
        self.providers
            .read()
            .expect("provider registry lock poisoned")
            .contains_key(&name)
    }

    /// Snapshot of the registered provider names.
    pub fn names(&self) -> Vec<ProviderName> {
        let mut names: Vec<ProviderName> = self
            .providers
            .read()
            .expect("provider registry lock poisoned")
            .keys()
            .copied()
            .collect();
        names.sort_by_key(|n| n.as_str());
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::error::PaymentResult;
    use crate::payments::types::*;
    use async_trait::async_trait;

    struct StubProvider(ProviderName);

    #[async_trait]
    impl PaymentProvider for StubProvider {
        fn name(&self) -> ProviderName {
            self.0
        }

        async fn create_payment(
            &self,
            _request: &CreatePaymentRequest,
        ) -> PaymentResult<CreatePaymentResponse> {
            Ok(CreatePaymentResponse::default())
        }

        async fn query_payment(
            &self,
            request: &QueryPaymentRequest,
        ) -> PaymentResult<QueryPaymentResponse> {
            Ok(QueryPaymentResponse {
                trade_no: None,
                out_trade_no: request.out_trade_no.clone(),
                status: PaymentStatus::Pending,
                amount: None,
                payment_time: None,
                buyer_info: None,
            })
        }

        async fn handle_notify(&self, _request: &NotifyRequest) -> PaymentResult<NotifyResponse> {
            Ok(NotifyResponse {
                trade_no: None,
                out_trade_no: None,
                status: None,
                amount: None,
                payment_time: None,
                buyer_info: None,
                return_body: b"ok".to_vec(),
                content_type: "text/plain",
            })
        }

        async fn refund_payment(
            &self,
            request: &RefundRequest,
        ) -> PaymentResult<RefundResponse> {
            Ok(RefundResponse {
                refund_no: request.refund_no.clone(),
                trade_no: None,
                status: "success".to_string(),
            })
        }

        async fn close_payment(&self, _request: &ClosePaymentRequest) -> PaymentResult<()> {
            Ok(())
        }
    }

    #[test]
    fn lookup_of_missing_provider_fails() {
        let registry = ProviderRegistry::new();
        assert!(matches!(
            registry.get(ProviderName::Alipay),
            Err(PaymentError::ProviderNotFound { .. })
        ));
    }

    #[test]
    fn registration_is_last_write_wins() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider(ProviderName::Stripe)));
        registry.register(Arc::new(StubProvider(ProviderName::Stripe)));
        assert_eq!(registry.names(), vec![ProviderName::Stripe]);
        assert!(registry.get(ProviderName::Stripe).is_ok());
    }

    #[test]
    fn names_returns_sorted_snapshot() {
        let registry = ProviderRegistry::with_providers(vec![
            Arc::new(StubProvider(ProviderName::Wechat)),
            Arc::new(StubProvider(ProviderName::Alipay)),
        ]);
        assert_eq!(
            registry.names(),
            vec![ProviderName::Alipay, ProviderName::Wechat]
        );
        assert!(registry.contains(ProviderName::Alipay));
        assert!(!registry.contains(ProviderName::Paypal));
    }
}
