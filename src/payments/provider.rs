use async_trait::async_trait;

use crate::payments::error::PaymentResult;
use crate::payments::types::{
    ClosePaymentRequest, CreatePaymentRequest, CreatePaymentResponse, NotifyRequest,
    NotifyResponse, ProviderName, QueryPaymentRequest, QueryPaymentResponse, RefundRequest,
    RefundResponse,
};

/// Contract every payment provider adapter implements.
///
/// `handle_notify` owns callback signature verification: when a
/// verification secret is configured the adapter must verify before
/// returning any payment state, and must fail with a notify error when
/// verification cannot be performed.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> ProviderName;

    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> PaymentResult<CreatePaymentResponse>;

    async fn query_payment(
        &self,
        request: &QueryPaymentRequest,
    ) -> PaymentResult<QueryPaymentResponse>;

    async fn handle_notify(&self, request: &NotifyRequest) -> PaymentResult<NotifyResponse>;

    async fn refund_payment(&self, request: &RefundRequest) -> PaymentResult<RefundResponse>;

    async fn close_payment(&self, request: &ClosePaymentRequest) -> PaymentResult<()>;
}
