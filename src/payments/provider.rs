use crate::payments::error::PaymentResult;
use crate::payments::types::{CheckoutIds, StkPushCommand, StkQueryOutcome};
use async_trait::async_trait;

/// Outbound side of the STK push flow.
#[async_trait]
pub trait MpesaGateway: Send + Sync {
    /// Send an STK push. `Ok` means the prompt was dispatched, not that it was paid.
    async fn initiate_stk_push(&self, command: StkPushCommand) -> PaymentResult<CheckoutIds>;

    async fn query_stk_status(&self, checkout_request_id: &str) -> PaymentResult<StkQueryOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::PaymentStatus;

    struct MockGateway;

    #[async_trait]
    impl MpesaGateway for MockGateway {
        async fn initiate_stk_push(&self, command: StkPushCommand) -> PaymentResult<CheckoutIds> {
            Ok(CheckoutIds {
                checkout_request_id: format!("ws_CO_{}", command.phone_number),
                merchant_request_id: "mock-merchant".to_string(),
                customer_message: None,
            })
        }

        async fn query_stk_status(
            &self,
            _checkout_request_id: &str,
        ) -> PaymentResult<StkQueryOutcome> {
            Ok(StkQueryOutcome {
                response_code: Some("0".to_string()),
                result_code: Some("1032".to_string()),
                result_desc: Some("Request cancelled by user".to_string()),
            })
        }
    }

    #[tokio::test]
    async fn gateway_is_object_safe() {
        let gateway: Box<dyn MpesaGateway> = Box::new(MockGateway);
        let ids = gateway
            .initiate_stk_push(StkPushCommand {
                phone_number: "254712345678".to_string(),
                amount: 99,
                account_reference: "Processing fee".to_string(),
                transaction_desc: "Processing fee".to_string(),
                callback_url: "https://example.com/api/mpesa/callback".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(ids.checkout_request_id, "ws_CO_254712345678");

        let outcome = gateway.query_stk_status(&ids.checkout_request_id).await.unwrap();
        assert_eq!(outcome.status(), PaymentStatus::Cancelled);
    }
}
