//! Resolves the current status of an STK push.
//!
//! A stored callback result always wins. Without one, Daraja is queried live.
//! Query failures are reported as pending so that a payment which may still
//! complete through its callback is never failed early.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::database::repository::TransactionStore;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::MpesaGateway;
use crate::payments::types::{PaymentStatus, ResolvedStatus, StatusSource};

pub struct StatusResolver {
    store: Arc<dyn TransactionStore>,
    gateway: Arc<dyn MpesaGateway>,
}

impl StatusResolver {
    pub fn new(store: Arc<dyn TransactionStore>, gateway: Arc<dyn MpesaGateway>) -> Self {
        Self { store, gateway }
    }

    /// Only missing shortcode/passkey (or an empty id) is returned as an error.
    pub async fn resolve(&self, checkout_request_id: &str) -> PaymentResult<ResolvedStatus> {
        let checkout_request_id = checkout_request_id.trim();
        if checkout_request_id.is_empty() {
            return Err(PaymentError::ValidationError {
                message: "checkoutRequestId is required".to_string(),
                field: Some("checkoutRequestId".to_string()),
            });
        }

        match self.store.find_by_checkout_request_id(checkout_request_id).await {
            Ok(Some(record)) if record.result_code.is_some() => {
                let status = PaymentStatus::from_result_code(record.result_code.as_deref());
                debug!(checkout_request_id, %status, "Resolved from stored callback");
                return Ok(ResolvedStatus {
                    checkout_request_id: record.checkout_request_id,
                    status,
                    result_code: record.result_code,
                    result_desc: record.result_desc,
                    source: StatusSource::Callback,
                    message: None,
                });
            }
            Ok(_) => {}
            Err(e) => {
                warn!(checkout_request_id, error = %e, "Transaction lookup failed, querying M-Pesa");
            }
        }

        match self.gateway.query_stk_status(checkout_request_id).await {
            Ok(outcome) => {
                let status = outcome.status();
                debug!(checkout_request_id, %status, "Resolved from STK query");
                Ok(ResolvedStatus {
                    checkout_request_id: checkout_request_id.to_string(),
                    status,
                    result_code: outcome.result_code,
                    result_desc: outcome.result_desc,
                    source: StatusSource::Query,
                    message: None,
                })
            }
            Err(e) if e.is_missing_business_credentials() => Err(e),
            Err(e) => {
                warn!(checkout_request_id, error = %e, "STK query failed, reporting pending");
                Ok(ResolvedStatus {
                    checkout_request_id: checkout_request_id.to_string(),
                    status: PaymentStatus::Pending,
                    result_code: None,
                    result_desc: None,
                    source: StatusSource::Fallback,
                    message: Some(e.user_message()),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::error::{DatabaseError, DatabaseErrorKind};
    use crate::database::memory::InMemoryTransactionStore;
    use crate::database::mpesa_transaction_repository::{TransactionRecord, TransactionUpsert};
    use crate::payments::error::SETTING_PASSKEY;
    use crate::payments::types::{CheckoutIds, StkPushCommand, StkQueryOutcome};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedGateway {
        reply: PaymentResult<StkQueryOutcome>,
        queries: AtomicUsize,
    }

    impl ScriptedGateway {
        fn new(reply: PaymentResult<StkQueryOutcome>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                queries: AtomicUsize::new(0),
            })
        }

        fn queries(&self) -> usize {
            self.queries.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MpesaGateway for ScriptedGateway {
        async fn initiate_stk_push(&self, _command: StkPushCommand) -> PaymentResult<CheckoutIds> {
            unreachable!("resolver never initiates")
        }

        async fn query_stk_status(&self, _id: &str) -> PaymentResult<StkQueryOutcome> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl TransactionStore for BrokenStore {
        async fn upsert(&self, _r: &TransactionUpsert) -> Result<TransactionRecord, DatabaseError> {
            Err(DatabaseError::new(DatabaseErrorKind::ConnectionError {
                message: "down".to_string(),
            }))
        }

        async fn find_by_checkout_request_id(
            &self,
            _id: &str,
        ) -> Result<Option<TransactionRecord>, DatabaseError> {
            Err(DatabaseError::new(DatabaseErrorKind::ConnectionError {
                message: "down".to_string(),
            }))
        }
    }

    fn outcome(response: &str, result: Option<&str>) -> StkQueryOutcome {
        StkQueryOutcome {
            response_code: Some(response.to_string()),
            result_code: result.map(str::to_string),
            result_desc: None,
        }
    }

    async fn store_with(code: Option<&str>) -> Arc<InMemoryTransactionStore> {
        let store = Arc::new(InMemoryTransactionStore::new());
        store
            .upsert(&TransactionUpsert {
                checkout_request_id: "ws_CO_123".to_string(),
                merchant_request_id: "mr-1".to_string(),
                result_code: code.map(str::to_string),
                result_desc: Some("stored".to_string()),
                callback_metadata: None,
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn stored_result_skips_live_query() {
        let gateway = ScriptedGateway::new(Ok(outcome("0", Some("1032"))));
        let resolver = StatusResolver::new(store_with(Some("0")).await, gateway.clone());

        let resolved = resolver.resolve("ws_CO_123").await.unwrap();
        assert_eq!(resolved.status, PaymentStatus::Success);
        assert_eq!(resolved.source, StatusSource::Callback);
        assert_eq!(gateway.queries(), 0);
    }

    #[tokio::test]
    async fn record_without_result_falls_through_to_query() {
        let gateway = ScriptedGateway::new(Ok(outcome("0", Some("1"))));
        let resolver = StatusResolver::new(store_with(None).await, gateway.clone());

        let resolved = resolver.resolve("ws_CO_123").await.unwrap();
        assert_eq!(resolved.status, PaymentStatus::Insufficient);
        assert_eq!(resolved.source, StatusSource::Query);
        assert_eq!(gateway.queries(), 1);
    }

    #[tokio::test]
    async fn accepted_without_result_is_pending() {
        let gateway = ScriptedGateway::new(Ok(outcome("0", None)));
        let resolver = StatusResolver::new(Arc::new(InMemoryTransactionStore::new()), gateway);

        let resolved = resolver.resolve("ws_CO_unknown").await.unwrap();
        assert_eq!(resolved.status, PaymentStatus::Pending);
        assert_eq!(resolved.source, StatusSource::Query);
    }

    #[tokio::test]
    async fn query_failure_is_absorbed_into_pending() {
        let gateway = ScriptedGateway::new(Err(PaymentError::UpstreamUnavailable {
            message: "connection reset".to_string(),
        }));
        let resolver = StatusResolver::new(Arc::new(BrokenStore), gateway);

        let resolved = resolver.resolve("ws_CO_123").await.unwrap();
        assert_eq!(resolved.status, PaymentStatus::Pending);
        assert_eq!(resolved.source, StatusSource::Fallback);
        let message = resolved.message.unwrap();
        assert!(!message.contains("connection reset"));
    }

    #[tokio::test]
    async fn missing_business_credentials_surface() {
        let gateway = ScriptedGateway::new(Err(PaymentError::missing_setting(SETTING_PASSKEY)));
        let resolver = StatusResolver::new(Arc::new(InMemoryTransactionStore::new()), gateway);

        let err = resolver.resolve("ws_CO_123").await.unwrap_err();
        assert!(err.is_missing_business_credentials());
    }

    #[tokio::test]
    async fn empty_id_is_rejected() {
        let gateway = ScriptedGateway::new(Ok(outcome("0", None)));
        let resolver = StatusResolver::new(Arc::new(InMemoryTransactionStore::new()), gateway.clone());

        assert!(resolver.resolve("  ").await.is_err());
        assert_eq!(gateway.queries(), 0);
    }
}
