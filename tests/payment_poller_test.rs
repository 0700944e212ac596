//! Poll loop timing and error handling, on a paused tokio clock

use async_trait::async_trait;
use fastloan_backend::database::memory::InMemoryTransactionStore;
use fastloan_backend::database::repository::TransactionStore;
use fastloan_backend::payments::error::{PaymentError, PaymentResult};
use fastloan_backend::payments::provider::MpesaGateway;
use fastloan_backend::payments::types::{
    CheckoutIds, InitiatePaymentRequest, InitiatePaymentResponse, PaymentStatus,
    StatusQueryResponse, StkPushCommand, StkQueryOutcome, WireStatus,
};
use fastloan_backend::services::callback_receiver::CallbackReceiver;
use fastloan_backend::services::payment_flow::{LoanApplication, PaymentFlow};
use fastloan_backend::services::payment_initiator::PaymentInitiator;
use fastloan_backend::services::status_resolver::StatusResolver;
use fastloan_backend::workers::payment_backend::{BackendError, InProcessBackend, PaymentBackend};
use fastloan_backend::workers::payment_poller::{PollConfig, PollSession, TIMEOUT_MESSAGE};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Fails the first `failures` checks at the transport level, then reports `then`.
struct FlakyBackend {
    failures: u32,
    then: Option<&'static str>,
    checks: AtomicU32,
}

impl FlakyBackend {
    fn new(failures: u32, then: Option<&'static str>) -> Self {
        Self {
            failures,
            then,
            checks: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl PaymentBackend for FlakyBackend {
    async fn initiate(
        &self,
        _request: InitiatePaymentRequest,
    ) -> Result<InitiatePaymentResponse, BackendError> {
        Err(BackendError::Transport("not used".to_string()))
    }

    async fn check_status(&self, _id: &str) -> Result<StatusQueryResponse, BackendError> {
        let n = self.checks.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(BackendError::Transport("connection reset".to_string()));
        }
        Ok(StatusQueryResponse {
            success: true,
            status: match self.then {
                Some("0") => WireStatus::Completed,
                Some(_) => WireStatus::Failed,
                None => WireStatus::Pending,
            },
            payment_status: None,
            result_code: self.then.map(str::to_string),
            result_desc: None,
            message: None,
        })
    }
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_thirty_pending_checks() {
    let backend = FlakyBackend::new(0, None);
    let session = PollSession::new("ws_CO_123", PollConfig::default());
    let started = Instant::now();

    let mut seen = Vec::new();
    let outcome = session.run(&backend, |attempt| seen.push(attempt)).await;

    assert!(outcome.timed_out);
    assert_eq!(outcome.status, PaymentStatus::Failed);
    assert_eq!(outcome.attempts, 30);
    assert_eq!(outcome.message(), TIMEOUT_MESSAGE);
    assert_eq!(backend.checks.load(Ordering::SeqCst), 30);
    assert_eq!(seen, (1..=30).collect::<Vec<_>>());
    assert_eq!(started.elapsed(), Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn transport_errors_count_as_pending() {
    let backend = FlakyBackend::new(3, Some("0"));
    let session = PollSession::new("ws_CO_123", PollConfig::default());
    let started = Instant::now();

    let outcome = session.run(&backend, |_| {}).await;

    assert!(!outcome.timed_out);
    assert_eq!(outcome.status, PaymentStatus::Success);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(started.elapsed(), Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn provider_failure_is_not_a_timeout() {
    let backend = FlakyBackend::new(0, Some("2001"));
    let session = PollSession::new("ws_CO_123", PollConfig::default());

    let outcome = session.run(&backend, |_| {}).await;

    assert_eq!(outcome.status, PaymentStatus::Failed);
    assert!(!outcome.timed_out);
    assert_eq!(outcome.result_code.as_deref(), Some("2001"));
    assert_ne!(outcome.message(), TIMEOUT_MESSAGE);
}

/// Daraja stand-in: push accepted, queries never return a result.
struct AwaitingGateway;

#[async_trait]
impl MpesaGateway for AwaitingGateway {
    async fn initiate_stk_push(&self, _command: StkPushCommand) -> PaymentResult<CheckoutIds> {
        Ok(CheckoutIds {
            checkout_request_id: "ws_CO_123".to_string(),
            merchant_request_id: "29115-34620561-1".to_string(),
            customer_message: None,
        })
    }

    async fn query_stk_status(&self, _id: &str) -> PaymentResult<StkQueryOutcome> {
        Err(PaymentError::UpstreamRejected {
            message: "The transaction is being processed".to_string(),
            provider_code: Some("500.001.1001".to_string()),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn flow_settles_when_callback_lands_mid_poll() {
    let store: Arc<dyn TransactionStore> = Arc::new(InMemoryTransactionStore::new());
    let gateway: Arc<dyn MpesaGateway> = Arc::new(AwaitingGateway);
    let backend = Arc::new(InProcessBackend::new(
        Arc::new(PaymentInitiator::new(
            gateway.clone(),
            "https://example.com/api/mpesa/callback",
            "Processing fee",
        )),
        Arc::new(StatusResolver::new(store.clone(), gateway)),
    ));
    let receiver = CallbackReceiver::new(store);

    let mut flow = PaymentFlow::new(backend, PollConfig::default());
    let application = LoanApplication {
        full_name: "Jane Wanjiku".to_string(),
        id_number: "12345678".to_string(),
        phone_number: "0712345678".to_string(),
        loan_amount: 5000,
    };

    let id = flow.confirm_payment(&application).await.unwrap();
    assert_eq!(id, "ws_CO_123");

    tokio::time::sleep(Duration::from_secs(7)).await;
    assert_eq!(flow.state().status, PaymentStatus::Pending);

    receiver
        .receive(
            br#"{"Body":{"stkCallback":{"MerchantRequestID":"29115-34620561-1","CheckoutRequestID":"ws_CO_123","ResultCode":1,"ResultDesc":"The balance is insufficient for the transaction."}}}"#,
        )
        .await
        .unwrap();

    let outcome = flow.wait_for_outcome().await.unwrap();
    assert_eq!(outcome.status, PaymentStatus::Insufficient);
    assert!(!outcome.timed_out);
    assert_eq!(flow.state().status, PaymentStatus::Insufficient);
    assert!(flow.state().can_retry());
}
