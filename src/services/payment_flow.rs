//! Client-side "confirm payment" flow for a loan application.
//!
//! Drives initiation and the poll loop, publishing every status change on a
//! watch channel. Each started payment gets a new generation number; updates
//! from an older generation are dropped, so a retried or reset flow never
//! shows results from a previous attempt.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::DEFAULT_ACCOUNT_REFERENCE;
use crate::logging::mask_phone_number;
use crate::payments::types::{InitiatePaymentRequest, PaymentStatus};
use crate::payments::utils::normalize_phone_number;
use crate::workers::payment_backend::PaymentBackend;
use crate::workers::payment_poller::{PollConfig, PollOutcome, PollSession};

/// Fee charged before an application is submitted, in KES.
pub const PROCESSING_FEE_KES: u64 = 99;

/// Validated applicant data handed over by the form layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanApplication {
    pub full_name: String,
    pub id_number: String,
    pub phone_number: String,
    pub loan_amount: u64,
}

impl LoanApplication {
    pub fn payment_request(&self) -> InitiatePaymentRequest {
        InitiatePaymentRequest {
            phone_number: Some(normalize_phone_number(&self.phone_number)),
            amount: Some(PROCESSING_FEE_KES as f64),
            account_reference: Some(DEFAULT_ACCOUNT_REFERENCE.to_string()),
            transaction_desc: Some(format!("Processing fee for {}", self.full_name)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowState {
    pub status: PaymentStatus,
    pub checkout_request_id: Option<String>,
    pub attempts: u32,
    pub message: Option<String>,
}

impl FlowState {
    pub fn is_waiting(&self) -> bool {
        matches!(
            self.status,
            PaymentStatus::Pending | PaymentStatus::Processing
        )
    }

    pub fn can_retry(&self) -> bool {
        matches!(
            self.status,
            PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::Insufficient
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlowError {
    #[error("a payment is already in progress")]
    InProgress,
    #[error("payment cannot be retried from status {0}")]
    NotRetryable(PaymentStatus),
    #[error("payment initiation failed: {0}")]
    Initiation(String),
}

pub struct PaymentFlow {
    backend: Arc<dyn PaymentBackend>,
    poll_config: PollConfig,
    state_tx: Arc<watch::Sender<FlowState>>,
    generation: Arc<AtomicU64>,
    active: Option<JoinHandle<PollOutcome>>,
}

impl PaymentFlow {
    pub fn new(backend: Arc<dyn PaymentBackend>, poll_config: PollConfig) -> Self {
        let (state_tx, _) = watch::channel(FlowState::default());
        Self {
            backend,
            poll_config,
            state_tx: Arc::new(state_tx),
            generation: Arc::new(AtomicU64::new(0)),
            active: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<FlowState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> FlowState {
        self.state_tx.borrow().clone()
    }

    /// Start the fee payment. Returns the CheckoutRequestID once the push is sent.
    pub async fn confirm_payment(&mut self, application: &LoanApplication) -> Result<String, FlowError> {
        let current = self.state();
        if current.is_waiting() {
            return Err(FlowError::InProgress);
        }
        if current.status != PaymentStatus::Idle && !current.can_retry() {
            return Err(FlowError::NotRetryable(current.status));
        }
        self.start(application).await
    }

    /// "Try Again": only after a failed, cancelled or insufficient-balance attempt.
    pub async fn retry(&mut self, application: &LoanApplication) -> Result<String, FlowError> {
        let current = self.state();
        if !current.can_retry() {
            return Err(FlowError::NotRetryable(current.status));
        }
        self.start(application).await
    }

    /// "Back": drop the running attempt, if any, and return to idle.
    pub fn reset(&mut self) {
        self.cancel_active();
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.state_tx.send_replace(FlowState::default());
    }

    /// Wait for the running poll loop, if any.
    pub async fn wait_for_outcome(&mut self) -> Option<PollOutcome> {
        let handle = self.active.take()?;
        handle.await.ok()
    }

    async fn start(&mut self, application: &LoanApplication) -> Result<String, FlowError> {
        self.cancel_active();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        self.state_tx.send_replace(FlowState {
            status: PaymentStatus::Processing,
            checkout_request_id: None,
            attempts: 0,
            message: Some("Sending M-Pesa prompt to your phone".to_string()),
        });

        let request = application.payment_request();
        info!(
            phone = %mask_phone_number(request.phone_number.as_deref().unwrap_or_default()),
            "Confirming processing fee payment"
        );

        let checkout_request_id = match self.backend.initiate(request).await {
            Ok(response) if response.success => match response.checkout_request_id {
                Some(id) => id,
                None => return Err(self.fail_initiation("Failed to initiate payment".to_string())),
            },
            Ok(response) => {
                let message = response
                    .message
                    .unwrap_or_else(|| "Failed to initiate payment".to_string());
                return Err(self.fail_initiation(message));
            }
            Err(e) => return Err(self.fail_initiation(e.user_message())),
        };

        self.state_tx.send_replace(FlowState {
            status: PaymentStatus::Pending,
            checkout_request_id: Some(checkout_request_id.clone()),
            attempts: 0,
            message: Some("Check your phone and enter your M-Pesa PIN".to_string()),
        });

        let session = PollSession::new(checkout_request_id.clone(), self.poll_config.clone());
        let backend = self.backend.clone();
        let state_tx = self.state_tx.clone();
        let current = self.generation.clone();

        self.active = Some(tokio::spawn(async move {
            let progress_tx = state_tx.clone();
            let progress_gen = current.clone();
            let id = session.checkout_request_id().to_string();
            let outcome = session
                .run(backend.as_ref(), move |attempts| {
                    if progress_gen.load(Ordering::SeqCst) == generation {
                        progress_tx.send_modify(|state| state.attempts = attempts);
                    }
                })
                .await;

            if current.load(Ordering::SeqCst) == generation {
                state_tx.send_replace(FlowState {
                    status: outcome.status,
                    checkout_request_id: Some(id),
                    attempts: outcome.attempts,
                    message: Some(outcome.message()),
                });
            }
            outcome
        }));

        Ok(checkout_request_id)
    }

    fn fail_initiation(&self, message: String) -> FlowError {
        warn!(message = %message, "Payment initiation failed");
        self.state_tx.send_replace(FlowState {
            status: PaymentStatus::Failed,
            checkout_request_id: None,
            attempts: 0,
            message: Some(message.clone()),
        });
        FlowError::Initiation(message)
    }

    fn cancel_active(&mut self) {
        if let Some(handle) = self.active.take() {
            handle.abort();
        }
    }
}

impl Drop for PaymentFlow {
    fn drop(&mut self) {
        self.cancel_active();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{InitiatePaymentResponse, StatusQueryResponse, WireStatus};
    use crate::workers::payment_backend::BackendError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedBackend {
        initiations: Mutex<Vec<InitiatePaymentRequest>>,
        initiate_ok: bool,
        statuses: Mutex<VecDeque<StatusQueryResponse>>,
    }

    impl ScriptedBackend {
        fn new(initiate_ok: bool, statuses: Vec<StatusQueryResponse>) -> Arc<Self> {
            Arc::new(Self {
                initiations: Mutex::new(Vec::new()),
                initiate_ok,
                statuses: Mutex::new(statuses.into()),
            })
        }
    }

    #[async_trait]
    impl PaymentBackend for ScriptedBackend {
        async fn initiate(
            &self,
            request: InitiatePaymentRequest,
        ) -> Result<InitiatePaymentResponse, BackendError> {
            let mut initiations = self.initiations.lock().unwrap();
            initiations.push(request);
            if self.initiate_ok {
                Ok(InitiatePaymentResponse {
                    success: true,
                    checkout_request_id: Some(format!("ws_CO_{}", initiations.len())),
                    merchant_request_id: Some("mr".to_string()),
                    message: None,
                })
            } else {
                Ok(InitiatePaymentResponse::failed("Invalid PhoneNumber"))
            }
        }

        async fn check_status(&self, _id: &str) -> Result<StatusQueryResponse, BackendError> {
            Ok(self
                .statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(pending))
        }
    }

    fn pending() -> StatusQueryResponse {
        StatusQueryResponse {
            success: true,
            status: WireStatus::Pending,
            payment_status: None,
            result_code: None,
            result_desc: None,
            message: None,
        }
    }

    fn settled(code: &str) -> StatusQueryResponse {
        StatusQueryResponse {
            success: true,
            status: if code == "0" {
                WireStatus::Completed
            } else {
                WireStatus::Failed
            },
            payment_status: None,
            result_code: Some(code.to_string()),
            result_desc: None,
            message: None,
        }
    }

    fn application() -> LoanApplication {
        LoanApplication {
            full_name: "Jane Wanjiku".to_string(),
            id_number: "12345678".to_string(),
            phone_number: "0712345678".to_string(),
            loan_amount: 5000,
        }
    }

    #[test]
    fn payment_request_carries_fixed_fee() {
        let request = application().payment_request();
        assert_eq!(request.phone_number.as_deref(), Some("254712345678"));
        assert_eq!(request.amount, Some(99.0));
        assert_eq!(request.account_reference.as_deref(), Some("Processing fee"));
        assert_eq!(
            request.transaction_desc.as_deref(),
            Some("Processing fee for Jane Wanjiku")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn successful_payment_reaches_success() {
        let backend = ScriptedBackend::new(true, vec![pending(), pending(), settled("0")]);
        let mut flow = PaymentFlow::new(backend, PollConfig::default());

        let id = flow.confirm_payment(&application()).await.unwrap();
        assert_eq!(id, "ws_CO_1");
        assert_eq!(flow.state().status, PaymentStatus::Pending);

        let outcome = flow.wait_for_outcome().await.unwrap();
        assert_eq!(outcome.status, PaymentStatus::Success);
        assert_eq!(outcome.attempts, 2);

        let state = flow.state();
        assert_eq!(state.status, PaymentStatus::Success);
        assert_eq!(state.checkout_request_id.as_deref(), Some("ws_CO_1"));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_initiation_fails_without_polling() {
        let backend = ScriptedBackend::new(false, vec![]);
        let mut flow = PaymentFlow::new(backend, PollConfig::default());

        let err = flow.confirm_payment(&application()).await.unwrap_err();
        assert_eq!(err, FlowError::Initiation("Invalid PhoneNumber".to_string()));

        let state = flow.state();
        assert_eq!(state.status, PaymentStatus::Failed);
        assert!(state.can_retry());
        assert!(flow.wait_for_outcome().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_replaces_previous_session() {
        let backend = ScriptedBackend::new(true, vec![settled("1032")]);
        let mut flow = PaymentFlow::new(backend.clone(), PollConfig::default());

        flow.confirm_payment(&application()).await.unwrap();
        let outcome = flow.wait_for_outcome().await.unwrap();
        assert_eq!(outcome.status, PaymentStatus::Cancelled);

        let id = flow.retry(&application()).await.unwrap();
        assert_eq!(id, "ws_CO_2");
        assert_eq!(
            flow.retry(&application()).await.unwrap_err(),
            FlowError::NotRetryable(PaymentStatus::Pending)
        );
        assert_eq!(
            flow.confirm_payment(&application()).await.unwrap_err(),
            FlowError::InProgress
        );
        assert_eq!(backend.initiations.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_discards_running_loop() {
        let backend = ScriptedBackend::new(true, vec![]);
        let mut flow = PaymentFlow::new(backend, PollConfig::default());
        let mut rx = flow.subscribe();

        flow.confirm_payment(&application()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        flow.reset();

        assert_eq!(flow.state(), FlowState::default());
        assert!(flow.wait_for_outcome().await.is_none());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(rx.borrow_and_update().status, PaymentStatus::Idle);
    }
}
