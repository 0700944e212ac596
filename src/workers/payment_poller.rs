use std::time::Duration;
use tracing::{debug, info, warn};

use crate::payments::types::{
    PaymentStatus, StatusQueryResponse, WireStatus, RESULT_CODE_CANCELLED,
    RESULT_CODE_INSUFFICIENT, RESULT_CODE_SUCCESS,
};
use crate::workers::payment_backend::PaymentBackend;

pub const TIMEOUT_MESSAGE: &str =
    "Payment confirmation timed out. Please check your M-Pesa messages.";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between two status checks.
    pub interval: Duration,
    /// Status checks made before giving up (30 x 2s = 60s).
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub checkout_request_id: String,
    pub status: PaymentStatus,
    /// Status checks that came back non-terminal.
    pub attempts: u32,
    pub timed_out: bool,
    pub result_code: Option<String>,
    pub result_desc: Option<String>,
}

impl PollOutcome {
    /// Message shown to the payer for this outcome.
    pub fn message(&self) -> String {
        if self.timed_out {
            return TIMEOUT_MESSAGE.to_string();
        }
        match self.status {
            PaymentStatus::Success => {
                "Your application has been initiated. Results will be sent to your phone."
                    .to_string()
            }
            PaymentStatus::Cancelled => {
                "You cancelled the M-Pesa transaction. Try again when ready.".to_string()
            }
            PaymentStatus::Insufficient => {
                "Your M-Pesa balance is too low. Please top up and try again.".to_string()
            }
            PaymentStatus::Failed => {
                "The transaction could not be completed. Please try again.".to_string()
            }
            PaymentStatus::Idle | PaymentStatus::Pending | PaymentStatus::Processing => {
                "Check your phone and enter your M-Pesa PIN to complete payment".to_string()
            }
        }
    }
}

/// Map one status response to a client-side status.
///
/// The three known result codes win; an explicit `pending` keeps polling; any
/// other result code is a failure; no code at all keeps polling.
pub fn interpret(response: &StatusQueryResponse) -> PaymentStatus {
    match response.result_code.as_deref() {
        Some(RESULT_CODE_SUCCESS) => return PaymentStatus::Success,
        Some(RESULT_CODE_CANCELLED) => return PaymentStatus::Cancelled,
        Some(RESULT_CODE_INSUFFICIENT) => return PaymentStatus::Insufficient,
        _ => {}
    }

    if response.status == WireStatus::Pending {
        return PaymentStatus::Pending;
    }

    match response.result_code {
        Some(_) => PaymentStatus::Failed,
        None => PaymentStatus::Pending,
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One polling loop for one CheckoutRequestID.
pub struct PollSession {
    checkout_request_id: String,
    config: PollConfig,
}

impl PollSession {
    pub fn new(checkout_request_id: impl Into<String>, config: PollConfig) -> Self {
        Self {
            checkout_request_id: checkout_request_id.into(),
            config,
        }
    }

    pub fn checkout_request_id(&self) -> &str {
        &self.checkout_request_id
    }

    /// Poll until a terminal status or the attempt budget runs out.
    ///
    /// The first check is immediate. Transport errors count as pending.
    /// `on_pending` is called with the attempt count after each non-terminal check.
    pub async fn run<F>(&self, backend: &dyn PaymentBackend, mut on_pending: F) -> PollOutcome
    where
        F: FnMut(u32) + Send,
    {
        let mut attempts = 0;
        loop {
            if attempts >= self.config.max_attempts {
                warn!(
                    checkout_request_id = %self.checkout_request_id,
                    attempts,
                    "Payment confirmation timed out"
                );
                return self.outcome(PaymentStatus::Failed, attempts, true, None);
            }

            match backend.check_status(&self.checkout_request_id).await {
                Ok(response) => {
                    let status = interpret(&response);
                    if status.is_terminal() {
                        info!(
                            checkout_request_id = %self.checkout_request_id,
                            %status,
                            attempts,
                            "Payment settled"
                        );
                        return self.outcome(status, attempts, false, Some(response));
                    }
                    debug!(
                        checkout_request_id = %self.checkout_request_id,
                        attempt = attempts + 1,
                        "Payment still pending"
                    );
                }
                Err(e) => {
                    warn!(
                        checkout_request_id = %self.checkout_request_id,
                        attempt = attempts + 1,
                        error = %e,
                        "Status check failed, treating as pending"
                    );
                }
            }

            attempts += 1;
            on_pending(attempts);
            tokio::time::sleep(self.config.interval).await;
        }
    }

    fn outcome(
        &self,
        status: PaymentStatus,
        attempts: u32,
        timed_out: bool,
        response: Option<StatusQueryResponse>,
    ) -> PollOutcome {
        let (result_code, result_desc) = response
            .map(|r| (r.result_code, r.result_desc))
            .unwrap_or_default();
        PollOutcome {
            checkout_request_id: self.checkout_request_id.clone(),
            status,
            attempts,
            timed_out,
            result_code,
            result_desc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: WireStatus, code: Option<&str>) -> StatusQueryResponse {
        StatusQueryResponse {
            success: true,
            status,
            payment_status: None,
            result_code: code.map(str::to_string),
            result_desc: None,
            message: None,
        }
    }

    #[test]
    fn interpret_follows_result_code_first() {
        assert_eq!(
            interpret(&response(WireStatus::Completed, Some("0"))),
            PaymentStatus::Success
        );
        assert_eq!(
            interpret(&response(WireStatus::Failed, Some("1032"))),
            PaymentStatus::Cancelled
        );
        assert_eq!(
            interpret(&response(WireStatus::Failed, Some("1"))),
            PaymentStatus::Insufficient
        );
        assert_eq!(
            interpret(&response(WireStatus::Failed, Some("2001"))),
            PaymentStatus::Failed
        );
        assert_eq!(
            interpret(&response(WireStatus::Pending, Some("4999"))),
            PaymentStatus::Pending
        );
        assert_eq!(
            interpret(&response(WireStatus::Failed, None)),
            PaymentStatus::Pending
        );
    }

    #[test]
    fn timeout_message_differs_from_failure() {
        let mut outcome = PollOutcome {
            checkout_request_id: "ws_CO_123".to_string(),
            status: PaymentStatus::Failed,
            attempts: 30,
            timed_out: true,
            result_code: None,
            result_desc: None,
        };
        assert_eq!(outcome.message(), TIMEOUT_MESSAGE);

        outcome.timed_out = false;
        assert_ne!(outcome.message(), TIMEOUT_MESSAGE);
    }

    #[test]
    fn default_budget_is_sixty_seconds() {
        let config = PollConfig::default();
        assert_eq!(config.interval * config.max_attempts, Duration::from_secs(60));
    }
}
