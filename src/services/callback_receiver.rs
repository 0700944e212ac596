//! Handles Daraja result callbacks.
//!
//! Parsing and persistence failures are reported to the caller, which logs
//! them; the HTTP layer acknowledges every delivery regardless.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::database::error::DatabaseError;
use crate::database::mpesa_transaction_repository::{TransactionRecord, TransactionUpsert};
use crate::database::repository::TransactionStore;
use crate::payments::types::{PaymentStatus, StkCallbackEnvelope};

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("Malformed callback: {0}")]
    Malformed(String),
    #[error("Failed to persist callback: {0}")]
    Persistence(#[from] DatabaseError),
}

/// Body returned to Daraja for every callback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i32,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl CallbackAck {
    pub fn accepted() -> Self {
        Self {
            result_code: 0,
            result_desc: "Accepted".to_string(),
        }
    }
}

pub struct CallbackReceiver {
    store: Arc<dyn TransactionStore>,
}

impl CallbackReceiver {
    pub fn new(store: Arc<dyn TransactionStore>) -> Self {
        Self { store }
    }

    pub fn parse(payload: &[u8]) -> Result<TransactionUpsert, CallbackError> {
        let envelope: StkCallbackEnvelope = serde_json::from_slice(payload)
            .map_err(|e| CallbackError::Malformed(e.to_string()))?;
        let callback = envelope.body.stk_callback;

        if callback.checkout_request_id.trim().is_empty() {
            return Err(CallbackError::Malformed(
                "empty CheckoutRequestID".to_string(),
            ));
        }

        Ok(TransactionUpsert {
            checkout_request_id: callback.checkout_request_id,
            merchant_request_id: callback.merchant_request_id,
            result_code: callback.result_code,
            result_desc: callback.result_desc,
            callback_metadata: callback.callback_metadata,
        })
    }

    /// Parse a raw callback body and upsert it by CheckoutRequestID.
    pub async fn receive(&self, payload: &[u8]) -> Result<TransactionRecord, CallbackError> {
        let upsert = Self::parse(payload)?;
        let record = self.store.upsert(&upsert).await?;

        info!(
            checkout_request_id = %record.checkout_request_id,
            result_code = ?record.result_code,
            status = %PaymentStatus::from_result_code(record.result_code.as_deref()),
            "M-Pesa callback stored"
        );
        Ok(record)
    }
}
