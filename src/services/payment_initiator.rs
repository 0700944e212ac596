//! Builds and submits the STK push for the processing fee.

use std::sync::Arc;
use tracing::{info, warn};

use crate::logging::mask_phone_number;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::MpesaGateway;
use crate::payments::types::{CheckoutIds, InitiatePaymentRequest, StkPushCommand};
use crate::payments::utils::normalize_phone_number;

pub struct PaymentInitiator {
    gateway: Arc<dyn MpesaGateway>,
    callback_url: String,
    account_reference: String,
}

impl PaymentInitiator {
    pub fn new(
        gateway: Arc<dyn MpesaGateway>,
        callback_url: impl Into<String>,
        account_reference: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            callback_url: callback_url.into(),
            account_reference: account_reference.into(),
        }
    }

    /// Validate the request and turn it into a push command.
    ///
    /// Reference and description always carry the configured account reference,
    /// whatever the caller sent; that is what the payer sees on the handset.
    pub fn build_command(&self, request: &InitiatePaymentRequest) -> PaymentResult<StkPushCommand> {
        let phone = request
            .phone_number
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| missing("phoneNumber"))?;
        let amount = request.amount.ok_or_else(|| missing("amount"))?;

        let phone_number = normalize_phone_number(phone);
        if !phone_number.chars().all(|c| c.is_ascii_digit()) {
            return Err(PaymentError::ValidationError {
                message: "phone number must contain digits only".to_string(),
                field: Some("phoneNumber".to_string()),
            });
        }

        if !amount.is_finite() || amount <= 0.0 || amount.fract() != 0.0 {
            return Err(PaymentError::ValidationError {
                message: "amount must be a positive whole number".to_string(),
                field: Some("amount".to_string()),
            });
        }

        Ok(StkPushCommand {
            phone_number,
            amount: amount as u64,
            account_reference: self.account_reference.clone(),
            transaction_desc: self.account_reference.clone(),
            callback_url: self.callback_url.clone(),
        })
    }

    pub async fn initiate(&self, request: &InitiatePaymentRequest) -> PaymentResult<CheckoutIds> {
        let command = self.build_command(request)?;
        let masked = mask_phone_number(&command.phone_number);
        info!(phone = %masked, amount = command.amount, "Initiating STK push");

        match self.gateway.initiate_stk_push(command).await {
            Ok(ids) => {
                info!(
                    phone = %masked,
                    checkout_request_id = %ids.checkout_request_id,
                    merchant_request_id = %ids.merchant_request_id,
                    "STK push dispatched"
                );
                Ok(ids)
            }
            Err(e) => {
                warn!(phone = %masked, error = %e, "STK push failed");
                Err(e)
            }
        }
    }
}

fn missing(field: &str) -> PaymentError {
    PaymentError::ValidationError {
        message: format!("{} is required", field),
        field: Some(field.to_string()),
    }
}
