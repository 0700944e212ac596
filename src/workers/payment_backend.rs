//! What the client side of the fee flow talks to: either the services in the
//! same process or a running server over HTTP.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::payments::error::PaymentError;
use crate::payments::types::{
    InitiatePaymentRequest, InitiatePaymentResponse, StatusQueryRequest, StatusQueryResponse,
};
use crate::services::payment_initiator::PaymentInitiator;
use crate::services::status_resolver::StatusResolver;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("invalid response: {0}")]
    Decode(String),
    #[error(transparent)]
    Payment(#[from] PaymentError),
}

impl BackendError {
    /// Text safe to show the payer.
    pub fn user_message(&self) -> String {
        match self {
            BackendError::Transport(_) | BackendError::Decode(_) => {
                "Could not reach the payment service. Please try again".to_string()
            }
            BackendError::Http { message, .. } => message.clone(),
            BackendError::Payment(e) => e.user_message(),
        }
    }
}

#[async_trait]
pub trait PaymentBackend: Send + Sync {
    async fn initiate(
        &self,
        request: InitiatePaymentRequest,
    ) -> Result<InitiatePaymentResponse, BackendError>;

    async fn check_status(
        &self,
        checkout_request_id: &str,
    ) -> Result<StatusQueryResponse, BackendError>;
}

/// Calls the services directly.
pub struct InProcessBackend {
    initiator: Arc<PaymentInitiator>,
    resolver: Arc<StatusResolver>,
}

impl InProcessBackend {
    pub fn new(initiator: Arc<PaymentInitiator>, resolver: Arc<StatusResolver>) -> Self {
        Self {
            initiator,
            resolver,
        }
    }
}

#[async_trait]
impl PaymentBackend for InProcessBackend {
    async fn initiate(
        &self,
        request: InitiatePaymentRequest,
    ) -> Result<InitiatePaymentResponse, BackendError> {
        let ids = self.initiator.initiate(&request).await?;
        Ok(InitiatePaymentResponse::accepted(ids))
    }

    async fn check_status(
        &self,
        checkout_request_id: &str,
    ) -> Result<StatusQueryResponse, BackendError> {
        let resolved = self.resolver.resolve(checkout_request_id).await?;
        Ok(StatusQueryResponse::from_resolved(resolved))
    }
}

/// Calls `/api/mpesa/*` on a running server.
pub struct HttpPaymentBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPaymentBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, BackendError>
    where
        B: serde::Serialize + Sync,
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        if !status.is_success() {
            // Error bodies carry a user-facing `message`.
            let message = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
                .unwrap_or_else(|| format!("request failed with HTTP {}", status.as_u16()));
            return Err(BackendError::Http {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&text).map_err(|e| BackendError::Decode(e.to_string()))
    }
}

#[async_trait]
impl PaymentBackend for HttpPaymentBackend {
    async fn initiate(
        &self,
        request: InitiatePaymentRequest,
    ) -> Result<InitiatePaymentResponse, BackendError> {
        self.post("/api/mpesa/stk-push", &request).await
    }

    async fn check_status(
        &self,
        checkout_request_id: &str,
    ) -> Result<StatusQueryResponse, BackendError> {
        let request = StatusQueryRequest {
            checkout_request_id: Some(checkout_request_id.to_string()),
        };
        self.post("/api/mpesa/query-status", &request).await
    }
}
