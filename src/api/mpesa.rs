use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{AppError, AppErrorKind, AppResult, ValidationError};
use crate::middleware::error::get_request_id_from_headers;
use crate::payments::types::{
    InitiatePaymentRequest, InitiatePaymentResponse, StatusQueryRequest, StatusQueryResponse,
};
use crate::services::callback_receiver::{CallbackAck, CallbackError, CallbackReceiver};
use crate::services::payment_initiator::PaymentInitiator;
use crate::services::status_resolver::StatusResolver;

#[derive(Clone)]
pub struct MpesaState {
    pub initiator: Arc<PaymentInitiator>,
    pub resolver: Arc<StatusResolver>,
    pub callback_receiver: Arc<CallbackReceiver>,
}

pub fn mpesa_routes(state: MpesaState) -> Router {
    Router::new()
        .route("/stk-push", post(initiate_stk_push))
        .route("/query-status", post(query_status))
        .route("/callback", post(handle_callback))
        .with_state(state)
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> AppResult<T> {
    serde_json::from_slice(body).map_err(|e| {
        AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: "body".to_string(),
            reason: format!("invalid JSON: {}", e),
        }))
    })
}

fn attach(err: AppError, request_id: &Option<String>) -> AppError {
    match request_id {
        Some(id) => err.with_request_id(id.clone()),
        None => err,
    }
}

/// POST /api/mpesa/stk-push
pub async fn initiate_stk_push(
    State(state): State<MpesaState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<InitiatePaymentResponse>> {
    let request_id = get_request_id_from_headers(&headers);
    let request: InitiatePaymentRequest =
        parse_body(&body).map_err(|e| attach(e, &request_id))?;

    if request.phone_number.as_deref().map_or(true, |p| p.trim().is_empty()) {
        return Err(attach(AppError::missing_field("phoneNumber"), &request_id));
    }
    if request.amount.is_none() {
        return Err(attach(AppError::missing_field("amount"), &request_id));
    }
    // Required on the wire, then replaced by the configured reference.
    if request
        .account_reference
        .as_deref()
        .map_or(true, |r| r.trim().is_empty())
    {
        return Err(attach(AppError::missing_field("accountReference"), &request_id));
    }

    let ids = state
        .initiator
        .initiate(&request)
        .await
        .map_err(|e| attach(AppError::from(e).with_context("stk-push"), &request_id))?;

    Ok(Json(InitiatePaymentResponse::accepted(ids)))
}

/// POST /api/mpesa/query-status
pub async fn query_status(
    State(state): State<MpesaState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<StatusQueryResponse>> {
    let request_id = get_request_id_from_headers(&headers);
    let request: StatusQueryRequest = parse_body(&body).map_err(|e| attach(e, &request_id))?;

    let checkout_request_id = request
        .checkout_request_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| attach(AppError::missing_field("checkoutRequestId"), &request_id))?;

    let resolved = state
        .resolver
        .resolve(&checkout_request_id)
        .await
        .map_err(|e| attach(AppError::from(e).with_context("query-status"), &request_id))?;

    Ok(Json(StatusQueryResponse::from_resolved(resolved)))
}

/// POST /api/mpesa/callback
///
/// Always answers 200 with the accepted ack; Daraja retries anything else.
pub async fn handle_callback(State(state): State<MpesaState>, body: Bytes) -> impl IntoResponse {
    match state.callback_receiver.receive(&body).await {
        Ok(record) => {
            info!(
                checkout_request_id = %record.checkout_request_id,
                "Callback acknowledged"
            );
        }
        Err(CallbackError::Malformed(reason)) => {
            warn!(reason = %reason, bytes = body.len(), "Malformed M-Pesa callback acknowledged");
        }
        Err(e @ CallbackError::Persistence(_)) => {
            error!(error = %e, "M-Pesa callback not stored, acknowledging anyway");
        }
    }

    (StatusCode::OK, Json(CallbackAck::accepted()))
}
