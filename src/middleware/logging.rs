//! Request logging and request-id middleware

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use std::future::Future;
use std::time::Instant;
use tower_http::request_id::{MakeRequestId, RequestId};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Generates a UUID v4 for every request lacking an `x-request-id`.
#[derive(Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

pub fn request_id_of(request: &Request) -> Option<String> {
    request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Logs method, path, status and latency of every request.
pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let request_id = request_id_of(&request).unwrap_or_default();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let latency_ms = started.elapsed().as_millis() as u64;
    if response.status().is_server_error() {
        error!(%request_id, %method, %path, status, latency_ms, "request failed");
    } else if response.status().is_client_error() {
        warn!(%request_id, %method, %path, status, latency_ms, "request rejected");
    } else {
        info!(%request_id, %method, %path, status, latency_ms, "request completed");
    }

    response
}

/// Time an outbound call and log its outcome.
pub async fn log_external_call<F, T, E>(service: &str, operation: &str, call: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let result = call.await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match &result {
        Ok(_) => info!(service, operation, duration_ms, "external call succeeded"),
        Err(e) => warn!(service, operation, duration_ms, error = %e, "external call failed"),
    }

    result
}
