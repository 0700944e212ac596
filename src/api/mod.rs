pub mod mpesa;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use http::HeaderValue;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::config::ServerConfig;
use crate::health::{HealthChecker, HealthStatus};
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};

pub use mpesa::{mpesa_routes, MpesaState};

pub fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.allows_any_origin() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn health(State(checker): State<HealthChecker>) -> (StatusCode, Json<HealthStatus>) {
    let status = checker.check_health().await;
    if status.is_ready() {
        (StatusCode::OK, Json(status))
    } else {
        error!("Health check failed - service unhealthy");
        (StatusCode::SERVICE_UNAVAILABLE, Json(status))
    }
}

async fn liveness() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "alive" }))
}

pub fn health_routes(checker: HealthChecker) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(health))
        .route("/health/live", get(liveness))
        .with_state(checker)
}

/// Full application router with request-id, logging, tracing and CORS layers.
pub fn router(mpesa: MpesaState, checker: HealthChecker, config: &ServerConfig) -> Router {
    Router::new()
        .nest("/api/mpesa", mpesa_routes(mpesa))
        .merge(health_routes(checker))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(cors_layer(config)),
        )
}
