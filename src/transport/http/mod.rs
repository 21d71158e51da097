pub mod errors;
pub mod payments;
pub mod providers;
pub mod webhooks;

use {
    crate::AppState,
    crate::domain::id::CorrelationId,
    axum::{
        Router,
        http::{HeaderMap, HeaderValue},
        response::{IntoResponse, Response},
        routing::{get, patch, post},
    },
    std::time::Duration,
    tower_http::timeout::TimeoutLayer,
};

pub const CORRELATION_HEADER: &str = "X-Correlation-Id";
pub const CORRELATION_ECHO_HEADER: &str = "X-Correlation-ID";
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(150);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/payments", post(payments::create_payment))
        .route("/v1/payments/{id}", get(payments::get_payment))
        .route("/v1/payments/{id}/sync", post(payments::sync_payment))
        .route("/v1/payments/{id}/refund", post(payments::refund_payment))
        .route("/v1/webhooks/{provider}", post(webhooks::ingest_webhook))
        .route(
            "/v1/providers",
            get(providers::list_providers).post(providers::create_provider),
        )
        .route("/v1/providers/active", get(providers::active_providers))
        .route(
            "/v1/providers/{id}",
            get(providers::get_provider)
                .put(providers::update_provider)
                .delete(providers::delete_provider),
        )
        .route("/v1/providers/{id}/status", patch(providers::update_provider_status))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}

/// Caller-supplied correlation id, or a generated one. Echoed back via
/// `X-Correlation-ID` on every response.
pub fn correlation_from(headers: &HeaderMap) -> CorrelationId {
    CorrelationId::from_header(
        headers
            .get(CORRELATION_HEADER)
            .and_then(|v| v.to_str().ok()),
    )
}

pub fn with_correlation(correlation_id: &CorrelationId, mut response: Response) -> Response {
    if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
        response.headers_mut().insert(CORRELATION_ECHO_HEADER, value);
    }
    response
}

pub fn respond(
    status: axum::http::StatusCode,
    correlation_id: &CorrelationId,
    body: impl serde::Serialize,
) -> Response {
    let response = (status, axum::Json(body)).into_response();
    with_correlation(correlation_id, response)
}
