use {
    crate::domain::error::GatewayError,
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    chrono::Utc,
};

/// Transport wrapper for the domain error: owns the HTTP mapping and the
/// standard error body `{ error, message, correlationId, timestamp, path }`.
pub struct ApiError {
    inner: GatewayError,
    correlation_id: String,
    path: String,
}

impl ApiError {
    pub fn new(inner: GatewayError, correlation_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            inner,
            correlation_id: correlation_id.into(),
            path: path.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match &self.inner {
            GatewayError::Validation(_)
            | GatewayError::IdempotencyKeyRequired
            | GatewayError::InvalidState(_)
            | GatewayError::ExcessiveAmount { .. }
            | GatewayError::WebhookSignature => StatusCode::BAD_REQUEST,

            GatewayError::IdempotencyKeyConflict
            | GatewayError::ConcurrentRequest
            | GatewayError::ConcurrentModification
            | GatewayError::InvalidStateTransition { .. } => StatusCode::CONFLICT,

            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,

            GatewayError::NoEligibleProvider(_)
            | GatewayError::ProviderUnavailable(_)
            | GatewayError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,

            GatewayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Provider { .. } => StatusCode::BAD_GATEWAY,

            GatewayError::Database(_)
            | GatewayError::Serialization(_)
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match &self.inner {
            // Internal detail never leaves the process.
            GatewayError::Database(e) => {
                tracing::error!(error = %e, "database error");
                "internal error".to_string()
            }
            GatewayError::Serialization(e) => {
                tracing::error!(error = %e, "serialization error");
                "internal error".to_string()
            }
            GatewayError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                "internal error".to_string()
            }
            // Signature rejections stay opaque by design.
            GatewayError::WebhookSignature => "webhook rejected".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({
            "error": self.inner.code(),
            "message": self.public_message(),
            "correlationId": self.correlation_id,
            "timestamp": Utc::now().to_rfc3339(),
            "path": self.path,
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: GatewayError) -> StatusCode {
        ApiError::new(err, "c-1", "/v1/payments").status()
    }

    #[test]
    fn status_mapping_follows_the_taxonomy() {
        assert_eq!(status_of(GatewayError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(GatewayError::IdempotencyKeyRequired), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(GatewayError::IdempotencyKeyConflict), StatusCode::CONFLICT);
        assert_eq!(status_of(GatewayError::ConcurrentRequest), StatusCode::CONFLICT);
        assert_eq!(status_of(GatewayError::NotFound("payment".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(GatewayError::ExcessiveAmount { requested: 2, remaining: 1 }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(GatewayError::NoEligibleProvider("ZZZ".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status_of(GatewayError::RateLimited), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_of(GatewayError::WebhookSignature), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(GatewayError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_messages_are_opaque() {
        let err = ApiError::new(
            GatewayError::Internal("connection pool exhausted".into()),
            "c-1",
            "/v1/payments",
        );
        assert_eq!(err.public_message(), "internal error");

        let sig = ApiError::new(GatewayError::WebhookSignature, "c-1", "/v1/webhooks/stripe");
        assert_eq!(sig.public_message(), "webhook rejected");
    }
}
