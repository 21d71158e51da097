use {
    super::{correlation_from, errors::ApiError, respond},
    crate::AppState,
    crate::adapters::WebhookContext,
    crate::services::webhooks::IngestOutcome,
    axum::{
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        response::Response,
    },
    std::collections::HashMap,
    std::net::IpAddr,
};

fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

/// Source address as seen by the edge proxy. First entry of
/// `X-Forwarded-For`, which the ingress sets from the TCP peer.
fn source_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
}

#[tracing::instrument(name = "webhook", skip_all, fields(provider = %provider))]
pub async fn ingest_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    let correlation_id = correlation_from(&headers);
    let path = format!("/v1/webhooks/{provider}");

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let ctx = WebhookContext::new(header_map(&headers), source_ip(&headers));

    let outcome = state
        .webhooks
        .ingest(&provider, body, ctx, user_agent)
        .await
        .map_err(|e| ApiError::new(e, correlation_id.as_str(), path.clone()))?;

    let response = match outcome {
        IngestOutcome::Accepted(event_id) => respond(
            StatusCode::ACCEPTED,
            &correlation_id,
            serde_json::json!({"status": "accepted", "eventId": event_id}),
        ),
        IngestOutcome::Duplicate => respond(
            StatusCode::OK,
            &correlation_id,
            serde_json::json!({"status": "duplicate", "is_duplicate": true}),
        ),
        IngestOutcome::SignatureInvalid => {
            return Err(ApiError::new(
                crate::domain::error::GatewayError::WebhookSignature,
                correlation_id.as_str(),
                path,
            ));
        }
        IngestOutcome::RateLimited => {
            return Err(ApiError::new(
                crate::domain::error::GatewayError::RateLimited,
                correlation_id.as_str(),
                path,
            ));
        }
    };
    Ok(response)
}
