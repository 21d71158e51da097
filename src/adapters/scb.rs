//! SCB adapter. Webhook signatures are HMAC-SHA256 hex; when the optional
//! `X-SCB-Timestamp` and `X-SCB-Request-ID` headers are present the signed
//! string is `"{timestamp}.{requestId}.{body}"` (with a freshness window on
//! the timestamp), otherwise the body alone.

use {
    super::{
        AdapterConfig, AuthorizeOutcome, AuthorizeRequest, ParsedWebhook, ProviderAdapter,
        ProviderPaymentStatus, ProviderRefundOutcome, ProviderRefundRequest, ProviderRefundStatus,
        StatusOutcome, WebhookContext, WebhookKind, read_json_response,
        signature::{constant_time_eq, hmac_sha256_hex, is_fresh},
        transport_error,
    },
    crate::domain::error::GatewayError,
    async_trait::async_trait,
    chrono::Utc,
    serde_json::json,
};

pub struct ScbAdapter {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ScbAdapter {
    pub fn new(config: AdapterConfig) -> Result<Self, GatewayError> {
        let api_key = config.credential("api_key")?.to_string();
        Ok(Self {
            http: config.http,
            base_url: config.base_url,
            api_key,
        })
    }
}

fn payment_status(s: &str) -> ProviderPaymentStatus {
    match s {
        "CONFIRMED" | "PAID" => ProviderPaymentStatus::Succeeded,
        "CANCELLED" | "EXPIRED" | "FAILED" => ProviderPaymentStatus::Failed,
        "CREATED" => ProviderPaymentStatus::Created,
        "PENDING" | "AUTHORIZED" => ProviderPaymentStatus::Processing,
        other => {
            tracing::warn!(status = other, "unknown scb payment status, treating as pending");
            ProviderPaymentStatus::Pending
        }
    }
}

#[async_trait]
impl ProviderAdapter for ScbAdapter {
    fn name(&self) -> &'static str {
        "scb"
    }

    async fn authorize(
        &self,
        request: &AuthorizeRequest,
    ) -> Result<AuthorizeOutcome, GatewayError> {
        let response = self
            .http
            .post(format!("{}/v1/payments", self.base_url))
            .header("apikey", &self.api_key)
            .header("requestUId", &request.idempotency_key)
            .json(&json!({
                "amount": request.amount.to_decimal_string(),
                "currencyCode": request.currency.as_str(),
                "orderId": request.order_id,
                "customerId": request.customer_id,
                "description": request.description,
                "reference": request.reference.to_string(),
                "redirectUrl": request.return_url,
                "cancelUrl": request.cancel_url,
            }))
            .send()
            .await
            .map_err(transport_error)?;
        let body = read_json_response(response).await?;

        let id = body
            .get("paymentId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::ProviderUnavailable("scb response missing paymentId".into()))?
            .to_string();
        let status =
            payment_status(body.get("status").and_then(|v| v.as_str()).unwrap_or("CREATED"));

        Ok(AuthorizeOutcome {
            provider_transaction_id: id,
            status,
            payment_url: body
                .get("paymentUrl")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            raw_response: body,
        })
    }

    async fn get_status(
        &self,
        provider_transaction_id: &str,
    ) -> Result<StatusOutcome, GatewayError> {
        let response = self
            .http
            .get(format!(
                "{}/v1/payments/{provider_transaction_id}",
                self.base_url
            ))
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(transport_error)?;
        let body = read_json_response(response).await?;

        let status =
            payment_status(body.get("status").and_then(|v| v.as_str()).unwrap_or("PENDING"));
        Ok(StatusOutcome {
            status,
            error_message: body
                .get("statusDescription")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            completed_at: status.is_settled_success().then(Utc::now),
        })
    }

    async fn refund(
        &self,
        request: &ProviderRefundRequest,
    ) -> Result<ProviderRefundOutcome, GatewayError> {
        let response = self
            .http
            .post(format!(
                "{}/v1/payments/{}/refunds",
                self.base_url, request.provider_transaction_id
            ))
            .header("apikey", &self.api_key)
            .header("requestUId", &request.idempotency_key)
            .json(&json!({
                "amount": request.amount.to_decimal_string(),
                "currencyCode": request.currency.as_str(),
                "reason": request.reason,
            }))
            .send()
            .await
            .map_err(transport_error)?;
        let body = read_json_response(response).await?;

        let id = body
            .get("refundId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::ProviderUnavailable("scb response missing refundId".into()))?
            .to_string();
        let status = match body.get("status").and_then(|v| v.as_str()) {
            Some("COMPLETED") | Some("SUCCESS") => ProviderRefundStatus::Succeeded,
            Some("FAILED") => ProviderRefundStatus::Failed,
            _ => ProviderRefundStatus::Pending,
        };

        Ok(ProviderRefundOutcome {
            provider_refund_id: id,
            status,
            raw_response: body,
        })
    }

    async fn verify_webhook(
        &self,
        ctx: &WebhookContext,
        body: &str,
        secret: &str,
    ) -> Result<bool, GatewayError> {
        let Some(provided) = ctx.header("X-SCB-Signature") else {
            return Ok(false);
        };

        let signed = match (ctx.header("X-SCB-Timestamp"), ctx.header("X-SCB-Request-ID")) {
            (Some(timestamp), Some(request_id)) => {
                let Ok(ts) = timestamp.parse::<i64>() else {
                    return Ok(false);
                };
                if !is_fresh(ts, Utc::now().timestamp()) {
                    return Ok(false);
                }
                format!("{timestamp}.{request_id}.{body}")
            }
            _ => body.to_string(),
        };

        let computed = hmac_sha256_hex(secret.as_bytes(), signed.as_bytes());
        Ok(constant_time_eq(computed.as_bytes(), provided.as_bytes()))
    }

    fn parse_webhook(&self, body: &str) -> Result<ParsedWebhook, GatewayError> {
        let payload: serde_json::Value = serde_json::from_str(body)?;

        let provider_event_id = payload
            .get("eventId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::Validation("scb event missing eventId".into()))?
            .to_string();
        let event_type = payload
            .get("eventType")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let payment_id = payload
            .get("paymentId")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let refund_id = payload
            .get("refundId")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let status = payload.get("status").and_then(|v| v.as_str()).unwrap_or("");

        let kind = match (refund_id, payment_id) {
            (Some(refund_id), payment_id) => WebhookKind::Refund {
                provider_refund_id: refund_id,
                provider_transaction_id: payment_id,
                status: match status {
                    "COMPLETED" | "SUCCESS" => ProviderRefundStatus::Succeeded,
                    "FAILED" => ProviderRefundStatus::Failed,
                    _ => ProviderRefundStatus::Pending,
                },
            },
            (None, Some(payment_id)) => WebhookKind::Payment {
                provider_transaction_id: payment_id,
                status: payment_status(status),
            },
            (None, None) => WebhookKind::Unrecognized,
        };

        Ok(ParsedWebhook {
            provider_event_id,
            event_type,
            payload,
            kind,
        })
    }
}
