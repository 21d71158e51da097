//! In-process provider for development and tests: no network, behavior
//! scripted through the provider's credentials. `behavior` drives
//! authorize (`succeed`, `pending`, `fail`, `unavailable`), and
//! `refund_behavior` drives refunds the same way. Webhooks are
//! authenticated with HMAC-SHA256 hex over the body.

use {
    super::{
        AdapterConfig, AuthorizeOutcome, AuthorizeRequest, ParsedWebhook, ProviderAdapter,
        ProviderPaymentStatus, ProviderRefundOutcome, ProviderRefundRequest, ProviderRefundStatus,
        StatusOutcome, WebhookContext, WebhookKind,
        signature::{constant_time_eq, hmac_sha256_hex},
    },
    crate::domain::error::GatewayError,
    async_trait::async_trait,
    chrono::Utc,
    serde_json::json,
};

pub struct SandboxAdapter {
    behavior: String,
    refund_behavior: String,
}

impl SandboxAdapter {
    pub fn new(config: AdapterConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            behavior: config
                .credentials
                .get("behavior")
                .cloned()
                .unwrap_or_else(|| "succeed".into()),
            refund_behavior: config
                .credentials
                .get("refund_behavior")
                .cloned()
                .unwrap_or_else(|| "succeed".into()),
        })
    }
}

fn payment_status(s: &str) -> ProviderPaymentStatus {
    match s {
        "succeeded" | "completed" => ProviderPaymentStatus::Succeeded,
        "failed" => ProviderPaymentStatus::Failed,
        "processing" => ProviderPaymentStatus::Processing,
        "created" => ProviderPaymentStatus::Created,
        _ => ProviderPaymentStatus::Pending,
    }
}

#[async_trait]
impl ProviderAdapter for SandboxAdapter {
    fn name(&self) -> &'static str {
        "sandbox"
    }

    async fn authorize(
        &self,
        request: &AuthorizeRequest,
    ) -> Result<AuthorizeOutcome, GatewayError> {
        let id = format!("sbx_{}", request.reference.simple());
        match self.behavior.as_str() {
            "fail" => Err(GatewayError::Provider {
                message: "card declined".into(),
                code: Some("card_declined".into()),
            }),
            "unavailable" => Err(GatewayError::ProviderUnavailable(
                "sandbox upstream unavailable".into(),
            )),
            "pending" => Ok(AuthorizeOutcome {
                provider_transaction_id: id.clone(),
                status: ProviderPaymentStatus::Pending,
                payment_url: Some(format!("https://sandbox.test/pay/{id}")),
                raw_response: json!({"id": id, "status": "pending"}),
            }),
            _ => Ok(AuthorizeOutcome {
                provider_transaction_id: id.clone(),
                status: ProviderPaymentStatus::Succeeded,
                payment_url: None,
                raw_response: json!({"id": id, "status": "succeeded"}),
            }),
        }
    }

    async fn get_status(
        &self,
        _provider_transaction_id: &str,
    ) -> Result<StatusOutcome, GatewayError> {
        // A queried sandbox payment has always settled by the time anyone
        // asks, unless the script says it failed.
        let status = match self.behavior.as_str() {
            "fail" => ProviderPaymentStatus::Failed,
            "unavailable" => {
                return Err(GatewayError::ProviderUnavailable(
                    "sandbox upstream unavailable".into(),
                ));
            }
            _ => ProviderPaymentStatus::Succeeded,
        };
        Ok(StatusOutcome {
            status,
            error_message: None,
            completed_at: status.is_settled_success().then(Utc::now),
        })
    }

    async fn refund(
        &self,
        request: &ProviderRefundRequest,
    ) -> Result<ProviderRefundOutcome, GatewayError> {
        let id = format!("sbxr_{}", request.reference.simple());
        match self.refund_behavior.as_str() {
            "fail" => Err(GatewayError::Provider {
                message: "refund rejected".into(),
                code: Some("refund_rejected".into()),
            }),
            "pending" => Ok(ProviderRefundOutcome {
                provider_refund_id: id.clone(),
                status: ProviderRefundStatus::Pending,
                raw_response: json!({"id": id, "status": "pending"}),
            }),
            _ => Ok(ProviderRefundOutcome {
                provider_refund_id: id.clone(),
                status: ProviderRefundStatus::Succeeded,
                raw_response: json!({"id": id, "status": "succeeded"}),
            }),
        }
    }

    async fn verify_webhook(
        &self,
        ctx: &WebhookContext,
        body: &str,
        secret: &str,
    ) -> Result<bool, GatewayError> {
        let Some(provided) = ctx.header("X-Sandbox-Signature") else {
            return Ok(false);
        };
        let computed = hmac_sha256_hex(secret.as_bytes(), body.as_bytes());
        Ok(constant_time_eq(computed.as_bytes(), provided.as_bytes()))
    }

    fn parse_webhook(&self, body: &str) -> Result<ParsedWebhook, GatewayError> {
        let payload: serde_json::Value = serde_json::from_str(body)?;

        let provider_event_id = payload
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::Validation("sandbox event missing id".into()))?
            .to_string();
        let event_type = payload
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let status = payload.get("status").and_then(|v| v.as_str()).unwrap_or("pending");
        let payment_id = payload
            .get("paymentId")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let refund_id = payload
            .get("refundId")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let kind = match payload.get("object").and_then(|v| v.as_str()) {
            Some("payment") => match payment_id {
                Some(id) => WebhookKind::Payment {
                    provider_transaction_id: id,
                    status: payment_status(status),
                },
                None => WebhookKind::Unrecognized,
            },
            Some("refund") => match refund_id {
                Some(id) => WebhookKind::Refund {
                    provider_refund_id: id,
                    provider_transaction_id: payment_id,
                    status: match status {
                        "succeeded" | "completed" => ProviderRefundStatus::Succeeded,
                        "failed" => ProviderRefundStatus::Failed,
                        _ => ProviderRefundStatus::Pending,
                    },
                },
                None => WebhookKind::Unrecognized,
            },
            _ => WebhookKind::Unrecognized,
        };

        Ok(ParsedWebhook {
            provider_event_id,
            event_type,
            payload,
            kind,
        })
    }
}
