//! Stripe adapter: PaymentIntents over the form-encoded REST API, webhook
//! authenticity via `Stripe-Signature` (HMAC-SHA256 over `"{t}.{body}"`
//! with a freshness window).

use {
    super::{
        AdapterConfig, AuthorizeOutcome, AuthorizeRequest, ParsedWebhook, ProviderAdapter,
        ProviderPaymentStatus, ProviderRefundOutcome, ProviderRefundRequest, ProviderRefundStatus,
        StatusOutcome, WebhookContext, WebhookKind, read_json_response,
        signature::{constant_time_eq, hmac_sha256_hex, is_fresh, parse_stripe_signature},
        transport_error,
    },
    crate::domain::error::GatewayError,
    async_trait::async_trait,
    chrono::Utc,
};

pub struct StripeAdapter {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl StripeAdapter {
    pub fn new(config: AdapterConfig) -> Result<Self, GatewayError> {
        let secret_key = config.credential("secret_key")?.to_string();
        Ok(Self {
            http: config.http,
            base_url: config.base_url,
            secret_key,
        })
    }
}

fn payment_status(s: &str) -> ProviderPaymentStatus {
    match s {
        "succeeded" => ProviderPaymentStatus::Succeeded,
        "processing" => ProviderPaymentStatus::Processing,
        "canceled" => ProviderPaymentStatus::Failed,
        "requires_action"
        | "requires_capture"
        | "requires_confirmation"
        | "requires_payment_method" => ProviderPaymentStatus::Pending,
        other => {
            tracing::warn!(status = other, "unknown stripe payment status, treating as pending");
            ProviderPaymentStatus::Pending
        }
    }
}

fn refund_status(s: &str) -> ProviderRefundStatus {
    match s {
        "succeeded" => ProviderRefundStatus::Succeeded,
        "failed" | "canceled" => ProviderRefundStatus::Failed,
        _ => ProviderRefundStatus::Pending,
    }
}

fn field<'a>(body: &'a serde_json::Value, name: &str) -> Result<&'a str, GatewayError> {
    body.get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| GatewayError::ProviderUnavailable(format!("stripe response missing {name}")))
}

#[async_trait]
impl ProviderAdapter for StripeAdapter {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn authorize(
        &self,
        request: &AuthorizeRequest,
    ) -> Result<AuthorizeOutcome, GatewayError> {
        let mut form: Vec<(String, String)> = vec![
            ("amount".into(), request.amount.minor_units().to_string()),
            ("currency".into(), request.currency.as_str().to_ascii_lowercase()),
            ("metadata[order_id]".into(), request.order_id.clone()),
            ("metadata[customer_id]".into(), request.customer_id.clone()),
            ("metadata[reference]".into(), request.reference.to_string()),
        ];
        if let Some(description) = &request.description {
            form.push(("description".into(), description.clone()));
        }
        for (k, v) in &request.metadata {
            form.push((format!("metadata[{k}]"), v.clone()));
        }

        let response = self
            .http
            .post(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&form)
            .send()
            .await
            .map_err(transport_error)?;
        let body = read_json_response(response).await?;

        let status = payment_status(field(&body, "status")?);
        let payment_url = body
            .pointer("/next_action/redirect_to_url/url")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Ok(AuthorizeOutcome {
            provider_transaction_id: field(&body, "id")?.to_string(),
            status,
            payment_url,
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
                "{}/v1/payment_intents/{provider_transaction_id}",
                self.base_url
            ))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(transport_error)?;
        let body = read_json_response(response).await?;

        let status = payment_status(field(&body, "status")?);
        let error_message = body
            .pointer("/last_payment_error/message")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Ok(StatusOutcome {
            status,
            error_message,
            completed_at: status.is_settled_success().then(Utc::now),
        })
    }

    async fn refund(
        &self,
        request: &ProviderRefundRequest,
    ) -> Result<ProviderRefundOutcome, GatewayError> {
        let mut form: Vec<(String, String)> = vec![
            ("payment_intent".into(), request.provider_transaction_id.clone()),
            ("amount".into(), request.amount.minor_units().to_string()),
            ("metadata[reference]".into(), request.reference.to_string()),
        ];
        if let Some(reason) = &request.reason {
            form.push(("metadata[reason]".into(), reason.clone()));
        }

        let response = self
            .http
            .post(format!("{}/v1/refunds", self.base_url))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&form)
            .send()
            .await
            .map_err(transport_error)?;
        let body = read_json_response(response).await?;

        let status = body
            .get("status")
            .and_then(|v| v.as_str())
            .map(refund_status)
            .unwrap_or(ProviderRefundStatus::Pending);

        Ok(ProviderRefundOutcome {
            provider_refund_id: field(&body, "id")?.to_string(),
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
        let Some(header) = ctx.header("Stripe-Signature") else {
            return Ok(false);
        };
        let Some((timestamp, expected)) = parse_stripe_signature(header) else {
            return Ok(false);
        };
        if !is_fresh(timestamp, Utc::now().timestamp()) {
            return Ok(false);
        }
        let signed_payload = format!("{timestamp}.{body}");
        let computed = hmac_sha256_hex(secret.as_bytes(), signed_payload.as_bytes());
        Ok(constant_time_eq(computed.as_bytes(), expected.as_bytes()))
    }

    fn parse_webhook(&self, body: &str) -> Result<ParsedWebhook, GatewayError> {
        let payload: serde_json::Value = serde_json::from_str(body)?;

        let provider_event_id = payload
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::Validation("stripe event missing id".into()))?
            .to_string();
        let event_type = payload
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let object = payload.pointer("/data/object").cloned().unwrap_or_default();
        let object_kind = object.get("object").and_then(|v| v.as_str()).unwrap_or("");
        let object_id = object.get("id").and_then(|v| v.as_str()).map(str::to_string);
        let object_status = object.get("status").and_then(|v| v.as_str());

        let kind = match (object_kind, object_id) {
            ("payment_intent", Some(id)) => WebhookKind::Payment {
                provider_transaction_id: id,
                status: payment_status(object_status.unwrap_or("requires_payment_method")),
            },
            ("refund", Some(id)) => WebhookKind::Refund {
                provider_refund_id: id,
                provider_transaction_id: object
                    .get("payment_intent")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                status: refund_status(object_status.unwrap_or("pending")),
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn adapter() -> StripeAdapter {
        StripeAdapter::new(AdapterConfig {
            http: reqwest::Client::new(),
            base_url: "https://api.stripe.com".into(),
            credentials: BTreeMap::from([
                ("secret_key".to_string(), "sk_test_xyz".to_string()),
            ]),
        })
        .unwrap()
    }

    fn signed(body: &str, secret: &str, timestamp: i64) -> String {
        let sig = hmac_sha256_hex(secret.as_bytes(), format!("{timestamp}.{body}").as_bytes());
        format!("t={timestamp},v1={sig}")
    }

    fn ctx_with_signature(header: &str) -> WebhookContext {
        WebhookContext::new(
            [("Stripe-Signature".to_string(), header.to_string())].into(),
            None,
        )
    }

    #[tokio::test]
    async fn verify_accepts_valid_fresh_signature() {
        let a = adapter();
        let body = r#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;
        let header = signed(body, "whsec_abc", Utc::now().timestamp());
        assert!(a.verify_webhook(&ctx_with_signature(&header), body, "whsec_abc").await.unwrap());
    }

    #[tokio::test]
    async fn verify_rejects_stale_timestamp() {
        let a = adapter();
        let body = "{}";
        let header = signed(body, "whsec_abc", Utc::now().timestamp() - 600);
        assert!(!a.verify_webhook(&ctx_with_signature(&header), body, "whsec_abc").await.unwrap());
    }

    #[tokio::test]
    async fn verify_rejects_wrong_secret_and_missing_header() {
        let a = adapter();
        let body = "{}";
        let header = signed(body, "whsec_other", Utc::now().timestamp());
        assert!(!a.verify_webhook(&ctx_with_signature(&header), body, "whsec_abc").await.unwrap());
        assert!(!a.verify_webhook(&WebhookContext::default(), body, "whsec_abc").await.unwrap());
    }

    #[test]
    fn parse_payment_intent_event() {
        let a = adapter();
        let body = r#"{
            "id": "evt_42",
            "type": "payment_intent.succeeded",
            "data": {"object": {"object": "payment_intent", "id": "pi_9", "status": "succeeded"}}
        }"#;
        let parsed = a.parse_webhook(body).unwrap();
        assert_eq!(parsed.provider_event_id, "evt_42");
        assert_eq!(parsed.event_type, "payment_intent.succeeded");
        match parsed.kind {
            WebhookKind::Payment { provider_transaction_id, status } => {
                assert_eq!(provider_transaction_id, "pi_9");
                assert_eq!(status, ProviderPaymentStatus::Succeeded);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn parse_refund_event_links_parent() {
        let a = adapter();
        let body = r#"{
            "id": "evt_43",
            "type": "refund.updated",
            "data": {"object": {"object": "refund", "id": "re_7", "status": "succeeded",
                                "payment_intent": "pi_9"}}
        }"#;
        let parsed = a.parse_webhook(body).unwrap();
        match parsed.kind {
            WebhookKind::Refund { provider_refund_id, provider_transaction_id, status } => {
                assert_eq!(provider_refund_id, "re_7");
                assert_eq!(provider_transaction_id.as_deref(), Some("pi_9"));
                assert_eq!(status, ProviderRefundStatus::Succeeded);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn parse_unknown_object_is_unrecognized() {
        let a = adapter();
        let body = r#"{"id":"evt_44","type":"charge.updated",
                       "data":{"object":{"object":"charge","id":"ch_1"}}}"#;
        let parsed = a.parse_webhook(body).unwrap();
        assert!(matches!(parsed.kind, WebhookKind::Unrecognized));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(payment_status("succeeded"), ProviderPaymentStatus::Succeeded);
        assert_eq!(payment_status("processing"), ProviderPaymentStatus::Processing);
        assert_eq!(payment_status("canceled"), ProviderPaymentStatus::Failed);
        assert_eq!(payment_status("requires_action"), ProviderPaymentStatus::Pending);
        assert_eq!(payment_status("???"), ProviderPaymentStatus::Pending);
    }
}
