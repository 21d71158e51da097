//! Omise adapter: charges API with basic-auth secret key. Webhooks carry an
//! HMAC-SHA256 base64 signature over the body, with Omise's published
//! source addresses as an additional trust anchor.

use {
    super::{
        AdapterConfig, AuthorizeOutcome, AuthorizeRequest, ParsedWebhook, ProviderAdapter,
        ProviderPaymentStatus, ProviderRefundOutcome, ProviderRefundRequest, ProviderRefundStatus,
        StatusOutcome, WebhookContext, WebhookKind, read_json_response,
        signature::{IpAllowList, constant_time_eq, hmac_sha256_base64},
        transport_error,
    },
    crate::domain::error::GatewayError,
    async_trait::async_trait,
    chrono::Utc,
    serde_json::json,
};

/// Published webhook egress addresses; exact hosts plus three /16 ranges.
const WEBHOOK_SOURCES_EXACT: [&str; 4] =
    ["52.74.54.30", "52.74.55.10", "54.169.160.70", "54.169.161.50"];
const WEBHOOK_SOURCES_CIDR: [&str; 3] = ["52.74.0.0/16", "54.169.0.0/16", "13.228.0.0/16"];

pub struct OmiseAdapter {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
    allow_list: IpAllowList,
}

impl OmiseAdapter {
    pub fn new(config: AdapterConfig) -> Result<Self, GatewayError> {
        let secret_key = config.credential("secret_key")?.to_string();
        Ok(Self {
            http: config.http,
            base_url: config.base_url,
            secret_key,
            allow_list: IpAllowList::new(&WEBHOOK_SOURCES_EXACT, &WEBHOOK_SOURCES_CIDR),
        })
    }
}

fn charge_status(s: &str) -> ProviderPaymentStatus {
    match s {
        "successful" => ProviderPaymentStatus::Succeeded,
        "failed" | "expired" | "reversed" => ProviderPaymentStatus::Failed,
        "pending" => ProviderPaymentStatus::Pending,
        other => {
            tracing::warn!(status = other, "unknown omise charge status, treating as pending");
            ProviderPaymentStatus::Pending
        }
    }
}

#[async_trait]
impl ProviderAdapter for OmiseAdapter {
    fn name(&self) -> &'static str {
        "omise"
    }

    async fn authorize(
        &self,
        request: &AuthorizeRequest,
    ) -> Result<AuthorizeOutcome, GatewayError> {
        let response = self
            .http
            .post(format!("{}/charges", self.base_url))
            .basic_auth(&self.secret_key, None::<&str>)
            .json(&json!({
                "amount": request.amount.minor_units(),
                "currency": request.currency.as_str().to_ascii_lowercase(),
                "description": request.description,
                "return_uri": request.return_url,
                "metadata": {
                    "order_id": request.order_id,
                    "customer_id": request.customer_id,
                    "reference": request.reference.to_string(),
                },
            }))
            .send()
            .await
            .map_err(transport_error)?;
        let body = read_json_response(response).await?;

        let id = body
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::ProviderUnavailable("omise charge response missing id".into()))?
            .to_string();
        let status = charge_status(body.get("status").and_then(|v| v.as_str()).unwrap_or("pending"));
        let payment_url = body
            .get("authorize_uri")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Ok(AuthorizeOutcome {
            provider_transaction_id: id,
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
            .get(format!("{}/charges/{provider_transaction_id}", self.base_url))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(transport_error)?;
        let body = read_json_response(response).await?;

        let status = charge_status(body.get("status").and_then(|v| v.as_str()).unwrap_or("pending"));
        Ok(StatusOutcome {
            status,
            error_message: body
                .get("failure_message")
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
                "{}/charges/{}/refunds",
                self.base_url, request.provider_transaction_id
            ))
            .basic_auth(&self.secret_key, None::<&str>)
            .json(&json!({
                "amount": request.amount.minor_units(),
                "metadata": {"reference": request.reference.to_string()},
            }))
            .send()
            .await
            .map_err(transport_error)?;
        let body = read_json_response(response).await?;

        let id = body
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::ProviderUnavailable("omise refund response missing id".into()))?
            .to_string();

        // A created refund object is settled on Omise's side.
        Ok(ProviderRefundOutcome {
            provider_refund_id: id,
            status: ProviderRefundStatus::Succeeded,
            raw_response: body,
        })
    }

    async fn verify_webhook(
        &self,
        ctx: &WebhookContext,
        body: &str,
        secret: &str,
    ) -> Result<bool, GatewayError> {
        if let Some(ip) = ctx.source_ip {
            if !self.allow_list.contains(ip) {
                return Ok(false);
            }
        }
        let Some(provided) = ctx.header("X-Omise-Signature") else {
            return Ok(false);
        };
        let computed = hmac_sha256_base64(secret.as_bytes(), body.as_bytes());
        Ok(constant_time_eq(computed.as_bytes(), provided.as_bytes()))
    }

    fn parse_webhook(&self, body: &str) -> Result<ParsedWebhook, GatewayError> {
        let payload: serde_json::Value = serde_json::from_str(body)?;

        let provider_event_id = payload
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::Validation("omise event missing id".into()))?
            .to_string();
        let event_type = payload
            .get("key")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let data = payload.get("data").cloned().unwrap_or_default();
        let object_kind = data.get("object").and_then(|v| v.as_str()).unwrap_or("");
        let object_id = data.get("id").and_then(|v| v.as_str()).map(str::to_string);

        let kind = match (object_kind, object_id) {
            ("charge", Some(id)) => WebhookKind::Payment {
                provider_transaction_id: id,
                status: charge_status(data.get("status").and_then(|v| v.as_str()).unwrap_or("pending")),
            },
            ("refund", Some(id)) => WebhookKind::Refund {
                provider_refund_id: id,
                provider_transaction_id: data
                    .get("charge")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                status: ProviderRefundStatus::Succeeded,
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

    fn adapter() -> OmiseAdapter {
        OmiseAdapter::new(AdapterConfig {
            http: reqwest::Client::new(),
            base_url: "https://api.omise.co".into(),
            credentials: BTreeMap::from([
                ("secret_key".to_string(), "skey_test".to_string()),
            ]),
        })
        .unwrap()
    }

    fn ctx(signature: Option<&str>, ip: Option<&str>) -> WebhookContext {
        let mut headers = std::collections::HashMap::new();
        if let Some(sig) = signature {
            headers.insert("X-Omise-Signature".to_string(), sig.to_string());
        }
        WebhookContext::new(headers, ip.map(|s| s.parse().unwrap()))
    }

    #[tokio::test]
    async fn verify_checks_signature_and_source_ip() {
        let a = adapter();
        let body = r#"{"id":"evnt_1"}"#;
        let sig = hmac_sha256_base64(b"whsec", body.as_bytes());

        // Good signature from an allow-listed /16.
        assert!(a.verify_webhook(&ctx(Some(&sig), Some("52.74.99.99")), body, "whsec").await.unwrap());
        // Good signature from an exact-listed host.
        assert!(a.verify_webhook(&ctx(Some(&sig), Some("54.169.160.70")), body, "whsec").await.unwrap());
        // Good signature, wrong source.
        assert!(!a.verify_webhook(&ctx(Some(&sig), Some("8.8.8.8")), body, "whsec").await.unwrap());
        // Allow-listed source, bad signature.
        assert!(!a.verify_webhook(&ctx(Some("AAAA"), Some("52.74.99.99")), body, "whsec").await.unwrap());
        // No signature header at all.
        assert!(!a.verify_webhook(&ctx(None, Some("52.74.99.99")), body, "whsec").await.unwrap());
        // No source information: signature alone decides.
        assert!(a.verify_webhook(&ctx(Some(&sig), None), body, "whsec").await.unwrap());
    }

    #[test]
    fn parse_charge_complete() {
        let a = adapter();
        let body = r#"{
            "id": "evnt_9",
            "key": "charge.complete",
            "data": {"object": "charge", "id": "chrg_3", "status": "successful"}
        }"#;
        let parsed = a.parse_webhook(body).unwrap();
        assert_eq!(parsed.event_type, "charge.complete");
        match parsed.kind {
            WebhookKind::Payment { provider_transaction_id, status } => {
                assert_eq!(provider_transaction_id, "chrg_3");
                assert_eq!(status, ProviderPaymentStatus::Succeeded);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn parse_refund_links_charge() {
        let a = adapter();
        let body = r#"{
            "id": "evnt_10",
            "key": "refund.create",
            "data": {"object": "refund", "id": "rfnd_2", "charge": "chrg_3"}
        }"#;
        let parsed = a.parse_webhook(body).unwrap();
        match parsed.kind {
            WebhookKind::Refund { provider_refund_id, provider_transaction_id, .. } => {
                assert_eq!(provider_refund_id, "rfnd_2");
                assert_eq!(provider_transaction_id.as_deref(), Some("chrg_3"));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }
}
