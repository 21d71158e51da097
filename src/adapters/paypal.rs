//! PayPal adapter: Orders v2 over OAuth2 client credentials. Webhook
//! authenticity is delegated to PayPal's verify-webhook-signature endpoint
//! after a local precheck (all transmission headers present, certificate
//! URL host on the PayPal allow-list).

use {
    super::{
        AdapterConfig, AuthorizeOutcome, AuthorizeRequest, ParsedWebhook, ProviderAdapter,
        ProviderPaymentStatus, ProviderRefundOutcome, ProviderRefundRequest, ProviderRefundStatus,
        StatusOutcome, WebhookContext, WebhookKind, read_json_response, transport_error,
    },
    crate::domain::error::GatewayError,
    async_trait::async_trait,
    chrono::Utc,
    serde_json::json,
};

const TRANSMISSION_HEADERS: [&str; 5] = [
    "paypal-transmission-id",
    "paypal-transmission-time",
    "paypal-transmission-sig",
    "paypal-cert-url",
    "paypal-auth-algo",
];

const CERT_HOSTS: [&str; 4] = [
    "api.paypal.com",
    "api-m.paypal.com",
    "api.sandbox.paypal.com",
    "api-m.sandbox.paypal.com",
];

pub struct PayPalAdapter {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    webhook_id: String,
}

impl PayPalAdapter {
    pub fn new(config: AdapterConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            client_id: config.credential("client_id")?.to_string(),
            client_secret: config.credential("client_secret")?.to_string(),
            webhook_id: config.credential("webhook_id")?.to_string(),
            http: config.http,
            base_url: config.base_url,
        })
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(transport_error)?;
        let body = read_json_response(response).await?;
        body.get("access_token")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| GatewayError::ProviderUnavailable("paypal token response missing access_token".into()))
    }
}

fn order_status(s: &str) -> ProviderPaymentStatus {
    match s {
        "CREATED" => ProviderPaymentStatus::Created,
        "SAVED" | "PAYER_ACTION_REQUIRED" => ProviderPaymentStatus::Pending,
        "APPROVED" => ProviderPaymentStatus::Processing,
        "COMPLETED" => ProviderPaymentStatus::Succeeded,
        "VOIDED" => ProviderPaymentStatus::Failed,
        other => {
            tracing::warn!(status = other, "unknown paypal order status, treating as pending");
            ProviderPaymentStatus::Pending
        }
    }
}

fn cert_host_allowed(cert_url: &str) -> bool {
    let Some(rest) = cert_url.strip_prefix("https://") else {
        return false;
    };
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    let host = host.split(':').next().unwrap_or("");
    CERT_HOSTS.contains(&host)
}

fn approve_link(body: &serde_json::Value) -> Option<String> {
    body.get("links")?
        .as_array()?
        .iter()
        .find(|link| link.get("rel").and_then(|r| r.as_str()) == Some("approve"))?
        .get("href")?
        .as_str()
        .map(str::to_string)
}

#[async_trait]
impl ProviderAdapter for PayPalAdapter {
    fn name(&self) -> &'static str {
        "paypal"
    }

    async fn authorize(
        &self,
        request: &AuthorizeRequest,
    ) -> Result<AuthorizeOutcome, GatewayError> {
        let token = self.access_token().await?;
        let order = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": request.reference.to_string(),
                "custom_id": request.order_id,
                "description": request.description,
                "amount": {
                    "currency_code": request.currency.as_str(),
                    "value": request.amount.to_decimal_string(),
                },
            }],
            "application_context": {
                "return_url": request.return_url,
                "cancel_url": request.cancel_url,
            },
        });

        let response = self
            .http
            .post(format!("{}/v2/checkout/orders", self.base_url))
            .bearer_auth(&token)
            .header("PayPal-Request-Id", &request.idempotency_key)
            .json(&order)
            .send()
            .await
            .map_err(transport_error)?;
        let body = read_json_response(response).await?;

        let id = body
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::ProviderUnavailable("paypal order response missing id".into()))?
            .to_string();
        let status = order_status(body.get("status").and_then(|v| v.as_str()).unwrap_or("CREATED"));

        Ok(AuthorizeOutcome {
            provider_transaction_id: id,
            status,
            payment_url: approve_link(&body),
            raw_response: body,
        })
    }

    async fn get_status(
        &self,
        provider_transaction_id: &str,
    ) -> Result<StatusOutcome, GatewayError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(format!(
                "{}/v2/checkout/orders/{provider_transaction_id}",
                self.base_url
            ))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(transport_error)?;
        let body = read_json_response(response).await?;

        let status = order_status(body.get("status").and_then(|v| v.as_str()).unwrap_or("CREATED"));
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
        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!(
                "{}/v2/payments/captures/{}/refund",
                self.base_url, request.provider_transaction_id
            ))
            .bearer_auth(&token)
            .header("PayPal-Request-Id", &request.idempotency_key)
            .json(&json!({
                "amount": {
                    "currency_code": request.currency.as_str(),
                    "value": request.amount.to_decimal_string(),
                },
                "note_to_payer": request.reason,
            }))
            .send()
            .await
            .map_err(transport_error)?;
        let body = read_json_response(response).await?;

        let id = body
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::ProviderUnavailable("paypal refund response missing id".into()))?
            .to_string();
        let status = match body.get("status").and_then(|v| v.as_str()) {
            Some("COMPLETED") => ProviderRefundStatus::Succeeded,
            Some("CANCELLED") | Some("FAILED") => ProviderRefundStatus::Failed,
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
        _secret: &str,
    ) -> Result<bool, GatewayError> {
        for header in TRANSMISSION_HEADERS {
            if ctx.header(header).is_none() {
                return Ok(false);
            }
        }
        let cert_url = ctx.header("paypal-cert-url").unwrap_or_default();
        if !cert_host_allowed(cert_url) {
            return Ok(false);
        }

        let event: serde_json::Value = serde_json::from_str(body)?;
        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!(
                "{}/v1/notifications/verify-webhook-signature",
                self.base_url
            ))
            .bearer_auth(&token)
            .json(&json!({
                "transmission_id": ctx.header("paypal-transmission-id"),
                "transmission_time": ctx.header("paypal-transmission-time"),
                "transmission_sig": ctx.header("paypal-transmission-sig"),
                "cert_url": cert_url,
                "auth_algo": ctx.header("paypal-auth-algo"),
                "webhook_id": self.webhook_id,
                "webhook_event": event,
            }))
            .send()
            .await
            .map_err(transport_error)?;
        let verdict = read_json_response(response).await?;

        Ok(verdict.get("verification_status").and_then(|v| v.as_str()) == Some("SUCCESS"))
    }

    fn parse_webhook(&self, body: &str) -> Result<ParsedWebhook, GatewayError> {
        let payload: serde_json::Value = serde_json::from_str(body)?;

        let provider_event_id = payload
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::Validation("paypal event missing id".into()))?
            .to_string();
        let event_type = payload
            .get("event_type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let resource_id = payload
            .pointer("/resource/id")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let kind = match (event_type.as_str(), resource_id) {
            ("CHECKOUT.ORDER.APPROVED", Some(id)) => WebhookKind::Payment {
                provider_transaction_id: id,
                status: ProviderPaymentStatus::Processing,
            },
            ("CHECKOUT.ORDER.COMPLETED" | "PAYMENT.CAPTURE.COMPLETED", Some(id)) => {
                WebhookKind::Payment {
                    provider_transaction_id: id,
                    status: ProviderPaymentStatus::Succeeded,
                }
            }
            ("PAYMENT.CAPTURE.DENIED" | "CHECKOUT.ORDER.VOIDED", Some(id)) => {
                WebhookKind::Payment {
                    provider_transaction_id: id,
                    status: ProviderPaymentStatus::Failed,
                }
            }
            ("PAYMENT.CAPTURE.REFUNDED", Some(id)) => WebhookKind::Refund {
                provider_refund_id: id,
                provider_transaction_id: payload
                    .pointer("/resource/links")
                    .and_then(|links| links.as_array())
                    .and_then(|links| {
                        links.iter().find_map(|link| {
                            (link.get("rel").and_then(|r| r.as_str()) == Some("up"))
                                .then(|| link.get("href")?.as_str())
                                .flatten()
                                .and_then(|href| href.rsplit('/').next())
                                .map(str::to_string)
                        })
                    }),
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

    #[test]
    fn cert_hosts_are_restricted_to_paypal() {
        assert!(cert_host_allowed("https://api.paypal.com/certs/abc"));
        assert!(cert_host_allowed("https://api-m.paypal.com/certs/abc"));
        assert!(cert_host_allowed("https://api.sandbox.paypal.com/certs/abc"));
        assert!(cert_host_allowed("https://api-m.sandbox.paypal.com/certs/abc"));

        assert!(!cert_host_allowed("https://api.paypal.com.evil.io/certs/abc"));
        assert!(!cert_host_allowed("https://evil.io/api.paypal.com"));
        assert!(!cert_host_allowed("http://api.paypal.com/certs/abc"));
        assert!(!cert_host_allowed("https://paypal.com/certs/abc"));
    }

    #[test]
    fn order_status_mapping() {
        assert_eq!(order_status("CREATED"), ProviderPaymentStatus::Created);
        assert_eq!(order_status("APPROVED"), ProviderPaymentStatus::Processing);
        assert_eq!(order_status("COMPLETED"), ProviderPaymentStatus::Succeeded);
        assert_eq!(order_status("VOIDED"), ProviderPaymentStatus::Failed);
        assert_eq!(order_status("PAYER_ACTION_REQUIRED"), ProviderPaymentStatus::Pending);
    }

    #[test]
    fn approve_link_extraction() {
        let body = serde_json::json!({
            "links": [
                {"rel": "self", "href": "https://api.paypal.com/v2/checkout/orders/1"},
                {"rel": "approve", "href": "https://www.paypal.com/checkoutnow?token=1"}
            ]
        });
        assert_eq!(
            approve_link(&body).as_deref(),
            Some("https://www.paypal.com/checkoutnow?token=1")
        );
        assert_eq!(approve_link(&serde_json::json!({"links": []})), None);
    }

    #[test]
    fn parse_capture_completed() {
        let adapter = PayPalAdapter {
            http: reqwest::Client::new(),
            base_url: "https://api-m.sandbox.paypal.com".into(),
            client_id: "cid".into(),
            client_secret: "cs".into(),
            webhook_id: "wh".into(),
        };
        let body = r#"{
            "id": "WH-2W",
            "event_type": "PAYMENT.CAPTURE.COMPLETED",
            "resource": {"id": "8XB12345", "status": "COMPLETED"}
        }"#;
        let parsed = adapter.parse_webhook(body).unwrap();
        assert_eq!(parsed.provider_event_id, "WH-2W");
        match parsed.kind {
            WebhookKind::Payment { provider_transaction_id, status } => {
                assert_eq!(provider_transaction_id, "8XB12345");
                assert_eq!(status, ProviderPaymentStatus::Succeeded);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }
}
