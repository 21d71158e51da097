//! Provider adapter layer: one capability set over heterogeneous payment
//! services, produced by a factory keyed on `provider.name`. Adapters hold
//! no mutable cross-request state; the HTTP client, base URL, and decrypted
//! credentials are injected at construction.

pub mod omise;
pub mod paypal;
pub mod sandbox;
pub mod scb;
pub mod signature;
pub mod stripe;

use {
    crate::domain::{
        error::GatewayError,
        money::{Currency, MoneyAmount},
        provider::{Provider, RegionConfig},
    },
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    std::collections::{BTreeMap, HashMap},
    std::net::IpAddr,
    std::sync::Arc,
    uuid::Uuid,
};

// ── Request/response surface ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    /// Our transaction id; doubles as the provider-side reference.
    pub reference: Uuid,
    pub amount: MoneyAmount,
    pub currency: Currency,
    pub customer_id: String,
    pub order_id: String,
    pub description: Option<String>,
    pub return_url: String,
    pub cancel_url: String,
    pub metadata: BTreeMap<String, String>,
    pub idempotency_key: String,
}

/// Provider-side payment state, normalized. `Succeeded` is the only value
/// that settles a transaction; everything else stays in flight awaiting a
/// webhook or an explicit status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderPaymentStatus {
    Created,
    Pending,
    Processing,
    Succeeded,
    Failed,
}

impl ProviderPaymentStatus {
    pub fn is_settled_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

#[derive(Debug, Clone)]
pub struct AuthorizeOutcome {
    pub provider_transaction_id: String,
    pub status: ProviderPaymentStatus,
    /// Out-of-band URL the end user must visit, when the flow needs one.
    pub payment_url: Option<String>,
    pub raw_response: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct StatusOutcome {
    pub status: ProviderPaymentStatus,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ProviderRefundRequest {
    pub reference: Uuid,
    pub provider_transaction_id: String,
    pub amount: MoneyAmount,
    pub currency: Currency,
    pub reason: Option<String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderRefundStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ProviderRefundOutcome {
    pub provider_refund_id: String,
    pub status: ProviderRefundStatus,
    pub raw_response: serde_json::Value,
}

// ── Webhook surface ──────────────────────────────────────────────────────────

/// Header bag with case-insensitive lookup, plus the connection facts the
/// trust anchors need.
#[derive(Debug, Clone, Default)]
pub struct WebhookContext {
    headers: HashMap<String, String>,
    pub source_ip: Option<IpAddr>,
}

impl WebhookContext {
    pub fn new(headers: HashMap<String, String>, source_ip: Option<IpAddr>) -> Self {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self { headers, source_ip }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// What a verified webhook body says, normalized across providers.
#[derive(Debug, Clone)]
pub struct ParsedWebhook {
    pub provider_event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub kind: WebhookKind,
}

#[derive(Debug, Clone)]
pub enum WebhookKind {
    Payment {
        provider_transaction_id: String,
        status: ProviderPaymentStatus,
    },
    Refund {
        provider_refund_id: String,
        provider_transaction_id: Option<String>,
        status: ProviderRefundStatus,
    },
    /// Authenticated but not something we track; recorded and completed.
    Unrecognized,
}

// ── The capability set ───────────────────────────────────────────────────────

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn authorize(
        &self,
        request: &AuthorizeRequest,
    ) -> Result<AuthorizeOutcome, GatewayError>;

    async fn get_status(
        &self,
        provider_transaction_id: &str,
    ) -> Result<StatusOutcome, GatewayError>;

    async fn refund(
        &self,
        request: &ProviderRefundRequest,
    ) -> Result<ProviderRefundOutcome, GatewayError>;

    /// Authenticity check for an incoming webhook. `Ok(false)` is the
    /// normal rejection path; `Err` is reserved for infrastructure faults
    /// (e.g. the PayPal verification endpoint being unreachable).
    async fn verify_webhook(
        &self,
        ctx: &WebhookContext,
        body: &str,
        secret: &str,
    ) -> Result<bool, GatewayError>;

    fn parse_webhook(&self, body: &str) -> Result<ParsedWebhook, GatewayError>;
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Everything an adapter needs, assembled from the provider row, the chosen
/// region, and the vault-decrypted credential map.
pub struct AdapterConfig {
    pub http: reqwest::Client,
    pub base_url: String,
    pub credentials: BTreeMap<String, String>,
}

impl AdapterConfig {
    pub fn credential(&self, key: &str) -> Result<&str, GatewayError> {
        self.credentials
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| GatewayError::ProviderUnavailable(format!("missing credential: {key}")))
    }
}

/// Single construction point: adding a provider means adding a match arm.
pub fn build(
    provider: &Provider,
    region: &RegionConfig,
    credentials: BTreeMap<String, String>,
    http: reqwest::Client,
) -> Result<Arc<dyn ProviderAdapter>, GatewayError> {
    let config = AdapterConfig {
        http,
        base_url: region.base_url.trim_end_matches('/').to_string(),
        credentials,
    };

    match provider.name.as_str() {
        "stripe" => Ok(Arc::new(stripe::StripeAdapter::new(config)?)),
        "paypal" => Ok(Arc::new(paypal::PayPalAdapter::new(config)?)),
        "omise" => Ok(Arc::new(omise::OmiseAdapter::new(config)?)),
        "scb" => Ok(Arc::new(scb::ScbAdapter::new(config)?)),
        // Scripted in-process provider for development and tests.
        name if name.starts_with("sandbox") => Ok(Arc::new(sandbox::SandboxAdapter::new(config)?)),
        other => Err(GatewayError::ProviderUnavailable(format!(
            "no adapter registered for provider {other}"
        ))),
    }
}

// ── Shared HTTP plumbing ─────────────────────────────────────────────────────

/// Classify an HTTP response: 2xx parses, 5xx is transient, 4xx is final.
pub(crate) async fn read_json_response(
    response: reqwest::Response,
) -> Result<serde_json::Value, GatewayError> {
    let status = response.status();
    if status.is_server_error() {
        return Err(GatewayError::ProviderUnavailable(format!(
            "provider returned {status}"
        )));
    }
    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| GatewayError::ProviderUnavailable(format!("malformed provider response: {e}")))?;

    if !status.is_success() {
        let message = body
            .get("error")
            .and_then(|e| e.get("message"))
            .or_else(|| body.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("provider rejected the request")
            .to_string();
        let code = body
            .get("error")
            .and_then(|e| e.get("code"))
            .or_else(|| body.get("code"))
            .and_then(|c| c.as_str())
            .map(str::to_string);
        return Err(GatewayError::Provider { message, code });
    }
    Ok(body)
}

pub(crate) fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::ProviderUnavailable(format!("transport: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_context_headers_are_case_insensitive() {
        let ctx = WebhookContext::new(
            [("Stripe-Signature".to_string(), "t=1,v1=x".to_string())].into(),
            None,
        );
        assert_eq!(ctx.header("stripe-signature"), Some("t=1,v1=x"));
        assert_eq!(ctx.header("STRIPE-SIGNATURE"), Some("t=1,v1=x"));
        assert_eq!(ctx.header("other"), None);
    }

    #[test]
    fn adapter_config_reports_missing_credentials() {
        let config = AdapterConfig {
            http: reqwest::Client::new(),
            base_url: "https://api.example.com".into(),
            credentials: [("secret_key".to_string(), "sk".to_string())].into(),
        };
        assert_eq!(config.credential("secret_key").unwrap(), "sk");
        assert!(matches!(
            config.credential("webhook_secret"),
            Err(GatewayError::ProviderUnavailable(_))
        ));
    }
}
