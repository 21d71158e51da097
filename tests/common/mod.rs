#![allow(dead_code)]

use {
    payflow::{
        AppState, Backends,
        adapters::signature::hmac_sha256_hex,
        domain::{
            id::IdempotencyKey,
            money::{Currency, MoneyAmount},
            payment::{PaymentRequest, PaymentRequestParams},
            provider::{Provider, ProviderDraft, ProviderStatus, RegionConfig},
        },
        infra::resilience::ResilienceConfig,
        infra::vault::CredentialVault,
    },
    std::collections::{BTreeMap, BTreeSet},
    std::time::Duration,
};

pub const WEBHOOK_SECRET: &str = "whsec_sandbox_test";

/// Fast retry timings so paused-clock tests do not crawl through
/// production backoffs.
pub fn fast_resilience() -> ResilienceConfig {
    ResilienceConfig {
        retry_base_delay: Duration::from_millis(5),
        ..ResilienceConfig::default()
    }
}

pub struct Harness {
    pub state: AppState,
    pub backends: Backends,
}

pub fn harness() -> Harness {
    harness_with(fast_resilience(), 100)
}

pub fn harness_with(resilience: ResilienceConfig, rate_limit_per_minute: usize) -> Harness {
    let backends = Backends::in_memory();
    let state = AppState::assemble(
        backends.clone(),
        CredentialVault::new(&[42u8; 32]),
        resilience,
        rate_limit_per_minute,
        reqwest::Client::new(),
    );
    Harness { state, backends }
}

/// Register a scripted sandbox provider. `name` must start with
/// "sandbox"; `behavior` is one of succeed | pending | fail | unavailable.
pub async fn register_sandbox(
    state: &AppState,
    name: &str,
    behavior: &str,
    currencies: &[&str],
    priority: i32,
) -> Provider {
    register_sandbox_full(state, name, behavior, "succeed", currencies, priority).await
}

pub async fn register_sandbox_full(
    state: &AppState,
    name: &str,
    behavior: &str,
    refund_behavior: &str,
    currencies: &[&str],
    priority: i32,
) -> Provider {
    state
        .registry
        .register(ProviderDraft {
            name: name.to_string(),
            display_name: format!("Sandbox {name}"),
            status: ProviderStatus::Active,
            supported_currencies: currencies
                .iter()
                .map(|c| Currency::new(c).unwrap())
                .collect::<BTreeSet<_>>(),
            priority,
            credentials: BTreeMap::from([
                ("behavior".to_string(), behavior.to_string()),
                ("refund_behavior".to_string(), refund_behavior.to_string()),
                ("webhook_secret".to_string(), WEBHOOK_SECRET.to_string()),
            ]),
            configurations: vec![RegionConfig {
                region: "global".into(),
                base_url: "https://sandbox.test".into(),
                active: true,
                max_retries: None,
                timeout_secs: None,
            }],
        })
        .await
        .expect("register sandbox provider")
}

pub fn payment_request(key: &str, minor_units: i64, currency: &str) -> PaymentRequest {
    payment_request_for(key, minor_units, currency, None)
}

pub fn payment_request_for(
    key: &str,
    minor_units: i64,
    currency: &str,
    preferred: Option<&str>,
) -> PaymentRequest {
    PaymentRequest::new(PaymentRequestParams {
        idempotency_key: IdempotencyKey::new(key).unwrap(),
        amount: MoneyAmount::new(minor_units).unwrap(),
        currency: Currency::new(currency).unwrap(),
        customer_id: "c1".into(),
        order_id: "o1".into(),
        description: Some("integration test payment".into()),
        return_url: "https://shop.example/return".into(),
        cancel_url: "https://shop.example/cancel".into(),
        metadata: BTreeMap::new(),
        preferred_provider: preferred.map(str::to_string),
    })
    .unwrap()
}

/// Sign a sandbox webhook body the way the provider would.
pub fn sandbox_signature(body: &str) -> String {
    hmac_sha256_hex(WEBHOOK_SECRET.as_bytes(), body.as_bytes())
}
