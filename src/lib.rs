pub mod adapters;
pub mod config;
pub mod domain;
pub mod infra;
pub mod services;
pub mod transport;

use {
    crate::infra::idempotency::{IdempotencyStore, InMemoryIdempotencyStore},
    crate::infra::memory::{
        MemoryAuditLog, MemoryPaymentStore, MemoryProviderStore, MemoryRefundStore,
        MemoryWebhookStore,
    },
    crate::infra::rate_limit::SlidingWindowRateLimiter,
    crate::infra::resilience::{CircuitRegistry, ResilienceConfig, ResiliencePipeline},
    crate::infra::store::{AuditLogStore, PaymentStore, ProviderStore, RefundStore, WebhookStore},
    crate::infra::vault::CredentialVault,
    crate::services::events::{EventPublisher, NoopPublisher},
    crate::services::payments::PaymentOrchestrator,
    crate::services::refunds::RefundOrchestrator,
    crate::services::registry::{AdapterFactory, ProviderRegistry},
    crate::services::routing::RoutingEngine,
    crate::services::webhooks::WebhookService,
    std::sync::Arc,
    std::time::Duration,
};

/// Pluggable persistence and messaging edges. Production wires Postgres
/// implementations; development and tests wire the in-memory ones.
#[derive(Clone)]
pub struct Backends {
    pub payments: Arc<dyn PaymentStore>,
    pub refunds: Arc<dyn RefundStore>,
    pub providers: Arc<dyn ProviderStore>,
    pub webhooks: Arc<dyn WebhookStore>,
    pub audit: Arc<dyn AuditLogStore>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub publisher: Arc<dyn EventPublisher>,
}

impl Backends {
    /// All-in-memory wiring. Development only; none of this survives a
    /// restart or spans replicas.
    pub fn in_memory() -> Self {
        Self {
            payments: Arc::new(MemoryPaymentStore::new()),
            refunds: Arc::new(MemoryRefundStore::new()),
            providers: Arc::new(MemoryProviderStore::new()),
            webhooks: Arc::new(MemoryWebhookStore::new()),
            audit: Arc::new(MemoryAuditLog::new()),
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
            publisher: Arc::new(NoopPublisher),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub payments: PaymentOrchestrator,
    pub refunds: RefundOrchestrator,
    pub webhooks: WebhookService,
    pub registry: Arc<ProviderRegistry>,
    pub circuits: Arc<CircuitRegistry>,
}

impl AppState {
    pub fn assemble(
        backends: Backends,
        vault: CredentialVault,
        resilience: ResilienceConfig,
        webhook_rate_limit_per_minute: usize,
        http: reqwest::Client,
    ) -> Self {
        let vault = Arc::new(vault);
        let registry = Arc::new(ProviderRegistry::new(backends.providers.clone(), vault));
        let circuits = Arc::new(CircuitRegistry::new(resilience.clone()));
        let pipeline = Arc::new(ResiliencePipeline::new(resilience, circuits.clone()));
        let routing = Arc::new(RoutingEngine::new(registry.clone(), circuits.clone()));
        let factory = Arc::new(AdapterFactory::new(registry.clone(), http));

        let payments = PaymentOrchestrator::new(
            backends.payments.clone(),
            backends.audit.clone(),
            backends.idempotency.clone(),
            routing,
            registry.clone(),
            factory.clone(),
            pipeline.clone(),
            backends.publisher.clone(),
        );
        let refunds = RefundOrchestrator::new(
            backends.refunds.clone(),
            backends.payments.clone(),
            backends.audit.clone(),
            backends.idempotency.clone(),
            registry.clone(),
            factory.clone(),
            pipeline,
            backends.publisher.clone(),
        );
        let limiter = Arc::new(SlidingWindowRateLimiter::new(
            webhook_rate_limit_per_minute,
            Duration::from_secs(60),
        ));
        let webhooks = WebhookService::new(
            backends.webhooks.clone(),
            backends.payments.clone(),
            backends.refunds.clone(),
            registry.clone(),
            factory,
            payments.clone(),
            refunds.clone(),
            limiter,
        );

        Self {
            payments,
            refunds,
            webhooks,
            registry,
            circuits,
        }
    }
}
