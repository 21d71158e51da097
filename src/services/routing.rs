use {
    super::registry::ProviderRegistry,
    crate::domain::{error::GatewayError, money::Currency, provider::Provider},
    crate::infra::resilience::{CircuitRegistry, circuit_key},
    std::sync::Arc,
};

/// Picks the provider for a payment. Preference wins when it names a
/// routable provider supporting the currency; otherwise the first
/// priority-ordered candidate whose circuit is not open.
pub struct RoutingEngine {
    registry: Arc<ProviderRegistry>,
    circuits: Arc<CircuitRegistry>,
}

impl RoutingEngine {
    pub fn new(registry: Arc<ProviderRegistry>, circuits: Arc<CircuitRegistry>) -> Self {
        Self { registry, circuits }
    }

    pub async fn select_provider(
        &self,
        currency: &Currency,
        preferred: Option<&str>,
    ) -> Result<Provider, GatewayError> {
        if let Some(name) = preferred {
            if let Some(provider) = self.registry.get_by_name(name).await? {
                if provider.is_routable() && provider.supports(currency) {
                    return Ok(provider);
                }
            }
            tracing::debug!(
                preferred = name,
                currency = %currency,
                "preferred provider not eligible, falling back to routing"
            );
        }

        // list_active_by_currency is already (priority, name)-ordered, so
        // the first non-open candidate is the deterministic winner.
        for provider in self.registry.list_active_by_currency(currency).await? {
            let region = provider
                .active_region()
                .map(|r| r.region.as_str())
                .unwrap_or("default");
            if self.circuits.is_open(&circuit_key(provider.id, region)) {
                tracing::debug!(provider = %provider.name, "skipping provider with open circuit");
                continue;
            }
            return Ok(provider);
        }

        Err(GatewayError::NoEligibleProvider(currency.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::provider::{ProviderDraft, ProviderStatus, RegionConfig};
    use crate::infra::memory::MemoryProviderStore;
    use crate::infra::resilience::ResilienceConfig;
    use crate::infra::vault::CredentialVault;
    use std::collections::{BTreeMap, BTreeSet};

    async fn setup(providers: &[(&str, i32)]) -> (RoutingEngine, Arc<ProviderRegistry>, Arc<CircuitRegistry>) {
        let registry = Arc::new(ProviderRegistry::new(
            Arc::new(MemoryProviderStore::new()),
            Arc::new(CredentialVault::new(&[1u8; 32])),
        ));
        for (name, priority) in providers {
            registry
                .register(ProviderDraft {
                    name: name.to_string(),
                    display_name: name.to_string(),
                    status: ProviderStatus::Active,
                    supported_currencies: BTreeSet::from([Currency::new("USD").unwrap()]),
                    priority: *priority,
                    credentials: BTreeMap::new(),
                    configurations: vec![RegionConfig {
                        region: "global".into(),
                        base_url: "https://api.example.com".into(),
                        active: true,
                        max_retries: None,
                        timeout_secs: None,
                    }],
                })
                .await
                .unwrap();
        }
        let circuits = Arc::new(CircuitRegistry::new(ResilienceConfig::default()));
        (
            RoutingEngine::new(registry.clone(), circuits.clone()),
            registry,
            circuits,
        )
    }

    #[tokio::test]
    async fn lowest_priority_wins_with_name_tiebreak() {
        let (routing, _, _) = setup(&[("stripe", 10), ("paypal", 10), ("omise", 20)]).await;
        let usd = Currency::new("USD").unwrap();
        let picked = routing.select_provider(&usd, None).await.unwrap();
        assert_eq!(picked.name, "paypal");
    }

    #[tokio::test]
    async fn preferred_provider_overrides_priority() {
        let (routing, _, _) = setup(&[("stripe", 10), ("omise", 20)]).await;
        let usd = Currency::new("USD").unwrap();
        let picked = routing.select_provider(&usd, Some("omise")).await.unwrap();
        assert_eq!(picked.name, "omise");
    }

    #[tokio::test]
    async fn unusable_preference_falls_back() {
        let (routing, registry, _) = setup(&[("stripe", 10), ("omise", 20)]).await;
        let usd = Currency::new("USD").unwrap();

        // Unknown name.
        let picked = routing.select_provider(&usd, Some("ghost")).await.unwrap();
        assert_eq!(picked.name, "stripe");

        // Known but disabled.
        let omise = registry.get_by_name("omise").await.unwrap().unwrap();
        registry.update_status(omise.id, ProviderStatus::Disabled).await.unwrap();
        let picked = routing.select_provider(&usd, Some("omise")).await.unwrap();
        assert_eq!(picked.name, "stripe");
    }

    #[tokio::test]
    async fn open_circuit_diverts_to_next_candidate() {
        let (routing, registry, circuits) = setup(&[("stripe", 10), ("omise", 20)]).await;
        let usd = Currency::new("USD").unwrap();

        let stripe = registry.get_by_name("stripe").await.unwrap().unwrap();
        // Open the breaker by driving failures through the pipeline.
        let pipeline = crate::infra::resilience::ResiliencePipeline::new(
            ResilienceConfig { max_retries: 0, ..ResilienceConfig::default() },
            circuits.clone(),
        );
        for _ in 0..5 {
            let _: Result<(), _> = pipeline
                .execute(&circuit_key(stripe.id, "global"), Default::default(), || async {
                    Err(GatewayError::Timeout)
                })
                .await;
        }
        assert!(circuits.is_open(&circuit_key(stripe.id, "global")));

        let picked = routing.select_provider(&usd, None).await.unwrap();
        assert_eq!(picked.name, "omise");
    }

    #[tokio::test]
    async fn no_candidate_is_no_eligible_provider() {
        let (routing, _, _) = setup(&[("stripe", 10)]).await;
        let zzz = Currency::new("ZZZ").unwrap();
        assert!(matches!(
            routing.select_provider(&zzz, None).await,
            Err(GatewayError::NoEligibleProvider(_))
        ));
    }
}
