use {
    crate::adapters::{self, ProviderAdapter},
    crate::domain::{
        error::GatewayError,
        money::Currency,
        provider::{Provider, ProviderDraft, ProviderStatus},
    },
    crate::infra::resilience::{CallOverrides, circuit_key},
    crate::infra::store::ProviderStore,
    crate::infra::vault::CredentialVault,
    chrono::Utc,
    std::collections::{BTreeMap, HashMap},
    std::sync::{Arc, Mutex},
    std::time::Duration,
    tokio::time::Instant,
    uuid::Uuid,
};

/// Hot-path cache TTL for `list_active_by_currency`. Mutations invalidate
/// eagerly, so this only bounds staleness across replicas.
pub const ROUTING_CACHE_TTL: Duration = Duration::from_secs(30);

/// Provider CRUD plus the credential boundary: plaintext goes in through
/// the vault on writes, and only the adapter factory ever sees it again.
pub struct ProviderRegistry {
    store: Arc<dyn ProviderStore>,
    vault: Arc<CredentialVault>,
    cache: Mutex<HashMap<Currency, (Instant, Vec<Provider>)>>,
}

impl ProviderRegistry {
    pub fn new(store: Arc<dyn ProviderStore>, vault: Arc<CredentialVault>) -> Self {
        Self {
            store,
            vault,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn invalidate_cache(&self) {
        self.cache.lock().expect("registry cache poisoned").clear();
    }

    fn encrypt_credentials(
        &self,
        plaintext: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, GatewayError> {
        plaintext
            .iter()
            .map(|(k, v)| Ok((k.clone(), self.vault.encrypt(v)?)))
            .collect()
    }

    pub fn decrypt_credentials(
        &self,
        provider: &Provider,
    ) -> Result<BTreeMap<String, String>, GatewayError> {
        provider
            .credentials
            .iter()
            .map(|(k, v)| Ok((k.clone(), self.vault.decrypt(v)?)))
            .collect()
    }

    /// The provider's webhook signing secret, decrypted for verification.
    pub fn webhook_secret(&self, provider: &Provider) -> Result<String, GatewayError> {
        match provider.credentials.get("webhook_secret") {
            Some(ciphertext) => self.vault.decrypt(ciphertext),
            None => Ok(String::new()),
        }
    }

    pub async fn register(&self, draft: ProviderDraft) -> Result<Provider, GatewayError> {
        draft.validate()?;
        let now = Utc::now();
        let provider = Provider {
            id: Uuid::now_v7(),
            name: draft.name,
            display_name: draft.display_name,
            status: draft.status,
            supported_currencies: draft.supported_currencies,
            priority: draft.priority,
            credentials: self.encrypt_credentials(&draft.credentials)?,
            configurations: draft.configurations,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.store.insert(&provider).await?;
        self.invalidate_cache();
        tracing::info!(provider = %provider.name, id = %provider.id, "provider registered");
        Ok(provider)
    }

    pub async fn update(&self, id: Uuid, draft: ProviderDraft) -> Result<Provider, GatewayError> {
        draft.validate()?;
        let mut provider = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("provider {id}")))?;

        provider.display_name = draft.display_name;
        provider.status = draft.status;
        provider.supported_currencies = draft.supported_currencies;
        provider.priority = draft.priority;
        provider.configurations = draft.configurations;
        // An empty credential map on update means "keep what is stored".
        if !draft.credentials.is_empty() {
            provider.credentials = self.encrypt_credentials(&draft.credentials)?;
        }
        provider.updated_at = Utc::now();

        self.store.update(&provider).await?;
        self.invalidate_cache();
        Ok(provider)
    }

    pub async fn update_status(
        &self,
        id: Uuid,
        status: ProviderStatus,
    ) -> Result<(), GatewayError> {
        self.store.update_status(id, status, Utc::now()).await?;
        self.invalidate_cache();
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), GatewayError> {
        self.store.soft_delete(id, Utc::now()).await?;
        self.invalidate_cache();
        Ok(())
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Provider>, GatewayError> {
        self.store.get(id).await
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<Provider>, GatewayError> {
        self.store.get_by_name(name).await
    }

    pub async fn list_all(&self) -> Result<Vec<Provider>, GatewayError> {
        self.store.list_all().await
    }

    /// Routable providers for a currency, sorted by (priority, name).
    /// Served from the in-process cache.
    pub async fn list_active_by_currency(
        &self,
        currency: &Currency,
    ) -> Result<Vec<Provider>, GatewayError> {
        {
            let cache = self.cache.lock().expect("registry cache poisoned");
            if let Some((at, providers)) = cache.get(currency) {
                if at.elapsed() <= ROUTING_CACHE_TTL {
                    return Ok(providers.clone());
                }
            }
        }

        let mut providers: Vec<Provider> = self
            .store
            .list_all()
            .await?
            .into_iter()
            .filter(|p| p.is_routable() && p.supports(currency))
            .collect();
        providers.sort_by(|a, b| (a.priority, &a.name).cmp(&(b.priority, &b.name)));

        self.cache
            .lock()
            .expect("registry cache poisoned")
            .insert(currency.clone(), (Instant::now(), providers.clone()));
        Ok(providers)
    }
}

/// What a provider call needs besides the adapter itself: where to record
/// breaker samples and which regional tunables apply.
pub struct ProviderCall {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub circuit_key: String,
    pub overrides: CallOverrides,
}

/// Builds adapters from a provider row: picks the active region, decrypts
/// credentials, and injects the shared HTTP client.
pub struct AdapterFactory {
    registry: Arc<ProviderRegistry>,
    http: reqwest::Client,
}

impl AdapterFactory {
    pub fn new(registry: Arc<ProviderRegistry>, http: reqwest::Client) -> Self {
        Self { registry, http }
    }

    pub fn build(&self, provider: &Provider) -> Result<ProviderCall, GatewayError> {
        let region = provider.active_region().ok_or_else(|| {
            GatewayError::ProviderUnavailable(format!(
                "provider {} has no active region configuration",
                provider.name
            ))
        })?;
        let credentials = self.registry.decrypt_credentials(provider)?;
        let adapter = adapters::build(provider, region, credentials, self.http.clone())?;

        Ok(ProviderCall {
            adapter,
            circuit_key: circuit_key(provider.id, &region.region),
            overrides: CallOverrides {
                attempt_timeout: region.timeout_secs.map(Duration::from_secs),
                max_retries: region.max_retries,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::provider::RegionConfig;
    use crate::infra::memory::MemoryProviderStore;
    use std::collections::BTreeSet;

    fn registry() -> ProviderRegistry {
        ProviderRegistry::new(
            Arc::new(MemoryProviderStore::new()),
            Arc::new(CredentialVault::new(&[3u8; 32])),
        )
    }

    fn draft(name: &str, priority: i32, currencies: &[&str]) -> ProviderDraft {
        ProviderDraft {
            name: name.into(),
            display_name: name.to_uppercase(),
            status: ProviderStatus::Active,
            supported_currencies: currencies
                .iter()
                .map(|c| Currency::new(c).unwrap())
                .collect::<BTreeSet<_>>(),
            priority,
            credentials: BTreeMap::from([
                ("secret_key".to_string(), "sk_live_1".to_string()),
                ("webhook_secret".to_string(), "whsec_1".to_string()),
            ]),
            configurations: vec![RegionConfig {
                region: "global".into(),
                base_url: "https://api.example.com".into(),
                active: true,
                max_retries: None,
                timeout_secs: None,
            }],
        }
    }

    #[tokio::test]
    async fn credentials_are_encrypted_at_rest_and_recoverable() {
        let r = registry();
        let provider = r.register(draft("stripe", 10, &["USD"])).await.unwrap();

        // Stored values are ciphertext.
        assert_ne!(provider.credentials["secret_key"], "sk_live_1");

        let plain = r.decrypt_credentials(&provider).unwrap();
        assert_eq!(plain["secret_key"], "sk_live_1");
        assert_eq!(r.webhook_secret(&provider).unwrap(), "whsec_1");
    }

    #[tokio::test]
    async fn active_by_currency_filters_and_orders() {
        let r = registry();
        r.register(draft("omise", 20, &["THB", "USD"])).await.unwrap();
        r.register(draft("stripe", 10, &["USD", "EUR"])).await.unwrap();
        r.register(draft("paypal", 10, &["USD"])).await.unwrap();
        let scb = r.register(draft("scb", 5, &["THB"])).await.unwrap();
        r.update_status(scb.id, ProviderStatus::Maintenance).await.unwrap();

        let usd = r.list_active_by_currency(&Currency::new("USD").unwrap()).await.unwrap();
        let names: Vec<_> = usd.iter().map(|p| p.name.as_str()).collect();
        // Priority ascending, ties broken by name.
        assert_eq!(names, ["paypal", "stripe", "omise"]);

        let thb = r.list_active_by_currency(&Currency::new("THB").unwrap()).await.unwrap();
        let names: Vec<_> = thb.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["omise"], "maintenance provider excluded");
    }

    #[tokio::test]
    async fn cache_is_invalidated_on_mutation() {
        let r = registry();
        let usd = Currency::new("USD").unwrap();
        let stripe = r.register(draft("stripe", 10, &["USD"])).await.unwrap();
        assert_eq!(r.list_active_by_currency(&usd).await.unwrap().len(), 1);

        r.update_status(stripe.id, ProviderStatus::Disabled).await.unwrap();
        assert_eq!(r.list_active_by_currency(&usd).await.unwrap().len(), 0);

        r.update_status(stripe.id, ProviderStatus::Active).await.unwrap();
        assert_eq!(r.list_active_by_currency(&usd).await.unwrap().len(), 1);

        r.delete(stripe.id).await.unwrap();
        assert_eq!(r.list_active_by_currency(&usd).await.unwrap().len(), 0);
        assert!(r.get_by_name("stripe").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_keeps_credentials_when_none_supplied() {
        let r = registry();
        let provider = r.register(draft("stripe", 10, &["USD"])).await.unwrap();

        let mut redraft = draft("stripe", 15, &["USD", "GBP"]);
        redraft.credentials = BTreeMap::new();
        let updated = r.update(provider.id, redraft).await.unwrap();

        assert_eq!(updated.priority, 15);
        assert_eq!(r.decrypt_credentials(&updated).unwrap()["secret_key"], "sk_live_1");
    }

    #[tokio::test]
    async fn factory_requires_an_active_region() {
        let r = Arc::new(registry());
        let mut d = draft("stripe", 10, &["USD"]);
        d.configurations[0].active = false;
        let provider = r.register(d).await.unwrap();

        let factory = AdapterFactory::new(r, reqwest::Client::new());
        assert!(matches!(
            factory.build(&provider),
            Err(GatewayError::ProviderUnavailable(_))
        ));
    }
}
