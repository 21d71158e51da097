use {
    crate::domain::error::GatewayError,
    crate::infra::resilience::ResilienceConfig,
    base64::Engine,
    base64::engine::general_purpose::STANDARD as BASE64,
    rand::RngCore,
    std::time::Duration,
};

/// Environment-driven configuration. Everything resilience- and
/// rate-limit-related carries the documented default when unset.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: Option<String>,
    /// Separate DSN for the idempotency store; falls back to the primary
    /// database, then to the in-memory development store.
    pub idempotency_database_url: Option<String>,
    /// When set, domain events are emitted to the log-backed publisher;
    /// when absent they are dropped after the audit row is written.
    pub event_bus_url: Option<String>,
    pub vault_key_base64: String,
    pub webhook_rate_limit_per_minute: usize,
    pub resilience: ResilienceConfig,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, GatewayError> {
    var(name)
        .map(|v| {
            v.parse()
                .map_err(|_| GatewayError::Internal(format!("invalid {name}: {v:?}")))
        })
        .transpose()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, GatewayError> {
        let mut resilience = ResilienceConfig::default();
        if let Some(secs) = parse_var::<u64>("PROVIDER_ATTEMPT_TIMEOUT_SECS")? {
            resilience.attempt_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = parse_var::<u32>("PROVIDER_MAX_RETRIES")? {
            resilience.max_retries = n;
        }
        if let Some(ms) = parse_var::<u64>("PROVIDER_RETRY_BASE_MS")? {
            resilience.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>("BREAKER_WINDOW_SECS")? {
            resilience.breaker_window = Duration::from_secs(secs);
        }
        if let Some(n) = parse_var::<usize>("BREAKER_MIN_SAMPLES")? {
            resilience.breaker_min_samples = n;
        }
        if let Some(ratio) = parse_var::<f64>("BREAKER_FAILURE_RATIO")? {
            resilience.breaker_failure_ratio = ratio;
        }
        if let Some(secs) = parse_var::<u64>("BREAKER_COOLDOWN_SECS")? {
            resilience.breaker_cooldown = Duration::from_secs(secs);
        }

        let vault_key_base64 = match var("VAULT_KEY") {
            Some(key) => key,
            None => {
                // Ephemeral key: fine for development, useless in
                // production since stored credentials die with the process.
                tracing::warn!(
                    "VAULT_KEY not set; generated an ephemeral key, stored credentials will not \
                     survive a restart"
                );
                let mut key = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut key);
                BASE64.encode(key)
            }
        };

        Ok(Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".into()),
            database_url: var("DATABASE_URL"),
            idempotency_database_url: var("IDEMPOTENCY_DATABASE_URL"),
            event_bus_url: var("EVENT_BUS_URL"),
            vault_key_base64,
            webhook_rate_limit_per_minute: parse_var("WEBHOOK_RATE_LIMIT_PER_MINUTE")?.unwrap_or(100),
            resilience,
        })
    }
}
