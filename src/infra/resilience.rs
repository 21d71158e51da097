//! Outbound-call resilience: circuit breaker (outermost), then retry with
//! exponential backoff, then a per-attempt timeout. Breaker state is
//! process-local and keyed per (provider, region); replicas heal
//! independently.

use {
    crate::domain::error::GatewayError,
    rand::Rng,
    std::collections::{HashMap, VecDeque},
    std::future::Future,
    std::sync::{Arc, Mutex},
    std::time::Duration,
    tokio::time::Instant,
    uuid::Uuid,
};

#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub attempt_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub breaker_window: Duration,
    pub breaker_min_samples: usize,
    pub breaker_failure_ratio: f64,
    pub breaker_cooldown: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            breaker_window: Duration::from_secs(30),
            breaker_min_samples: 5,
            breaker_failure_ratio: 0.5,
            breaker_cooldown: Duration::from_secs(30),
        }
    }
}

/// Per-call overrides sourced from the provider's region configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOverrides {
    pub attempt_timeout: Option<Duration>,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// What `try_acquire` granted. A half-open probe gets exactly one attempt;
/// the retry budget does not apply to it.
enum Permit {
    Normal,
    Probe,
}

struct BreakerInner {
    state: CircuitState,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    samples: VecDeque<(Instant, bool)>,
}

pub struct CircuitBreaker {
    window: Duration,
    min_samples: usize,
    failure_ratio: f64,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    fn new(config: &ResilienceConfig) -> Self {
        Self {
            window: config.breaker_window,
            min_samples: config.breaker_min_samples,
            failure_ratio: config.breaker_failure_ratio,
            cooldown: config.breaker_cooldown,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                opened_at: None,
                probe_in_flight: false,
                samples: VecDeque::new(),
            }),
        }
    }

    fn prune(&self, inner: &mut BreakerInner, now: Instant) {
        while let Some(&(at, _)) = inner.samples.front() {
            if now.duration_since(at) > self.window {
                inner.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Observable state, with an elapsed cooldown reported as HalfOpen.
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock().expect("breaker poisoned");
        match inner.state {
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.cooldown);
                if elapsed { CircuitState::HalfOpen } else { CircuitState::Open }
            }
            s => s,
        }
    }

    fn try_acquire(&self) -> Option<Permit> {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        match inner.state {
            CircuitState::Closed => Some(Permit::Normal),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.cooldown);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    Some(Permit::Probe)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    None
                } else {
                    inner.probe_in_flight = true;
                    Some(Permit::Probe)
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        let now = Instant::now();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.probe_in_flight = false;
                inner.opened_at = None;
                inner.samples.clear();
            }
            _ => {
                inner.samples.push_back((now, true));
                self.prune(&mut inner, now);
            }
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        let now = Instant::now();
        match inner.state {
            CircuitState::HalfOpen => {
                // Probe failed: back to Open for another cooldown.
                inner.state = CircuitState::Open;
                inner.probe_in_flight = false;
                inner.opened_at = Some(now);
            }
            CircuitState::Open => {}
            CircuitState::Closed => {
                inner.samples.push_back((now, false));
                self.prune(&mut inner, now);
                let total = inner.samples.len();
                if total >= self.min_samples {
                    let failures = inner.samples.iter().filter(|(_, ok)| !ok).count();
                    if failures as f64 / total as f64 >= self.failure_ratio {
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(now);
                        inner.samples.clear();
                        tracing::warn!(
                            failures,
                            total,
                            "circuit breaker opened"
                        );
                    }
                }
            }
        }
    }
}

pub fn circuit_key(provider_id: Uuid, region: &str) -> String {
    format!("{provider_id}:{region}")
}

/// Process-local registry of breakers, one per (provider, region).
pub struct CircuitRegistry {
    config: ResilienceConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitRegistry {
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn breaker(&self, key: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("registry poisoned");
        breakers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(&self.config)))
            .clone()
    }

    /// Routing gate: a provider whose breaker is hard-open is skipped.
    /// Half-open counts as eligible — it exists to admit the probe.
    pub fn is_open(&self, key: &str) -> bool {
        self.breaker(key).state() == CircuitState::Open
    }
}

/// Composite policy around a provider call. `attempt` is invoked up to
/// `max_retries + 1` times; only transient failures (I/O, timeout, 5xx)
/// re-enter the loop.
pub struct ResiliencePipeline {
    config: ResilienceConfig,
    registry: Arc<CircuitRegistry>,
}

impl ResiliencePipeline {
    pub fn new(config: ResilienceConfig, registry: Arc<CircuitRegistry>) -> Self {
        Self { config, registry }
    }

    pub fn registry(&self) -> &Arc<CircuitRegistry> {
        &self.registry
    }

    pub async fn execute<T, F, Fut>(
        &self,
        key: &str,
        overrides: CallOverrides,
        mut attempt: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let breaker = self.registry.breaker(key);
        let permit = breaker
            .try_acquire()
            .ok_or_else(|| GatewayError::CircuitOpen(key.to_string()))?;

        let attempt_timeout = overrides.attempt_timeout.unwrap_or(self.config.attempt_timeout);
        let max_attempts = match permit {
            Permit::Probe => 1,
            Permit::Normal => overrides.max_retries.unwrap_or(self.config.max_retries) + 1,
        };

        let mut attempt_no = 0u32;
        loop {
            attempt_no += 1;
            let outcome = match tokio::time::timeout(attempt_timeout, attempt()).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Timeout),
            };

            match outcome {
                Ok(value) => {
                    breaker.record_success();
                    return Ok(value);
                }
                Err(err) => {
                    breaker.record_failure();
                    if !err.is_transient() || attempt_no >= max_attempts {
                        return Err(err);
                    }
                    let delay = backoff_delay(self.config.retry_base_delay, attempt_no);
                    tracing::debug!(
                        attempt = attempt_no,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying provider call"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// base × 2^(attempt−1), plus up to 50% jitter.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(10);
    let scaled = base.saturating_mul(1 << exp);
    let jitter_ms = rand::thread_rng().gen_range(0..=scaled.as_millis() as u64 / 2);
    scaled + Duration::from_millis(jitter_ms)
}
