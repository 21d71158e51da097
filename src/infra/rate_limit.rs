use {
    std::collections::{HashMap, VecDeque},
    std::sync::Mutex,
    std::time::Duration,
    tokio::time::Instant,
};

/// Sliding-window counter keyed by an arbitrary string (the webhook edge
/// uses `"{provider}:{source_ip}"`). Instance-scoped: counters reset on
/// restart and are not shared across replicas.
///
/// Callers on the webhook path must fail OPEN: a limiter malfunction is
/// never a reason to drop a provider notification.
pub struct SlidingWindowRateLimiter {
    window: Duration,
    limit: usize,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowRateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            window,
            limit,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Records the hit and reports whether it is within the limit.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut hits = self.hits.lock().expect("rate limiter poisoned");

        // Opportunistic cleanup of idle keys so the map stays bounded.
        if hits.len() > 10_000 {
            hits.retain(|_, window| {
                window
                    .back()
                    .is_some_and(|&last| now.duration_since(last) <= self.window)
            });
        }

        let window = hits.entry(key.to_string()).or_default();
        while let Some(&front) = window.front() {
            if now.duration_since(front) > self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.limit {
            return false;
        }
        window.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn allows_up_to_limit_then_refuses() {
        let limiter = SlidingWindowRateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.check("stripe:1.2.3.4"));
        assert!(limiter.check("stripe:1.2.3.4"));
        assert!(limiter.check("stripe:1.2.3.4"));
        assert!(!limiter.check("stripe:1.2.3.4"));
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let limiter = SlidingWindowRateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("stripe:1.2.3.4"));
        assert!(limiter.check("stripe:5.6.7.8"));
        assert!(limiter.check("omise:1.2.3.4"));
        assert!(!limiter.check("stripe:1.2.3.4"));
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides() {
        let limiter = SlidingWindowRateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check("k"));
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(limiter.check("k"));
        assert!(!limiter.check("k"));

        // First hit ages out; one slot frees up.
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(limiter.check("k"));
        assert!(!limiter.check("k"));
    }
}
