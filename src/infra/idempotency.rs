use {
    crate::domain::{
        error::GatewayError,
        id::{IdempotencyKey, OperationKind},
    },
    async_trait::async_trait,
    sqlx::{PgPool, Row},
    std::collections::HashMap,
    std::sync::Mutex,
    std::time::Duration,
    tokio::time::Instant,
};

pub const RESULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const LOCK_TTL: Duration = Duration::from_secs(30);

/// Cross-replica idempotency control: presence checks, first-response
/// caching, and a single-writer lock per `(operation, key)`.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn is_processed(
        &self,
        op: OperationKind,
        key: &IdempotencyKey,
    ) -> Result<bool, GatewayError>;

    /// Write-once: the first stored result wins, later writes are ignored.
    async fn store_result(
        &self,
        op: OperationKind,
        key: &IdempotencyKey,
        value: String,
        ttl: Duration,
    ) -> Result<(), GatewayError>;

    async fn get_result(
        &self,
        op: OperationKind,
        key: &IdempotencyKey,
    ) -> Result<Option<String>, GatewayError>;

    /// SET-if-not-exists with expiry. `false` means another worker holds
    /// the key; the caller waits and re-checks rather than proceeding.
    async fn acquire_lock(
        &self,
        op: OperationKind,
        key: &IdempotencyKey,
        ttl: Duration,
    ) -> Result<bool, GatewayError>;

    async fn release_lock(
        &self,
        op: OperationKind,
        key: &IdempotencyKey,
    ) -> Result<(), GatewayError>;
}

// ── In-memory (development fallback) ─────────────────────────────────────────

struct MemoryInner {
    results: HashMap<String, (Instant, String)>,
    locks: HashMap<String, Instant>,
}

/// Single-process implementation. Provides none of the cross-replica
/// guarantees the payment path needs, hence the warning on construction.
pub struct InMemoryIdempotencyStore {
    inner: Mutex<MemoryInner>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        tracing::warn!(
            "using in-memory idempotency store; NOT production-safe (no cross-replica locking)"
        );
        Self {
            inner: Mutex::new(MemoryInner {
                results: HashMap::new(),
                locks: HashMap::new(),
            }),
        }
    }
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn is_processed(
        &self,
        op: OperationKind,
        key: &IdempotencyKey,
    ) -> Result<bool, GatewayError> {
        Ok(self.get_result(op, key).await?.is_some())
    }

    async fn store_result(
        &self,
        op: OperationKind,
        key: &IdempotencyKey,
        value: String,
        ttl: Duration,
    ) -> Result<(), GatewayError> {
        let scoped = op.scoped_key(key);
        let mut inner = self.inner.lock().expect("idempotency store poisoned");
        let expired = inner
            .results
            .get(&scoped)
            .is_some_and(|(deadline, _)| *deadline <= Instant::now());
        if expired || !inner.results.contains_key(&scoped) {
            inner.results.insert(scoped, (Instant::now() + ttl, value));
        }
        Ok(())
    }

    async fn get_result(
        &self,
        op: OperationKind,
        key: &IdempotencyKey,
    ) -> Result<Option<String>, GatewayError> {
        let scoped = op.scoped_key(key);
        let mut inner = self.inner.lock().expect("idempotency store poisoned");
        match inner.results.get(&scoped) {
            Some((deadline, value)) if *deadline > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                inner.results.remove(&scoped);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn acquire_lock(
        &self,
        op: OperationKind,
        key: &IdempotencyKey,
        ttl: Duration,
    ) -> Result<bool, GatewayError> {
        let scoped = op.scoped_key(key);
        let mut inner = self.inner.lock().expect("idempotency store poisoned");
        let now = Instant::now();
        match inner.locks.get(&scoped) {
            Some(deadline) if *deadline > now => Ok(false),
            _ => {
                inner.locks.insert(scoped, now + ttl);
                Ok(true)
            }
        }
    }

    async fn release_lock(
        &self,
        op: OperationKind,
        key: &IdempotencyKey,
    ) -> Result<(), GatewayError> {
        self.inner
            .lock()
            .expect("idempotency store poisoned")
            .locks
            .remove(&op.scoped_key(key));
        Ok(())
    }
}

// ── Postgres-backed (production) ─────────────────────────────────────────────

/// Lock and result rows live in Postgres, giving atomic SET-NX semantics
/// across replicas via `INSERT .. ON CONFLICT`.
pub struct PostgresIdempotencyStore {
    pool: PgPool,
}

impl PostgresIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    async fn is_processed(
        &self,
        op: OperationKind,
        key: &IdempotencyKey,
    ) -> Result<bool, GatewayError> {
        let row = sqlx::query(
            "SELECT 1 AS one FROM idempotency_results WHERE key = $1 AND expires_at > now()",
        )
        .bind(op.scoped_key(key))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn store_result(
        &self,
        op: OperationKind,
        key: &IdempotencyKey,
        value: String,
        ttl: Duration,
    ) -> Result<(), GatewayError> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_results (key, value, expires_at)
            VALUES ($1, $2, now() + make_interval(secs => $3))
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(op.scoped_key(key))
        .bind(value)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_result(
        &self,
        op: OperationKind,
        key: &IdempotencyKey,
    ) -> Result<Option<String>, GatewayError> {
        let row = sqlx::query(
            "SELECT value FROM idempotency_results WHERE key = $1 AND expires_at > now()",
        )
        .bind(op.scoped_key(key))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("value")))
    }

    async fn acquire_lock(
        &self,
        op: OperationKind,
        key: &IdempotencyKey,
        ttl: Duration,
    ) -> Result<bool, GatewayError> {
        // Atomic take-or-steal-expired: the conditional upsert only wins
        // when no live lock row exists.
        let row = sqlx::query(
            r#"
            INSERT INTO idempotency_locks (key, expires_at)
            VALUES ($1, now() + make_interval(secs => $2))
            ON CONFLICT (key) DO UPDATE SET expires_at = EXCLUDED.expires_at
            WHERE idempotency_locks.expires_at <= now()
            RETURNING key
            "#,
        )
        .bind(op.scoped_key(key))
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn release_lock(
        &self,
        op: OperationKind,
        key: &IdempotencyKey,
    ) -> Result<(), GatewayError> {
        sqlx::query("DELETE FROM idempotency_locks WHERE key = $1")
            .bind(op.scoped_key(key))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
