use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    // ── Request validation ───────────────────────────────────────────────────
    #[error("validation: {0}")]
    Validation(String),

    #[error("Idempotency-Key header is required")]
    IdempotencyKeyRequired,

    #[error("idempotency key was already used with a different request body")]
    IdempotencyKeyConflict,

    // ── Concurrency ──────────────────────────────────────────────────────────
    #[error("another request with the same idempotency key is in flight")]
    ConcurrentRequest,

    #[error("concurrent modification: row version conflict")]
    ConcurrentModification,

    // ── Domain state ─────────────────────────────────────────────────────────
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("refund amount {requested} exceeds refundable remainder {remaining}")]
    ExcessiveAmount { requested: i64, remaining: i64 },

    // ── Routing / provider ───────────────────────────────────────────────────
    #[error("no eligible provider for currency {0}")]
    NoEligibleProvider(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("provider error: {message}")]
    Provider {
        message: String,
        code: Option<String>,
    },

    #[error("circuit open for {0}")]
    CircuitOpen(String),

    #[error("provider call timed out")]
    Timeout,

    // ── Webhook edge ─────────────────────────────────────────────────────────
    #[error("webhook signature rejected")]
    WebhookSignature,

    #[error("rate limit exceeded")]
    RateLimited,

    // ── Infrastructure ───────────────────────────────────────────────────────
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable machine-readable code for the API error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "INVALID_ARGUMENT",
            Self::IdempotencyKeyRequired => "IDEMPOTENCY_KEY_REQUIRED",
            Self::IdempotencyKeyConflict => "IDEMPOTENCY_KEY_CONFLICT",
            Self::ConcurrentRequest => "CONCURRENT_REQUEST",
            Self::ConcurrentModification => "CONCURRENT_MODIFICATION",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            Self::ExcessiveAmount { .. } => "EXCESSIVE_AMOUNT",
            Self::NoEligibleProvider(_) => "NO_ELIGIBLE_PROVIDER",
            Self::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            Self::Provider { .. } => "PROVIDER_ERROR",
            Self::CircuitOpen(_) => "CIRCUIT_OPEN",
            Self::Timeout => "PROVIDER_TIMEOUT",
            Self::WebhookSignature => "WEBHOOK_SIGNATURE_INVALID",
            Self::RateLimited => "RATE_LIMIT_EXCEEDED",
            Self::Database(_) | Self::Serialization(_) | Self::Internal(_) => "INTERNAL",
        }
    }

    /// Whether a provider-call failure is worth retrying. Provider 4xx
    /// rejections are final; I/O trouble and timeouts are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::ProviderUnavailable(_))
    }
}
