use {
    super::id::CorrelationId,
    chrono::{DateTime, Utc},
    serde::Serialize,
    uuid::Uuid,
};

/// Domain events emitted to downstream consumers. Fire-and-forget: a bus
/// outage never fails the owning operation, and the audit log remains the
/// source for replay.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    PaymentCreated {
        transaction_id: Uuid,
        amount: String,
        currency: String,
        provider: String,
        correlation_id: CorrelationId,
        occurred_at: DateTime<Utc>,
    },
    PaymentCompleted {
        transaction_id: Uuid,
        provider_transaction_id: Option<String>,
        correlation_id: CorrelationId,
        occurred_at: DateTime<Utc>,
    },
    PaymentFailed {
        transaction_id: Uuid,
        error_message: Option<String>,
        provider_error_code: Option<String>,
        correlation_id: CorrelationId,
        occurred_at: DateTime<Utc>,
    },
    RefundCreated {
        refund_id: Uuid,
        payment_transaction_id: Uuid,
        amount: String,
        currency: String,
        correlation_id: CorrelationId,
        occurred_at: DateTime<Utc>,
    },
    RefundCompleted {
        refund_id: Uuid,
        payment_transaction_id: Uuid,
        correlation_id: CorrelationId,
        occurred_at: DateTime<Utc>,
    },
    RefundFailed {
        refund_id: Uuid,
        payment_transaction_id: Uuid,
        error_message: Option<String>,
        correlation_id: CorrelationId,
        occurred_at: DateTime<Utc>,
    },
}

impl GatewayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PaymentCreated { .. } => "PaymentCreatedEvent",
            Self::PaymentCompleted { .. } => "PaymentCompletedEvent",
            Self::PaymentFailed { .. } => "PaymentFailedEvent",
            Self::RefundCreated { .. } => "RefundCreatedEvent",
            Self::RefundCompleted { .. } => "RefundCompletedEvent",
            Self::RefundFailed { .. } => "RefundFailedEvent",
        }
    }
}
