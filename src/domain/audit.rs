use {
    super::id::CorrelationId,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    uuid::Uuid,
};

/// One append-only row per status transition. Never updated, never deleted;
/// history reads back ordered by `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionLogEntry {
    pub id: Uuid,
    pub payment_transaction_id: Uuid,
    pub refund_transaction_id: Option<Uuid>,
    pub previous_status: Option<String>,
    pub new_status: String,
    pub event_type: String,
    pub message: String,
    pub provider_response: Option<serde_json::Value>,
    pub error_details: Option<String>,
    pub correlation_id: CorrelationId,
    pub created_at: DateTime<Utc>,
}

pub struct TransitionRecord<'a> {
    pub payment_transaction_id: Uuid,
    pub refund_transaction_id: Option<Uuid>,
    pub previous_status: Option<&'a str>,
    pub new_status: &'a str,
    pub event_type: &'a str,
    pub message: String,
    pub provider_response: Option<serde_json::Value>,
    pub error_details: Option<String>,
    pub correlation_id: &'a CorrelationId,
}

impl TransactionLogEntry {
    pub fn record(t: TransitionRecord<'_>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            payment_transaction_id: t.payment_transaction_id,
            refund_transaction_id: t.refund_transaction_id,
            previous_status: t.previous_status.map(str::to_string),
            new_status: t.new_status.to_string(),
            event_type: t.event_type.to_string(),
            message: t.message,
            provider_response: t.provider_response,
            error_details: t.error_details,
            correlation_id: t.correlation_id.clone(),
            created_at: now,
        }
    }
}
