use {
    crate::domain::{
        audit::TransactionLogEntry,
        error::GatewayError,
        payment::PaymentTransaction,
        provider::{Provider, ProviderStatus},
        refund::RefundTransaction,
        webhook::WebhookEvent,
    },
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    uuid::Uuid,
};

/// Payment rows. `update` applies optimistic concurrency: it matches on
/// `(id, row_version)` and returns the row with the version bumped, or
/// `ConcurrentModification` when another writer got there first.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert(&self, txn: &PaymentTransaction) -> Result<(), GatewayError>;

    async fn get(&self, id: Uuid) -> Result<Option<PaymentTransaction>, GatewayError>;

    async fn get_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PaymentTransaction>, GatewayError>;

    async fn find_by_provider_transaction(
        &self,
        provider_id: Uuid,
        provider_transaction_id: &str,
    ) -> Result<Option<PaymentTransaction>, GatewayError>;

    async fn update(&self, txn: &PaymentTransaction)
    -> Result<PaymentTransaction, GatewayError>;
}

#[async_trait]
pub trait RefundStore: Send + Sync {
    async fn insert(&self, refund: &RefundTransaction) -> Result<(), GatewayError>;

    async fn get(&self, id: Uuid) -> Result<Option<RefundTransaction>, GatewayError>;

    async fn get_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<RefundTransaction>, GatewayError>;

    async fn find_by_provider_refund(
        &self,
        provider_id: Uuid,
        provider_refund_id: &str,
    ) -> Result<Option<RefundTransaction>, GatewayError>;

    async fn list_for_payment(
        &self,
        payment_transaction_id: Uuid,
    ) -> Result<Vec<RefundTransaction>, GatewayError>;

    async fn update(&self, refund: &RefundTransaction)
    -> Result<RefundTransaction, GatewayError>;
}

/// Provider rows. Reads exclude soft-deleted rows; `list_all` includes
/// non-ACTIVE rows so the admin surface can show them.
#[async_trait]
pub trait ProviderStore: Send + Sync {
    async fn insert(&self, provider: &Provider) -> Result<(), GatewayError>;

    async fn get(&self, id: Uuid) -> Result<Option<Provider>, GatewayError>;

    async fn get_by_name(&self, name: &str) -> Result<Option<Provider>, GatewayError>;

    async fn list_all(&self) -> Result<Vec<Provider>, GatewayError>;

    async fn update(&self, provider: &Provider) -> Result<(), GatewayError>;

    async fn update_status(
        &self,
        id: Uuid,
        status: ProviderStatus,
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError>;

    async fn soft_delete(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), GatewayError>;
}

#[async_trait]
pub trait WebhookStore: Send + Sync {
    async fn insert(&self, event: &WebhookEvent) -> Result<(), GatewayError>;

    async fn get(&self, id: Uuid) -> Result<Option<WebhookEvent>, GatewayError>;

    async fn find_by_provider_event(
        &self,
        provider_id: Uuid,
        provider_event_id: &str,
    ) -> Result<Option<WebhookEvent>, GatewayError>;

    async fn update(&self, event: &WebhookEvent) -> Result<(), GatewayError>;

    /// FAILED events whose retry time has arrived, oldest first.
    async fn due_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WebhookEvent>, GatewayError>;

    /// Age out old events; returns how many were deleted.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, GatewayError>;
}

/// Append-only. There is deliberately no update or delete on this trait.
#[async_trait]
pub trait AuditLogStore: Send + Sync {
    async fn append(&self, entry: &TransactionLogEntry) -> Result<(), GatewayError>;

    async fn list_for_payment(
        &self,
        payment_transaction_id: Uuid,
    ) -> Result<Vec<TransactionLogEntry>, GatewayError>;
}
