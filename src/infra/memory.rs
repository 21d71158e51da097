//! In-memory store implementations. Development and test use only: nothing
//! here survives a restart, and nothing is shared across replicas.

use {
    super::store::{AuditLogStore, PaymentStore, ProviderStore, RefundStore, WebhookStore},
    crate::domain::{
        audit::TransactionLogEntry,
        error::GatewayError,
        payment::PaymentTransaction,
        provider::{Provider, ProviderStatus},
        refund::RefundTransaction,
        webhook::{WebhookEvent, WebhookProcessingStatus},
    },
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    std::collections::HashMap,
    std::sync::Mutex,
    uuid::Uuid,
};

#[derive(Default)]
pub struct MemoryPaymentStore {
    rows: Mutex<HashMap<Uuid, PaymentTransaction>>,
}

impl MemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for MemoryPaymentStore {
    async fn insert(&self, txn: &PaymentTransaction) -> Result<(), GatewayError> {
        let mut rows = self.rows.lock().expect("payment store poisoned");
        if rows
            .values()
            .any(|existing| existing.idempotency_key == txn.idempotency_key)
        {
            return Err(GatewayError::ConcurrentRequest);
        }
        rows.insert(txn.id, txn.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PaymentTransaction>, GatewayError> {
        Ok(self.rows.lock().expect("payment store poisoned").get(&id).cloned())
    }

    async fn get_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PaymentTransaction>, GatewayError> {
        Ok(self
            .rows
            .lock()
            .expect("payment store poisoned")
            .values()
            .find(|t| t.idempotency_key == key)
            .cloned())
    }

    async fn find_by_provider_transaction(
        &self,
        provider_id: Uuid,
        provider_transaction_id: &str,
    ) -> Result<Option<PaymentTransaction>, GatewayError> {
        Ok(self
            .rows
            .lock()
            .expect("payment store poisoned")
            .values()
            .find(|t| {
                t.provider_id == provider_id
                    && t.provider_transaction_id.as_deref() == Some(provider_transaction_id)
            })
            .cloned())
    }

    async fn update(
        &self,
        txn: &PaymentTransaction,
    ) -> Result<PaymentTransaction, GatewayError> {
        let mut rows = self.rows.lock().expect("payment store poisoned");
        let current = rows
            .get_mut(&txn.id)
            .ok_or_else(|| GatewayError::NotFound(format!("payment {}", txn.id)))?;
        if current.row_version != txn.row_version {
            return Err(GatewayError::ConcurrentModification);
        }
        let mut updated = txn.clone();
        updated.row_version += 1;
        *current = updated.clone();
        Ok(updated)
    }
}

#[derive(Default)]
pub struct MemoryRefundStore {
    rows: Mutex<HashMap<Uuid, RefundTransaction>>,
}

impl MemoryRefundStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefundStore for MemoryRefundStore {
    async fn insert(&self, refund: &RefundTransaction) -> Result<(), GatewayError> {
        let mut rows = self.rows.lock().expect("refund store poisoned");
        if rows
            .values()
            .any(|existing| existing.idempotency_key == refund.idempotency_key)
        {
            return Err(GatewayError::ConcurrentRequest);
        }
        rows.insert(refund.id, refund.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<RefundTransaction>, GatewayError> {
        Ok(self.rows.lock().expect("refund store poisoned").get(&id).cloned())
    }

    async fn get_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<RefundTransaction>, GatewayError> {
        Ok(self
            .rows
            .lock()
            .expect("refund store poisoned")
            .values()
            .find(|r| r.idempotency_key == key)
            .cloned())
    }

    async fn find_by_provider_refund(
        &self,
        provider_id: Uuid,
        provider_refund_id: &str,
    ) -> Result<Option<RefundTransaction>, GatewayError> {
        Ok(self
            .rows
            .lock()
            .expect("refund store poisoned")
            .values()
            .find(|r| {
                r.provider_id == provider_id
                    && r.provider_refund_id.as_deref() == Some(provider_refund_id)
            })
            .cloned())
    }

    async fn list_for_payment(
        &self,
        payment_transaction_id: Uuid,
    ) -> Result<Vec<RefundTransaction>, GatewayError> {
        let mut refunds: Vec<_> = self
            .rows
            .lock()
            .expect("refund store poisoned")
            .values()
            .filter(|r| r.payment_transaction_id == payment_transaction_id)
            .cloned()
            .collect();
        refunds.sort_by_key(|r| r.created_at);
        Ok(refunds)
    }

    async fn update(
        &self,
        refund: &RefundTransaction,
    ) -> Result<RefundTransaction, GatewayError> {
        let mut rows = self.rows.lock().expect("refund store poisoned");
        let current = rows
            .get_mut(&refund.id)
            .ok_or_else(|| GatewayError::NotFound(format!("refund {}", refund.id)))?;
        if current.row_version != refund.row_version {
            return Err(GatewayError::ConcurrentModification);
        }
        let mut updated = refund.clone();
        updated.row_version += 1;
        *current = updated.clone();
        Ok(updated)
    }
}

#[derive(Default)]
pub struct MemoryProviderStore {
    rows: Mutex<HashMap<Uuid, Provider>>,
}

impl MemoryProviderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProviderStore for MemoryProviderStore {
    async fn insert(&self, provider: &Provider) -> Result<(), GatewayError> {
        let mut rows = self.rows.lock().expect("provider store poisoned");
        if rows
            .values()
            .any(|p| p.name == provider.name && !p.is_deleted())
        {
            return Err(GatewayError::Validation(format!(
                "provider name already registered: {}",
                provider.name
            )));
        }
        rows.insert(provider.id, provider.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Provider>, GatewayError> {
        Ok(self
            .rows
            .lock()
            .expect("provider store poisoned")
            .get(&id)
            .filter(|p| !p.is_deleted())
            .cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Provider>, GatewayError> {
        Ok(self
            .rows
            .lock()
            .expect("provider store poisoned")
            .values()
            .find(|p| p.name == name && !p.is_deleted())
            .cloned())
    }

    async fn list_all(&self) -> Result<Vec<Provider>, GatewayError> {
        let mut providers: Vec<_> = self
            .rows
            .lock()
            .expect("provider store poisoned")
            .values()
            .filter(|p| !p.is_deleted())
            .cloned()
            .collect();
        providers.sort_by(|a, b| (a.priority, &a.name).cmp(&(b.priority, &b.name)));
        Ok(providers)
    }

    async fn update(&self, provider: &Provider) -> Result<(), GatewayError> {
        let mut rows = self.rows.lock().expect("provider store poisoned");
        if !rows.contains_key(&provider.id) {
            return Err(GatewayError::NotFound(format!("provider {}", provider.id)));
        }
        rows.insert(provider.id, provider.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: ProviderStatus,
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let mut rows = self.rows.lock().expect("provider store poisoned");
        let provider = rows
            .get_mut(&id)
            .filter(|p| !p.is_deleted())
            .ok_or_else(|| GatewayError::NotFound(format!("provider {id}")))?;
        provider.status = status;
        provider.updated_at = now;
        Ok(())
    }

    async fn soft_delete(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), GatewayError> {
        let mut rows = self.rows.lock().expect("provider store poisoned");
        let provider = rows
            .get_mut(&id)
            .filter(|p| !p.is_deleted())
            .ok_or_else(|| GatewayError::NotFound(format!("provider {id}")))?;
        provider.deleted_at = Some(now);
        provider.updated_at = now;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryWebhookStore {
    rows: Mutex<HashMap<Uuid, WebhookEvent>>,
}

impl MemoryWebhookStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookStore for MemoryWebhookStore {
    async fn insert(&self, event: &WebhookEvent) -> Result<(), GatewayError> {
        self.rows
            .lock()
            .expect("webhook store poisoned")
            .insert(event.id, event.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<WebhookEvent>, GatewayError> {
        Ok(self.rows.lock().expect("webhook store poisoned").get(&id).cloned())
    }

    async fn find_by_provider_event(
        &self,
        provider_id: Uuid,
        provider_event_id: &str,
    ) -> Result<Option<WebhookEvent>, GatewayError> {
        Ok(self
            .rows
            .lock()
            .expect("webhook store poisoned")
            .values()
            .find(|e| {
                e.provider_id == provider_id
                    && e.provider_event_id == provider_event_id
                    && e.processing_status != WebhookProcessingStatus::Duplicate
            })
            .cloned())
    }

    async fn update(&self, event: &WebhookEvent) -> Result<(), GatewayError> {
        let mut rows = self.rows.lock().expect("webhook store poisoned");
        if !rows.contains_key(&event.id) {
            return Err(GatewayError::NotFound(format!("webhook event {}", event.id)));
        }
        rows.insert(event.id, event.clone());
        Ok(())
    }

    async fn due_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WebhookEvent>, GatewayError> {
        let mut due: Vec<_> = self
            .rows
            .lock()
            .expect("webhook store poisoned")
            .values()
            .filter(|e| {
                e.processing_status == WebhookProcessingStatus::Failed
                    && e.next_retry_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|e| e.next_retry_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, GatewayError> {
        let mut rows = self.rows.lock().expect("webhook store poisoned");
        let before = rows.len();
        rows.retain(|_, e| e.created_at >= cutoff);
        Ok((before - rows.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemoryAuditLog {
    rows: Mutex<Vec<TransactionLogEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLogStore for MemoryAuditLog {
    async fn append(&self, entry: &TransactionLogEntry) -> Result<(), GatewayError> {
        self.rows.lock().expect("audit log poisoned").push(entry.clone());
        Ok(())
    }

    async fn list_for_payment(
        &self,
        payment_transaction_id: Uuid,
    ) -> Result<Vec<TransactionLogEntry>, GatewayError> {
        let mut entries: Vec<_> = self
            .rows
            .lock()
            .expect("audit log poisoned")
            .iter()
            .filter(|e| e.payment_transaction_id == payment_transaction_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }
}
