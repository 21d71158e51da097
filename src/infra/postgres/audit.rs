use {
    crate::domain::{audit::TransactionLogEntry, error::GatewayError, id::CorrelationId},
    crate::infra::store::AuditLogStore,
    async_trait::async_trait,
    sqlx::{PgPool, Row},
    uuid::Uuid,
};

pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLogStore for PgAuditLog {
    async fn append(&self, entry: &TransactionLogEntry) -> Result<(), GatewayError> {
        sqlx::query(
            r#"
            INSERT INTO transaction_logs
                (id, payment_transaction_id, refund_transaction_id, previous_status,
                 new_status, event_type, message, provider_response, error_details,
                 correlation_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(entry.id)
        .bind(entry.payment_transaction_id)
        .bind(entry.refund_transaction_id)
        .bind(&entry.previous_status)
        .bind(&entry.new_status)
        .bind(&entry.event_type)
        .bind(&entry.message)
        .bind(&entry.provider_response)
        .bind(&entry.error_details)
        .bind(entry.correlation_id.as_str())
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_payment(
        &self,
        payment_transaction_id: Uuid,
    ) -> Result<Vec<TransactionLogEntry>, GatewayError> {
        let rows = sqlx::query(
            r#"
            SELECT id, payment_transaction_id, refund_transaction_id, previous_status,
                   new_status, event_type, message, provider_response, error_details,
                   correlation_id, created_at
            FROM transaction_logs
            WHERE payment_transaction_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(payment_transaction_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let correlation: String = row.try_get("correlation_id")?;
                Ok(TransactionLogEntry {
                    id: row.try_get("id")?,
                    payment_transaction_id: row.try_get("payment_transaction_id")?,
                    refund_transaction_id: row.try_get("refund_transaction_id")?,
                    previous_status: row.try_get("previous_status")?,
                    new_status: row.try_get("new_status")?,
                    event_type: row.try_get("event_type")?,
                    message: row.try_get("message")?,
                    provider_response: row.try_get("provider_response")?,
                    error_details: row.try_get("error_details")?,
                    correlation_id: CorrelationId::from_header(Some(&correlation)),
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}
