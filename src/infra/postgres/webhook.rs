use {
    crate::domain::{
        error::GatewayError,
        webhook::{WebhookEvent, WebhookProcessingStatus},
    },
    crate::infra::store::WebhookStore,
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    sqlx::{PgPool, Row, postgres::PgRow},
    uuid::Uuid,
};

pub struct PgWebhookStore {
    pool: PgPool,
}

impl PgWebhookStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_event(row: &PgRow) -> Result<WebhookEvent, GatewayError> {
    Ok(WebhookEvent {
        id: row.try_get("id")?,
        provider_id: row.try_get("provider_id")?,
        provider_event_id: row.try_get("provider_event_id")?,
        event_type: row.try_get("event_type")?,
        raw_payload: row.try_get("raw_payload")?,
        parsed_payload: row.try_get("parsed_payload")?,
        signature: row.try_get("signature")?,
        signature_validated: row.try_get("signature_validated")?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        processing_status: WebhookProcessingStatus::try_from(
            row.try_get::<&str, _>("processing_status")?,
        )?,
        processing_attempts: row.try_get("processing_attempts")?,
        processed_at: row.try_get("processed_at")?,
        failed_at: row.try_get("failed_at")?,
        failure_reason: row.try_get("failure_reason")?,
        next_retry_at: row.try_get("next_retry_at")?,
        payment_transaction_id: row.try_get("payment_transaction_id")?,
        refund_transaction_id: row.try_get("refund_transaction_id")?,
        created_at: row.try_get("created_at")?,
    })
}

const SELECT_COLUMNS: &str = r#"
    id, provider_id, provider_event_id, event_type, raw_payload, parsed_payload,
    signature, signature_validated, ip_address, user_agent, processing_status,
    processing_attempts, processed_at, failed_at, failure_reason, next_retry_at,
    payment_transaction_id, refund_transaction_id, created_at
"#;

#[async_trait]
impl WebhookStore for PgWebhookStore {
    async fn insert(&self, event: &WebhookEvent) -> Result<(), GatewayError> {
        sqlx::query(
            r#"
            INSERT INTO webhook_events
                (id, provider_id, provider_event_id, event_type, raw_payload,
                 parsed_payload, signature, signature_validated, ip_address, user_agent,
                 processing_status, processing_attempts, processed_at, failed_at,
                 failure_reason, next_retry_at, payment_transaction_id,
                 refund_transaction_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(event.id)
        .bind(event.provider_id)
        .bind(&event.provider_event_id)
        .bind(&event.event_type)
        .bind(&event.raw_payload)
        .bind(&event.parsed_payload)
        .bind(&event.signature)
        .bind(event.signature_validated)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(event.processing_status.as_str())
        .bind(event.processing_attempts)
        .bind(event.processed_at)
        .bind(event.failed_at)
        .bind(&event.failure_reason)
        .bind(event.next_retry_at)
        .bind(event.payment_transaction_id)
        .bind(event.refund_transaction_id)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<WebhookEvent>, GatewayError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM webhook_events WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_event).transpose()
    }

    async fn find_by_provider_event(
        &self,
        provider_id: Uuid,
        provider_event_id: &str,
    ) -> Result<Option<WebhookEvent>, GatewayError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM webhook_events \
             WHERE provider_id = $1 AND provider_event_id = $2 \
               AND processing_status <> 'DUPLICATE' \
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(provider_id)
            .bind(provider_event_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_event).transpose()
    }

    async fn update(&self, event: &WebhookEvent) -> Result<(), GatewayError> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events
            SET parsed_payload = $2, processing_status = $3, processing_attempts = $4,
                processed_at = $5, failed_at = $6, failure_reason = $7,
                next_retry_at = $8, payment_transaction_id = $9,
                refund_transaction_id = $10
            WHERE id = $1
            "#,
        )
        .bind(event.id)
        .bind(&event.parsed_payload)
        .bind(event.processing_status.as_str())
        .bind(event.processing_attempts)
        .bind(event.processed_at)
        .bind(event.failed_at)
        .bind(&event.failure_reason)
        .bind(event.next_retry_at)
        .bind(event.payment_transaction_id)
        .bind(event.refund_transaction_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::NotFound(format!("webhook event {}", event.id)));
        }
        Ok(())
    }

    async fn due_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WebhookEvent>, GatewayError> {
        // SKIP LOCKED keeps replicas from re-driving the same event.
        let sql = format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM webhook_events
            WHERE id IN (
                SELECT id FROM webhook_events
                WHERE processing_status = 'FAILED' AND next_retry_at <= $1
                ORDER BY next_retry_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            ORDER BY next_retry_at
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_event).collect()
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, GatewayError> {
        let result = sqlx::query("DELETE FROM webhook_events WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
