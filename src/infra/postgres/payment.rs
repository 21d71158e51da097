use {
    crate::domain::{
        error::GatewayError,
        id::CorrelationId,
        money::{Currency, Money, MoneyAmount},
        payment::{PaymentStatus, PaymentTransaction},
    },
    crate::infra::store::PaymentStore,
    async_trait::async_trait,
    sqlx::{PgPool, Row, postgres::PgRow},
    uuid::Uuid,
};

pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_payment(row: &PgRow) -> Result<PaymentTransaction, GatewayError> {
    let amount = MoneyAmount::new(row.try_get::<i64, _>("amount")?)?;
    let currency = Currency::new(row.try_get::<&str, _>("currency")?)?;
    let status = PaymentStatus::try_from(row.try_get::<&str, _>("status")?)?;
    let metadata = serde_json::from_value(row.try_get("metadata")?)?;
    let correlation: String = row.try_get("correlation_id")?;

    Ok(PaymentTransaction {
        id: row.try_get("id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        request_fingerprint: row.try_get("request_fingerprint")?,
        money: Money::new(amount, currency),
        status,
        customer_id: row.try_get("customer_id")?,
        order_id: row.try_get("order_id")?,
        description: row.try_get("description")?,
        return_url: row.try_get("return_url")?,
        cancel_url: row.try_get("cancel_url")?,
        metadata,
        provider_id: row.try_get("provider_id")?,
        provider_name: row.try_get("provider_name")?,
        provider_transaction_id: row.try_get("provider_transaction_id")?,
        payment_url: row.try_get("payment_url")?,
        error_message: row.try_get("error_message")?,
        provider_error_code: row.try_get("provider_error_code")?,
        retry_count: row.try_get("retry_count")?,
        correlation_id: CorrelationId::from_header(Some(&correlation)),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
        row_version: row.try_get("row_version")?,
    })
}

const SELECT_COLUMNS: &str = r#"
    id, idempotency_key, request_fingerprint, amount, currency, status,
    customer_id, order_id, description, return_url, cancel_url, metadata,
    provider_id, provider_name, provider_transaction_id, payment_url,
    error_message, provider_error_code, retry_count, correlation_id,
    created_at, updated_at, completed_at, row_version
"#;

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn insert(&self, txn: &PaymentTransaction) -> Result<(), GatewayError> {
        let result = sqlx::query(
            r#"
            INSERT INTO payment_transactions
                (id, idempotency_key, request_fingerprint, amount, currency, status,
                 customer_id, order_id, description, return_url, cancel_url, metadata,
                 provider_id, provider_name, provider_transaction_id, payment_url,
                 error_message, provider_error_code, retry_count, correlation_id,
                 created_at, updated_at, completed_at, row_version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                    $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(txn.id)
        .bind(&txn.idempotency_key)
        .bind(&txn.request_fingerprint)
        .bind(txn.money.amount().minor_units())
        .bind(txn.money.currency().as_str())
        .bind(txn.status.as_str())
        .bind(&txn.customer_id)
        .bind(&txn.order_id)
        .bind(&txn.description)
        .bind(&txn.return_url)
        .bind(&txn.cancel_url)
        .bind(serde_json::to_value(&txn.metadata)?)
        .bind(txn.provider_id)
        .bind(&txn.provider_name)
        .bind(&txn.provider_transaction_id)
        .bind(&txn.payment_url)
        .bind(&txn.error_message)
        .bind(&txn.provider_error_code)
        .bind(txn.retry_count)
        .bind(txn.correlation_id.as_str())
        .bind(txn.created_at)
        .bind(txn.updated_at)
        .bind(txn.completed_at)
        .bind(txn.row_version)
        .execute(&self.pool)
        .await?;

        // Unique-index safety net under the idempotency lock protocol.
        if result.rows_affected() == 0 {
            return Err(GatewayError::ConcurrentRequest);
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PaymentTransaction>, GatewayError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM payment_transactions WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_payment).transpose()
    }

    async fn get_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PaymentTransaction>, GatewayError> {
        let sql =
            format!("SELECT {SELECT_COLUMNS} FROM payment_transactions WHERE idempotency_key = $1");
        let row = sqlx::query(&sql).bind(key).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_payment).transpose()
    }

    async fn find_by_provider_transaction(
        &self,
        provider_id: Uuid,
        provider_transaction_id: &str,
    ) -> Result<Option<PaymentTransaction>, GatewayError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM payment_transactions \
             WHERE provider_id = $1 AND provider_transaction_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(provider_id)
            .bind(provider_transaction_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_payment).transpose()
    }

    async fn update(
        &self,
        txn: &PaymentTransaction,
    ) -> Result<PaymentTransaction, GatewayError> {
        let result = sqlx::query(
            r#"
            UPDATE payment_transactions
            SET status = $3, provider_transaction_id = $4, payment_url = $5,
                error_message = $6, provider_error_code = $7, retry_count = $8,
                metadata = $9, updated_at = $10, completed_at = $11,
                row_version = row_version + 1
            WHERE id = $1 AND row_version = $2
            "#,
        )
        .bind(txn.id)
        .bind(txn.row_version)
        .bind(txn.status.as_str())
        .bind(&txn.provider_transaction_id)
        .bind(&txn.payment_url)
        .bind(&txn.error_message)
        .bind(&txn.provider_error_code)
        .bind(txn.retry_count)
        .bind(serde_json::to_value(&txn.metadata)?)
        .bind(txn.updated_at)
        .bind(txn.completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::ConcurrentModification);
        }
        let mut updated = txn.clone();
        updated.row_version += 1;
        Ok(updated)
    }
}
