use {
    crate::domain::{
        error::GatewayError,
        id::CorrelationId,
        money::{Currency, Money, MoneyAmount},
        refund::{RefundStatus, RefundTransaction, RefundType},
    },
    crate::infra::store::RefundStore,
    async_trait::async_trait,
    sqlx::{PgPool, Row, postgres::PgRow},
    uuid::Uuid,
};

pub struct PgRefundStore {
    pool: PgPool,
}

impl PgRefundStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_refund(row: &PgRow) -> Result<RefundTransaction, GatewayError> {
    let amount = MoneyAmount::new(row.try_get::<i64, _>("amount")?)?;
    let currency = Currency::new(row.try_get::<&str, _>("currency")?)?;
    let correlation: String = row.try_get("correlation_id")?;

    Ok(RefundTransaction {
        id: row.try_get("id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        payment_transaction_id: row.try_get("payment_transaction_id")?,
        provider_id: row.try_get("provider_id")?,
        provider_refund_id: row.try_get("provider_refund_id")?,
        money: Money::new(amount, currency),
        status: RefundStatus::try_from(row.try_get::<&str, _>("status")?)?,
        refund_type: RefundType::try_from(row.try_get::<&str, _>("refund_type")?)?,
        reason: row.try_get("reason")?,
        error_message: row.try_get("error_message")?,
        correlation_id: CorrelationId::from_header(Some(&correlation)),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
        row_version: row.try_get("row_version")?,
    })
}

const SELECT_COLUMNS: &str = r#"
    id, idempotency_key, payment_transaction_id, provider_id, provider_refund_id,
    amount, currency, status, refund_type, reason, error_message, correlation_id,
    created_at, updated_at, completed_at, row_version
"#;

#[async_trait]
impl RefundStore for PgRefundStore {
    async fn insert(&self, refund: &RefundTransaction) -> Result<(), GatewayError> {
        let result = sqlx::query(
            r#"
            INSERT INTO refund_transactions
                (id, idempotency_key, payment_transaction_id, provider_id,
                 provider_refund_id, amount, currency, status, refund_type, reason,
                 error_message, correlation_id, created_at, updated_at, completed_at,
                 row_version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(refund.id)
        .bind(&refund.idempotency_key)
        .bind(refund.payment_transaction_id)
        .bind(refund.provider_id)
        .bind(&refund.provider_refund_id)
        .bind(refund.money.amount().minor_units())
        .bind(refund.money.currency().as_str())
        .bind(refund.status.as_str())
        .bind(refund.refund_type.as_str())
        .bind(&refund.reason)
        .bind(&refund.error_message)
        .bind(refund.correlation_id.as_str())
        .bind(refund.created_at)
        .bind(refund.updated_at)
        .bind(refund.completed_at)
        .bind(refund.row_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::ConcurrentRequest);
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<RefundTransaction>, GatewayError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM refund_transactions WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_refund).transpose()
    }

    async fn get_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<RefundTransaction>, GatewayError> {
        let sql =
            format!("SELECT {SELECT_COLUMNS} FROM refund_transactions WHERE idempotency_key = $1");
        let row = sqlx::query(&sql).bind(key).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_refund).transpose()
    }

    async fn find_by_provider_refund(
        &self,
        provider_id: Uuid,
        provider_refund_id: &str,
    ) -> Result<Option<RefundTransaction>, GatewayError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM refund_transactions \
             WHERE provider_id = $1 AND provider_refund_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(provider_id)
            .bind(provider_refund_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_refund).transpose()
    }

    async fn list_for_payment(
        &self,
        payment_transaction_id: Uuid,
    ) -> Result<Vec<RefundTransaction>, GatewayError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM refund_transactions \
             WHERE payment_transaction_id = $1 ORDER BY created_at"
        );
        let rows = sqlx::query(&sql)
            .bind(payment_transaction_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_refund).collect()
    }

    async fn update(
        &self,
        refund: &RefundTransaction,
    ) -> Result<RefundTransaction, GatewayError> {
        let result = sqlx::query(
            r#"
            UPDATE refund_transactions
            SET status = $3, provider_refund_id = $4, error_message = $5,
                updated_at = $6, completed_at = $7, row_version = row_version + 1
            WHERE id = $1 AND row_version = $2
            "#,
        )
        .bind(refund.id)
        .bind(refund.row_version)
        .bind(refund.status.as_str())
        .bind(&refund.provider_refund_id)
        .bind(&refund.error_message)
        .bind(refund.updated_at)
        .bind(refund.completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::ConcurrentModification);
        }
        let mut updated = refund.clone();
        updated.row_version += 1;
        Ok(updated)
    }
}
