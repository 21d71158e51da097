use {
    crate::domain::{
        error::GatewayError,
        money::Currency,
        provider::{Provider, ProviderStatus, RegionConfig},
    },
    crate::infra::store::ProviderStore,
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    sqlx::{PgPool, Row, postgres::PgRow},
    std::collections::BTreeSet,
    uuid::Uuid,
};

pub struct PgProviderStore {
    pool: PgPool,
}

impl PgProviderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_configurations(
        &self,
        provider_id: Uuid,
    ) -> Result<Vec<RegionConfig>, GatewayError> {
        let rows = sqlx::query(
            r#"
            SELECT region, base_url, active, max_retries, timeout_secs
            FROM provider_configurations
            WHERE provider_id = $1
            ORDER BY position
            "#,
        )
        .bind(provider_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(RegionConfig {
                    region: row.try_get("region")?,
                    base_url: row.try_get("base_url")?,
                    active: row.try_get("active")?,
                    max_retries: row.try_get::<Option<i32>, _>("max_retries")?.map(|v| v as u32),
                    timeout_secs: row.try_get::<Option<i64>, _>("timeout_secs")?.map(|v| v as u64),
                })
            })
            .collect()
    }

    async fn hydrate(&self, row: &PgRow) -> Result<Provider, GatewayError> {
        let id: Uuid = row.try_get("id")?;
        let currencies: Vec<String> = serde_json::from_value(row.try_get("supported_currencies")?)?;
        let supported_currencies = currencies
            .iter()
            .map(|c| Currency::new(c))
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(Provider {
            id,
            name: row.try_get("name")?,
            display_name: row.try_get("display_name")?,
            status: ProviderStatus::try_from(row.try_get::<&str, _>("status")?)?,
            supported_currencies,
            priority: row.try_get("priority")?,
            credentials: serde_json::from_value(row.try_get("credentials")?)?,
            configurations: self.load_configurations(id).await?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }

    async fn replace_configurations(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        provider: &Provider,
    ) -> Result<(), GatewayError> {
        sqlx::query("DELETE FROM provider_configurations WHERE provider_id = $1")
            .bind(provider.id)
            .execute(&mut **tx)
            .await?;

        for (position, config) in provider.configurations.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO provider_configurations
                    (provider_id, position, region, base_url, active, max_retries, timeout_secs)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(provider.id)
            .bind(position as i32)
            .bind(&config.region)
            .bind(&config.base_url)
            .bind(config.active)
            .bind(config.max_retries.map(|v| v as i32))
            .bind(config.timeout_secs.map(|v| v as i64))
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

const SELECT_COLUMNS: &str = r#"
    id, name, display_name, status, supported_currencies, priority, credentials,
    created_at, updated_at, deleted_at
"#;

#[async_trait]
impl ProviderStore for PgProviderStore {
    async fn insert(&self, provider: &Provider) -> Result<(), GatewayError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO providers
                (id, name, display_name, status, supported_currencies, priority,
                 credentials, created_at, updated_at, deleted_at)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10
            WHERE NOT EXISTS (
                SELECT 1 FROM providers WHERE name = $2 AND deleted_at IS NULL
            )
            "#,
        )
        .bind(provider.id)
        .bind(&provider.name)
        .bind(&provider.display_name)
        .bind(provider.status.as_str())
        .bind(serde_json::to_value(
            provider
                .supported_currencies
                .iter()
                .map(Currency::as_str)
                .collect::<Vec<_>>(),
        )?)
        .bind(provider.priority)
        .bind(serde_json::to_value(&provider.credentials)?)
        .bind(provider.created_at)
        .bind(provider.updated_at)
        .bind(provider.deleted_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::Validation(format!(
                "provider name already registered: {}",
                provider.name
            )));
        }

        self.replace_configurations(&mut tx, provider).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Provider>, GatewayError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM providers WHERE id = $1 AND deleted_at IS NULL");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(&row).await?)),
            None => Ok(None),
        }
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Provider>, GatewayError> {
        let sql =
            format!("SELECT {SELECT_COLUMNS} FROM providers WHERE name = $1 AND deleted_at IS NULL");
        let row = sqlx::query(&sql).bind(name).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(&row).await?)),
            None => Ok(None),
        }
    }

    async fn list_all(&self) -> Result<Vec<Provider>, GatewayError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM providers WHERE deleted_at IS NULL ORDER BY priority, name"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut providers = Vec::with_capacity(rows.len());
        for row in &rows {
            providers.push(self.hydrate(row).await?);
        }
        Ok(providers)
    }

    async fn update(&self, provider: &Provider) -> Result<(), GatewayError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE providers
            SET display_name = $2, status = $3, supported_currencies = $4,
                priority = $5, credentials = $6, updated_at = $7
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(provider.id)
        .bind(&provider.display_name)
        .bind(provider.status.as_str())
        .bind(serde_json::to_value(
            provider
                .supported_currencies
                .iter()
                .map(Currency::as_str)
                .collect::<Vec<_>>(),
        )?)
        .bind(provider.priority)
        .bind(serde_json::to_value(&provider.credentials)?)
        .bind(provider.updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::NotFound(format!("provider {}", provider.id)));
        }

        self.replace_configurations(&mut tx, provider).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: ProviderStatus,
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let result = sqlx::query(
            "UPDATE providers SET status = $2, updated_at = $3 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::NotFound(format!("provider {id}")));
        }
        Ok(())
    }

    async fn soft_delete(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), GatewayError> {
        let result = sqlx::query(
            "UPDATE providers SET deleted_at = $2, updated_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::NotFound(format!("provider {id}")));
        }
        Ok(())
    }
}
