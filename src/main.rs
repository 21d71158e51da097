use {
    payflow::{
        AppState, Backends,
        config::AppConfig,
        infra::idempotency::PostgresIdempotencyStore,
        infra::postgres::{
            PgAuditLog, PgPaymentStore, PgProviderStore, PgRefundStore, PgWebhookStore,
        },
        infra::vault::CredentialVault,
        services::events::{LogPublisher, NoopPublisher},
        services::worker,
        transport::http::router,
    },
    sqlx::postgres::PgPoolOptions,
    std::sync::Arc,
    tokio::sync::watch,
    tracing_subscriber::EnvFilter,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env().expect("configuration");
    let vault = CredentialVault::from_base64_key(&config.vault_key_base64).expect("vault key");

    let mut backends = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(16)
                .connect(url)
                .await
                .expect("database connection");
            sqlx::migrate!().run(&pool).await.expect("migrations");

            let idempotency_pool = match &config.idempotency_database_url {
                Some(idem_url) if idem_url != url => PgPoolOptions::new()
                    .max_connections(8)
                    .connect(idem_url)
                    .await
                    .expect("idempotency store connection"),
                _ => pool.clone(),
            };

            Backends {
                payments: Arc::new(PgPaymentStore::new(pool.clone())),
                refunds: Arc::new(PgRefundStore::new(pool.clone())),
                providers: Arc::new(PgProviderStore::new(pool.clone())),
                webhooks: Arc::new(PgWebhookStore::new(pool.clone())),
                audit: Arc::new(PgAuditLog::new(pool)),
                idempotency: Arc::new(PostgresIdempotencyStore::new(idempotency_pool)),
                publisher: Arc::new(NoopPublisher),
            }
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory stores (development only)");
            Backends::in_memory()
        }
    };
    if config.event_bus_url.is_some() {
        backends.publisher = Arc::new(LogPublisher);
    }

    let webhook_store = backends.webhooks.clone();
    let state = AppState::assemble(
        backends,
        vault,
        config.resilience.clone(),
        config.webhook_rate_limit_per_minute,
        reqwest::Client::new(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(worker::run_retry_loop(
        state.webhooks.clone(),
        shutdown_rx.clone(),
    ));
    tokio::spawn(worker::run_cleanup_loop(webhook_store, shutdown_rx));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("bind");
    tracing::info!(addr = %config.bind_addr, "payment gateway listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await
        .expect("server");
}
