use {
    super::webhooks::WebhookService,
    crate::infra::store::WebhookStore,
    chrono::{Duration as ChronoDuration, Utc},
    std::sync::Arc,
    std::time::Duration,
    tokio::sync::watch,
};

const RETRY_INTERVAL: Duration = Duration::from_secs(30);
const RETRY_BATCH: usize = 20;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const RETENTION_DAYS: i64 = 90;

/// Re-drive failed webhook events whose backoff has elapsed.
pub async fn run_retry_loop(service: WebhookService, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("webhook retry loop started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("webhook retry loop shutting down");
                return;
            }
            _ = tokio::time::sleep(RETRY_INTERVAL) => {}
        }

        match service.retry_due(RETRY_BATCH).await {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "re-drove failed webhook events"),
            Err(e) => tracing::error!(error = %e, "webhook retry pass failed"),
        }
    }
}

/// Age out webhook events past the retention window.
pub async fn run_cleanup_loop(store: Arc<dyn WebhookStore>, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("webhook cleanup loop started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("webhook cleanup loop shutting down");
                return;
            }
            _ = tokio::time::sleep(CLEANUP_INTERVAL) => {}
        }

        let cutoff = Utc::now() - ChronoDuration::days(RETENTION_DAYS);
        match store.delete_older_than(cutoff).await {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "deleted aged-out webhook events"),
            Err(e) => tracing::error!(error = %e, "webhook cleanup pass failed"),
        }
    }
}
