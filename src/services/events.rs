use {
    crate::domain::{error::GatewayError, event::GatewayEvent},
    async_trait::async_trait,
};

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &GatewayEvent) -> Result<(), GatewayError>;
}

/// Fallback when no event bus is configured: the event is logged and
/// dropped. The audit log remains the replay source either way.
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, event: &GatewayEvent) -> Result<(), GatewayError> {
        tracing::debug!(event = event.name(), "event bus not configured, dropping event");
        Ok(())
    }
}

/// Emits events as structured log lines. Stands in for a durable bus
/// where one is configured but not reachable from this deployment; the
/// external reconciler tails these the same way.
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: &GatewayEvent) -> Result<(), GatewayError> {
        let payload = serde_json::to_string(event)?;
        tracing::info!(event = event.name(), %payload, "domain event");
        Ok(())
    }
}

/// Publish without letting a bus outage fail the owning operation. The
/// state change is already durable; the failure is logged for the external
/// reconciler.
pub async fn publish_best_effort(publisher: &dyn EventPublisher, event: GatewayEvent) {
    if let Err(e) = publisher.publish(&event).await {
        tracing::warn!(event = event.name(), error = %e, "event publish failed, continuing");
    }
}
