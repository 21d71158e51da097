use {
    super::payments::PaymentOrchestrator,
    super::refunds::RefundOrchestrator,
    super::registry::{AdapterFactory, ProviderRegistry},
    crate::adapters::{WebhookContext, WebhookKind},
    crate::domain::{
        error::GatewayError,
        webhook::{NewWebhookEventParams, WebhookEvent, WebhookProcessingStatus},
    },
    crate::infra::rate_limit::SlidingWindowRateLimiter,
    crate::infra::store::{PaymentStore, RefundStore, WebhookStore},
    chrono::Utc,
    std::sync::Arc,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Persisted and queued; HTTP 202.
    Accepted(Uuid),
    /// Same (provider, event id) already on file; HTTP 200.
    Duplicate,
    /// Authenticity check failed; HTTP 400, reason not disclosed.
    SignatureInvalid,
    /// Sliding window exceeded; HTTP 429.
    RateLimited,
}

#[derive(Clone)]
pub struct WebhookService {
    webhooks: Arc<dyn WebhookStore>,
    payments_store: Arc<dyn PaymentStore>,
    refunds_store: Arc<dyn RefundStore>,
    registry: Arc<ProviderRegistry>,
    factory: Arc<AdapterFactory>,
    payments: PaymentOrchestrator,
    refunds: RefundOrchestrator,
    limiter: Arc<SlidingWindowRateLimiter>,
}

impl WebhookService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        webhooks: Arc<dyn WebhookStore>,
        payments_store: Arc<dyn PaymentStore>,
        refunds_store: Arc<dyn RefundStore>,
        registry: Arc<ProviderRegistry>,
        factory: Arc<AdapterFactory>,
        payments: PaymentOrchestrator,
        refunds: RefundOrchestrator,
        limiter: Arc<SlidingWindowRateLimiter>,
    ) -> Self {
        Self {
            webhooks,
            payments_store,
            refunds_store,
            registry,
            factory,
            payments,
            refunds,
            limiter,
        }
    }

    /// Validate, deduplicate, persist, and kick off processing of a
    /// provider notification.
    pub async fn ingest(
        &self,
        provider_name: &str,
        body: String,
        ctx: WebhookContext,
        user_agent: Option<String>,
    ) -> Result<IngestOutcome, GatewayError> {
        let provider = self
            .registry
            .get_by_name(provider_name)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("provider {provider_name}")))?;

        // The in-process limiter cannot error; were it backed by an
        // external store, a backend failure would have to fail OPEN here
        // rather than drop an authentic provider notification.
        let source = ctx
            .source_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".into());
        if !self.limiter.check(&format!("{provider_name}:{source}")) {
            tracing::warn!(provider = provider_name, source = %source, "webhook rate limited");
            return Ok(IngestOutcome::RateLimited);
        }

        let call = self.factory.build(&provider)?;
        let secret = self.registry.webhook_secret(&provider)?;
        let signature_header = ctx
            .header("Stripe-Signature")
            .or_else(|| ctx.header("X-Omise-Signature"))
            .or_else(|| ctx.header("X-SCB-Signature"))
            .or_else(|| ctx.header("paypal-transmission-sig"))
            .map(str::to_string);

        if !call.adapter.verify_webhook(&ctx, &body, &secret).await? {
            // Keep the rejected delivery on file; do not tell the caller
            // why. The record gets a synthetic event id so an unverified
            // body can never squat on a real provider event id and shadow
            // the authentic delivery as a duplicate.
            let mut event = WebhookEvent::new(
                NewWebhookEventParams {
                    provider_id: provider.id,
                    provider_event_id: format!("unverified-{}", Uuid::now_v7()),
                    event_type: "unverified".into(),
                    raw_payload: body,
                    signature: signature_header,
                    signature_validated: false,
                    ip_address: Some(source),
                    user_agent,
                    processing_status: WebhookProcessingStatus::Failed,
                },
                Utc::now(),
            );
            event.failure_reason = Some("signature verification failed".into());
            event.failed_at = Some(Utc::now());
            self.webhooks.insert(&event).await?;
            tracing::warn!(provider = provider_name, "webhook signature rejected");
            return Ok(IngestOutcome::SignatureInvalid);
        }

        let parsed = call.adapter.parse_webhook(&body)?;

        if self
            .webhooks
            .find_by_provider_event(provider.id, &parsed.provider_event_id)
            .await?
            .is_some()
        {
            let event = WebhookEvent::new(
                NewWebhookEventParams {
                    provider_id: provider.id,
                    provider_event_id: parsed.provider_event_id.clone(),
                    event_type: parsed.event_type.clone(),
                    raw_payload: body,
                    signature: signature_header,
                    signature_validated: true,
                    ip_address: Some(source),
                    user_agent,
                    processing_status: WebhookProcessingStatus::Duplicate,
                },
                Utc::now(),
            );
            self.webhooks.insert(&event).await?;
            tracing::info!(
                provider = provider_name,
                event_id = %parsed.provider_event_id,
                "duplicate webhook delivery"
            );
            return Ok(IngestOutcome::Duplicate);
        }

        let mut event = WebhookEvent::new(
            NewWebhookEventParams {
                provider_id: provider.id,
                provider_event_id: parsed.provider_event_id.clone(),
                event_type: parsed.event_type.clone(),
                raw_payload: body,
                signature: signature_header,
                signature_validated: true,
                ip_address: Some(source),
                user_agent,
                processing_status: WebhookProcessingStatus::Pending,
            },
            Utc::now(),
        );
        event.parsed_payload = Some(parsed.payload.clone());
        self.webhooks.insert(&event).await?;

        let id = event.id;
        if let Err(e) = self.process_event(id).await {
            // Already persisted; the retry loop re-drives it.
            tracing::error!(event_id = %id, error = %e, "webhook processing failed, will retry");
        }
        Ok(IngestOutcome::Accepted(id))
    }

    /// Apply a persisted webhook event to its target transaction. Safe to
    /// call repeatedly: completed and duplicate events are left alone.
    pub async fn process_event(&self, id: Uuid) -> Result<(), GatewayError> {
        let mut event = self
            .webhooks
            .get(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("webhook event {id}")))?;

        if !matches!(
            event.processing_status,
            WebhookProcessingStatus::Pending | WebhookProcessingStatus::Failed
        ) {
            return Ok(());
        }
        event.processing_status = WebhookProcessingStatus::Processing;
        self.webhooks.update(&event).await?;

        match self.apply(&mut event).await {
            Ok(()) => {
                event.mark_completed(Utc::now());
                self.webhooks.update(&event).await?;
                Ok(())
            }
            Err(e) => {
                event.mark_failed(&e.to_string(), Utc::now());
                self.webhooks.update(&event).await?;
                if event.next_retry_at.is_none() {
                    tracing::error!(
                        event_id = %event.id,
                        attempts = event.processing_attempts,
                        error = %e,
                        "webhook abandoned after retry budget"
                    );
                }
                Err(e)
            }
        }
    }

    async fn apply(&self, event: &mut WebhookEvent) -> Result<(), GatewayError> {
        let provider = self
            .registry
            .get_by_id(event.provider_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("provider {}", event.provider_id)))?;
        let call = self.factory.build(&provider)?;
        let parsed = call.adapter.parse_webhook(&event.raw_payload)?;
        event.parsed_payload = Some(parsed.payload.clone());

        match &parsed.kind {
            WebhookKind::Unrecognized => {
                tracing::info!(
                    event_id = %event.provider_event_id,
                    event_type = %parsed.event_type,
                    "authenticated webhook for untracked object, recording only"
                );
                Ok(())
            }
            WebhookKind::Payment {
                provider_transaction_id,
                status,
            } => {
                let txn = match event.payment_transaction_id {
                    Some(id) => self.payments_store.get(id).await?,
                    None => {
                        self.payments_store
                            .find_by_provider_transaction(provider.id, provider_transaction_id)
                            .await?
                    }
                };
                // The authorize response may not have committed yet; retry
                // later rather than dropping the provider's report.
                let txn = txn.ok_or_else(|| {
                    GatewayError::NotFound(format!(
                        "payment for provider transaction {provider_transaction_id}"
                    ))
                })?;
                event.payment_transaction_id = Some(txn.id);

                self.payments
                    .apply_provider_status(
                        txn,
                        *status,
                        "WebhookReceived",
                        Some(parsed.payload.clone()),
                    )
                    .await?;
                Ok(())
            }
            WebhookKind::Refund {
                provider_refund_id,
                provider_transaction_id: _,
                status,
            } => {
                let refund = match event.refund_transaction_id {
                    Some(id) => self.refunds_store.get(id).await?,
                    None => {
                        self.refunds_store
                            .find_by_provider_refund(provider.id, provider_refund_id)
                            .await?
                    }
                };
                let refund = refund.ok_or_else(|| {
                    GatewayError::NotFound(format!("refund {provider_refund_id}"))
                })?;
                event.refund_transaction_id = Some(refund.id);
                event.payment_transaction_id = Some(refund.payment_transaction_id);

                let correlation = refund.correlation_id.clone();
                self.refunds
                    .apply_provider_refund_status(refund, *status, &correlation)
                    .await?;
                Ok(())
            }
        }
    }

    /// One pass of the retry loop: re-drive FAILED events whose retry time
    /// has arrived. Returns how many were attempted.
    pub async fn retry_due(&self, limit: usize) -> Result<usize, GatewayError> {
        let due = self.webhooks.due_for_retry(Utc::now(), limit).await?;
        let count = due.len();
        for event in due {
            if let Err(e) = self.process_event(event.id).await {
                tracing::warn!(event_id = %event.id, error = %e, "webhook retry failed");
            }
        }
        Ok(count)
    }

}
