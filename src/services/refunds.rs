use {
    super::events::{EventPublisher, publish_best_effort},
    super::registry::{AdapterFactory, ProviderRegistry},
    crate::adapters::{ProviderRefundRequest, ProviderRefundStatus},
    crate::domain::{
        audit::{TransactionLogEntry, TransitionRecord},
        error::GatewayError,
        event::GatewayEvent,
        id::{CorrelationId, OperationKind},
        money::MoneyAmount,
        payment::{PaymentStatus, PaymentTransaction},
        refund::{RefundRequest, RefundStatus, RefundTransaction},
    },
    crate::infra::idempotency::{IdempotencyStore, LOCK_TTL, RESULT_TTL},
    crate::infra::resilience::ResiliencePipeline,
    crate::infra::store::{AuditLogStore, PaymentStore, RefundStore},
    chrono::Utc,
    std::sync::Arc,
    std::time::Duration,
    uuid::Uuid,
};

const LOCK_WAIT_POLLS: u32 = 5;
const LOCK_WAIT_INTERVAL: Duration = Duration::from_millis(400);

#[derive(Clone)]
pub struct RefundOrchestrator {
    refunds: Arc<dyn RefundStore>,
    payments: Arc<dyn PaymentStore>,
    audit: Arc<dyn AuditLogStore>,
    idempotency: Arc<dyn IdempotencyStore>,
    registry: Arc<ProviderRegistry>,
    factory: Arc<AdapterFactory>,
    resilience: Arc<ResiliencePipeline>,
    publisher: Arc<dyn EventPublisher>,
}

impl RefundOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        refunds: Arc<dyn RefundStore>,
        payments: Arc<dyn PaymentStore>,
        audit: Arc<dyn AuditLogStore>,
        idempotency: Arc<dyn IdempotencyStore>,
        registry: Arc<ProviderRegistry>,
        factory: Arc<AdapterFactory>,
        resilience: Arc<ResiliencePipeline>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            refunds,
            payments,
            audit,
            idempotency,
            registry,
            factory,
            resilience,
            publisher,
        }
    }

    pub async fn get_refund(&self, id: Uuid) -> Result<RefundTransaction, GatewayError> {
        self.refunds
            .get(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("refund {id}")))
    }

    pub async fn process_refund(
        &self,
        request: RefundRequest,
        correlation_id: CorrelationId,
    ) -> Result<RefundTransaction, GatewayError> {
        let key = request.idempotency_key.clone();

        if let Some(existing) = self
            .refunds
            .get_by_idempotency_key(key.as_str())
            .await?
        {
            return replay(existing, &request);
        }

        // Validate before locking so obviously bad requests fail fast.
        let payment = self.load_payment(request.payment_transaction_id).await?;
        self.validate(&request, &payment).await?;

        if !self
            .idempotency
            .acquire_lock(OperationKind::Refund, &key, LOCK_TTL)
            .await?
        {
            for _ in 0..LOCK_WAIT_POLLS {
                tokio::time::sleep(LOCK_WAIT_INTERVAL).await;
                if let Some(existing) = self.refunds.get_by_idempotency_key(key.as_str()).await? {
                    return replay(existing, &request);
                }
            }
            return Err(GatewayError::ConcurrentRequest);
        }

        let this = self.clone();
        let handle = tokio::spawn(async move {
            let result = this.drive_refund(&request, &correlation_id).await;

            if let Ok(refund) = &result {
                if let Ok(serialized) = serde_json::to_string(refund) {
                    if let Err(e) = this
                        .idempotency
                        .store_result(
                            OperationKind::Refund,
                            &request.idempotency_key,
                            serialized,
                            RESULT_TTL,
                        )
                        .await
                    {
                        tracing::warn!(error = %e, "failed to cache refund response");
                    }
                }
            }
            if let Err(e) = this
                .idempotency
                .release_lock(OperationKind::Refund, &request.idempotency_key)
                .await
            {
                tracing::warn!(error = %e, "failed to release refund lock");
            }
            result
        });

        match handle.await {
            Ok(result) => result,
            Err(join) => Err(GatewayError::Internal(format!("refund task failed: {join}"))),
        }
    }

    async fn load_payment(&self, id: Uuid) -> Result<PaymentTransaction, GatewayError> {
        self.payments
            .get(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("payment {id}")))
    }

    async fn validate(
        &self,
        request: &RefundRequest,
        payment: &PaymentTransaction,
    ) -> Result<(), GatewayError> {
        let siblings = self.sibling_amounts(payment.id).await?;
        request.validate_against(payment, &siblings)?;
        Ok(())
    }

    async fn sibling_amounts(
        &self,
        payment_id: Uuid,
    ) -> Result<Vec<(MoneyAmount, RefundStatus)>, GatewayError> {
        Ok(self
            .refunds
            .list_for_payment(payment_id)
            .await?
            .iter()
            .map(|r| (r.money.amount(), r.status))
            .collect())
    }

    async fn drive_refund(
        &self,
        request: &RefundRequest,
        correlation_id: &CorrelationId,
    ) -> Result<RefundTransaction, GatewayError> {
        // Re-validate under the lock: a sibling refund may have landed
        // between the pre-check and lock acquisition.
        let payment = self.load_payment(request.payment_transaction_id).await?;
        self.validate(request, &payment).await?;

        let mut refund = RefundTransaction::open(request, &payment, correlation_id.clone(), Utc::now());
        self.refunds.insert(&refund).await?;
        self.record(
            &payment,
            &refund,
            None,
            "RefundCreated",
            format!("refund of {} accepted", refund.money.amount()),
            None,
            None,
        )
        .await?;
        publish_best_effort(
            &*self.publisher,
            GatewayEvent::RefundCreated {
                refund_id: refund.id,
                payment_transaction_id: payment.id,
                amount: refund.money.amount().to_decimal_string(),
                currency: refund.money.currency().to_string(),
                correlation_id: correlation_id.clone(),
                occurred_at: refund.created_at,
            },
        )
        .await;

        refund = self
            .transition(&payment, refund, RefundStatus::Processing, "StatusUpdated", |_| {})
            .await?;

        let provider = self
            .registry
            .get_by_id(payment.provider_id)
            .await?
            .ok_or_else(|| {
                GatewayError::ProviderUnavailable(format!("provider {} is gone", payment.provider_name))
            });

        let outcome = match provider.and_then(|p| self.factory.build(&p)) {
            Ok(call) => {
                let provider_request = ProviderRefundRequest {
                    reference: refund.id,
                    provider_transaction_id: payment
                        .provider_transaction_id
                        .clone()
                        .unwrap_or_default(),
                    amount: refund.money.amount(),
                    currency: refund.money.currency().clone(),
                    reason: refund.reason.clone(),
                    idempotency_key: request.idempotency_key.as_str().to_string(),
                };
                self.resilience
                    .execute(&call.circuit_key, call.overrides, || {
                        call.adapter.refund(&provider_request)
                    })
                    .await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => {
                let provider_refund_id = result.provider_refund_id.clone();
                match result.status {
                    ProviderRefundStatus::Succeeded => {
                        refund = self
                            .transition(&payment, refund, RefundStatus::Completed, "RefundCompleted", move |r| {
                                r.provider_refund_id = Some(provider_refund_id.clone());
                            })
                            .await?;
                        self.settle_parent(payment, correlation_id).await?;
                        publish_best_effort(
                            &*self.publisher,
                            GatewayEvent::RefundCompleted {
                                refund_id: refund.id,
                                payment_transaction_id: refund.payment_transaction_id,
                                correlation_id: correlation_id.clone(),
                                occurred_at: Utc::now(),
                            },
                        )
                        .await;
                    }
                    ProviderRefundStatus::Pending => {
                        // Stays PROCESSING; the webhook settles it.
                        refund.provider_refund_id = Some(provider_refund_id);
                        refund.updated_at = Utc::now();
                        refund = self.refunds.update(&refund).await?;
                    }
                    ProviderRefundStatus::Failed => {
                        refund = self
                            .fail_refund(&payment, refund, "provider rejected the refund", correlation_id)
                            .await?;
                    }
                }
                Ok(refund)
            }
            Err(err) => {
                let message = err.to_string();
                let refund = self
                    .fail_refund(&payment, refund, &message, correlation_id)
                    .await?;
                Ok(refund)
            }
        }
    }

    async fn fail_refund(
        &self,
        payment: &PaymentTransaction,
        refund: RefundTransaction,
        reason: &str,
        correlation_id: &CorrelationId,
    ) -> Result<RefundTransaction, GatewayError> {
        let reason_owned = reason.to_string();
        let refund = self
            .transition(payment, refund, RefundStatus::Failed, "RefundFailed", move |r| {
                r.error_message = Some(reason_owned.clone());
            })
            .await?;
        publish_best_effort(
            &*self.publisher,
            GatewayEvent::RefundFailed {
                refund_id: refund.id,
                payment_transaction_id: refund.payment_transaction_id,
                error_message: refund.error_message.clone(),
                correlation_id: correlation_id.clone(),
                occurred_at: Utc::now(),
            },
        )
        .await;
        Ok(refund)
    }

    /// Fold a provider-reported refund outcome in (webhook path).
    pub async fn apply_provider_refund_status(
        &self,
        refund: RefundTransaction,
        incoming: ProviderRefundStatus,
        correlation_id: &CorrelationId,
    ) -> Result<RefundTransaction, GatewayError> {
        let payment = self.load_payment(refund.payment_transaction_id).await?;

        match incoming {
            ProviderRefundStatus::Pending => Ok(refund),
            ProviderRefundStatus::Succeeded => {
                if refund.status == RefundStatus::Completed {
                    return Ok(refund);
                }
                let mut refund = refund;
                if refund.status == RefundStatus::Pending {
                    refund = self
                        .transition(&payment, refund, RefundStatus::Processing, "WebhookReceived", |_| {})
                        .await?;
                }
                let refund = self
                    .transition(&payment, refund, RefundStatus::Completed, "WebhookReceived", |_| {})
                    .await?;
                self.settle_parent(payment, correlation_id).await?;
                publish_best_effort(
                    &*self.publisher,
                    GatewayEvent::RefundCompleted {
                        refund_id: refund.id,
                        payment_transaction_id: refund.payment_transaction_id,
                        correlation_id: correlation_id.clone(),
                        occurred_at: Utc::now(),
                    },
                )
                .await;
                Ok(refund)
            }
            ProviderRefundStatus::Failed => {
                if refund.status == RefundStatus::Failed {
                    return Ok(refund);
                }
                let mut refund = refund;
                if refund.status == RefundStatus::Pending {
                    refund = self
                        .transition(&payment, refund, RefundStatus::Processing, "WebhookReceived", |_| {})
                        .await?;
                }
                self.fail_refund(&payment, refund, "provider reported refund failure", correlation_id)
                    .await
            }
        }
    }

    /// Roll the parent payment to REFUNDED / PARTIALLY_REFUNDED based on
    /// the completed refund total.
    async fn settle_parent(
        &self,
        payment: PaymentTransaction,
        correlation_id: &CorrelationId,
    ) -> Result<(), GatewayError> {
        // Reload: the refund updates above bumped sibling state.
        let payment = self.load_payment(payment.id).await?;
        let refunds = self.refunds.list_for_payment(payment.id).await?;
        let completed_total: i64 = refunds
            .iter()
            .filter(|r| r.status == RefundStatus::Completed)
            .map(|r| r.money.amount().minor_units())
            .sum();

        if completed_total == 0 {
            return Ok(());
        }
        let target = if completed_total >= payment.money.amount().minor_units() {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        if payment.status == target && target == PaymentStatus::Refunded {
            return Ok(());
        }
        if !payment.status.can_transition_to(&target) {
            tracing::warn!(
                payment_id = %payment.id,
                current = %payment.status,
                target = %target,
                "cannot reflect refund on parent payment"
            );
            return Ok(());
        }

        let mut current = payment;
        for attempt in 0..2 {
            let mut candidate = current.clone();
            let prev = candidate.transition_to(target, Utc::now())?;
            match self.payments.update(&candidate).await {
                Ok(updated) => {
                    let entry = TransactionLogEntry::record(
                        TransitionRecord {
                            payment_transaction_id: updated.id,
                            refund_transaction_id: None,
                            previous_status: Some(prev.as_str()),
                            new_status: updated.status.as_str(),
                            event_type: "StatusUpdated",
                            message: format!("refunded total {completed_total} reflected on payment"),
                            provider_response: None,
                            error_details: None,
                            correlation_id,
                        },
                        Utc::now(),
                    );
                    self.audit.append(&entry).await?;
                    return Ok(());
                }
                Err(GatewayError::ConcurrentModification) if attempt == 0 => {
                    current = self.load_payment(candidate.id).await?;
                    if !current.status.can_transition_to(&target) {
                        return Ok(());
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(GatewayError::ConcurrentModification)
    }

    async fn transition(
        &self,
        payment: &PaymentTransaction,
        refund: RefundTransaction,
        new_status: RefundStatus,
        event_type: &str,
        mutate: impl Fn(&mut RefundTransaction),
    ) -> Result<RefundTransaction, GatewayError> {
        let mut current = refund;
        for attempt in 0..2 {
            let mut candidate = current.clone();
            let prev = candidate.transition_to(new_status, Utc::now())?;
            mutate(&mut candidate);

            match self.refunds.update(&candidate).await {
                Ok(updated) => {
                    self.record(
                        payment,
                        &updated,
                        Some(prev.as_str()),
                        event_type,
                        format!("refund {}", updated.status.as_str().to_lowercase()),
                        None,
                        updated.error_message.clone(),
                    )
                    .await?;
                    return Ok(updated);
                }
                Err(GatewayError::ConcurrentModification) if attempt == 0 => {
                    current = self
                        .refunds
                        .get(candidate.id)
                        .await?
                        .ok_or_else(|| GatewayError::NotFound(format!("refund {}", candidate.id)))?;
                }
                Err(e) => return Err(e),
            }
        }
        Err(GatewayError::ConcurrentModification)
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        payment: &PaymentTransaction,
        refund: &RefundTransaction,
        previous_status: Option<&str>,
        event_type: &str,
        message: String,
        provider_response: Option<serde_json::Value>,
        error_details: Option<String>,
    ) -> Result<(), GatewayError> {
        let entry = TransactionLogEntry::record(
            TransitionRecord {
                payment_transaction_id: payment.id,
                refund_transaction_id: Some(refund.id),
                previous_status,
                new_status: refund.status.as_str(),
                event_type,
                message,
                provider_response,
                error_details,
                correlation_id: &refund.correlation_id,
            },
            Utc::now(),
        );
        self.audit.append(&entry).await
    }
}

fn replay(
    existing: RefundTransaction,
    request: &RefundRequest,
) -> Result<RefundTransaction, GatewayError> {
    if existing.payment_transaction_id != request.payment_transaction_id
        || existing.money.amount() != request.amount
    {
        return Err(GatewayError::IdempotencyKeyConflict);
    }
    Ok(existing)
}
