use {
    super::events::{EventPublisher, publish_best_effort},
    super::registry::{AdapterFactory, ProviderRegistry},
    super::routing::RoutingEngine,
    crate::adapters::{AuthorizeRequest, ProviderPaymentStatus},
    crate::domain::{
        audit::{TransactionLogEntry, TransitionRecord},
        error::GatewayError,
        event::GatewayEvent,
        id::{CorrelationId, OperationKind},
        payment::{PaymentRequest, PaymentStatus, PaymentTransaction},
    },
    crate::infra::idempotency::{IdempotencyStore, LOCK_TTL, RESULT_TTL},
    crate::infra::resilience::ResiliencePipeline,
    crate::infra::store::{AuditLogStore, PaymentStore},
    chrono::Utc,
    std::sync::Arc,
    std::time::Duration,
    uuid::Uuid,
};

/// How long a locked-out request waits for the lock holder's outcome
/// before giving up with `ConcurrentRequest`.
const LOCK_WAIT_POLLS: u32 = 5;
const LOCK_WAIT_INTERVAL: Duration = Duration::from_millis(400);

/// What applying a provider-reported status did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Transitioned {
        prev: PaymentStatus,
        new: PaymentStatus,
    },
    /// Already in the reported state; idempotent no-op.
    NoChange,
    /// The report does not fit the state machine (late or out-of-order
    /// delivery). Recorded as an anomaly, state untouched.
    Anomaly {
        current: PaymentStatus,
        incoming: PaymentStatus,
    },
}

#[derive(Clone)]
pub struct PaymentOrchestrator {
    payments: Arc<dyn PaymentStore>,
    audit: Arc<dyn AuditLogStore>,
    idempotency: Arc<dyn IdempotencyStore>,
    routing: Arc<RoutingEngine>,
    registry: Arc<ProviderRegistry>,
    factory: Arc<AdapterFactory>,
    resilience: Arc<ResiliencePipeline>,
    publisher: Arc<dyn EventPublisher>,
}

impl PaymentOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        audit: Arc<dyn AuditLogStore>,
        idempotency: Arc<dyn IdempotencyStore>,
        routing: Arc<RoutingEngine>,
        registry: Arc<ProviderRegistry>,
        factory: Arc<AdapterFactory>,
        resilience: Arc<ResiliencePipeline>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            payments,
            audit,
            idempotency,
            routing,
            registry,
            factory,
            resilience,
            publisher,
        }
    }

    pub async fn get_payment(&self, id: Uuid) -> Result<PaymentTransaction, GatewayError> {
        self.payments
            .get(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("payment {id}")))
    }

    pub async fn payment_history(
        &self,
        id: Uuid,
    ) -> Result<Vec<TransactionLogEntry>, GatewayError> {
        self.audit.list_for_payment(id).await
    }

    /// At-most-once per idempotency key: replays return the first response
    /// unchanged, conflicting bodies are rejected, and a cross-replica lock
    /// serializes first-time processing.
    pub async fn process_payment(
        &self,
        request: PaymentRequest,
        correlation_id: CorrelationId,
    ) -> Result<PaymentTransaction, GatewayError> {
        let key = request.idempotency_key.clone();
        let fingerprint = request.fingerprint();

        if let Some(existing) = self.find_existing(&request).await? {
            return replay(existing, &fingerprint);
        }

        if !self
            .idempotency
            .acquire_lock(OperationKind::Payment, &key, LOCK_TTL)
            .await?
        {
            // Another worker is on it: wait a bounded amount for its row.
            for _ in 0..LOCK_WAIT_POLLS {
                tokio::time::sleep(LOCK_WAIT_INTERVAL).await;
                if let Some(existing) = self.find_existing(&request).await? {
                    return replay(existing, &fingerprint);
                }
            }
            return Err(GatewayError::ConcurrentRequest);
        }

        // From here the provider may be reached, so the flow must end in a
        // recorded terminal state even if the caller disconnects: drive it
        // on a detached task and await the handle.
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let result = this.drive_payment(&request, &correlation_id).await;

            if let Ok(txn) = &result {
                match serde_json::to_string(txn) {
                    Ok(serialized) => {
                        if let Err(e) = this
                            .idempotency
                            .store_result(
                                OperationKind::Payment,
                                &request.idempotency_key,
                                serialized,
                                RESULT_TTL,
                            )
                            .await
                        {
                            tracing::warn!(error = %e, "failed to cache payment response");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to serialize payment response"),
                }
            }

            if let Err(e) = this
                .idempotency
                .release_lock(OperationKind::Payment, &request.idempotency_key)
                .await
            {
                tracing::warn!(error = %e, "failed to release payment lock");
            }
            result
        });

        match handle.await {
            Ok(result) => result,
            Err(join) => Err(GatewayError::Internal(format!("payment task failed: {join}"))),
        }
    }

    /// Cached first response, falling back to the transaction row.
    async fn find_existing(
        &self,
        request: &PaymentRequest,
    ) -> Result<Option<PaymentTransaction>, GatewayError> {
        if let Some(serialized) = self
            .idempotency
            .get_result(OperationKind::Payment, &request.idempotency_key)
            .await?
        {
            match serde_json::from_str(&serialized) {
                Ok(txn) => return Ok(Some(txn)),
                Err(e) => tracing::warn!(error = %e, "cached payment response unreadable, using store"),
            }
        }
        self.payments
            .get_by_idempotency_key(request.idempotency_key.as_str())
            .await
    }

    async fn drive_payment(
        &self,
        request: &PaymentRequest,
        correlation_id: &CorrelationId,
    ) -> Result<PaymentTransaction, GatewayError> {
        let provider = self
            .routing
            .select_provider(request.money.currency(), request.preferred_provider.as_deref())
            .await?;

        let mut txn = PaymentTransaction::open(
            request,
            provider.id,
            &provider.name,
            correlation_id.clone(),
            Utc::now(),
        );
        self.payments.insert(&txn).await?;
        self.record(
            &txn,
            None,
            "PaymentCreated",
            format!("payment accepted, routed to {}", provider.name),
            None,
            None,
        )
        .await?;
        publish_best_effort(
            &*self.publisher,
            GatewayEvent::PaymentCreated {
                transaction_id: txn.id,
                amount: txn.money.amount().to_decimal_string(),
                currency: txn.money.currency().to_string(),
                provider: txn.provider_name.clone(),
                correlation_id: correlation_id.clone(),
                occurred_at: txn.created_at,
            },
        )
        .await;

        txn = self
            .transition(txn, PaymentStatus::Processing, "StatusUpdated", {
                let provider = provider.name.clone();
                move |_| format!("dispatching to {provider}")
            }, None, None, |_| {})
            .await?;

        let outcome = match self.factory.build(&provider) {
            Ok(call) => {
                let authorize = build_authorize_request(&txn, request);
                self.resilience
                    .execute(&call.circuit_key, call.overrides, || {
                        call.adapter.authorize(&authorize)
                    })
                    .await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => {
                let provider_txn_id = result.provider_transaction_id.clone();
                let payment_url = result.payment_url.clone();
                let settled = result.status.is_settled_success();

                if settled {
                    txn = self
                        .transition(
                            txn,
                            PaymentStatus::Completed,
                            "PaymentCompleted",
                            |_| "provider settled synchronously".to_string(),
                            Some(result.raw_response),
                            None,
                            move |t| {
                                t.provider_transaction_id = Some(provider_txn_id.clone());
                                t.payment_url = payment_url.clone();
                            },
                        )
                        .await?;
                    publish_best_effort(
                        &*self.publisher,
                        GatewayEvent::PaymentCompleted {
                            transaction_id: txn.id,
                            provider_transaction_id: txn.provider_transaction_id.clone(),
                            correlation_id: correlation_id.clone(),
                            occurred_at: Utc::now(),
                        },
                    )
                    .await;
                } else {
                    // Provider accepted but not settled: stay PROCESSING and
                    // wait for the webhook or an explicit status query.
                    txn.provider_transaction_id = Some(provider_txn_id);
                    txn.payment_url = payment_url;
                    txn.updated_at = Utc::now();
                    txn = self.payments.update(&txn).await?;
                    self.record(
                        &txn,
                        Some(txn.status.as_str()),
                        "ProviderAccepted",
                        "provider accepted, awaiting confirmation".to_string(),
                        Some(result.raw_response),
                        None,
                    )
                    .await?;
                }
                Ok(txn)
            }
            Err(err) => {
                // A failed payment is still a durable, observable outcome.
                let (message, code) = match &err {
                    GatewayError::Provider { message, code } => (message.clone(), code.clone()),
                    other => (other.to_string(), None),
                };
                txn = self
                    .transition(
                        txn,
                        PaymentStatus::Failed,
                        "PaymentFailed",
                        |_| "provider dispatch failed".to_string(),
                        None,
                        Some(message.clone()),
                        move |t| {
                            t.error_message = Some(message.clone());
                            t.provider_error_code = code.clone();
                        },
                    )
                    .await?;
                publish_best_effort(
                    &*self.publisher,
                    GatewayEvent::PaymentFailed {
                        transaction_id: txn.id,
                        error_message: txn.error_message.clone(),
                        provider_error_code: txn.provider_error_code.clone(),
                        correlation_id: correlation_id.clone(),
                        occurred_at: Utc::now(),
                    },
                )
                .await;
                Ok(txn)
            }
        }
    }

    /// Apply a provider-reported status (webhook or explicit query) through
    /// the state machine. Out-of-order reports are recorded as anomalies
    /// rather than errors so delivery retries don't spin on them.
    pub async fn apply_provider_status(
        &self,
        txn: PaymentTransaction,
        incoming: ProviderPaymentStatus,
        event_type: &str,
        provider_response: Option<serde_json::Value>,
    ) -> Result<(PaymentTransaction, ApplyOutcome), GatewayError> {
        let target = match incoming {
            ProviderPaymentStatus::Succeeded => PaymentStatus::Completed,
            ProviderPaymentStatus::Failed => PaymentStatus::Failed,
            ProviderPaymentStatus::Created
            | ProviderPaymentStatus::Pending
            | ProviderPaymentStatus::Processing => PaymentStatus::Processing,
        };

        if txn.status == target {
            return Ok((txn, ApplyOutcome::NoChange));
        }

        // A settlement webhook can arrive before the authorize call's own
        // PROCESSING update committed; walk the intermediate edge first.
        let mut txn = txn;
        if txn.status == PaymentStatus::Pending
            && matches!(target, PaymentStatus::Completed | PaymentStatus::Failed)
        {
            txn = self
                .transition(txn, PaymentStatus::Processing, event_type, |_| {
                    "provider reported progress".to_string()
                }, None, None, |_| {})
                .await?;
        }

        if !txn.status.can_transition_to(&target) {
            let current = txn.status;
            self.record(
                &txn,
                Some(current.as_str()),
                event_type,
                format!(
                    "ignored out-of-order provider status {} while {}",
                    target.as_str(),
                    current.as_str()
                ),
                provider_response,
                Some("anomalous transition".to_string()),
            )
            .await?;
            tracing::warn!(
                payment_id = %txn.id,
                current = %current,
                incoming = %target,
                "invalid provider-reported transition, logged as anomaly"
            );
            return Ok((txn, ApplyOutcome::Anomaly { current, incoming: target }));
        }

        let prev = txn.status;
        let updated = self
            .transition(txn, target, event_type, move |_| {
                format!("provider reported {}", target.as_str())
            }, provider_response, None, |_| {})
            .await?;

        match target {
            PaymentStatus::Completed => {
                publish_best_effort(
                    &*self.publisher,
                    GatewayEvent::PaymentCompleted {
                        transaction_id: updated.id,
                        provider_transaction_id: updated.provider_transaction_id.clone(),
                        correlation_id: updated.correlation_id.clone(),
                        occurred_at: Utc::now(),
                    },
                )
                .await;
            }
            PaymentStatus::Failed => {
                publish_best_effort(
                    &*self.publisher,
                    GatewayEvent::PaymentFailed {
                        transaction_id: updated.id,
                        error_message: updated.error_message.clone(),
                        provider_error_code: updated.provider_error_code.clone(),
                        correlation_id: updated.correlation_id.clone(),
                        occurred_at: Utc::now(),
                    },
                )
                .await;
            }
            _ => {}
        }

        Ok((updated, ApplyOutcome::Transitioned { prev, new: target }))
    }

    /// Poll the provider for the current state and fold it in. The second
    /// settlement path besides webhooks.
    pub async fn sync_status(&self, id: Uuid) -> Result<PaymentTransaction, GatewayError> {
        let txn = self.get_payment(id).await?;
        if txn.status.is_settled() {
            return Ok(txn);
        }
        let Some(provider_txn_id) = txn.provider_transaction_id.clone() else {
            return Ok(txn);
        };

        let provider = self
            .registry
            .get_by_id(txn.provider_id)
            .await?
            .ok_or_else(|| {
                GatewayError::ProviderUnavailable(format!("provider {} is gone", txn.provider_name))
            })?;
        let call = self.factory.build(&provider)?;
        let status = self
            .resilience
            .execute(&call.circuit_key, call.overrides, || {
                call.adapter.get_status(&provider_txn_id)
            })
            .await?;

        let (txn, _) = self
            .apply_provider_status(txn, status.status, "StatusSynced", None)
            .await?;
        Ok(txn)
    }

    /// Status transition under optimistic concurrency: one
    /// reload-and-revalidate retry on version conflict, then give up.
    async fn transition(
        &self,
        txn: PaymentTransaction,
        new_status: PaymentStatus,
        event_type: &str,
        message: impl Fn(&PaymentTransaction) -> String,
        provider_response: Option<serde_json::Value>,
        error_details: Option<String>,
        mutate: impl Fn(&mut PaymentTransaction),
    ) -> Result<PaymentTransaction, GatewayError> {
        let mut current = txn;
        for attempt in 0..2 {
            let mut candidate = current.clone();
            let prev = candidate.transition_to(new_status, Utc::now())?;
            mutate(&mut candidate);

            match self.payments.update(&candidate).await {
                Ok(updated) => {
                    self.record(
                        &updated,
                        Some(prev.as_str()),
                        event_type,
                        message(&updated),
                        provider_response.clone(),
                        error_details.clone(),
                    )
                    .await?;
                    return Ok(updated);
                }
                Err(GatewayError::ConcurrentModification) if attempt == 0 => {
                    current = self
                        .payments
                        .get(candidate.id)
                        .await?
                        .ok_or_else(|| GatewayError::NotFound(format!("payment {}", candidate.id)))?;
                }
                Err(e) => return Err(e),
            }
        }
        Err(GatewayError::ConcurrentModification)
    }

    async fn record(
        &self,
        txn: &PaymentTransaction,
        previous_status: Option<&str>,
        event_type: &str,
        message: String,
        provider_response: Option<serde_json::Value>,
        error_details: Option<String>,
    ) -> Result<(), GatewayError> {
        let entry = TransactionLogEntry::record(
            TransitionRecord {
                payment_transaction_id: txn.id,
                refund_transaction_id: None,
                previous_status,
                new_status: txn.status.as_str(),
                event_type,
                message,
                provider_response,
                error_details,
                correlation_id: &txn.correlation_id,
            },
            Utc::now(),
        );
        self.audit.append(&entry).await
    }
}

fn replay(
    existing: PaymentTransaction,
    fingerprint: &str,
) -> Result<PaymentTransaction, GatewayError> {
    if existing.request_fingerprint != fingerprint {
        return Err(GatewayError::IdempotencyKeyConflict);
    }
    Ok(existing)
}

fn build_authorize_request(txn: &PaymentTransaction, request: &PaymentRequest) -> AuthorizeRequest {
    AuthorizeRequest {
        reference: txn.id,
        amount: txn.money.amount(),
        currency: txn.money.currency().clone(),
        customer_id: txn.customer_id.clone(),
        order_id: txn.order_id.clone(),
        description: txn.description.clone(),
        return_url: txn.return_url.clone(),
        cancel_url: txn.cancel_url.clone(),
        metadata: txn.metadata.clone(),
        idempotency_key: request.idempotency_key.as_str().to_string(),
    }
}
