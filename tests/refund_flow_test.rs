mod common;

use {
    common::*,
    payflow::domain::{
        error::GatewayError,
        id::{CorrelationId, IdempotencyKey},
        money::MoneyAmount,
        payment::{PaymentStatus, PaymentTransaction},
        refund::{RefundRequest, RefundStatus, RefundType},
    },
};

async fn completed_payment(h: &Harness, key: &str, minor_units: i64) -> PaymentTransaction {
    h.state
        .payments
        .process_payment(payment_request(key, minor_units, "USD"), CorrelationId::generate())
        .await
        .unwrap()
}

fn refund_request(
    key: &str,
    payment: &PaymentTransaction,
    minor_units: i64,
    refund_type: RefundType,
) -> RefundRequest {
    RefundRequest::new(
        IdempotencyKey::new(key).unwrap(),
        payment.id,
        MoneyAmount::new(minor_units).unwrap(),
        refund_type,
        Some("customer request".into()),
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn partial_then_final_refund_settles_the_parent() {
    let h = harness();
    register_sandbox(&h.state, "sandbox", "succeed", &["USD"], 10).await;
    let payment = completed_payment(&h, "P1", 10_000).await;

    let refund = h
        .state
        .refunds
        .process_refund(refund_request("R1", &payment, 5_000, RefundType::Partial), CorrelationId::generate())
        .await
        .unwrap();
    assert_eq!(refund.status, RefundStatus::Completed);
    assert!(refund.provider_refund_id.as_deref().unwrap().starts_with("sbxr_"));

    let parent = h.state.payments.get_payment(payment.id).await.unwrap();
    assert_eq!(parent.status, PaymentStatus::PartiallyRefunded);

    // Over-refund of the remainder is rejected.
    let err = h
        .state
        .refunds
        .process_refund(refund_request("R2", &payment, 6_000, RefundType::Partial), CorrelationId::generate())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GatewayError::ExcessiveAmount { requested: 6_000, remaining: 5_000 }
    ));

    // Exact remainder as a full refund rolls the parent to REFUNDED.
    let last = h
        .state
        .refunds
        .process_refund(refund_request("R3", &payment, 5_000, RefundType::Full), CorrelationId::generate())
        .await
        .unwrap();
    assert_eq!(last.status, RefundStatus::Completed);

    let parent = h.state.payments.get_payment(payment.id).await.unwrap();
    assert_eq!(parent.status, PaymentStatus::Refunded);

    // Refund transitions are audit-logged against the parent payment.
    let history = h.state.payments.payment_history(payment.id).await.unwrap();
    assert!(history.iter().any(|e| e.event_type == "RefundCreated"));
    assert!(history.iter().any(|e| e.event_type == "RefundCompleted"));
    assert!(
        history
            .iter()
            .any(|e| e.new_status == "PARTIALLY_REFUNDED" && e.previous_status.as_deref() == Some("COMPLETED"))
    );
    assert!(
        history
            .iter()
            .any(|e| e.new_status == "REFUNDED" && e.previous_status.as_deref() == Some("PARTIALLY_REFUNDED"))
    );
}

#[tokio::test(start_paused = true)]
async fn full_refund_must_cover_the_exact_remainder() {
    let h = harness();
    register_sandbox(&h.state, "sandbox", "succeed", &["USD"], 10).await;
    let payment = completed_payment(&h, "P2", 10_000).await;

    let err = h
        .state
        .refunds
        .process_refund(refund_request("R4", &payment, 4_000, RefundType::Full), CorrelationId::generate())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Validation(_)));
}

#[tokio::test(start_paused = true)]
async fn refund_of_an_unsettled_payment_is_invalid_state() {
    let h = harness();
    register_sandbox(&h.state, "sandbox", "pending", &["USD"], 10).await;

    let processing = h
        .state
        .payments
        .process_payment(payment_request("P3", 10_000, "USD"), CorrelationId::generate())
        .await
        .unwrap();
    assert_eq!(processing.status, PaymentStatus::Processing);

    let err = h
        .state
        .refunds
        .process_refund(
            refund_request("R5", &processing, 1_000, RefundType::Partial),
            CorrelationId::generate(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidState(_)));
}

#[tokio::test(start_paused = true)]
async fn refund_of_missing_payment_is_not_found() {
    let h = harness();
    register_sandbox(&h.state, "sandbox", "succeed", &["USD"], 10).await;
    let payment = completed_payment(&h, "P4", 10_000).await;

    let mut ghost = refund_request("R6", &payment, 1_000, RefundType::Partial);
    ghost.payment_transaction_id = uuid::Uuid::now_v7();
    let err = h
        .state
        .refunds
        .process_refund(ghost, CorrelationId::generate())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn refund_replay_is_idempotent_and_conflicts_are_rejected() {
    let h = harness();
    register_sandbox(&h.state, "sandbox", "succeed", &["USD"], 10).await;
    let payment = completed_payment(&h, "P5", 10_000).await;

    let first = h
        .state
        .refunds
        .process_refund(refund_request("R7", &payment, 3_000, RefundType::Partial), CorrelationId::generate())
        .await
        .unwrap();
    let replay = h
        .state
        .refunds
        .process_refund(refund_request("R7", &payment, 3_000, RefundType::Partial), CorrelationId::generate())
        .await
        .unwrap();
    assert_eq!(first.id, replay.id);

    // Same key, different amount.
    let err = h
        .state
        .refunds
        .process_refund(refund_request("R7", &payment, 4_000, RefundType::Partial), CorrelationId::generate())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::IdempotencyKeyConflict));

    // The replayed refund did not double-count against the remainder.
    let parent = h.state.payments.get_payment(payment.id).await.unwrap();
    assert_eq!(parent.status, PaymentStatus::PartiallyRefunded);
    let refunds = h.backends.refunds.list_for_payment(payment.id).await.unwrap();
    assert_eq!(refunds.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn provider_refund_rejection_leaves_parent_untouched() {
    let h = harness();
    register_sandbox_full(&h.state, "sandbox", "succeed", "fail", &["USD"], 10).await;
    let payment = completed_payment(&h, "P6", 10_000).await;

    let refund = h
        .state
        .refunds
        .process_refund(refund_request("R8", &payment, 5_000, RefundType::Partial), CorrelationId::generate())
        .await
        .unwrap();
    assert_eq!(refund.status, RefundStatus::Failed);
    assert!(refund.error_message.is_some());

    let parent = h.state.payments.get_payment(payment.id).await.unwrap();
    assert_eq!(parent.status, PaymentStatus::Completed);

    // The failed refund releases its reservation: the full amount is
    // refundable again.
    let retry = h
        .state
        .refunds
        .process_refund(refund_request("R9", &payment, 10_000, RefundType::Full), CorrelationId::generate())
        .await;
    assert!(matches!(
        retry.as_ref().map(|r| r.status),
        Ok(RefundStatus::Failed)
    ), "scripted provider still rejects, but validation passed: {retry:?}");
}

#[tokio::test(start_paused = true)]
async fn pending_provider_refund_waits_for_confirmation() {
    let h = harness();
    register_sandbox_full(&h.state, "sandbox", "succeed", "pending", &["USD"], 10).await;
    let payment = completed_payment(&h, "P7", 10_000).await;

    let refund = h
        .state
        .refunds
        .process_refund(refund_request("R10", &payment, 10_000, RefundType::Full), CorrelationId::generate())
        .await
        .unwrap();
    assert_eq!(refund.status, RefundStatus::Processing);

    // Parent does not move until the refund actually completes.
    let parent = h.state.payments.get_payment(payment.id).await.unwrap();
    assert_eq!(parent.status, PaymentStatus::Completed);

    // The pending amount still reserves the remainder.
    let err = h
        .state
        .refunds
        .process_refund(refund_request("R11", &payment, 1_000, RefundType::Partial), CorrelationId::generate())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ExcessiveAmount { .. }));
}
