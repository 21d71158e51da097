use {
    super::error::GatewayError,
    super::id::{CorrelationId, IdempotencyKey},
    super::money::{Money, MoneyAmount},
    super::payment::PaymentTransaction,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn can_transition_to(&self, new: &Self) -> bool {
        matches!(
            (self, new),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }

    /// Statuses that count against the parent payment's refundable
    /// remainder. FAILED refunds release their reservation.
    pub fn reserves_amount(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing | Self::Completed)
    }
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for RefundStatus {
    type Error = GatewayError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(GatewayError::Validation(format!(
                "unknown refund status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundType {
    Full,
    Partial,
}

impl RefundType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Partial => "partial",
        }
    }
}

impl TryFrom<&str> for RefundType {
    type Error = GatewayError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "full" => Ok(Self::Full),
            "partial" => Ok(Self::Partial),
            other => Err(GatewayError::Validation(format!(
                "unknown refund type: {other}"
            ))),
        }
    }
}

/// How much of `payment_amount` is still refundable given the refunds
/// recorded so far. Pure so the invariant is property-testable.
pub fn refundable_remainder(
    payment_amount: MoneyAmount,
    refunds: &[(MoneyAmount, RefundStatus)],
) -> MoneyAmount {
    let mut remaining = payment_amount;
    for (amount, status) in refunds {
        if status.reserves_amount() {
            remaining = remaining.checked_sub(*amount).unwrap_or(MoneyAmount::ZERO);
        }
    }
    remaining
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub idempotency_key: IdempotencyKey,
    pub payment_transaction_id: Uuid,
    pub amount: MoneyAmount,
    pub refund_type: RefundType,
    pub reason: Option<String>,
}

impl RefundRequest {
    pub fn new(
        idempotency_key: IdempotencyKey,
        payment_transaction_id: Uuid,
        amount: MoneyAmount,
        refund_type: RefundType,
        reason: Option<String>,
    ) -> Result<Self, GatewayError> {
        if !amount.is_positive() {
            return Err(GatewayError::Validation(
                "refund amount must be greater than zero".into(),
            ));
        }
        Ok(Self {
            idempotency_key,
            payment_transaction_id,
            amount,
            refund_type,
            reason,
        })
    }

    /// Validate against the parent payment and its sibling refunds.
    /// Returns the refundable remainder before this request.
    pub fn validate_against(
        &self,
        payment: &PaymentTransaction,
        existing: &[(MoneyAmount, RefundStatus)],
    ) -> Result<MoneyAmount, GatewayError> {
        if !payment.status.is_refundable() {
            return Err(GatewayError::InvalidState(format!(
                "payment {} is {} and cannot be refunded",
                payment.id, payment.status
            )));
        }

        let remaining = refundable_remainder(payment.money.amount(), existing);
        if self.amount > remaining {
            return Err(GatewayError::ExcessiveAmount {
                requested: self.amount.minor_units(),
                remaining: remaining.minor_units(),
            });
        }
        if self.refund_type == RefundType::Full && self.amount != remaining {
            return Err(GatewayError::Validation(format!(
                "full refund must cover the remaining {}, got {}",
                remaining, self.amount
            )));
        }
        Ok(remaining)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundTransaction {
    pub id: Uuid,
    pub idempotency_key: String,
    pub payment_transaction_id: Uuid,
    pub provider_id: Uuid,
    pub provider_refund_id: Option<String>,
    pub money: Money,
    pub status: RefundStatus,
    pub refund_type: RefundType,
    pub reason: Option<String>,
    pub error_message: Option<String>,
    pub correlation_id: CorrelationId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub row_version: i64,
}

impl RefundTransaction {
    pub fn open(
        request: &RefundRequest,
        payment: &PaymentTransaction,
        correlation_id: CorrelationId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            idempotency_key: request.idempotency_key.as_str().to_string(),
            payment_transaction_id: payment.id,
            provider_id: payment.provider_id,
            provider_refund_id: None,
            money: Money::new(request.amount, payment.money.currency().clone()),
            status: RefundStatus::Pending,
            refund_type: request.refund_type,
            reason: request.reason.clone(),
            error_message: None,
            correlation_id,
            created_at: now,
            updated_at: now,
            completed_at: None,
            row_version: 0,
        }
    }

    pub fn transition_to(
        &mut self,
        new: RefundStatus,
        now: DateTime<Utc>,
    ) -> Result<RefundStatus, GatewayError> {
        if !self.status.can_transition_to(&new) {
            return Err(GatewayError::InvalidStateTransition {
                from: self.status.as_str().into(),
                to: new.as_str().into(),
            });
        }
        let prev = self.status;
        self.status = new;
        self.updated_at = now;
        if matches!(new, RefundStatus::Completed | RefundStatus::Failed) {
            self.completed_at = Some(now);
        }
        Ok(prev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Currency;
    use crate::domain::payment::{PaymentRequest, PaymentRequestParams, PaymentStatus};
    use std::collections::BTreeMap;

    fn completed_payment(amount: i64) -> PaymentTransaction {
        let req = PaymentRequest::new(PaymentRequestParams {
            idempotency_key: IdempotencyKey::new("K1").unwrap(),
            amount: MoneyAmount::new(amount).unwrap(),
            currency: Currency::new("USD").unwrap(),
            customer_id: "c1".into(),
            order_id: "o1".into(),
            description: None,
            return_url: "https://x/r".into(),
            cancel_url: "https://x/c".into(),
            metadata: BTreeMap::new(),
            preferred_provider: None,
        })
        .unwrap();
        let now = Utc::now();
        let mut txn =
            PaymentTransaction::open(&req, Uuid::now_v7(), "stripe", CorrelationId::generate(), now);
        txn.transition_to(PaymentStatus::Processing, now).unwrap();
        txn.transition_to(PaymentStatus::Completed, now).unwrap();
        txn
    }

    fn refund_request(amount: i64, refund_type: RefundType, payment: &PaymentTransaction) -> RefundRequest {
        RefundRequest::new(
            IdempotencyKey::new("R1").unwrap(),
            payment.id,
            MoneyAmount::new(amount).unwrap(),
            refund_type,
            None,
        )
        .unwrap()
    }

    #[test]
    fn remainder_ignores_failed_refunds() {
        let amount = MoneyAmount::new(10000).unwrap();
        let refunds = [
            (MoneyAmount::new(3000).unwrap(), RefundStatus::Completed),
            (MoneyAmount::new(2000).unwrap(), RefundStatus::Failed),
            (MoneyAmount::new(1000).unwrap(), RefundStatus::Processing),
        ];
        assert_eq!(refundable_remainder(amount, &refunds).minor_units(), 6000);
    }

    #[test]
    fn over_refund_is_rejected() {
        let payment = completed_payment(10000);
        let existing = [(MoneyAmount::new(5000).unwrap(), RefundStatus::Completed)];

        let req = refund_request(6000, RefundType::Partial, &payment);
        let err = req.validate_against(&payment, &existing).unwrap_err();
        assert!(matches!(err, GatewayError::ExcessiveAmount { requested: 6000, remaining: 5000 }));
    }

    #[test]
    fn full_refund_must_match_remainder_exactly() {
        let payment = completed_payment(10000);
        let existing = [(MoneyAmount::new(4000).unwrap(), RefundStatus::Completed)];

        let short = refund_request(5000, RefundType::Full, &payment);
        assert!(short.validate_against(&payment, &existing).is_err());

        let exact = refund_request(6000, RefundType::Full, &payment);
        assert_eq!(
            exact.validate_against(&payment, &existing).unwrap().minor_units(),
            6000
        );
    }

    #[test]
    fn refund_against_unsettled_payment_is_invalid_state() {
        let req = PaymentRequest::new(PaymentRequestParams {
            idempotency_key: IdempotencyKey::new("K2").unwrap(),
            amount: MoneyAmount::new(10000).unwrap(),
            currency: Currency::new("USD").unwrap(),
            customer_id: "c1".into(),
            order_id: "o1".into(),
            description: None,
            return_url: "https://x/r".into(),
            cancel_url: "https://x/c".into(),
            metadata: BTreeMap::new(),
            preferred_provider: None,
        })
        .unwrap();
        let pending =
            PaymentTransaction::open(&req, Uuid::now_v7(), "stripe", CorrelationId::generate(), Utc::now());

        let refund = refund_request(1000, RefundType::Partial, &pending);
        let err = refund.validate_against(&pending, &[]).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidState(_)));
    }

    #[test]
    fn refund_transition_table() {
        use RefundStatus::*;
        assert!(Pending.can_transition_to(&Processing));
        assert!(Processing.can_transition_to(&Completed));
        assert!(Processing.can_transition_to(&Failed));

        assert!(!Pending.can_transition_to(&Completed));
        assert!(!Completed.can_transition_to(&Failed));
        assert!(!Failed.can_transition_to(&Processing));
        assert!(!Completed.can_transition_to(&Pending));
    }
}
