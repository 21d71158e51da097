use {
    super::error::GatewayError,
    super::id::{CorrelationId, IdempotencyKey},
    super::money::{Currency, Money, MoneyAmount},
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
    std::collections::BTreeMap,
    std::fmt,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Refunded => "REFUNDED",
            Self::PartiallyRefunded => "PARTIALLY_REFUNDED",
        }
    }

    /// Exhaustive transition table. Every allowed edge is listed explicitly.
    /// If it's not here, it's not allowed.
    ///
    /// PENDING → PROCESSING → COMPLETED | FAILED
    /// COMPLETED → REFUNDED | PARTIALLY_REFUNDED
    /// PARTIALLY_REFUNDED → PARTIALLY_REFUNDED | REFUNDED
    pub fn can_transition_to(&self, new: &Self) -> bool {
        matches!(
            (self, new),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
                | (Self::Completed, Self::Refunded)
                | (Self::Completed, Self::PartiallyRefunded)
                | (Self::PartiallyRefunded, Self::PartiallyRefunded)
                | (Self::PartiallyRefunded, Self::Refunded)
        )
    }

    /// Statuses for which `completed_at` must be set.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Refunded | Self::PartiallyRefunded
        )
    }

    pub fn is_refundable(&self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyRefunded)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for PaymentStatus {
    type Error = GatewayError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "REFUNDED" => Ok(Self::Refunded),
            "PARTIALLY_REFUNDED" => Ok(Self::PartiallyRefunded),
            other => Err(GatewayError::Validation(format!(
                "unknown payment status: {other}"
            ))),
        }
    }
}

/// Validated client request to create a payment. All invariants (positive
/// amount, currency shape, HTTPS callback URLs) hold by construction.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub idempotency_key: IdempotencyKey,
    pub money: Money,
    pub customer_id: String,
    pub order_id: String,
    pub description: Option<String>,
    pub return_url: String,
    pub cancel_url: String,
    pub metadata: BTreeMap<String, String>,
    pub preferred_provider: Option<String>,
}

fn require_https(field: &str, url: &str) -> Result<(), GatewayError> {
    if !url.starts_with("https://") || url.len() <= "https://".len() {
        return Err(GatewayError::Validation(format!(
            "{field} must be an https URL"
        )));
    }
    Ok(())
}

pub struct PaymentRequestParams {
    pub idempotency_key: IdempotencyKey,
    pub amount: MoneyAmount,
    pub currency: Currency,
    pub customer_id: String,
    pub order_id: String,
    pub description: Option<String>,
    pub return_url: String,
    pub cancel_url: String,
    pub metadata: BTreeMap<String, String>,
    pub preferred_provider: Option<String>,
}

impl PaymentRequest {
    pub fn new(p: PaymentRequestParams) -> Result<Self, GatewayError> {
        if !p.amount.is_positive() {
            return Err(GatewayError::Validation(
                "amount must be greater than zero".into(),
            ));
        }
        if p.customer_id.is_empty() {
            return Err(GatewayError::Validation("customerId is required".into()));
        }
        if p.order_id.is_empty() {
            return Err(GatewayError::Validation("orderId is required".into()));
        }
        require_https("returnUrl", &p.return_url)?;
        require_https("cancelUrl", &p.cancel_url)?;

        Ok(Self {
            idempotency_key: p.idempotency_key,
            money: Money::new(p.amount, p.currency),
            customer_id: p.customer_id,
            order_id: p.order_id,
            description: p.description,
            return_url: p.return_url,
            cancel_url: p.cancel_url,
            metadata: p.metadata,
            preferred_provider: p.preferred_provider,
        })
    }

    /// Digest over the semantically relevant fields. A replay of the same
    /// idempotency key with a different fingerprint is rejected instead of
    /// silently echoing the first transaction.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.money.amount().minor_units().to_be_bytes());
        hasher.update(self.money.currency().as_str().as_bytes());
        for field in [
            &self.customer_id,
            &self.order_id,
            &self.return_url,
            &self.cancel_url,
        ] {
            hasher.update(field.as_bytes());
            hasher.update([0u8]);
        }
        if let Some(d) = &self.description {
            hasher.update(d.as_bytes());
        }
        hasher.update([0u8]);
        for (k, v) in &self.metadata {
            hasher.update(k.as_bytes());
            hasher.update([1u8]);
            hasher.update(v.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

/// Persistent payment row. Updates go through the store's optimistic
/// concurrency check on `row_version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub idempotency_key: String,
    pub request_fingerprint: String,
    pub money: Money,
    pub status: PaymentStatus,
    pub customer_id: String,
    pub order_id: String,
    pub description: Option<String>,
    pub return_url: String,
    pub cancel_url: String,
    pub metadata: BTreeMap<String, String>,
    pub provider_id: Uuid,
    pub provider_name: String,
    pub provider_transaction_id: Option<String>,
    pub payment_url: Option<String>,
    pub error_message: Option<String>,
    pub provider_error_code: Option<String>,
    pub retry_count: i32,
    pub correlation_id: CorrelationId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub row_version: i64,
}

impl PaymentTransaction {
    /// New PENDING row for a routed request. Provider name is denormalized
    /// as a snapshot; routing may later pick a different provider for other
    /// transactions without rewriting history.
    pub fn open(
        request: &PaymentRequest,
        provider_id: Uuid,
        provider_name: &str,
        correlation_id: CorrelationId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            idempotency_key: request.idempotency_key.as_str().to_string(),
            request_fingerprint: request.fingerprint(),
            money: request.money.clone(),
            status: PaymentStatus::Pending,
            customer_id: request.customer_id.clone(),
            order_id: request.order_id.clone(),
            description: request.description.clone(),
            return_url: request.return_url.clone(),
            cancel_url: request.cancel_url.clone(),
            metadata: request.metadata.clone(),
            provider_id,
            provider_name: provider_name.to_string(),
            provider_transaction_id: None,
            payment_url: None,
            error_message: None,
            provider_error_code: None,
            retry_count: 0,
            correlation_id,
            created_at: now,
            updated_at: now,
            completed_at: None,
            row_version: 0,
        }
    }

    /// Apply a status transition, returning the previous status for the
    /// audit row. Rejects edges not in the state machine.
    pub fn transition_to(
        &mut self,
        new: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<PaymentStatus, GatewayError> {
        if !self.status.can_transition_to(&new) {
            return Err(GatewayError::InvalidStateTransition {
                from: self.status.as_str().into(),
                to: new.as_str().into(),
            });
        }
        let prev = self.status;
        self.status = new;
        self.updated_at = now;
        if new.is_settled() {
            // First settlement wins; a COMPLETED → REFUNDED move keeps the
            // original completion instant.
            if self.completed_at.is_none() {
                self.completed_at = Some(now);
            }
        }
        Ok(prev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(amount: i64) -> Result<PaymentRequest, GatewayError> {
        PaymentRequest::new(PaymentRequestParams {
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
    }

    #[test]
    fn can_transition_valid_paths() {
        use PaymentStatus::*;
        assert!(Pending.can_transition_to(&Processing));
        assert!(Processing.can_transition_to(&Completed));
        assert!(Processing.can_transition_to(&Failed));
        assert!(Completed.can_transition_to(&Refunded));
        assert!(Completed.can_transition_to(&PartiallyRefunded));
        assert!(PartiallyRefunded.can_transition_to(&PartiallyRefunded));
        assert!(PartiallyRefunded.can_transition_to(&Refunded));
    }

    #[test]
    fn can_transition_invalid_paths() {
        use PaymentStatus::*;
        // skipping PROCESSING
        assert!(!Pending.can_transition_to(&Completed));
        assert!(!Pending.can_transition_to(&Failed));
        // backwards
        assert!(!Completed.can_transition_to(&Processing));
        assert!(!Processing.can_transition_to(&Pending));
        assert!(!Refunded.can_transition_to(&Completed));
        // failed is terminal
        assert!(!Failed.can_transition_to(&Processing));
        assert!(!Failed.can_transition_to(&Refunded));
        // refund states only from a settled payment
        assert!(!Pending.can_transition_to(&Refunded));
        assert!(!Processing.can_transition_to(&PartiallyRefunded));
        // refunded is terminal
        assert!(!Refunded.can_transition_to(&PartiallyRefunded));
        assert!(!Refunded.can_transition_to(&Refunded));
    }

    #[test]
    fn status_as_str_roundtrip() {
        use PaymentStatus::*;
        for s in [Pending, Processing, Completed, Failed, Refunded, PartiallyRefunded] {
            assert_eq!(PaymentStatus::try_from(s.as_str()).unwrap(), s);
        }
    }

    #[test]
    fn request_rejects_zero_amount_and_plain_http() {
        assert!(request(0).is_err());

        let bad_url = PaymentRequest::new(PaymentRequestParams {
            idempotency_key: IdempotencyKey::new("K1").unwrap(),
            amount: MoneyAmount::new(100).unwrap(),
            currency: Currency::new("USD").unwrap(),
            customer_id: "c1".into(),
            order_id: "o1".into(),
            description: None,
            return_url: "http://x/r".into(),
            cancel_url: "https://x/c".into(),
            metadata: BTreeMap::new(),
            preferred_provider: None,
        });
        assert!(bad_url.is_err());
    }

    #[test]
    fn fingerprint_is_sensitive_to_body_changes() {
        let a = request(10000).unwrap();
        let b = request(10000).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = request(10001).unwrap();
        assert_ne!(a.fingerprint(), c.fingerprint());

        let mut d = request(10000).unwrap();
        d.metadata.insert("k".into(), "v".into());
        assert_ne!(a.fingerprint(), d.fingerprint());
    }

    #[test]
    fn transition_sets_completed_at_once() {
        let req = request(10000).unwrap();
        let t0 = Utc::now();
        let mut txn =
            PaymentTransaction::open(&req, Uuid::now_v7(), "stripe", CorrelationId::generate(), t0);

        txn.transition_to(PaymentStatus::Processing, t0).unwrap();
        assert!(txn.completed_at.is_none());

        let t1 = t0 + chrono::Duration::seconds(5);
        txn.transition_to(PaymentStatus::Completed, t1).unwrap();
        assert_eq!(txn.completed_at, Some(t1));

        let t2 = t1 + chrono::Duration::seconds(5);
        txn.transition_to(PaymentStatus::Refunded, t2).unwrap();
        assert_eq!(txn.completed_at, Some(t1), "settlement instant is sticky");
        assert!(txn.updated_at >= txn.completed_at.unwrap());
    }

    #[test]
    fn transition_rejects_off_table_edges() {
        let req = request(10000).unwrap();
        let now = Utc::now();
        let mut txn =
            PaymentTransaction::open(&req, Uuid::now_v7(), "stripe", CorrelationId::generate(), now);

        let err = txn.transition_to(PaymentStatus::Completed, now).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidStateTransition { .. }));
        assert_eq!(txn.status, PaymentStatus::Pending, "state unchanged on reject");
    }
}
