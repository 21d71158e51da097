use {
    super::error::GatewayError,
    chrono::{DateTime, Utc},
    rand::Rng,
    serde::{Deserialize, Serialize},
    std::time::Duration,
    uuid::Uuid,
};

/// Retries beyond this are abandoned; the event stays FAILED with no
/// next_retry_at and is visible to operators.
pub const MAX_PROCESSING_ATTEMPTS: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Duplicate,
}

impl WebhookProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Duplicate => "DUPLICATE",
        }
    }
}

impl TryFrom<&str> for WebhookProcessingStatus {
    type Error = GatewayError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "DUPLICATE" => Ok(Self::Duplicate),
            other => Err(GatewayError::Validation(format!(
                "unknown webhook processing status: {other}"
            ))),
        }
    }
}

/// Provider-initiated notification, persisted before processing so that
/// nothing authenticated is ever dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub provider_event_id: String,
    pub event_type: String,
    pub raw_payload: String,
    pub parsed_payload: Option<serde_json::Value>,
    pub signature: Option<String>,
    pub signature_validated: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub processing_status: WebhookProcessingStatus,
    pub processing_attempts: i32,
    pub processed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub payment_transaction_id: Option<Uuid>,
    pub refund_transaction_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

pub struct NewWebhookEventParams {
    pub provider_id: Uuid,
    pub provider_event_id: String,
    pub event_type: String,
    pub raw_payload: String,
    pub signature: Option<String>,
    pub signature_validated: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub processing_status: WebhookProcessingStatus,
}

impl WebhookEvent {
    pub fn new(p: NewWebhookEventParams, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            provider_id: p.provider_id,
            provider_event_id: p.provider_event_id,
            event_type: p.event_type,
            raw_payload: p.raw_payload,
            parsed_payload: None,
            signature: p.signature,
            signature_validated: p.signature_validated,
            ip_address: p.ip_address,
            user_agent: p.user_agent,
            processing_status: p.processing_status,
            processing_attempts: 0,
            processed_at: None,
            failed_at: None,
            failure_reason: None,
            next_retry_at: None,
            payment_transaction_id: None,
            refund_transaction_id: None,
            created_at: now,
        }
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.processing_status = WebhookProcessingStatus::Completed;
        self.processed_at = Some(now);
        self.failure_reason = None;
        self.next_retry_at = None;
    }

    /// Record a processing failure, scheduling a retry until the attempt
    /// budget runs out.
    pub fn mark_failed(&mut self, reason: &str, now: DateTime<Utc>) {
        self.processing_attempts += 1;
        self.processing_status = WebhookProcessingStatus::Failed;
        self.failed_at = Some(now);
        self.failure_reason = Some(reason.to_string());
        self.next_retry_at = if self.processing_attempts >= MAX_PROCESSING_ATTEMPTS {
            None
        } else {
            let backoff = retry_backoff(self.processing_attempts as u32);
            Some(now + chrono::Duration::from_std(backoff).unwrap_or(chrono::Duration::hours(1)))
        };
    }
}

/// Exponential backoff with jitter: base 30 s doubling per attempt, capped
/// at 1 h, plus up to 25% random spread so replicas don't retry in lockstep.
pub fn retry_backoff(attempt: u32) -> Duration {
    const BASE_SECS: u64 = 30;
    const CAP_SECS: u64 = 3600;

    let exp = attempt.saturating_sub(1).min(10);
    let base = BASE_SECS.saturating_mul(1u64 << exp).min(CAP_SECS);
    let jitter = rand::thread_rng().gen_range(0..=base / 4);
    Duration::from_secs((base + jitter).min(CAP_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> WebhookEvent {
        WebhookEvent::new(
            NewWebhookEventParams {
                provider_id: Uuid::now_v7(),
                provider_event_id: "evt_1".into(),
                event_type: "payment.completed".into(),
                raw_payload: "{}".into(),
                signature: None,
                signature_validated: true,
                ip_address: None,
                user_agent: None,
                processing_status: WebhookProcessingStatus::Pending,
            },
            Utc::now(),
        )
    }

    #[test]
    fn backoff_grows_and_caps() {
        for attempt in 1..=8 {
            let d = retry_backoff(attempt);
            let floor = 30u64.saturating_mul(1 << (attempt - 1)).min(3600);
            assert!(d.as_secs() >= floor.min(3600), "attempt {attempt}: {d:?}");
            assert!(d.as_secs() <= 3600, "attempt {attempt}: {d:?}");
        }
    }

    #[test]
    fn failures_schedule_retries_until_budget_exhausted() {
        let mut e = event();
        let now = Utc::now();

        for attempt in 1..MAX_PROCESSING_ATTEMPTS {
            e.mark_failed("provider lookup failed", now);
            assert_eq!(e.processing_attempts, attempt);
            assert!(e.next_retry_at.is_some(), "attempt {attempt} should retry");
        }

        e.mark_failed("provider lookup failed", now);
        assert_eq!(e.processing_attempts, MAX_PROCESSING_ATTEMPTS);
        assert!(e.next_retry_at.is_none(), "budget exhausted, no more retries");
        assert_eq!(e.processing_status, WebhookProcessingStatus::Failed);
    }

    #[test]
    fn completion_clears_retry_state() {
        let mut e = event();
        let now = Utc::now();
        e.mark_failed("transient", now);
        e.mark_completed(now);
        assert_eq!(e.processing_status, WebhookProcessingStatus::Completed);
        assert!(e.next_retry_at.is_none());
        assert!(e.failure_reason.is_none());
        assert!(e.processed_at.is_some());
    }
}
