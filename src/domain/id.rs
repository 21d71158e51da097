use {
    super::error::GatewayError,
    derive_more::Display,
    serde::{Deserialize, Serialize},
    uuid::Uuid,
};

/// Caller-chosen token that deduplicates retries of one logical operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> Result<Self, GatewayError> {
        let key = key.into();
        if key.is_empty() {
            return Err(GatewayError::IdempotencyKeyRequired);
        }
        if key.len() > 255 || key.chars().any(|c| c.is_control()) {
            return Err(GatewayError::Validation(
                "idempotency key must be at most 255 printable characters".into(),
            ));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Trace token threaded through logs, audit rows, events, and responses.
#[derive(Debug, Clone, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Accepts a caller-supplied value; falls back to a generated one when
    /// the header is absent or unusable.
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some(v) if !v.is_empty() && v.len() <= 128 && !v.chars().any(|c| c.is_control()) => {
                Self(v.to_string())
            }
            _ => Self::generate(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Operation namespace for the idempotency keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Payment,
    Refund,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payment => "payment",
            Self::Refund => "refund",
        }
    }

    /// Storage key: `"{op}:{key}"`.
    pub fn scoped_key(&self, key: &IdempotencyKey) -> String {
        format!("{}:{}", self.as_str(), key.as_str())
    }
}
