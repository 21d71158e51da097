use {
    super::error::GatewayError,
    super::money::Currency,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::collections::{BTreeMap, BTreeSet},
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderStatus {
    Active,
    Disabled,
    Degraded,
    Maintenance,
}

impl ProviderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Disabled => "DISABLED",
            Self::Degraded => "DEGRADED",
            Self::Maintenance => "MAINTENANCE",
        }
    }
}

impl TryFrom<&str> for ProviderStatus {
    type Error = GatewayError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "DISABLED" => Ok(Self::Disabled),
            "DEGRADED" => Ok(Self::Degraded),
            "MAINTENANCE" => Ok(Self::Maintenance),
            other => Err(GatewayError::Validation(format!(
                "unknown provider status: {other}"
            ))),
        }
    }
}

/// Regional endpoint entry. A provider may expose several; routing uses the
/// first active one in stored order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionConfig {
    pub region: String,
    pub base_url: String,
    pub active: bool,
    pub max_retries: Option<u32>,
    pub timeout_secs: Option<u64>,
}

/// External payment service row. `credentials` values are vault ciphertext;
/// plaintext exists only inside the adapter factory.
#[derive(Debug, Clone)]
pub struct Provider {
    pub id: Uuid,
    pub name: String,
    pub display_name: String,
    pub status: ProviderStatus,
    pub supported_currencies: BTreeSet<Currency>,
    pub priority: i32,
    pub credentials: BTreeMap<String, String>,
    pub configurations: Vec<RegionConfig>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Provider {
    pub fn supports(&self, currency: &Currency) -> bool {
        self.supported_currencies.contains(currency)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Routable: ACTIVE and not soft-deleted.
    pub fn is_routable(&self) -> bool {
        self.status == ProviderStatus::Active && !self.is_deleted()
    }

    pub fn active_region(&self) -> Option<&RegionConfig> {
        self.configurations.iter().find(|c| c.active)
    }
}

/// Admin-supplied provider definition. Credential values arrive in
/// plaintext here and are encrypted by the registry before persistence.
#[derive(Debug, Clone)]
pub struct ProviderDraft {
    pub name: String,
    pub display_name: String,
    pub status: ProviderStatus,
    pub supported_currencies: BTreeSet<Currency>,
    pub priority: i32,
    pub credentials: BTreeMap<String, String>,
    pub configurations: Vec<RegionConfig>,
}

impl ProviderDraft {
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.name.is_empty()
            || !self
                .name
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        {
            return Err(GatewayError::Validation(
                "provider name must be a non-empty lowercase key".into(),
            ));
        }
        if self.supported_currencies.is_empty() {
            return Err(GatewayError::Validation(
                "provider must support at least one currency".into(),
            ));
        }
        for config in &self.configurations {
            if !config.base_url.starts_with("https://") {
                return Err(GatewayError::Validation(format!(
                    "region {} base_url must be https",
                    config.region
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(name: &str, status: ProviderStatus, deleted: bool) -> Provider {
        let now = Utc::now();
        Provider {
            id: Uuid::now_v7(),
            name: name.into(),
            display_name: name.into(),
            status,
            supported_currencies: [Currency::new("USD").unwrap()].into(),
            priority: 10,
            credentials: BTreeMap::new(),
            configurations: vec![RegionConfig {
                region: "global".into(),
                base_url: "https://api.example.com".into(),
                active: true,
                max_retries: None,
                timeout_secs: None,
            }],
            created_at: now,
            updated_at: now,
            deleted_at: deleted.then_some(now),
        }
    }

    #[test]
    fn routable_requires_active_and_not_deleted() {
        assert!(provider("stripe", ProviderStatus::Active, false).is_routable());
        assert!(!provider("stripe", ProviderStatus::Degraded, false).is_routable());
        assert!(!provider("stripe", ProviderStatus::Maintenance, false).is_routable());
        assert!(!provider("stripe", ProviderStatus::Active, true).is_routable());
    }

    #[test]
    fn active_region_skips_inactive_entries() {
        let mut p = provider("omise", ProviderStatus::Active, false);
        p.configurations.insert(
            0,
            RegionConfig {
                region: "legacy".into(),
                base_url: "https://old.example.com".into(),
                active: false,
                max_retries: None,
                timeout_secs: None,
            },
        );
        assert_eq!(p.active_region().unwrap().region, "global");
    }

    #[test]
    fn draft_validation() {
        let good = ProviderDraft {
            name: "scb_v2".into(),
            display_name: "SCB".into(),
            status: ProviderStatus::Active,
            supported_currencies: [Currency::new("THB").unwrap()].into(),
            priority: 1,
            credentials: BTreeMap::new(),
            configurations: vec![],
        };
        assert!(good.validate().is_ok());

        let mut bad_name = good.clone();
        bad_name.name = "Stripe".into();
        assert!(bad_name.validate().is_err());

        let mut no_currency = good.clone();
        no_currency.supported_currencies.clear();
        assert!(no_currency.validate().is_err());

        let mut plain_http = good;
        plain_http.configurations.push(RegionConfig {
            region: "th".into(),
            base_url: "http://api.scb".into(),
            active: true,
            max_retries: None,
            timeout_secs: None,
        });
        assert!(plain_http.validate().is_err());
    }
}
