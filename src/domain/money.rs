use {
    super::error::GatewayError,
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// Amount in minor units (cents for two-exponent currencies).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MoneyAmount(i64);

impl MoneyAmount {
    pub const ZERO: MoneyAmount = MoneyAmount(0);

    pub fn new(minor: i64) -> Result<Self, GatewayError> {
        if minor < 0 {
            return Err(GatewayError::Validation(format!(
                "amount cannot be negative, got: {minor}"
            )));
        }
        Ok(Self(minor))
    }

    /// Parse a decimal string ("100", "100.5", "100.00") into minor units.
    /// Exactly two fraction digits of precision; no float in the path.
    pub fn parse_decimal(s: &str) -> Result<Self, GatewayError> {
        let s = s.trim();
        let invalid = || GatewayError::Validation(format!("invalid amount: {s:?}"));

        if s.starts_with('-') {
            return Err(GatewayError::Validation(format!(
                "amount cannot be negative, got: {s}"
            )));
        }

        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        if int_part.is_empty() || frac_part.len() > 2 {
            return Err(invalid());
        }
        if !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        let whole: i64 = int_part.parse().map_err(|_| invalid())?;
        let mut frac: i64 = if frac_part.is_empty() {
            0
        } else {
            frac_part.parse().map_err(|_| invalid())?
        };
        if frac_part.len() == 1 {
            frac *= 10;
        }

        whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(frac))
            .map(Self)
            .ok_or_else(invalid)
    }

    pub fn minor_units(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// "10000" minor units -> "100.00".
    pub fn to_decimal_string(&self) -> String {
        format!("{}.{:02}", self.0 / 100, self.0 % 100)
    }

    pub fn checked_add(self, other: MoneyAmount) -> Option<MoneyAmount> {
        self.0.checked_add(other.0).map(MoneyAmount)
    }

    pub fn checked_sub(self, other: MoneyAmount) -> Option<MoneyAmount> {
        self.0
            .checked_sub(other.0)
            .filter(|&v| v >= 0)
            .map(MoneyAmount)
    }
}

impl fmt::Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal_string())
    }
}

/// ISO-4217 alpha code. Providers declare arbitrary currency sets, so this
/// is shape-validated (three ASCII letters, stored uppercase) rather than a
/// closed enum.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, GatewayError> {
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(GatewayError::Validation(format!(
                "currency must be a 3-letter ISO-4217 code, got: {code:?}"
            )));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Currency {
    type Error = GatewayError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Currency::new(&s)
    }
}

impl TryFrom<&str> for Currency {
    type Error = GatewayError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Currency::new(s)
    }
}

impl From<Currency> for String {
    fn from(c: Currency) -> String {
        c.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount: MoneyAmount,
    currency: Currency,
}

impl Money {
    pub fn new(amount: MoneyAmount, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn amount(&self) -> MoneyAmount {
        self.amount
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_decimal_accepts_common_shapes() {
        assert_eq!(MoneyAmount::parse_decimal("100.00").unwrap().minor_units(), 10000);
        assert_eq!(MoneyAmount::parse_decimal("100").unwrap().minor_units(), 10000);
        assert_eq!(MoneyAmount::parse_decimal("100.5").unwrap().minor_units(), 10050);
        assert_eq!(MoneyAmount::parse_decimal("0.07").unwrap().minor_units(), 7);
        assert_eq!(MoneyAmount::parse_decimal("0").unwrap().minor_units(), 0);
    }

    #[test]
    fn parse_decimal_rejects_garbage() {
        for bad in ["-10.00", "10.000", "ten", "", ".", "1.2.3", "1e3", "10.", "+5"] {
            assert!(MoneyAmount::parse_decimal(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn decimal_string_roundtrip() {
        for s in ["100.00", "0.07", "9.90", "12345678.01"] {
            let parsed = MoneyAmount::parse_decimal(s).unwrap();
            assert_eq!(parsed.to_decimal_string(), s);
        }
    }

    #[test]
    fn currency_normalizes_to_uppercase() {
        assert_eq!(Currency::new("usd").unwrap().as_str(), "USD");
        assert_eq!(Currency::new("ThB").unwrap().as_str(), "THB");
    }

    #[test]
    fn currency_rejects_bad_shapes() {
        for bad in ["US", "USDD", "U1D", "", "usd "] {
            assert!(Currency::new(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn checked_sub_never_goes_negative() {
        let a = MoneyAmount::new(100).unwrap();
        let b = MoneyAmount::new(150).unwrap();
        assert!(a.checked_sub(b).is_none());
        assert_eq!(b.checked_sub(a).unwrap().minor_units(), 50);
    }
}
