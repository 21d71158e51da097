//! Shared webhook-authentication primitives: HMAC encodings, constant-time
//! comparison, timestamp freshness, and IPv4 allow-listing.

use {
    base64::Engine,
    base64::engine::general_purpose::STANDARD as BASE64,
    hmac::{Hmac, Mac},
    sha2::Sha256,
    std::net::{IpAddr, Ipv4Addr},
    subtle::ConstantTimeEq,
};

type HmacSha256 = Hmac<Sha256>;

pub fn hmac_sha256(secret: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

pub fn hmac_sha256_hex(secret: &[u8], message: &[u8]) -> String {
    hex::encode(hmac_sha256(secret, message))
}

pub fn hmac_sha256_base64(secret: &[u8], message: &[u8]) -> String {
    BASE64.encode(hmac_sha256(secret, message))
}

/// Length leaks are fine (signatures have a fixed width); content must not.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.ct_eq(b).into()
}

pub const FRESHNESS_TOLERANCE_SECS: i64 = 300;

/// ±5-minute window against replayed signatures.
pub fn is_fresh(timestamp: i64, now: i64) -> bool {
    (now - timestamp).abs() <= FRESHNESS_TOLERANCE_SECS
}

/// `Stripe-Signature: t=<unix>,v1=<hex>[,v1=...]` — the first v1 wins.
pub fn parse_stripe_signature(header: &str) -> Option<(i64, String)> {
    let mut timestamp: Option<i64> = None;
    let mut sig: Option<&str> = None;

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", t)) => timestamp = t.parse().ok(),
            Some(("v1", s)) if sig.is_none() => sig = Some(s),
            _ => {}
        }
    }
    Some((timestamp?, sig?.to_string()))
}

/// Exact IPv4 addresses plus CIDR ranges. IPv6 sources never match; the
/// providers that use this anchor publish IPv4 egress only.
#[derive(Debug, Clone)]
pub struct IpAllowList {
    exact: Vec<Ipv4Addr>,
    cidrs: Vec<(Ipv4Addr, u8)>,
}

impl IpAllowList {
    pub fn new(exact: &[&str], cidrs: &[&str]) -> Self {
        let exact = exact.iter().filter_map(|s| s.parse().ok()).collect();
        let cidrs = cidrs
            .iter()
            .filter_map(|s| {
                let (net, prefix) = s.split_once('/')?;
                let net: Ipv4Addr = net.parse().ok()?;
                let prefix: u8 = prefix.parse().ok()?;
                (prefix <= 32).then_some((net, prefix))
            })
            .collect();
        Self { exact, cidrs }
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        let IpAddr::V4(v4) = addr else {
            return false;
        };
        if self.exact.contains(&v4) {
            return true;
        }
        self.cidrs.iter().any(|&(net, prefix)| {
            let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
            (u32::from(v4) & mask) == (u32::from(net) & mask)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_encodings_agree_with_known_vector() {
        // RFC 4231 test case 2.
        let digest = hmac_sha256_hex(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            digest,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
        assert_eq!(
            hmac_sha256_base64(b"Jefe", b"what do ya want for nothing?"),
            BASE64.encode(hex::decode(digest).unwrap())
        );
    }

    #[test]
    fn constant_time_eq_checks_content_and_length() {
        assert!(constant_time_eq(b"abcd", b"abcd"));
        assert!(!constant_time_eq(b"abcd", b"abce"));
        assert!(!constant_time_eq(b"abcd", b"abc"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn freshness_window_is_five_minutes_both_ways() {
        let now = 1_700_000_000;
        assert!(is_fresh(now, now));
        assert!(is_fresh(now - 300, now));
        assert!(is_fresh(now + 300, now));
        assert!(!is_fresh(now - 301, now));
        assert!(!is_fresh(now + 301, now));
    }

    #[test]
    fn stripe_signature_header_parsing() {
        let (t, v1) = parse_stripe_signature("t=1700000000,v1=deadbeef").unwrap();
        assert_eq!(t, 1_700_000_000);
        assert_eq!(v1, "deadbeef");

        // Extra schemes are tolerated, first v1 wins.
        let (_, v1) = parse_stripe_signature("t=1,v0=old,v1=first,v1=second").unwrap();
        assert_eq!(v1, "first");

        assert!(parse_stripe_signature("v1=deadbeef").is_none());
        assert!(parse_stripe_signature("t=1700000000").is_none());
        assert!(parse_stripe_signature("t=notanumber,v1=x").is_none());
        assert!(parse_stripe_signature("").is_none());
    }

    #[test]
    fn allow_list_matches_exact_and_cidr() {
        let list = IpAllowList::new(
            &["52.74.200.1", "52.74.200.2"],
            &["192.168.0.0/16", "10.1.0.0/16", "172.16.0.0/16"],
        );

        assert!(list.contains("52.74.200.1".parse().unwrap()));
        assert!(!list.contains("52.74.200.3".parse().unwrap()));
        assert!(list.contains("192.168.255.255".parse().unwrap()));
        assert!(list.contains("10.1.44.5".parse().unwrap()));
        assert!(!list.contains("10.2.0.1".parse().unwrap()));
        assert!(!list.contains("::1".parse().unwrap()), "IPv6 never matches");
    }
}
