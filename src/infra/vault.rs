use {
    crate::domain::error::GatewayError,
    base64::Engine,
    base64::engine::general_purpose::STANDARD as BASE64,
    chacha20poly1305::{
        ChaCha20Poly1305, Key, Nonce,
        aead::{Aead, AeadCore, KeyInit, OsRng},
    },
};

const NONCE_LEN: usize = 12;

/// Authenticated encryption for provider credentials at rest. The key is
/// provisioned once at process start; the vault holds no other state.
/// Output is `base64(nonce ‖ ciphertext)` with a fresh nonce per call, so
/// encrypting the same plaintext twice yields different ciphertexts.
pub struct CredentialVault {
    cipher: ChaCha20Poly1305,
}

impl CredentialVault {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// Key material arrives base64-encoded through configuration.
    pub fn from_base64_key(encoded: &str) -> Result<Self, GatewayError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|_| GatewayError::Internal("vault key is not valid base64".into()))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| GatewayError::Internal("vault key must be 32 bytes".into()))?;
        Ok(Self::new(&key))
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, GatewayError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| GatewayError::Internal("credential encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    /// A credential that no longer decrypts is a configuration fault (key
    /// rotation without re-encryption, corrupted row): the provider cannot
    /// be called, so surface it as such.
    pub fn decrypt(&self, encoded: &str) -> Result<String, GatewayError> {
        let unavailable = || GatewayError::ProviderUnavailable("credential decryption failed".into());

        let bytes = BASE64.decode(encoded).map_err(|_| unavailable())?;
        if bytes.len() <= NONCE_LEN {
            return Err(unavailable());
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| unavailable())?;
        String::from_utf8(plaintext).map_err(|_| unavailable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> CredentialVault {
        CredentialVault::new(&[7u8; 32])
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let v = vault();
        for secret in ["sk_live_abc123", "", "multi\nline\nsecret", "ключ"] {
            let ct = v.encrypt(secret).unwrap();
            assert_eq!(v.decrypt(&ct).unwrap(), secret);
        }
    }

    #[test]
    fn fresh_nonce_per_call() {
        let v = vault();
        let a = v.encrypt("same").unwrap();
        let b = v.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_as_provider_unavailable() {
        let ct = vault().encrypt("secret").unwrap();
        let other = CredentialVault::new(&[8u8; 32]);
        assert!(matches!(
            other.decrypt(&ct),
            Err(GatewayError::ProviderUnavailable(_))
        ));
    }

    #[test]
    fn garbage_ciphertext_is_rejected() {
        let v = vault();
        for bad in ["", "not-base64!!!", "AAAA"] {
            assert!(v.decrypt(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn base64_key_loading() {
        let encoded = BASE64.encode([9u8; 32]);
        let v = CredentialVault::from_base64_key(&encoded).unwrap();
        let ct = v.encrypt("x").unwrap();
        assert_eq!(v.decrypt(&ct).unwrap(), "x");

        assert!(CredentialVault::from_base64_key("short").is_err());
        assert!(CredentialVault::from_base64_key(&BASE64.encode([1u8; 16])).is_err());
    }
}
