//! Session AEAD: AES-128-GCM with random 96-bit nonces.
//!
//! Envelope layout: nonce(12) || ciphertext || tag(16).

#![forbid(unsafe_code)]

use std::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Key, Nonce,
};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Session key length in bytes (128-bit).
pub const KEY_LEN: usize = 16;
/// GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;
/// GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Error type for session AEAD operations.
#[derive(Debug, thiserror::Error)]
pub enum AeadError {
    #[error("authentication failed")]
    Authentication,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("RNG failed")]
    RngError,
    #[error("invalid session key length: {0} bytes")]
    InvalidKeyLength(usize),
}

/// Raw 128-bit session key, wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    /// Fresh key from the OS CSPRNG.
    pub fn generate() -> Result<Self, AeadError> {
        let mut key = [0u8; KEY_LEN];
        getrandom::getrandom(&mut key).map_err(|_| AeadError::RngError)?;
        Ok(Self(key))
    }

    /// Key recovered from an unwrapped handshake message. Must be exactly 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, AeadError> {
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| AeadError::InvalidKeyLength(bytes.len()))?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// nonce || ciphertext || tag, as produced by [`AeadSession::encrypt`].
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope(Vec<u8>);

impl EncryptedEnvelope {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Leading nonce, if the envelope is long enough to carry one.
    pub fn nonce(&self) -> Option<&[u8]> {
        self.0.get(..NONCE_LEN)
    }
}

impl fmt::Debug for EncryptedEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedEnvelope")
            .field("len", &self.0.len())
            .finish()
    }
}

/// Authenticated encryption under one session key.
///
/// Owned by exactly one channel; deliberately not `Clone`.
pub struct AeadSession {
    aead: Aes128Gcm,
}

impl AeadSession {
    pub fn new(key: &SessionKey) -> Self {
        Self {
            aead: Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key.as_bytes())),
        }
    }

    /// Encrypt with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedEnvelope, AeadError> {
        let mut nonce12 = [0u8; NONCE_LEN];
        getrandom::getrandom(&mut nonce12).map_err(|_| AeadError::RngError)?;

        let ct = self
            .aead
            .encrypt(Nonce::from_slice(&nonce12), plaintext)
            .map_err(|_| AeadError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
        out.extend_from_slice(&nonce12);
        out.extend_from_slice(&ct);
        Ok(EncryptedEnvelope(out))
    }

    /// Decrypt and authenticate. Any failure, including truncation, is
    /// reported as [`AeadError::Authentication`].
    pub fn decrypt(&self, envelope: &EncryptedEnvelope) -> Result<Vec<u8>, AeadError> {
        let blob = envelope.as_bytes();
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(AeadError::Authentication);
        }
        let (nonce, ct) = blob.split_at(NONCE_LEN);
        self.aead
            .decrypt(Nonce::from_slice(nonce), ct)
            .map_err(|_| AeadError::Authentication)
    }
}

impl fmt::Debug for AeadSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AeadSession(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> AeadSession {
        AeadSession::new(&SessionKey::generate().unwrap())
    }

    #[test]
    fn test_round_trip_text() {
        let s = session();
        for text in ["hello", "", "naïve 日本語 🚀"] {
            let env = s.encrypt(text.as_bytes()).unwrap();
            assert_eq!(env.len(), NONCE_LEN + text.len() + TAG_LEN);
            assert_eq!(s.decrypt(&env).unwrap(), text.as_bytes());
        }
    }

    #[test]
    fn test_nonces_differ_between_calls() {
        let s = session();
        let a = s.encrypt(b"same").unwrap();
        let b = s.encrypt(b"same").unwrap();
        assert_ne!(a.nonce(), b.nonce());
        assert_ne!(a, b);
    }

    #[test]
    fn test_truncated_envelope_fails_authentication() {
        let s = session();
        let env = s.encrypt(b"payload").unwrap();
        for cut in [0, 5, NONCE_LEN, NONCE_LEN + TAG_LEN - 1, env.len() - 1] {
            let short = EncryptedEnvelope::from_bytes(env.as_bytes()[..cut].to_vec());
            assert!(matches!(s.decrypt(&short), Err(AeadError::Authentication)));
        }
    }

    #[test]
    fn test_tampered_envelope_fails() {
        let s = session();
        let mut raw = s.encrypt(b"Test message").unwrap().into_vec();
        raw[15] ^= 0xFF;
        let env = EncryptedEnvelope::from_bytes(raw);
        assert!(matches!(s.decrypt(&env), Err(AeadError::Authentication)));
    }

    #[test]
    fn test_key_length_enforced() {
        assert!(SessionKey::from_slice(&[0u8; 16]).is_ok());
        assert!(matches!(
            SessionKey::from_slice(&[0u8; 32]),
            Err(AeadError::InvalidKeyLength(32))
        ));
        assert!(matches!(
            SessionKey::from_slice(&[]),
            Err(AeadError::InvalidKeyLength(0))
        ));
    }

    #[test]
    fn test_same_key_bytes_interoperate() {
        let key = SessionKey::generate().unwrap();
        let copy = SessionKey::from_slice(key.as_bytes()).unwrap();
        let env = AeadSession::new(&key).encrypt(b"hello").unwrap();
        assert_eq!(AeadSession::new(&copy).decrypt(&env).unwrap(), b"hello");
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let key = SessionKey::from_slice(&[0xAB; 16]).unwrap();
        assert_eq!(format!("{:?}", key), "SessionKey(..)");
    }
}
