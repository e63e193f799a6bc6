//! Long-lived RSA identity backed by a [`KeyStore`].
//!
//! The responder exports its public key as X.509 SubjectPublicKeyInfo and
//! unwraps session keys with the private half. The initiator only needs
//! [`encrypt_to`], which wraps bytes for a received public key.

use std::fmt;
use std::sync::Arc;

use rand_core::OsRng;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use zeroize::Zeroizing;

use crate::hash::fingerprint;
use crate::keystore::{KeyStore, KeyStoreError};

/// Smallest RSA modulus accepted for generation or encryption.
pub const MIN_RSA_BITS: usize = 2048;

/// Error type for identity operations.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),
    #[error("RSA decryption failed")]
    Decryption,
    #[error("RSA encryption failed: {0}")]
    Encryption(String),
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("RSA modulus too small: {bits} bits (minimum 2048)")]
    WeakKey { bits: usize },
}

/// DER-encoded SubjectPublicKeyInfo of an RSA public key.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKeyMaterial(Vec<u8>);

impl PublicKeyMaterial {
    pub fn from_der(der: Vec<u8>) -> Self {
        Self(der)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    /// Hex SHA-256 of the SPKI bytes.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }
}

impl fmt::Debug for PublicKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKeyMaterial")
            .field("len", &self.0.len())
            .finish()
    }
}

/// One RSA keypair, addressed by alias inside a shared key store.
///
/// The identity is read-only once the keypair exists and can be shared
/// across any number of channels.
#[derive(Clone)]
pub struct AsymmetricIdentity {
    store: Arc<dyn KeyStore>,
    alias: String,
    modulus_bits: usize,
}

impl AsymmetricIdentity {
    pub fn new(store: Arc<dyn KeyStore>, alias: impl Into<String>) -> Self {
        Self {
            store,
            alias: alias.into(),
            modulus_bits: MIN_RSA_BITS,
        }
    }

    /// Modulus size used if [`ensure_key_pair`](Self::ensure_key_pair) has to generate.
    pub fn with_modulus_bits(mut self, bits: usize) -> Self {
        self.modulus_bits = bits;
        self
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Create the keypair if the store does not hold one yet. Idempotent.
    pub fn ensure_key_pair(&self) -> Result<(), IdentityError> {
        if self.modulus_bits < MIN_RSA_BITS {
            return Err(IdentityError::WeakKey {
                bits: self.modulus_bits,
            });
        }
        if self.store.ensure_rsa(&self.alias, self.modulus_bits)? {
            tracing::info!(alias = %self.alias, bits = self.modulus_bits, "generated identity keypair");
        }
        Ok(())
    }

    /// Public key for export. Fails with `KeyNotFound` before `ensure_key_pair`.
    pub fn public_key(&self) -> Result<PublicKeyMaterial, IdentityError> {
        Ok(PublicKeyMaterial(self.store.public_key_der(&self.alias)?))
    }

    /// RSA PKCS#1 v1.5 decryption with the stored private key.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, IdentityError> {
        self.store
            .decrypt_pkcs1v15(&self.alias, ciphertext)
            .map_err(|e| match e {
                KeyStoreError::Decryption => IdentityError::Decryption,
                other => IdentityError::KeyStore(other),
            })
    }

    pub fn fingerprint(&self) -> Result<String, IdentityError> {
        Ok(self.public_key()?.fingerprint())
    }
}

impl fmt::Debug for AsymmetricIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsymmetricIdentity")
            .field("alias", &self.alias)
            .field("modulus_bits", &self.modulus_bits)
            .finish_non_exhaustive()
    }
}

/// Parse SPKI bytes into an RSA public key of acceptable strength.
pub fn parse_public_key(material: &PublicKeyMaterial) -> Result<RsaPublicKey, IdentityError> {
    let key = RsaPublicKey::from_public_key_der(material.as_bytes())
        .map_err(|e| IdentityError::InvalidPublicKey(e.to_string()))?;
    let bits = key.size() * 8;
    if bits < MIN_RSA_BITS {
        return Err(IdentityError::WeakKey { bits });
    }
    Ok(key)
}

/// Encrypt `data` to the holder of `material` with RSA PKCS#1 v1.5.
pub fn encrypt_to(material: &PublicKeyMaterial, data: &[u8]) -> Result<Vec<u8>, IdentityError> {
    let key = parse_public_key(material)?;
    key.encrypt(&mut OsRng, Pkcs1v15Encrypt, data)
        .map_err(|e| IdentityError::Encryption(e.to_string()))
}
