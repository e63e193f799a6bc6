//! Key store abstraction for long-lived RSA keypairs.
//!
//! A store generates and holds private keys by alias and only ever hands out
//! public key bytes and decryption results. Two backends are provided:
//! [`MemoryKeyStore`] for process-lifetime keys and [`FileKeyStore`] for keys
//! that must survive restarts.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use rand_core::OsRng;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// File extension for PKCS#8 DER private keys in a [`FileKeyStore`].
const KEY_FILE_EXT: &str = "p8";

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("key store unavailable: {0}")]
    Unavailable(String),
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("invalid key alias: {0:?}")]
    InvalidAlias(String),
    #[error("key generation failed: {0}")]
    Generation(String),
    #[error("decryption failed")]
    Decryption,
}

/// Backing store for asymmetric identities.
///
/// Implementations never expose private key material; callers refer to keys
/// by alias only.
pub trait KeyStore: Send + Sync {
    /// Create an RSA keypair under `alias` unless one already exists.
    ///
    /// Returns `true` if a new keypair was generated.
    fn ensure_rsa(&self, alias: &str, modulus_bits: usize) -> Result<bool, KeyStoreError>;

    /// Whether a keypair exists under `alias`.
    fn contains_alias(&self, alias: &str) -> Result<bool, KeyStoreError>;

    /// X.509 SubjectPublicKeyInfo DER of the public half.
    fn public_key_der(&self, alias: &str) -> Result<Vec<u8>, KeyStoreError>;

    /// RSA PKCS#1 v1.5 decryption with the private half.
    fn decrypt_pkcs1v15(
        &self,
        alias: &str,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KeyStoreError>;
}

fn generate(alias: &str, modulus_bits: usize) -> Result<RsaPrivateKey, KeyStoreError> {
    debug!(alias, modulus_bits, "generating RSA keypair");
    RsaPrivateKey::new(&mut OsRng, modulus_bits)
        .map_err(|e| KeyStoreError::Generation(e.to_string()))
}

fn spki_der(key: &RsaPrivateKey) -> Result<Vec<u8>, KeyStoreError> {
    let public = RsaPublicKey::from(key);
    let doc = public
        .to_public_key_der()
        .map_err(|e| KeyStoreError::Unavailable(format!("public key encoding: {}", e)))?;
    Ok(doc.as_bytes().to_vec())
}

fn decrypt_with(key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, KeyStoreError> {
    key.decrypt(Pkcs1v15Encrypt, ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| KeyStoreError::Decryption)
}

// ============================================================================
// In-memory store
// ============================================================================

/// Keys held in process memory for the lifetime of the store.
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<String, Arc<RsaPrivateKey>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(&self, alias: &str) -> Result<Arc<RsaPrivateKey>, KeyStoreError> {
        self.keys
            .read()
            .get(alias)
            .cloned()
            .ok_or_else(|| KeyStoreError::KeyNotFound(alias.to_string()))
    }
}

impl KeyStore for MemoryKeyStore {
    fn ensure_rsa(&self, alias: &str, modulus_bits: usize) -> Result<bool, KeyStoreError> {
        let mut keys = self.keys.write();
        if keys.contains_key(alias) {
            return Ok(false);
        }
        let key = generate(alias, modulus_bits)?;
        keys.insert(alias.to_string(), Arc::new(key));
        Ok(true)
    }

    fn contains_alias(&self, alias: &str) -> Result<bool, KeyStoreError> {
        Ok(self.keys.read().contains_key(alias))
    }

    fn public_key_der(&self, alias: &str) -> Result<Vec<u8>, KeyStoreError> {
        let key = self.key(alias)?;
        spki_der(&key)
    }

    fn decrypt_pkcs1v15(
        &self,
        alias: &str,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KeyStoreError> {
        let key = self.key(alias)?;
        decrypt_with(&key, ciphertext)
    }
}

// ============================================================================
// File-backed store
// ============================================================================

/// Keys persisted as PKCS#8 DER files, one per alias, in a single directory.
///
/// Loaded keys are cached; the file is only read once per alias.
pub struct FileKeyStore {
    dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<RsaPrivateKey>>>,
}

impl FileKeyStore {
    /// Open (and create if needed) a key directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, KeyStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| KeyStoreError::Unavailable(format!("{}: {}", dir.display(), e)))?;
        info!(dir = %dir.display(), "opened file key store");
        Ok(Self {
            dir,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, alias: &str) -> Result<PathBuf, KeyStoreError> {
        validate_alias(alias)?;
        Ok(self.dir.join(format!("{}.{}", alias, KEY_FILE_EXT)))
    }

    fn read_key(path: &Path) -> Result<Option<RsaPrivateKey>, KeyStoreError> {
        let der = match fs::read(path) {
            Ok(bytes) => Zeroizing::new(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(KeyStoreError::Unavailable(format!("{}: {}", path.display(), e)))
            }
        };
        RsaPrivateKey::from_pkcs8_der(&der)
            .map(Some)
            .map_err(|e| KeyStoreError::Unavailable(format!("{}: corrupt key: {}", path.display(), e)))
    }

    fn write_key(path: &Path, key: &RsaPrivateKey) -> Result<(), KeyStoreError> {
        let der = key
            .to_pkcs8_der()
            .map_err(|e| KeyStoreError::Unavailable(format!("key encoding: {}", e)))?;

        let mut opts = fs::OpenOptions::new();
        opts.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }

        let mut file = opts
            .open(path)
            .map_err(|e| KeyStoreError::Unavailable(format!("{}: {}", path.display(), e)))?;
        file.write_all(der.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| KeyStoreError::Unavailable(format!("{}: {}", path.display(), e)))
    }

    fn key(&self, alias: &str) -> Result<Arc<RsaPrivateKey>, KeyStoreError> {
        if let Some(key) = self.cache.read().get(alias) {
            return Ok(key.clone());
        }
        let path = self.path_for(alias)?;
        let mut cache = self.cache.write();
        if let Some(key) = cache.get(alias) {
            return Ok(key.clone());
        }
        let key = Self::read_key(&path)?
            .map(Arc::new)
            .ok_or_else(|| KeyStoreError::KeyNotFound(alias.to_string()))?;
        cache.insert(alias.to_string(), key.clone());
        Ok(key)
    }
}

impl KeyStore for FileKeyStore {
    fn ensure_rsa(&self, alias: &str, modulus_bits: usize) -> Result<bool, KeyStoreError> {
        let path = self.path_for(alias)?;
        let mut cache = self.cache.write();
        if cache.contains_key(alias) {
            return Ok(false);
        }
        if let Some(existing) = Self::read_key(&path)? {
            debug!(alias, "loaded existing keypair");
            cache.insert(alias.to_string(), Arc::new(existing));
            return Ok(false);
        }
        let key = generate(alias, modulus_bits)?;
        Self::write_key(&path, &key)?;
        cache.insert(alias.to_string(), Arc::new(key));
        info!(alias, "stored new keypair");
        Ok(true)
    }

    fn contains_alias(&self, alias: &str) -> Result<bool, KeyStoreError> {
        if self.cache.read().contains_key(alias) {
            return Ok(true);
        }
        Ok(self.path_for(alias)?.is_file())
    }

    fn public_key_der(&self, alias: &str) -> Result<Vec<u8>, KeyStoreError> {
        let key = self.key(alias)?;
        spki_der(&key)
    }

    fn decrypt_pkcs1v15(
        &self,
        alias: &str,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KeyStoreError> {
        let key = self.key(alias)?;
        decrypt_with(&key, ciphertext)
    }
}

/// Aliases become file names, so they are limited to a conservative charset.
fn validate_alias(alias: &str) -> Result<(), KeyStoreError> {
    let ok = !alias.is_empty()
        && !alias.starts_with('.')
        && alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(KeyStoreError::InvalidAlias(alias.to_string()))
    }
}
