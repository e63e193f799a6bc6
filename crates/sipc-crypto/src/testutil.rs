//! Shared fixtures for unit tests. RSA generation dominates test time, so a
//! single keypair is generated per test binary and reused.

use std::sync::{Arc, OnceLock};

use crate::identity::AsymmetricIdentity;
use crate::keystore::{KeyStore, MemoryKeyStore};

pub const TEST_BITS: usize = 2048;
pub const TEST_ALIAS: &str = "test-responder";

static STORE: OnceLock<Arc<MemoryKeyStore>> = OnceLock::new();

pub fn shared_store() -> Arc<MemoryKeyStore> {
    STORE
        .get_or_init(|| {
            let store = MemoryKeyStore::new();
            store.ensure_rsa(TEST_ALIAS, TEST_BITS).expect("test keypair");
            Arc::new(store)
        })
        .clone()
}

pub fn shared_identity() -> AsymmetricIdentity {
    AsymmetricIdentity::new(shared_store(), TEST_ALIAS)
}
