use sha2::{Digest, Sha256};

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    let out = h.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    arr
}

/// Hex SHA-256 of public key bytes, used to identify a key in logs.
pub fn fingerprint(pubkey_bytes: &[u8]) -> String {
    hex::encode(sha256(pubkey_bytes))
}
