#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::aead::{AeadError, AeadSession, EncryptedEnvelope, SessionKey};

    proptest! {
        #[test]
        fn test_aead_round_trip(key in any::<[u8; 16]>(), text in ".*") {
            let session = AeadSession::new(&SessionKey::from_slice(&key).unwrap());
            let env = session.encrypt(text.as_bytes()).unwrap();
            let plain = session.decrypt(&env).unwrap();
            prop_assert_eq!(String::from_utf8(plain).unwrap(), text);
        }

        // Flipping any single bit of the envelope must fail authentication.
        #[test]
        fn test_single_bit_flip_rejected(
            key in any::<[u8; 16]>(),
            payload in prop::collection::vec(any::<u8>(), 0..256),
            bit in any::<prop::sample::Index>()
        ) {
            let session = AeadSession::new(&SessionKey::from_slice(&key).unwrap());
            let mut raw = session.encrypt(&payload).unwrap().into_vec();
            let pos = bit.index(raw.len() * 8);
            raw[pos / 8] ^= 1 << (pos % 8);
            let result = session.decrypt(&EncryptedEnvelope::from_bytes(raw));
            prop_assert!(matches!(result, Err(AeadError::Authentication)));
        }

        #[test]
        fn test_cross_key_rejected(
            k1 in any::<[u8; 16]>(),
            k2 in any::<[u8; 16]>(),
            payload in prop::collection::vec(any::<u8>(), 0..128)
        ) {
            prop_assume!(k1 != k2);
            let s1 = AeadSession::new(&SessionKey::from_slice(&k1).unwrap());
            let s2 = AeadSession::new(&SessionKey::from_slice(&k2).unwrap());
            let env = s1.encrypt(&payload).unwrap();
            prop_assert!(matches!(s2.decrypt(&env), Err(AeadError::Authentication)));
        }

        #[test]
        fn test_arbitrary_envelopes_never_panic(
            key in any::<[u8; 16]>(),
            raw in prop::collection::vec(any::<u8>(), 0..128)
        ) {
            let session = AeadSession::new(&SessionKey::from_slice(&key).unwrap());
            let _ = session.decrypt(&EncryptedEnvelope::from_bytes(raw));
        }
    }
}
