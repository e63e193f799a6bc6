#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::v1::{FrameV1, MsgKind};

    proptest! {
        // Arbitrary input either fails to decode or yields a frame that
        // validates or is rejected; it never panics.
        #[test]
        fn test_decode_arbitrary_bytes_never_panics(raw in any::<Vec<u8>>()) {
            if let Ok(frame) = FrameV1::from_bytes(&raw) {
                let _ = frame.validate();
            }
        }

        #[test]
        fn test_valid_frames_survive_encoding(
            what in 1u32..=5,
            payload in any::<Vec<u8>>()
        ) {
            let kind = MsgKind::try_from(what).unwrap();
            let frame = match kind.payload_key() {
                Some(key) => FrameV1::with_field(kind, key, payload),
                None => FrameV1::empty(kind),
            };
            let decoded = FrameV1::from_bytes(&frame.to_bytes()).unwrap();
            prop_assert_eq!(decoded.validate(), Ok(kind));
            prop_assert_eq!(decoded, frame);
        }
    }
}
