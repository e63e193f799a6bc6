//! Version 1 frame definitions.

use std::collections::HashMap;

use bytes::Bytes;
use prost::Message;

/// Payload key carrying the responder's X.509 SubjectPublicKeyInfo.
pub const KEY_PUBLIC_KEY: &str = "public_key";
/// Payload key carrying the RSA-wrapped session key.
pub const KEY_ENCRYPTED_AES: &str = "encrypted_aes";
/// Payload key carrying an initiator request envelope.
pub const KEY_SECURE_DATA: &str = "secure_data";
/// Payload key carrying a responder reply envelope.
pub const KEY_SECURE_RESPONSE: &str = "secure_response";

/// A single transport message: discriminant plus byte payload map.
#[derive(Clone, PartialEq, Message)]
pub struct FrameV1 {
    /// Message discriminant, see [`MsgKind`].
    #[prost(uint32, tag = "1")]
    pub what: u32,
    /// Payload fields keyed by the `KEY_*` constants.
    #[prost(map = "string, bytes", tag = "2")]
    pub data: HashMap<String, Vec<u8>>,
}

impl FrameV1 {
    /// Frame with no payload fields.
    pub fn empty(kind: MsgKind) -> Self {
        Self {
            what: kind.as_u32(),
            data: HashMap::new(),
        }
    }

    /// Frame with exactly one payload field.
    pub fn with_field(kind: MsgKind, key: &str, value: Vec<u8>) -> Self {
        let mut data = HashMap::with_capacity(1);
        data.insert(key.to_string(), value);
        Self {
            what: kind.as_u32(),
            data,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.encode_to_vec())
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, prost::DecodeError> {
        Self::decode(raw)
    }
}

/// Message discriminants, fixed by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MsgKind {
    PublicKeyRequest = 1,
    PublicKeyReply = 2,
    EncryptedSessionKey = 3,
    SecureData = 4,
    SecureResponse = 5,
}

impl MsgKind {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// The payload key this kind must carry, if any.
    pub fn payload_key(self) -> Option<&'static str> {
        match self {
            MsgKind::PublicKeyRequest => None,
            MsgKind::PublicKeyReply => Some(KEY_PUBLIC_KEY),
            MsgKind::EncryptedSessionKey => Some(KEY_ENCRYPTED_AES),
            MsgKind::SecureData => Some(KEY_SECURE_DATA),
            MsgKind::SecureResponse => Some(KEY_SECURE_RESPONSE),
        }
    }
}

impl TryFrom<u32> for MsgKind {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MsgKind::PublicKeyRequest),
            2 => Ok(MsgKind::PublicKeyReply),
            3 => Ok(MsgKind::EncryptedSessionKey),
            4 => Ok(MsgKind::SecureData),
            5 => Ok(MsgKind::SecureResponse),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminants_are_stable() {
        assert_eq!(MsgKind::PublicKeyRequest.as_u32(), 1);
        assert_eq!(MsgKind::PublicKeyReply.as_u32(), 2);
        assert_eq!(MsgKind::EncryptedSessionKey.as_u32(), 3);
        assert_eq!(MsgKind::SecureData.as_u32(), 4);
        assert_eq!(MsgKind::SecureResponse.as_u32(), 5);
        assert_eq!(MsgKind::try_from(0), Err(0));
        assert_eq!(MsgKind::try_from(6), Err(6));
    }

    #[test]
    fn test_frame_encoding_keeps_payload() {
        let frame = FrameV1::with_field(MsgKind::SecureData, KEY_SECURE_DATA, vec![1, 2, 3]);
        let decoded = FrameV1::from_bytes(&frame.to_bytes()).unwrap();
        assert_eq!(decoded.what, 4);
        assert_eq!(decoded.data.get(KEY_SECURE_DATA), Some(&vec![1, 2, 3]));
    }

    #[test]
    fn test_empty_frame_decodes_to_zero_discriminant() {
        let decoded = FrameV1::from_bytes(&[]).unwrap();
        assert_eq!(decoded.what, 0);
        assert!(decoded.data.is_empty());
    }
}
