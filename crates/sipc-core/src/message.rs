//! Protocol messages and their wire encoding.
//!
//! A [`ProtocolMessage`] is the typed view of a [`FrameV1`]. Decoding is
//! total: every byte sequence either yields a message or a [`DecodeError`],
//! so the receive path can drop bad input without ever panicking.

use bytes::Bytes;
use thiserror::Error;

use sipc_crypto::aead::EncryptedEnvelope;
use sipc_crypto::identity::PublicKeyMaterial;
use sipc_proto::v1::{
    FrameV1, MsgKind, KEY_ENCRYPTED_AES, KEY_PUBLIC_KEY, KEY_SECURE_DATA, KEY_SECURE_RESPONSE,
};
use sipc_proto::validation::ValidationError;

/// Errors produced while turning raw bytes into a [`ProtocolMessage`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Bytes are not a valid protobuf frame
    #[error("invalid frame encoding: {0}")]
    Protobuf(String),

    /// Discriminant outside 1..=5
    #[error("unknown message kind {0}")]
    UnknownKind(u32),

    /// Required payload key is absent
    #[error("missing payload field '{0}'")]
    MissingField(&'static str),
}

impl From<ValidationError> for DecodeError {
    fn from(e: ValidationError) -> Self {
        match e {
            ValidationError::UnknownKind(what) => DecodeError::UnknownKind(what),
            ValidationError::MissingField { field } => DecodeError::MissingField(field),
        }
    }
}

impl From<prost::DecodeError> for DecodeError {
    fn from(e: prost::DecodeError) -> Self {
        DecodeError::Protobuf(e.to_string())
    }
}

/// One message of the handshake or secure-messaging protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolMessage {
    PublicKeyRequest,
    PublicKeyReply(PublicKeyMaterial),
    EncryptedSessionKey(Vec<u8>),
    SecureData(EncryptedEnvelope),
    SecureResponse(EncryptedEnvelope),
}

impl ProtocolMessage {
    pub fn kind(&self) -> MsgKind {
        match self {
            ProtocolMessage::PublicKeyRequest => MsgKind::PublicKeyRequest,
            ProtocolMessage::PublicKeyReply(_) => MsgKind::PublicKeyReply,
            ProtocolMessage::EncryptedSessionKey(_) => MsgKind::EncryptedSessionKey,
            ProtocolMessage::SecureData(_) => MsgKind::SecureData,
            ProtocolMessage::SecureResponse(_) => MsgKind::SecureResponse,
        }
    }

    /// Short name for logs and state errors.
    pub fn name(&self) -> &'static str {
        kind_name(self.kind())
    }

    pub fn into_frame(self) -> FrameV1 {
        match self {
            ProtocolMessage::PublicKeyRequest => FrameV1::empty(MsgKind::PublicKeyRequest),
            ProtocolMessage::PublicKeyReply(pk) => {
                FrameV1::with_field(MsgKind::PublicKeyReply, KEY_PUBLIC_KEY, pk.into_vec())
            }
            ProtocolMessage::EncryptedSessionKey(ct) => {
                FrameV1::with_field(MsgKind::EncryptedSessionKey, KEY_ENCRYPTED_AES, ct)
            }
            ProtocolMessage::SecureData(env) => {
                FrameV1::with_field(MsgKind::SecureData, KEY_SECURE_DATA, env.into_vec())
            }
            ProtocolMessage::SecureResponse(env) => {
                FrameV1::with_field(MsgKind::SecureResponse, KEY_SECURE_RESPONSE, env.into_vec())
            }
        }
    }

    pub fn from_frame(mut frame: FrameV1) -> Result<Self, DecodeError> {
        let kind = frame.validate()?;
        let msg = match kind {
            MsgKind::PublicKeyRequest => ProtocolMessage::PublicKeyRequest,
            MsgKind::PublicKeyReply => ProtocolMessage::PublicKeyReply(PublicKeyMaterial::from_der(
                frame.take_field(KEY_PUBLIC_KEY)?,
            )),
            MsgKind::EncryptedSessionKey => {
                ProtocolMessage::EncryptedSessionKey(frame.take_field(KEY_ENCRYPTED_AES)?)
            }
            MsgKind::SecureData => ProtocolMessage::SecureData(EncryptedEnvelope::from_bytes(
                frame.take_field(KEY_SECURE_DATA)?,
            )),
            MsgKind::SecureResponse => ProtocolMessage::SecureResponse(
                EncryptedEnvelope::from_bytes(frame.take_field(KEY_SECURE_RESPONSE)?),
            ),
        };
        Ok(msg)
    }

    /// Encode to wire bytes.
    pub fn encode(self) -> Bytes {
        self.into_frame().to_bytes()
    }

    /// Decode wire bytes. Unknown extra payload keys are ignored.
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        Self::from_frame(FrameV1::from_bytes(raw)?)
    }
}

pub fn kind_name(kind: MsgKind) -> &'static str {
    match kind {
        MsgKind::PublicKeyRequest => "PublicKeyRequest",
        MsgKind::PublicKeyReply => "PublicKeyReply",
        MsgKind::EncryptedSessionKey => "EncryptedSessionKey",
        MsgKind::SecureData => "SecureData",
        MsgKind::SecureResponse => "SecureResponse",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_is_bare_discriminant() {
        let raw = ProtocolMessage::PublicKeyRequest.encode();
        let frame = FrameV1::from_bytes(&raw).unwrap();
        assert_eq!(frame.what, 1);
        assert!(frame.data.is_empty());
        assert_eq!(
            ProtocolMessage::decode(&raw).unwrap(),
            ProtocolMessage::PublicKeyRequest
        );
    }

    #[test]
    fn test_payload_lands_under_fixed_key() {
        let env = EncryptedEnvelope::from_bytes(vec![7u8; 40]);
        let raw = ProtocolMessage::SecureData(env.clone()).encode();
        let frame = FrameV1::from_bytes(&raw).unwrap();
        assert_eq!(frame.what, 4);
        assert_eq!(frame.data.get(KEY_SECURE_DATA), Some(&vec![7u8; 40]));
        assert_eq!(
            ProtocolMessage::decode(&raw).unwrap(),
            ProtocolMessage::SecureData(env)
        );
    }

    #[test]
    fn test_extra_keys_are_ignored() {
        let mut frame = FrameV1::with_field(MsgKind::EncryptedSessionKey, KEY_ENCRYPTED_AES, vec![9]);
        frame.data.insert("vendor_extension".into(), vec![1, 2, 3]);
        let msg = ProtocolMessage::decode(&frame.to_bytes()).unwrap();
        assert_eq!(msg, ProtocolMessage::EncryptedSessionKey(vec![9]));
    }

    #[test]
    fn test_missing_key_is_decode_error() {
        let frame = FrameV1::with_field(MsgKind::SecureResponse, KEY_SECURE_DATA, vec![1]);
        assert_eq!(
            ProtocolMessage::decode(&frame.to_bytes()),
            Err(DecodeError::MissingField(KEY_SECURE_RESPONSE))
        );
    }

    #[test]
    fn test_unknown_kind_and_garbage() {
        let frame = FrameV1 {
            what: 6,
            data: Default::default(),
        };
        assert_eq!(
            ProtocolMessage::decode(&frame.to_bytes()),
            Err(DecodeError::UnknownKind(6))
        );
        // Empty input decodes as discriminant 0.
        assert_eq!(ProtocolMessage::decode(&[]), Err(DecodeError::UnknownKind(0)));
        assert!(matches!(
            ProtocolMessage::decode(&[0xFF, 0xFF, 0xFF]),
            Err(DecodeError::Protobuf(_))
        ));
    }

    #[test]
    fn test_names_match_kinds() {
        assert_eq!(ProtocolMessage::PublicKeyRequest.name(), "PublicKeyRequest");
        assert_eq!(
            ProtocolMessage::EncryptedSessionKey(vec![]).name(),
            "EncryptedSessionKey"
        );
    }
}
