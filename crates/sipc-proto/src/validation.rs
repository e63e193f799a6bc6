//! Structural validation of decoded frames.

use crate::v1::{FrameV1, MsgKind};

/// Validation error types for wire frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Discriminant outside the known range
    UnknownKind(u32),
    /// Required payload key is absent
    MissingField { field: &'static str },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownKind(what) => write!(f, "unknown message kind {}", what),
            Self::MissingField { field } => write!(f, "required field '{}' is missing", field),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

impl FrameV1 {
    /// Resolve the discriminant and check the payload key it requires.
    ///
    /// Extra keys are tolerated and ignored.
    pub fn validate(&self) -> ValidationResult<MsgKind> {
        let kind = MsgKind::try_from(self.what).map_err(ValidationError::UnknownKind)?;
        if let Some(field) = kind.payload_key() {
            if !self.data.contains_key(field) {
                return Err(ValidationError::MissingField { field });
            }
        }
        Ok(kind)
    }

    /// Remove and return the value stored under `field`.
    pub fn take_field(&mut self, field: &'static str) -> ValidationResult<Vec<u8>> {
        self.data
            .remove(field)
            .ok_or(ValidationError::MissingField { field })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::v1::{KEY_ENCRYPTED_AES, KEY_PUBLIC_KEY};

    #[test]
    fn test_request_needs_no_fields() {
        let frame = FrameV1::empty(MsgKind::PublicKeyRequest);
        assert_eq!(frame.validate(), Ok(MsgKind::PublicKeyRequest));
    }

    #[test]
    fn test_missing_field_rejected() {
        let frame = FrameV1::empty(MsgKind::PublicKeyReply);
        assert_eq!(
            frame.validate(),
            Err(ValidationError::MissingField { field: KEY_PUBLIC_KEY })
        );
    }

    #[test]
    fn test_wrong_field_rejected() {
        let frame = FrameV1::with_field(MsgKind::PublicKeyReply, KEY_ENCRYPTED_AES, vec![1]);
        assert!(frame.validate().is_err());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let frame = FrameV1 {
            what: 42,
            data: Default::default(),
        };
        assert_eq!(frame.validate(), Err(ValidationError::UnknownKind(42)));
    }

    #[test]
    fn test_extra_fields_ignored() {
        let mut frame = FrameV1::with_field(MsgKind::EncryptedSessionKey, KEY_ENCRYPTED_AES, vec![9]);
        frame.data.insert("unrelated".into(), vec![0]);
        assert_eq!(frame.validate(), Ok(MsgKind::EncryptedSessionKey));
        assert_eq!(frame.take_field(KEY_ENCRYPTED_AES), Ok(vec![9]));
    }
}
