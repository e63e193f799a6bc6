//! Error types for the secure channel core.
//!
//! Failures split into two classes. Key store and ordering errors are fatal
//! and surface to the operator. Decoding and cryptographic errors only ever
//! cost the single message that triggered them; they are contained at the
//! channel's receive boundary and reported as a dropped message.

use thiserror::Error;

use sipc_crypto::aead::AeadError;
use sipc_crypto::identity::IdentityError;
use sipc_crypto::keystore::KeyStoreError;

use crate::message::DecodeError;
use crate::transport::TransportError;

// ============================================================================
// Handshake Errors
// ============================================================================

/// Errors raised by the handshake state machines.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Message arrived in a state that does not accept it
    #[error("unexpected {message} in state {state}")]
    Unexpected {
        message: &'static str,
        state: &'static str,
    },

    /// The channel already holds a session key
    #[error("session already established")]
    AlreadyEstablished,

    /// The channel was torn down and cannot be reused
    #[error("channel closed")]
    Closed,
}

// ============================================================================
// Unified Core Error
// ============================================================================

/// Unified error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Backing key store cannot be used
    #[error("key store error: {0}")]
    KeyStore(String),

    /// Identity used before its keypair was created
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// RSA unwrap or session key recovery failed
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// AEAD tag check failed
    #[error("authentication failed")]
    Authentication,

    /// No reachable peer to send to
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Application data submitted before the handshake finished
    #[error("handshake not yet complete")]
    HandshakePending,

    /// Malformed frame
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Invalid state transition
    #[error("invalid state: {0}")]
    InvalidState(#[from] HandshakeError),

    /// Internal error (worker task failure, closed queue)
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the error only affects one message and the channel can continue.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoreError::Decryption(_)
                | CoreError::Authentication
                | CoreError::Decode(_)
                | CoreError::InvalidState(_)
        )
    }

    /// Whether the error indicates a broken process setup rather than bad input.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::KeyStore(_) | CoreError::KeyNotFound(_))
    }

    /// Text suitable for an end user. Cryptographic failures are never shown.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            CoreError::TransportUnavailable(_) => Some("Could not connect to Secure Service."),
            CoreError::HandshakePending => Some("Secure session is still being established."),
            _ => None,
        }
    }
}

impl From<KeyStoreError> for CoreError {
    fn from(e: KeyStoreError) -> Self {
        match e {
            KeyStoreError::KeyNotFound(alias) => CoreError::KeyNotFound(alias),
            KeyStoreError::Decryption => CoreError::Decryption("key store decryption".into()),
            other => CoreError::KeyStore(other.to_string()),
        }
    }
}

impl From<IdentityError> for CoreError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::KeyStore(inner) => CoreError::from(inner),
            IdentityError::Decryption => CoreError::Decryption("RSA unwrap".into()),
            IdentityError::Encryption(s) => CoreError::Internal(format!("RSA wrap: {}", s)),
            IdentityError::InvalidPublicKey(s) => CoreError::Decryption(format!("public key: {}", s)),
            weak @ IdentityError::WeakKey { .. } => CoreError::Decryption(weak.to_string()),
        }
    }
}

impl From<AeadError> for CoreError {
    fn from(e: AeadError) -> Self {
        match e {
            AeadError::Authentication => CoreError::Authentication,
            AeadError::InvalidKeyLength(n) => {
                CoreError::Decryption(format!("session key length {}", n))
            }
            AeadError::EncryptionFailed | AeadError::RngError => CoreError::Internal(e.to_string()),
        }
    }
}

impl From<TransportError> for CoreError {
    fn from(e: TransportError) -> Self {
        CoreError::TransportUnavailable(e.to_string())
    }
}

impl From<tokio::task::JoinError> for CoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        CoreError::Internal(format!("worker task: {}", e))
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
