//! Handshake state machines for both ends of a channel.
//!
//! The initiator fetches the responder's public key, wraps a fresh session
//! key to it and installs the session locally. The responder answers key
//! requests statelessly and installs whatever session key it can unwrap.
//! `Established` is terminal on both sides: a new key needs a new channel.
//! An initiator that loses its peer moves to `Closed` and stays there.
//!
//! State transitions are plain synchronous methods. The RSA work lives in
//! [`wrap_session_key`] and [`unwrap_session_key`] so callers can run it on
//! a blocking pool between a state check and the matching transition.

use std::fmt;
use std::sync::Arc;

use sipc_crypto::aead::{AeadSession, SessionKey};
use sipc_crypto::identity::{encrypt_to, AsymmetricIdentity, PublicKeyMaterial};

use crate::errors::{CoreError, HandshakeError};

// ============================================================================
// Observable State
// ============================================================================

/// Externally visible channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Nothing sent or received yet
    Idle,
    /// Initiator sent a key request and waits for the reply
    AwaitingPublicKey,
    /// Responder handed out its public key and waits for a session key
    AwaitingEncryptedKey,
    /// A session key is installed
    Established,
    /// Initiator torn down; it never handshakes again
    Closed,
}

impl ChannelState {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelState::Idle => "Idle",
            ChannelState::AwaitingPublicKey => "AwaitingPublicKey",
            ChannelState::AwaitingEncryptedKey => "AwaitingEncryptedKey",
            ChannelState::Established => "Established",
            ChannelState::Closed => "Closed",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Key Wrapping
// ============================================================================

/// Output of [`wrap_session_key`]: the RSA ciphertext for the responder and
/// the local session built from the same key.
pub struct WrappedSessionKey {
    pub encrypted: Vec<u8>,
    pub session: AeadSession,
}

impl fmt::Debug for WrappedSessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedSessionKey")
            .field("encrypted_len", &self.encrypted.len())
            .finish_non_exhaustive()
    }
}

/// Generate a session key and encrypt it to `public_key`.
///
/// The raw key is dropped (and wiped) before returning.
pub fn wrap_session_key(public_key: &PublicKeyMaterial) -> Result<WrappedSessionKey, CoreError> {
    let key = SessionKey::generate()?;
    let encrypted = encrypt_to(public_key, key.as_bytes())?;
    Ok(WrappedSessionKey {
        encrypted,
        session: AeadSession::new(&key),
    })
}

/// Recover a session key with the responder's private key.
///
/// Anything other than exactly 16 plaintext bytes is a decryption failure.
pub fn unwrap_session_key(
    identity: &AsymmetricIdentity,
    ciphertext: &[u8],
) -> Result<AeadSession, CoreError> {
    let raw = identity.decrypt(ciphertext)?;
    let key = SessionKey::from_slice(&raw)?;
    Ok(AeadSession::new(&key))
}

// ============================================================================
// Initiator
// ============================================================================

enum InitiatorState {
    Idle,
    AwaitingPublicKey,
    Established(Arc<AeadSession>),
    Closed,
}

/// Initiator half of the handshake.
pub struct InitiatorHandshake {
    state: InitiatorState,
}

impl InitiatorHandshake {
    pub fn new() -> Self {
        Self {
            state: InitiatorState::Idle,
        }
    }

    pub fn state(&self) -> ChannelState {
        match self.state {
            InitiatorState::Idle => ChannelState::Idle,
            InitiatorState::AwaitingPublicKey => ChannelState::AwaitingPublicKey,
            InitiatorState::Established(_) => ChannelState::Established,
            InitiatorState::Closed => ChannelState::Closed,
        }
    }

    /// `Idle -> AwaitingPublicKey`. The caller sends the key request.
    pub fn start(&mut self) -> Result<(), HandshakeError> {
        match self.state {
            InitiatorState::Idle => {
                self.state = InitiatorState::AwaitingPublicKey;
                Ok(())
            }
            InitiatorState::AwaitingPublicKey => Err(HandshakeError::Unexpected {
                message: "connect",
                state: self.state().name(),
            }),
            InitiatorState::Established(_) => Err(HandshakeError::AlreadyEstablished),
            InitiatorState::Closed => Err(HandshakeError::Closed),
        }
    }

    /// Check that a public key reply is acceptable now.
    pub fn expect_public_key(&self) -> Result<(), HandshakeError> {
        match self.state {
            InitiatorState::AwaitingPublicKey => Ok(()),
            _ => Err(HandshakeError::Unexpected {
                message: "PublicKeyReply",
                state: self.state().name(),
            }),
        }
    }

    /// `AwaitingPublicKey -> Established`, after the wrapped key was sent.
    pub fn complete(&mut self, session: AeadSession) -> Result<(), HandshakeError> {
        self.expect_public_key()?;
        self.state = InitiatorState::Established(Arc::new(session));
        Ok(())
    }

    pub fn session(&self) -> Option<Arc<AeadSession>> {
        match &self.state {
            InitiatorState::Established(session) => Some(session.clone()),
            _ => None,
        }
    }

    pub fn is_established(&self) -> bool {
        matches!(self.state, InitiatorState::Established(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, InitiatorState::Closed)
    }

    /// `AwaitingPublicKey -> Idle`, when the key request could not be sent.
    /// No other state is affected.
    pub fn abandon_start(&mut self) {
        if let InitiatorState::AwaitingPublicKey = self.state {
            self.state = InitiatorState::Idle;
        }
    }

    /// Any state `-> Closed`, dropping any installed session.
    pub fn close(&mut self) {
        self.state = InitiatorState::Closed;
    }
}

impl Default for InitiatorHandshake {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Responder
// ============================================================================

enum ResponderState {
    Listening,
    AwaitingEncryptedKey,
    Established(Arc<AeadSession>),
}

/// Responder half of the handshake, bound to the shared identity.
pub struct ResponderHandshake {
    identity: AsymmetricIdentity,
    state: ResponderState,
}

impl ResponderHandshake {
    pub fn new(identity: AsymmetricIdentity) -> Self {
        Self {
            identity,
            state: ResponderState::Listening,
        }
    }

    pub fn identity(&self) -> &AsymmetricIdentity {
        &self.identity
    }

    pub fn state(&self) -> ChannelState {
        match self.state {
            ResponderState::Listening => ChannelState::Idle,
            ResponderState::AwaitingEncryptedKey => ChannelState::AwaitingEncryptedKey,
            ResponderState::Established(_) => ChannelState::Established,
        }
    }

    /// Answer a key request. Allowed in every state; only `Listening` moves.
    pub fn public_key_reply(&mut self) -> Result<PublicKeyMaterial, CoreError> {
        let public_key = self.identity.public_key()?;
        if let ResponderState::Listening = self.state {
            self.state = ResponderState::AwaitingEncryptedKey;
        }
        Ok(public_key)
    }

    /// Check that a session key may be installed now.
    pub fn expect_session_key(&self) -> Result<(), HandshakeError> {
        match self.state {
            ResponderState::Established(_) => Err(HandshakeError::AlreadyEstablished),
            _ => Ok(()),
        }
    }

    /// `{Listening, AwaitingEncryptedKey} -> Established`.
    pub fn install(&mut self, session: AeadSession) -> Result<(), HandshakeError> {
        self.expect_session_key()?;
        self.state = ResponderState::Established(Arc::new(session));
        Ok(())
    }

    pub fn session(&self) -> Option<Arc<AeadSession>> {
        match &self.state {
            ResponderState::Established(session) => Some(session.clone()),
            _ => None,
        }
    }
}

impl fmt::Debug for ResponderHandshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponderHandshake")
            .field("alias", &self.identity.alias())
            .field("state", &self.state())
            .finish()
    }
}
