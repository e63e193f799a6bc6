//! Secure channels: handshake plus AEAD session bound to a transport.
//!
//! A channel turns one inbound frame into one [`Disposition`]. The receive
//! path never returns an error: decode failures, cryptographic failures and
//! out-of-order messages drop that single frame and leave the channel state
//! as it was, so the next valid frame still succeeds. There is no negative
//! acknowledgement on the wire; a dropped frame is simply never answered.
//!
//! RSA and AES work runs on the blocking pool. The channel awaits it before
//! looking at the next frame, which keeps per-channel ordering intact.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use sipc_proto::v1::MsgKind;

use crate::dispatch::DispatchStats;
use crate::errors::{CoreError, HandshakeError};
use crate::handshake::{
    unwrap_session_key, wrap_session_key, ChannelState, InitiatorHandshake, ResponderHandshake,
};
use crate::message::ProtocolMessage;
use crate::transport::{Address, MessageTransport};
use sipc_crypto::identity::AsymmetricIdentity;

/// Default reply prefix of [`EchoHandler`].
pub const DEFAULT_RESPONSE_PREFIX: &str = "Service received: ";

// ============================================================================
// Dispositions
// ============================================================================

/// Why a frame was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Frame did not decode
    Malformed,
    /// Message kind only travels in the other direction
    WrongRole,
    /// Handshake message not valid in the current state
    UnexpectedInState,
    /// Application data before a session key exists
    NotEstablished,
    /// RSA unwrap, AEAD authentication or key parsing failed
    CryptoFailure,
    /// Frame needs an answer but carries no reply address
    NoReplyAddress,
    /// Frame came from an address other than the bound peer
    UnknownPeer,
    /// Application handler refused the request
    HandlerFailed,
    /// Transport rejected the outgoing answer
    SendFailed,
}

/// Outcome of handling one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// An answer of this kind was sent
    Replied(MsgKind),
    /// A session key was installed
    Installed,
    /// A decrypted response for the application
    Surfaced(String),
    Dropped(DropReason),
}

impl Disposition {
    pub fn is_dropped(&self) -> bool {
        matches!(self, Disposition::Dropped(_))
    }
}

async fn blocking<T, F>(f: F) -> Result<T, CoreError>
where
    F: FnOnce() -> Result<T, CoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

// ============================================================================
// Application Handler
// ============================================================================

/// Errors returned by request handlers.
#[derive(Debug, Error, Clone)]
pub enum HandlerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("processing failed: {0}")]
    ProcessingFailed(String),
}

/// Maps a decrypted request to the plaintext of its response.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: &[u8]) -> Result<Vec<u8>, HandlerError>;
}

/// Replies with a fixed prefix followed by the request text.
#[derive(Debug, Clone)]
pub struct EchoHandler {
    prefix: String,
}

impl EchoHandler {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for EchoHandler {
    fn default() -> Self {
        Self::new(DEFAULT_RESPONSE_PREFIX)
    }
}

#[async_trait]
impl RequestHandler for EchoHandler {
    async fn handle(&self, request: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let text = String::from_utf8_lossy(request);
        Ok(format!("{}{}", self.prefix, text).into_bytes())
    }
}

// ============================================================================
// Responder Channel
// ============================================================================

/// Responder side of one channel, serving a single peer.
pub struct ResponderChannel {
    handshake: ResponderHandshake,
    transport: Arc<dyn MessageTransport>,
    handler: Arc<dyn RequestHandler>,
    stats: Arc<DispatchStats>,
    local: Option<Address>,
}

impl ResponderChannel {
    pub fn new(
        identity: AsymmetricIdentity,
        transport: Arc<dyn MessageTransport>,
        handler: Arc<dyn RequestHandler>,
        stats: Arc<DispatchStats>,
    ) -> Self {
        Self {
            handshake: ResponderHandshake::new(identity),
            transport,
            handler,
            stats,
            local: None,
        }
    }

    /// Address advertised as reply address on outgoing frames.
    pub fn with_local_address(mut self, local: Address) -> Self {
        self.local = Some(local);
        self
    }

    pub fn state(&self) -> ChannelState {
        self.handshake.state()
    }

    /// Handle one inbound frame.
    pub async fn on_receive(&mut self, raw: &[u8], reply_to: Option<Address>) -> Disposition {
        self.stats.record_received();
        let disposition = match ProtocolMessage::decode(raw) {
            Ok(message) => self.dispatch(message, reply_to).await,
            Err(e) => {
                warn!(len = raw.len(), "dropping malformed frame: {}", e);
                Disposition::Dropped(DropReason::Malformed)
            }
        };
        self.stats.record(&disposition);
        disposition
    }

    async fn dispatch(&mut self, message: ProtocolMessage, reply_to: Option<Address>) -> Disposition {
        match message {
            ProtocolMessage::PublicKeyRequest => {
                let Some(to) = reply_to else {
                    warn!("key request without reply address");
                    return Disposition::Dropped(DropReason::NoReplyAddress);
                };
                let public_key = match self.handshake.public_key_reply() {
                    Ok(pk) => pk,
                    Err(e) => {
                        error!(alias = self.handshake.identity().alias(), "identity unusable: {}", e);
                        return Disposition::Dropped(DropReason::CryptoFailure);
                    }
                };
                debug!(%to, len = public_key.as_bytes().len(), "sending public key");
                self.reply(to, ProtocolMessage::PublicKeyReply(public_key)).await
            }

            ProtocolMessage::EncryptedSessionKey(ciphertext) => {
                if let Err(e) = self.handshake.expect_session_key() {
                    warn!("dropping session key: {}", e);
                    return Disposition::Dropped(DropReason::UnexpectedInState);
                }
                let identity = self.handshake.identity().clone();
                let session =
                    match blocking(move || unwrap_session_key(&identity, &ciphertext)).await {
                        Ok(session) => session,
                        Err(e) => {
                            warn!("dropping session key: {}", e);
                            return Disposition::Dropped(DropReason::CryptoFailure);
                        }
                    };
                match self.handshake.install(session) {
                    Ok(()) => {
                        info!(peer = ?reply_to, "session established");
                        Disposition::Installed
                    }
                    Err(e) => {
                        warn!("dropping session key: {}", e);
                        Disposition::Dropped(DropReason::UnexpectedInState)
                    }
                }
            }

            ProtocolMessage::SecureData(envelope) => {
                let Some(session) = self.handshake.session() else {
                    warn!(state = %self.state(), "secure data before session key");
                    return Disposition::Dropped(DropReason::NotEstablished);
                };
                let Some(to) = reply_to else {
                    warn!("secure data without reply address");
                    return Disposition::Dropped(DropReason::NoReplyAddress);
                };

                let opener = Arc::clone(&session);
                let request =
                    match blocking(move || opener.decrypt(&envelope).map_err(CoreError::from)).await
                    {
                        Ok(plain) => plain,
                        Err(e) => {
                            warn!("dropping secure data: {}", e);
                            return Disposition::Dropped(DropReason::CryptoFailure);
                        }
                    };
                debug!(len = request.len(), "request decrypted");

                let response = match self.handler.handle(&request).await {
                    Ok(response) => response,
                    Err(e) => {
                        warn!("handler failed: {}", e);
                        return Disposition::Dropped(DropReason::HandlerFailed);
                    }
                };
                let sealed =
                    match blocking(move || session.encrypt(&response).map_err(CoreError::from)).await
                    {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            error!("response encryption failed: {}", e);
                            return Disposition::Dropped(DropReason::CryptoFailure);
                        }
                    };
                self.reply(to, ProtocolMessage::SecureResponse(sealed)).await
            }

            other @ (ProtocolMessage::PublicKeyReply(_) | ProtocolMessage::SecureResponse(_)) => {
                warn!(message = other.name(), "initiator-bound message at responder");
                Disposition::Dropped(DropReason::WrongRole)
            }
        }
    }

    async fn reply(&self, to: Address, message: ProtocolMessage) -> Disposition {
        let kind = message.kind();
        match self.transport.send(to, message.encode(), self.local).await {
            Ok(()) => Disposition::Replied(kind),
            Err(e) => {
                warn!(%to, "reply not sent: {}", e);
                Disposition::Dropped(DropReason::SendFailed)
            }
        }
    }
}

// ============================================================================
// Initiator Channel
// ============================================================================

/// Initiator side of one channel.
pub struct InitiatorChannel {
    handshake: InitiatorHandshake,
    transport: Arc<dyn MessageTransport>,
    stats: Arc<DispatchStats>,
    local: Option<Address>,
    remote: Option<Address>,
}

impl InitiatorChannel {
    pub fn new(transport: Arc<dyn MessageTransport>, stats: Arc<DispatchStats>) -> Self {
        Self {
            handshake: InitiatorHandshake::new(),
            transport,
            stats,
            local: None,
            remote: None,
        }
    }

    /// Address advertised as reply address on outgoing frames.
    pub fn with_local_address(mut self, local: Address) -> Self {
        self.local = Some(local);
        self
    }

    pub fn state(&self) -> ChannelState {
        self.handshake.state()
    }

    pub fn remote(&self) -> Option<Address> {
        self.remote
    }

    /// Bind the channel to `remote` and send the public key request.
    ///
    /// A channel connects at most once. After [`disconnect`](Self::disconnect)
    /// a fresh channel is needed.
    pub async fn connect(&mut self, remote: Address) -> Result<(), CoreError> {
        if self.handshake.is_closed() {
            return Err(HandshakeError::Closed.into());
        }
        if !self.transport.is_reachable(remote) {
            return Err(CoreError::TransportUnavailable(remote.to_string()));
        }
        self.handshake.start()?;
        let request = ProtocolMessage::PublicKeyRequest.encode();
        if let Err(e) = self.transport.send(remote, request, self.local).await {
            self.handshake.abandon_start();
            return Err(e.into());
        }
        self.remote = Some(remote);
        debug!(%remote, "public key requested");
        Ok(())
    }

    /// Forget the peer and any session key. The channel is closed for good.
    pub fn disconnect(&mut self) {
        if let Some(remote) = self.remote.take() {
            info!(%remote, "channel closed");
        }
        self.handshake.close();
    }

    /// Whether a frame stamped with `reply_to` may come from the bound peer.
    fn from_remote(&self, reply_to: Option<Address>) -> bool {
        match reply_to {
            Some(sender) => self.remote == Some(sender),
            None => true,
        }
    }

    /// Encrypt `text` and send it as secure data.
    pub async fn submit(&mut self, text: &str) -> Result<(), CoreError> {
        let remote = self
            .remote
            .filter(|remote| self.transport.is_reachable(*remote))
            .ok_or_else(|| CoreError::TransportUnavailable("not connected".into()))?;
        let session = self.handshake.session().ok_or(CoreError::HandshakePending)?;

        let plain = text.as_bytes().to_vec();
        let envelope = blocking(move || session.encrypt(&plain).map_err(CoreError::from)).await?;
        debug!(len = envelope.len(), "sending secure data");
        self.transport
            .send(remote, ProtocolMessage::SecureData(envelope).encode(), self.local)
            .await?;
        Ok(())
    }

    /// Handle one inbound frame.
    pub async fn on_receive(&mut self, raw: &[u8], reply_to: Option<Address>) -> Disposition {
        self.stats.record_received();
        let disposition = match ProtocolMessage::decode(raw) {
            Ok(message) => self.dispatch(message, reply_to).await,
            Err(e) => {
                warn!(len = raw.len(), "dropping malformed frame: {}", e);
                Disposition::Dropped(DropReason::Malformed)
            }
        };
        self.stats.record(&disposition);
        disposition
    }

    async fn dispatch(&mut self, message: ProtocolMessage, reply_to: Option<Address>) -> Disposition {
        match message {
            ProtocolMessage::PublicKeyReply(public_key) => {
                if let Err(e) = self.handshake.expect_public_key() {
                    warn!("dropping public key: {}", e);
                    return Disposition::Dropped(DropReason::UnexpectedInState);
                }
                if !self.from_remote(reply_to) {
                    warn!(sender = ?reply_to, "public key from unknown peer");
                    return Disposition::Dropped(DropReason::UnknownPeer);
                }
                let Some(to) = self.remote else {
                    return Disposition::Dropped(DropReason::NoReplyAddress);
                };
                debug!(fingerprint = %public_key.fingerprint(), "received responder key");

                let wrapped = match blocking(move || wrap_session_key(&public_key)).await {
                    Ok(wrapped) => wrapped,
                    Err(e) => {
                        warn!("dropping public key: {}", e);
                        return Disposition::Dropped(DropReason::CryptoFailure);
                    }
                };
                let frame = ProtocolMessage::EncryptedSessionKey(wrapped.encrypted).encode();
                if let Err(e) = self.transport.send(to, frame, self.local).await {
                    warn!(%to, "session key not sent: {}", e);
                    return Disposition::Dropped(DropReason::SendFailed);
                }
                match self.handshake.complete(wrapped.session) {
                    Ok(()) => {
                        info!(%to, "session established");
                        Disposition::Installed
                    }
                    Err(e) => {
                        warn!("{}", e);
                        Disposition::Dropped(DropReason::UnexpectedInState)
                    }
                }
            }

            ProtocolMessage::SecureResponse(envelope) => {
                let Some(session) = self.handshake.session() else {
                    warn!(state = %self.state(), "secure response before session key");
                    return Disposition::Dropped(DropReason::NotEstablished);
                };
                if !self.from_remote(reply_to) {
                    warn!(sender = ?reply_to, "secure response from unknown peer");
                    return Disposition::Dropped(DropReason::UnknownPeer);
                }
                match blocking(move || session.decrypt(&envelope).map_err(CoreError::from)).await {
                    Ok(plain) => {
                        debug!(len = plain.len(), "response decrypted");
                        Disposition::Surfaced(String::from_utf8_lossy(&plain).into_owned())
                    }
                    Err(e) => {
                        warn!("dropping secure response: {}", e);
                        Disposition::Dropped(DropReason::CryptoFailure)
                    }
                }
            }

            other @ (ProtocolMessage::PublicKeyRequest
            | ProtocolMessage::EncryptedSessionKey(_)
            | ProtocolMessage::SecureData(_)) => {
                warn!(message = other.name(), "responder-bound message at initiator");
                Disposition::Dropped(DropReason::WrongRole)
            }
        }
    }
}
