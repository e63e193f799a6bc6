//! Opaque message transport abstraction and the in-process bus.
//!
//! A transport moves whole frames between addressed endpoints. Delivery is
//! at most once and in order per sender; nothing is retried. Each inbound
//! frame may carry the sender's reply address.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::framing::FramingError;

/// Endpoint address, unique within one transport instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub u64);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "addr#{}", self.0)
    }
}

/// Errors from sending over a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer {0} is not reachable")]
    Unavailable(Address),
    #[error("transport closed")]
    Closed,
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// A frame as delivered to its receiver.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub frame: Bytes,
    pub reply_to: Option<Address>,
}

/// Events delivered to an endpoint's receiver.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message(Inbound),
    /// The peer behind this address is gone and will not send again.
    PeerGone(Address),
}

pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Sending side of a message transport.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Hand one frame to the transport for delivery to `to`.
    async fn send(
        &self,
        to: Address,
        frame: Bytes,
        reply_to: Option<Address>,
    ) -> Result<(), TransportError>;

    /// Whether `to` currently accepts frames.
    fn is_reachable(&self, to: Address) -> bool;
}

// ============================================================================
// In-process Bus
// ============================================================================

/// In-process transport: each bound endpoint owns a mailbox.
#[derive(Default)]
pub struct LocalBus {
    next_id: AtomicU64,
    mailboxes: DashMap<Address, mpsc::UnboundedSender<TransportEvent>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new endpoint.
    pub fn bind(&self) -> (Address, EventReceiver) {
        let addr = Address(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::unbounded_channel();
        self.mailboxes.insert(addr, tx);
        debug!(%addr, "bound local endpoint");
        (addr, rx)
    }

    /// Remove an endpoint and tell every other endpoint it is gone.
    pub fn unbind(&self, addr: Address) {
        if self.mailboxes.remove(&addr).is_none() {
            return;
        }
        debug!(%addr, "unbound local endpoint");
        for mailbox in self.mailboxes.iter() {
            let _ = mailbox.value().send(TransportEvent::PeerGone(addr));
        }
    }

    pub fn endpoint_count(&self) -> usize {
        self.mailboxes.len()
    }
}

#[async_trait]
impl MessageTransport for LocalBus {
    async fn send(
        &self,
        to: Address,
        frame: Bytes,
        reply_to: Option<Address>,
    ) -> Result<(), TransportError> {
        let mailbox = self
            .mailboxes
            .get(&to)
            .ok_or(TransportError::Unavailable(to))?;
        mailbox
            .send(TransportEvent::Message(Inbound { frame, reply_to }))
            .map_err(|_| TransportError::Unavailable(to))
    }

    fn is_reachable(&self, to: Address) -> bool {
        self.mailboxes
            .get(&to)
            .map(|mailbox| !mailbox.is_closed())
            .unwrap_or(false)
    }
}
