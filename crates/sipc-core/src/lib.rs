//! SIPC Core - handshake and secure messaging over opaque message transports.
//!
//! This crate implements:
//! - Protocol message codec over the v1 wire frame
//! - Handshake state machines (initiator and responder)
//! - Secure channels with per-frame dispositions
//! - Channel runtimes with per-peer serialization
//! - In-process and TCP transports

#![forbid(unsafe_code)]

// Protocol
pub mod message;
pub mod handshake;

// Channels and runtimes
pub mod channel;
pub mod dispatch;

// Transports
pub mod transport;
pub mod framing;

#[cfg(feature = "tcp")]
pub mod tcp;

// Supporting modules
pub mod errors;
pub mod harness;

#[cfg(test)]
mod proptests;

pub use channel::{
    Disposition, DropReason, EchoHandler, HandlerError, InitiatorChannel, RequestHandler,
    ResponderChannel, DEFAULT_RESPONSE_PREFIX,
};
pub use dispatch::{DispatchStats, DispatchStatsSnapshot, Initiator, InitiatorHandle, Responder};
pub use errors::{CoreError, HandshakeError};
pub use handshake::ChannelState;
pub use message::{DecodeError, ProtocolMessage};
pub use transport::{Address, Inbound, LocalBus, MessageTransport, TransportError, TransportEvent};
