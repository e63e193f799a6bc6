//! SIPC Client - the initiator side.
//!
//! Connects to a responder over TCP, completes the handshake and turns
//! console lines into secure messages.

pub mod config;
pub mod console;
