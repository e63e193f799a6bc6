//! Wire format for the secure IPC channel.
//!
//! Every message on the transport is a single protobuf-encoded [`v1::FrameV1`]:
//! an integer discriminant plus a map of fixed byte-valued keys. The frame
//! carries no routing data; reply addresses belong to the transport.

#![forbid(unsafe_code)]

pub mod v1;
pub mod validation;

#[cfg(test)]
mod proptests;
