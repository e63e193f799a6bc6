//! SIPC Service - the responder daemon.
//!
//! Holds the long-lived RSA identity, accepts initiators over TCP and answers
//! their secure requests with an echo-style handler.

pub mod config;
pub mod service;
