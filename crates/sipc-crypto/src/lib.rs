#![forbid(unsafe_code)]

pub mod hash;
pub mod keystore;
pub mod identity;
pub mod aead;

#[cfg(test)]
pub(crate) mod testutil;

#[cfg(test)]
mod proptests;
