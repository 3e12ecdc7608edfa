//! Cryptographic operations for Cadence.
//!
//! - `cipher`: AES-256-GCM encryption for variable values at rest

pub mod cipher;

pub use cipher::{CipherError, ValueCipher};
