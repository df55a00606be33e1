//! Cryptographic primitives for the LoRa secure link.
//!
//! This crate provides:
//! - 32-byte symmetric keys (password-derived, random, or imported)
//! - AES-256-GCM envelopes carrying a message, a timestamp and metadata
//! - A freshness/replay validator for the receive path
//!
//! # Wire Format
//!
//! ```text
//! [12 bytes: nonce] [16 bytes: auth tag] [ciphertext]
//! ```
//!
//! Every envelope uses a fresh random nonce. Both ends share one key, so
//! there is no per-direction counter to keep in sync; over a lossy radio
//! link any packet can be decrypted on its own.

#![forbid(unsafe_code)]

pub mod envelope;
pub mod key;
pub mod password;
pub mod replay;

pub use envelope::{EnvelopeError, Payload, SecureEnvelope, ENVELOPE_OVERHEAD, NONCE_LEN, TAG_LEN};
pub use key::EnvelopeKey;
pub use password::generate_password;
pub use replay::{Rejection, ReplayValidator, SharedValidator};
