//! Session layer for the LoRa secure link.
//!
//! A [`LinkSession`] owns a sender and a receiver radio, the active
//! envelope key and a replay validator. Outgoing messages are wrapped and
//! transmitted synchronously; incoming packets are handled by a background
//! [`Listener`] that publishes [`LinkEvent`]s on a channel.
//!
//! ```text
//! send_message ──▶ SecureEnvelope::encrypt ──▶ sender radio ~~~ air ~~~
//!                                                                    │
//! events ◀── ReplayValidator ◀── SecureEnvelope::decrypt ◀── receiver radio
//! ```
//!
//! [`LinkEvent`]: lora_common::LinkEvent

#![forbid(unsafe_code)]

pub mod keys;
pub mod listener;
pub mod session;

pub use keys::KeyStore;
pub use listener::{Listener, ReceivePipeline};
pub use session::{CryptoInit, LinkSession, LinkStatus};
