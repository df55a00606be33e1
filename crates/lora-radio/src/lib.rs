//! Transport driver for LoRa radio modules.
//!
//! This crate provides:
//! - The [`Radio`] capability interface used by the link layer
//! - [`AtRadio`], a driver for modules speaking the LoRa-E5 `AT+TEST` dialect
//! - [`SerialChannel`]/[`PortOpener`] seams over the `serialport` crate
//! - A simulated modem and air link for tests and dry runs
//!
//! # Design
//!
//! The serial line is half-duplex: a command is written, one response line
//! is read back. Each driver owns its channel behind a mutex so only one
//! command is ever in flight per module. Every read is bounded by a timeout.
//!
//! ```text
//! AT                                  -> +AT: OK
//! AT+MODE=TEST                        -> +MODE: TEST
//! AT+TEST=rfcfg,865.125,sf7,...       -> +TEST: RFCFG ...
//! AT+TEST=TXLRPKT,"48656C6C6F"        -> +TEST: TX DONE
//! AT+TEST=RXLRPKT                     -> +TEST: RXLRPKT
//!                                        +TEST: LEN:5, RSSI:-41, SNR:9
//!                                        +TEST: RX "48656C6C6F"
//! ```

#![forbid(unsafe_code)]

pub mod at;
pub mod channel;
pub mod error;
pub mod sim;

pub use at::AtRadio;
pub use channel::{PortOpener, SerialChannel, SystemPorts};
pub use error::RadioError;
pub use sim::{AirLink, SimulatedModem};

use lora_common::SignalInfo;
use std::time::Duration;

/// Connection lifecycle of a radio module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    Disconnected,
    Connecting,
    Connected,
}

/// Packet-level capabilities of a radio module.
///
/// One implementation per chipset. All methods take `&self` so a module can
/// be shared between the send path and its listener.
pub trait Radio: Send + Sync {
    /// Open the serial port and bring the module into packet mode.
    fn connect(&self, port: &str, baud_rate: u32, timeout: Duration) -> Result<(), RadioError>;

    /// Close the port. Calling this on a closed radio does nothing.
    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Transmit one packet. Best effort: failures are logged and reported
    /// as `false`.
    fn send_packet(&self, data: &[u8]) -> bool;

    /// Wait up to `timeout` for one packet.
    ///
    /// Returns an empty vector when nothing arrived. Errors are reserved for
    /// transport failures and the module refusing receive mode.
    fn receive_packet(&self, timeout: Duration) -> Result<Vec<u8>, RadioError>;

    /// Signal quality of the most recent reception.
    fn signal_info(&self) -> SignalInfo;

    /// Soft-reset the module.
    fn reset(&self) -> Result<(), RadioError>;
}
