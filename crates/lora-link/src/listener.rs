//! Background receive loop.
//!
//! The loop runs on a dedicated OS thread because every radio call blocks on
//! the serial line. Results are published on an unbounded tokio channel so
//! async consumers can await them while synchronous ones poll.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use lora_common::{Error, LinkEvent, Result};
use lora_crypto::SharedValidator;
use lora_radio::Radio;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::keys::KeyStore;

/// Everything one receive iteration needs.
pub struct ReceivePipeline {
    pub radio: Arc<dyn Radio>,
    pub keys: KeyStore,
    pub validator: SharedValidator,
    pub poll_timeout: Duration,
    pub retry_delay: Duration,
}

impl ReceivePipeline {
    /// Turn one raw packet into an event.
    ///
    /// `None` means the packet was dropped silently: no key is installed or
    /// the validator rejected it as stale or replayed.
    pub fn process_packet(&self, packet: &[u8]) -> Option<LinkEvent> {
        let Some(envelope) = self.keys.current() else {
            warn!(len = packet.len(), "packet received before encryption was initialized");
            return None;
        };

        let (message, metadata) = match envelope.decrypt(packet) {
            Ok(opened) => opened,
            Err(e) => {
                warn!(len = packet.len(), error = %e, "failed to open envelope");
                return Some(LinkEvent::DecryptFailed {
                    reason: e.to_string(),
                });
            }
        };

        if let Err(rejection) = self.validator.check(&message, &metadata) {
            let reason = Error::from(rejection);
            debug!(len = packet.len(), reason = %reason, "message dropped");
            return None;
        }

        let signal = self.radio.signal_info();
        info!(
            len = packet.len(),
            rssi = signal.rssi,
            snr = signal.snr,
            "message received"
        );
        Some(LinkEvent::MessageReceived {
            message,
            metadata,
            encrypted_size: packet.len(),
            signal: Some(signal),
        })
    }

    fn run(self, running: Arc<AtomicBool>, events: mpsc::UnboundedSender<LinkEvent>) {
        info!("listener started");
        while running.load(Ordering::Acquire) && self.radio.is_connected() {
            let event = match self.radio.receive_packet(self.poll_timeout) {
                Ok(packet) if packet.is_empty() => continue,
                Ok(packet) => self.process_packet(&packet),
                Err(e) => {
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                    warn!(error = %e, "receive failed, retrying");
                    let _ = events.send(LinkEvent::TransportError {
                        reason: e.to_string(),
                    });
                    thread::sleep(self.retry_delay);
                    continue;
                }
            };

            if let Some(event) = event {
                if events.send(event).is_err() {
                    debug!("event receiver dropped");
                }
            }
        }
        running.store(false, Ordering::Release);
        info!("listener stopped");
    }
}

/// Handle to a running receive loop.
///
/// Dropping the handle stops the loop and joins its thread.
pub struct Listener {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Listener {
    /// Start the loop on its own thread, publishing into `events`.
    pub fn spawn(
        pipeline: ReceivePipeline,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name("lora-listener".into())
            .spawn(move || pipeline.run(flag, events))
            .map_err(|e| Error::internal(format!("failed to spawn listener: {e}")))?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Ask the loop to exit and wait for it.
    ///
    /// The loop notices within one poll timeout.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("listener thread panicked");
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}
