use std::sync::Arc;
use std::thread;

use lora_common::helpers::now_secs;
use lora_common::{Error, LinkConfig, LinkEvent, MessageRecord, Metadata, Result};
use lora_crypto::{generate_password, ReplayValidator, SecureEnvelope, SharedValidator};
use lora_radio::{AtRadio, PortOpener, Radio, SystemPorts};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::keys::KeyStore;
use crate::listener::{Listener, ReceivePipeline};

const GENERATED_PASSWORD_LEN: usize = lora_crypto::password::DEFAULT_PASSWORD_LEN;

/// Snapshot of what the session currently has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    pub sender_connected: bool,
    pub receiver_connected: bool,
    pub crypto_initialized: bool,
    pub listening: bool,
}

/// Result of [`LinkSession::init_crypto`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CryptoInit {
    pub fingerprint: String,
    /// Set when no password was supplied and one was generated. Both ends
    /// need it to derive the same key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_password: Option<String>,
}

/// A sender/receiver radio pair with a shared key.
pub struct LinkSession {
    config: LinkConfig,
    opener: Arc<dyn PortOpener>,
    sender: Option<Arc<dyn Radio>>,
    receiver: Option<Arc<dyn Radio>>,
    keys: KeyStore,
    validator: SharedValidator,
    listener: Option<Listener>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl LinkSession {
    /// Create a session that opens real serial ports.
    ///
    /// Received messages and receive failures arrive on the returned channel.
    pub fn new(config: LinkConfig) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        Self::with_opener(config, Arc::new(SystemPorts))
    }

    /// Create a session that opens ports through `opener`.
    pub fn with_opener(
        config: LinkConfig,
        opener: Arc<dyn PortOpener>,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let session = Self {
            config,
            opener,
            sender: None,
            receiver: None,
            keys: KeyStore::new(),
            validator: SharedValidator::new(ReplayValidator::new()),
            listener: None,
            events,
        };
        (session, rx)
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Open both radios and start listening on the receiver.
    ///
    /// Any previous connection is torn down first. If the receiver cannot be
    /// opened the already-opened sender is closed again.
    pub fn connect(&mut self, sender_port: &str, receiver_port: &str) -> Result<()> {
        self.disconnect();

        let baud_rate = self.config.baud_rate;
        let timeout = self.config.connect_timeout();

        let sender = Arc::new(AtRadio::with_opener(
            self.config.radio.clone(),
            self.opener.clone(),
        ));
        sender
            .connect(sender_port, baud_rate, timeout)
            .map_err(|e| Error::connection(format!("sender on {sender_port}: {e}")))?;

        let receiver = Arc::new(AtRadio::with_opener(
            self.config.radio.clone(),
            self.opener.clone(),
        ));
        if let Err(e) = receiver.connect(receiver_port, baud_rate, timeout) {
            sender.disconnect();
            return Err(Error::connection(format!(
                "receiver on {receiver_port}: {e}"
            )));
        }

        info!(sender = sender_port, receiver = receiver_port, "radios connected");
        self.attach(sender, receiver)
    }

    /// Use radios that are already connected, then start listening.
    pub fn attach(&mut self, sender: Arc<dyn Radio>, receiver: Arc<dyn Radio>) -> Result<()> {
        self.stop_listening();
        self.sender = Some(sender);
        self.receiver = Some(receiver);
        self.start_listening()
    }

    /// Start the receive loop if it is not already running.
    pub fn start_listening(&mut self) -> Result<()> {
        if self.listener.as_ref().is_some_and(Listener::is_running) {
            return Ok(());
        }
        let receiver = match &self.receiver {
            Some(radio) if radio.is_connected() => radio.clone(),
            _ => return Err(Error::not_connected("receiver radio")),
        };

        let pipeline = ReceivePipeline {
            radio: receiver,
            keys: self.keys.clone(),
            validator: self.validator.clone(),
            poll_timeout: self.config.poll_timeout(),
            retry_delay: self.config.retry_delay(),
        };
        self.listener = Some(Listener::spawn(pipeline, self.events.clone())?);
        Ok(())
    }

    pub fn stop_listening(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            listener.stop();
        }
    }

    /// Install a key derived from `password`, or from a freshly generated
    /// password when none is given.
    pub fn init_crypto(&self, password: Option<&str>) -> Result<CryptoInit> {
        let (password, generated_password) = match password.filter(|p| !p.is_empty()) {
            Some(password) => (password.to_string(), None),
            None => {
                let generated = generate_password(GENERATED_PASSWORD_LEN);
                (generated.clone(), Some(generated))
            }
        };

        let envelope = self.keys.install(SecureEnvelope::from_password(&password)?);
        let fingerprint = envelope.fingerprint();
        info!(
            fingerprint = %fingerprint,
            generated = generated_password.is_some(),
            "encryption initialized"
        );

        Ok(CryptoInit {
            fingerprint,
            generated_password,
        })
    }

    /// Install a base64-encoded key, returning its fingerprint.
    ///
    /// A malformed key leaves the current one in place.
    pub fn import_key(&self, encoded: &str) -> Result<String> {
        let envelope = SecureEnvelope::import_key(encoded.trim())?;
        let envelope = self.keys.install(envelope);
        let fingerprint = envelope.fingerprint();
        info!(fingerprint = %fingerprint, "key imported");
        Ok(fingerprint)
    }

    /// The active key as base64 together with its fingerprint.
    pub fn export_key(&self) -> Result<(String, String)> {
        let envelope = self.active_envelope()?;
        Ok((envelope.export_key(), envelope.fingerprint()))
    }

    pub fn fingerprint(&self) -> Option<String> {
        self.keys.current().map(|e| e.fingerprint())
    }

    /// Encrypt and transmit one message on the sender radio.
    pub fn send_message(&self, text: &str, priority: &str) -> Result<MessageRecord> {
        let sender = match &self.sender {
            Some(radio) if radio.is_connected() => radio,
            _ => return Err(Error::not_connected("sender radio")),
        };
        let envelope = self.active_envelope()?;
        if text.is_empty() {
            return Err(Error::invalid_input("message is empty"));
        }

        let mut metadata = Metadata::new();
        metadata.insert("sender".into(), self.config.sender_name.clone().into());
        metadata.insert("priority".into(), priority.into());
        metadata.insert("timestamp".into(), now_secs().into());

        let packet = envelope.encrypt(text, &metadata)?;
        if !sender.send_packet(&packet) {
            return Err(Error::transmit(format!(
                "radio rejected {} byte packet",
                packet.len()
            )));
        }

        info!(len = packet.len(), priority, "message sent");
        Ok(MessageRecord::sent(text, metadata, packet.len()))
    }

    pub fn status(&self) -> LinkStatus {
        LinkStatus {
            sender_connected: self.sender.as_ref().is_some_and(|r| r.is_connected()),
            receiver_connected: self.receiver.as_ref().is_some_and(|r| r.is_connected()),
            crypto_initialized: self.keys.is_set(),
            listening: self.listener.as_ref().is_some_and(Listener::is_running),
        }
    }

    /// Stop listening, reset both modules and close their ports.
    pub fn disconnect(&mut self) {
        self.stop_listening();

        let radios = [self.sender.take(), self.receiver.take()];
        let mut any_reset = false;
        for radio in radios.iter().flatten().filter(|r| r.is_connected()) {
            if let Err(e) = radio.reset() {
                warn!(error = %e, "reset before disconnect failed");
            }
            any_reset = true;
        }
        if any_reset {
            thread::sleep(self.config.reset_settle());
        }
        for radio in radios.iter().flatten() {
            radio.disconnect();
        }
        if any_reset {
            info!("radios disconnected");
        }
    }

    fn active_envelope(&self) -> Result<Arc<SecureEnvelope>> {
        self.keys
            .current()
            .ok_or_else(|| Error::crypto("encryption not initialized"))
    }
}

impl Drop for LinkSession {
    fn drop(&mut self) {
        self.stop_listening();
    }
}
