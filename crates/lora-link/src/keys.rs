use std::sync::{Arc, RwLock};

use lora_crypto::SecureEnvelope;

/// The active envelope, shared between the send path and the listener.
///
/// Replacing the key is atomic with respect to readers: a packet is either
/// handled entirely with the old envelope or entirely with the new one.
#[derive(Clone, Default)]
pub struct KeyStore {
    inner: Arc<RwLock<Option<Arc<SecureEnvelope>>>>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `envelope` as the active key, replacing any previous one.
    pub fn install(&self, envelope: SecureEnvelope) -> Arc<SecureEnvelope> {
        let envelope = Arc::new(envelope);
        match self.inner.write() {
            Ok(mut slot) => *slot = Some(envelope.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(envelope.clone()),
        }
        envelope
    }

    pub fn current(&self) -> Option<Arc<SecureEnvelope>> {
        match self.inner.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_set(&self) -> bool {
        self.current().is_some()
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.current() {
            Some(envelope) => write!(f, "KeyStore({})", envelope.fingerprint()),
            None => write!(f, "KeyStore(empty)"),
        }
    }
}
