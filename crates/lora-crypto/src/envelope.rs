//! Authenticated message envelopes.
//!
//! An envelope is the unit carried in one radio packet: a JSON payload
//! (`message`, `timestamp`, `metadata`) sealed with AES-256-GCM.
//!
//! ```text
//! [12 bytes: nonce] [16 bytes: auth tag] [ciphertext]
//! ```

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use lora_common::helpers::now_secs;
use lora_common::Metadata;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::key::EnvelopeKey;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Bytes added to every payload: nonce plus tag.
pub const ENVELOPE_OVERHEAD: usize = NONCE_LEN + TAG_LEN;

/// Envelope errors.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("payload serialization failed: {0}")]
    Serialization(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl From<EnvelopeError> for lora_common::Error {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::Decryption(msg) => Self::Decryption(msg),
            EnvelopeError::Serialization(msg) => Self::Serialization(msg),
            other => Self::Crypto(other.to_string()),
        }
    }
}

/// Plaintext carried inside an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub message: String,
    /// Sender clock at encryption time, Unix seconds
    pub timestamp: i64,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Encrypts and decrypts envelopes under one shared key.
pub struct SecureEnvelope {
    key: EnvelopeKey,
    cipher: Aes256Gcm,
}

impl SecureEnvelope {
    pub fn new(key: EnvelopeKey) -> Self {
        let cipher = Aes256Gcm::new(key.as_bytes().into());
        Self { key, cipher }
    }

    /// Derive the key from a shared password (PBKDF2-HMAC-SHA256).
    pub fn from_password(password: &str) -> Result<Self, EnvelopeError> {
        Ok(Self::new(EnvelopeKey::from_password(password)?))
    }

    /// Use a fresh random key.
    pub fn from_random_key() -> Self {
        Self::new(EnvelopeKey::generate())
    }

    /// Use existing raw key bytes (must be 32 bytes).
    pub fn from_raw_key(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(Self::new(EnvelopeKey::from_slice(bytes)?))
    }

    /// Import a key exported with [`SecureEnvelope::export_key`].
    pub fn import_key(encoded: &str) -> Result<Self, EnvelopeError> {
        Ok(Self::new(EnvelopeKey::from_base64(encoded)?))
    }

    pub fn export_key(&self) -> String {
        self.key.to_base64()
    }

    pub fn fingerprint(&self) -> String {
        self.key.fingerprint()
    }

    pub fn key(&self) -> &EnvelopeKey {
        &self.key
    }

    /// Seal a message and its metadata, stamped with the current time.
    pub fn encrypt(&self, plaintext: &str, metadata: &Metadata) -> Result<Vec<u8>, EnvelopeError> {
        self.encrypt_payload(&Payload {
            message: plaintext.to_string(),
            timestamp: now_secs(),
            metadata: metadata.clone(),
        })
    }

    /// Seal an already-built payload.
    ///
    /// A new random nonce is drawn for every call.
    pub fn encrypt_payload(&self, payload: &Payload) -> Result<Vec<u8>, EnvelopeError> {
        let mut buffer =
            serde_json::to_vec(payload).map_err(|e| EnvelopeError::Serialization(e.to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut buffer)
            .map_err(|e| EnvelopeError::Encryption(e.to_string()))?;

        let mut envelope = Vec::with_capacity(ENVELOPE_OVERHEAD + buffer.len());
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&tag);
        envelope.extend_from_slice(&buffer);
        Ok(envelope)
    }

    /// Open an envelope, returning the message and its metadata.
    pub fn decrypt(&self, envelope: &[u8]) -> Result<(String, Metadata), EnvelopeError> {
        let payload = self.decrypt_payload(envelope)?;
        Ok((payload.message, payload.metadata))
    }

    /// Open an envelope, returning the full payload including the sender
    /// timestamp.
    ///
    /// Nothing is returned unless the tag verifies.
    pub fn decrypt_payload(&self, envelope: &[u8]) -> Result<Payload, EnvelopeError> {
        if envelope.len() < ENVELOPE_OVERHEAD {
            return Err(EnvelopeError::Decryption(format!(
                "envelope too short: {} bytes, need at least {}",
                envelope.len(),
                ENVELOPE_OVERHEAD
            )));
        }

        let (nonce, rest) = envelope.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let mut buffer = ciphertext.to_vec();
        self.cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(nonce),
                b"",
                &mut buffer,
                Tag::from_slice(tag),
            )
            .map_err(|_| EnvelopeError::Decryption("authentication failed".to_string()))?;

        serde_json::from_slice(&buffer).map_err(|e| EnvelopeError::Decryption(e.to_string()))
    }
}
