//! Symmetric link keys.
//!
//! Both endpoints of a link hold the same 32-byte key. It can be derived
//! from a shared password, generated randomly, or moved between machines as
//! a base64 string.
//!
//! # Example
//!
//! ```
//! use lora_crypto::key::EnvelopeKey;
//!
//! let key = EnvelopeKey::from_password("correct horse").unwrap();
//! let exported = key.to_base64();
//!
//! let imported = EnvelopeKey::from_base64(&exported).unwrap();
//! assert_eq!(key.fingerprint(), imported.fingerprint());
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::Hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::envelope::EnvelopeError;

/// Key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// Salt used for password derivation.
///
/// Every deployed module derives its key with this salt, so changing it
/// breaks interoperability with existing devices.
pub const DEFAULT_SALT: &[u8] = b"lora_secure_salt_2024";

/// PBKDF2-HMAC-SHA256 iteration count.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Number of hex characters in a key fingerprint.
pub const FINGERPRINT_LEN: usize = 16;

/// 256-bit symmetric key, zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EnvelopeKey([u8; KEY_LEN]);

impl EnvelopeKey {
    /// Derive a key from a password with the fixed link salt.
    pub fn from_password(password: &str) -> Result<Self, EnvelopeError> {
        Self::from_password_with_salt(password, DEFAULT_SALT)
    }

    /// Derive a key from a password and an installation-specific salt.
    pub fn from_password_with_salt(password: &str, salt: &[u8]) -> Result<Self, EnvelopeError> {
        let mut key = [0u8; KEY_LEN];
        pbkdf2::pbkdf2::<Hmac<Sha256>>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key)
            .map_err(|e| EnvelopeError::InvalidKey(format!("key derivation failed: {e}")))?;
        Ok(Self(key))
    }

    /// Generate a new random key using the OS CSPRNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Create from raw key bytes. The slice must be exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            EnvelopeError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a key exported with [`EnvelopeKey::to_base64`].
    pub fn from_base64(encoded: &str) -> Result<Self, EnvelopeError> {
        let mut bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| EnvelopeError::InvalidKey(format!("invalid base64: {e}")))?;
        let key = Self::from_slice(&bytes);
        bytes.zeroize();
        key
    }

    /// Export the raw key as standard base64.
    ///
    /// # Security
    /// The output is the secret itself.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Short, non-secret identifier: the first 16 hex characters of
    /// SHA-256(key). For display and comparison only.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        let mut hex = hex::encode(digest);
        hex.truncate(FINGERPRINT_LEN);
        hex
    }
}

impl fmt::Debug for EnvelopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvelopeKey({})", self.fingerprint())
    }
}
