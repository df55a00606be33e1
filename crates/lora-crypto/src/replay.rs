//! Freshness and replay protection for received messages.
//!
//! Radio envelopes carry no sequence number, so replays are detected by
//! remembering what was already accepted:
//!
//! - Messages whose `timestamp` metadata is missing, zero, older than
//!   `max_age`, or more than `max_age` ahead of the local clock are rejected
//! - Each accepted message records SHA-256(message ‖ timestamp)
//! - A message whose hash was already recorded is rejected
//! - Once more than `max_entries` hashes are held, the whole set is cleared
//!
//! The wholesale clear bounds memory at the cost of forgetting: a capture
//! older than the last clear but younger than `max_age` is accepted again.
//!
//! # Thread Safety
//!
//! `ReplayValidator` is NOT thread-safe. Use [`SharedValidator`] when more
//! than one receiver checks against the same history.

use lora_common::helpers::now_secs;
use lora_common::Metadata;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Why a message was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// No usable `timestamp` in the metadata
    MissingTimestamp,
    /// Older than the age limit
    Stale { age: i64 },
    /// Too far ahead of the local clock, or unrepresentably far away
    OutOfWindow,
    /// Already accepted once
    Replayed,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingTimestamp => write!(f, "missing timestamp"),
            Self::Stale { age } => write!(f, "stale message ({age}s old)"),
            Self::OutOfWindow => write!(f, "timestamp outside the accepted window"),
            Self::Replayed => write!(f, "replayed message"),
        }
    }
}

impl From<Rejection> for lora_common::Error {
    fn from(rejection: Rejection) -> Self {
        Self::ValidationRejected(rejection.to_string())
    }
}

/// Replay and staleness filter for inbound messages.
#[derive(Debug, Clone)]
pub struct ReplayValidator {
    /// Hex digests of accepted (message, timestamp) pairs
    seen: HashSet<String>,
    /// Maximum message age in seconds
    max_age: i64,
    /// Set size that triggers a clear
    max_entries: usize,
}

impl Default for ReplayValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayValidator {
    /// Default maximum age: 5 minutes
    pub const DEFAULT_MAX_AGE_SECS: i64 = 300;

    /// Default history size: 1000 messages
    pub const DEFAULT_MAX_ENTRIES: usize = 1000;

    pub fn new() -> Self {
        Self::with_limits(Self::DEFAULT_MAX_AGE_SECS, Self::DEFAULT_MAX_ENTRIES)
    }

    /// Create a validator with a custom age limit and history size.
    ///
    /// # Panics
    /// Panics if `max_entries` is 0.
    pub fn with_limits(max_age: i64, max_entries: usize) -> Self {
        assert!(max_entries > 0, "max_entries must be non-zero");
        Self {
            seen: HashSet::new(),
            max_age,
            max_entries,
        }
    }

    /// Check a decrypted message against the current clock.
    ///
    /// Returns true and records the message if it is fresh and unseen.
    pub fn validate(&mut self, message: &str, metadata: &Metadata) -> bool {
        self.validate_at(message, metadata, now_secs())
    }

    /// Same as [`ReplayValidator::validate`] with an explicit clock.
    pub fn validate_at(&mut self, message: &str, metadata: &Metadata, now: i64) -> bool {
        self.check_at(message, metadata, now).is_ok()
    }

    /// Like [`ReplayValidator::validate_at`], reporting why a message was
    /// refused.
    pub fn check_at(
        &mut self,
        message: &str,
        metadata: &Metadata,
        now: i64,
    ) -> Result<(), Rejection> {
        let timestamp = match metadata.get("timestamp").and_then(|v| v.as_i64()) {
            Some(ts) if ts != 0 => ts,
            _ => return Err(Rejection::MissingTimestamp),
        };

        // Timestamps come from the sender; the difference can overflow.
        let age = now.checked_sub(timestamp).ok_or(Rejection::OutOfWindow)?;
        if age > self.max_age {
            return Err(Rejection::Stale { age });
        }
        if age < -self.max_age {
            return Err(Rejection::OutOfWindow);
        }

        let hash = message_hash(message, timestamp);
        if self.seen.contains(&hash) {
            return Err(Rejection::Replayed);
        }

        self.seen.insert(hash);

        if self.seen.len() > self.max_entries {
            debug!(entries = self.seen.len(), "replay history full, clearing");
            self.seen.clear();
        }

        Ok(())
    }

    /// Number of remembered messages.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// SHA-256 over the message text followed by the decimal timestamp.
fn message_hash(message: &str, timestamp: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message.as_bytes());
    hasher.update(timestamp.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Validator shared between several receive loops.
#[derive(Debug, Clone, Default)]
pub struct SharedValidator {
    inner: Arc<Mutex<ReplayValidator>>,
}

impl SharedValidator {
    pub fn new(validator: ReplayValidator) -> Self {
        Self {
            inner: Arc::new(Mutex::new(validator)),
        }
    }

    pub fn validate(&self, message: &str, metadata: &Metadata) -> bool {
        self.validate_at(message, metadata, now_secs())
    }

    pub fn validate_at(&self, message: &str, metadata: &Metadata, now: i64) -> bool {
        self.check_at(message, metadata, now).is_ok()
    }

    pub fn check(&self, message: &str, metadata: &Metadata) -> Result<(), Rejection> {
        self.check_at(message, metadata, now_secs())
    }

    pub fn check_at(&self, message: &str, metadata: &Metadata, now: i64) -> Result<(), Rejection> {
        self.lock().check_at(message, metadata, now)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A poisoned lock still holds a consistent set: every mutation is a
    // single insert or clear.
    fn lock(&self) -> MutexGuard<'_, ReplayValidator> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
