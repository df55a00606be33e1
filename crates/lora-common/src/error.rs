//! Common error types for the LoRa secure link.

use thiserror::Error;

/// Result type alias using the link's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for link operations.
///
/// Connection and command failures abort the operation that raised them.
/// Decryption failures and validation rejections concern one message and are
/// never fatal. Silence from a module is not an error at all.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial device, config file, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Opening or configuring a radio module failed
    #[error("connection error: {0}")]
    Connection(String),

    /// The module answered a command with `ERROR` or garbage
    #[error("command error: {0}")]
    Command(String),

    /// Operation requires a connected device
    #[error("not connected: {0}")]
    NotConnected(String),

    /// Key handling or encryption failed
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Envelope was malformed or failed authentication
    #[error("decryption error: {0}")]
    Decryption(String),

    /// Message was stale or replayed
    #[error("validation rejected: {0}")]
    ValidationRejected(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The radio did not accept a packet for transmission
    #[error("transmit failed: {0}")]
    Transmit(String),

    /// Caller supplied an unusable argument
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a connection error from any displayable type.
    pub fn connection(msg: impl std::fmt::Display) -> Self {
        Self::Connection(msg.to_string())
    }

    /// Create a command error from any displayable type.
    pub fn command(msg: impl std::fmt::Display) -> Self {
        Self::Command(msg.to_string())
    }

    /// Create a not-connected error from any displayable type.
    pub fn not_connected(msg: impl std::fmt::Display) -> Self {
        Self::NotConnected(msg.to_string())
    }

    /// Create a crypto error from any displayable type.
    pub fn crypto(msg: impl std::fmt::Display) -> Self {
        Self::Crypto(msg.to_string())
    }

    /// Create a decryption error from any displayable type.
    pub fn decryption(msg: impl std::fmt::Display) -> Self {
        Self::Decryption(msg.to_string())
    }

    /// Create a serialization error from any displayable type.
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Create a transmit error from any displayable type.
    pub fn transmit(msg: impl std::fmt::Display) -> Self {
        Self::Transmit(msg.to_string())
    }

    /// Create an invalid input error from any displayable type.
    pub fn invalid_input(msg: impl std::fmt::Display) -> Self {
        Self::InvalidInput(msg.to_string())
    }

    /// Create an internal error from any displayable type.
    pub fn internal(msg: impl std::fmt::Display) -> Self {
        Self::Internal(msg.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::command("+AT: ERROR(-1)");
        assert_eq!(err.to_string(), "command error: +AT: ERROR(-1)");
    }
}
