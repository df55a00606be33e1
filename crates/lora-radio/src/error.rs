use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum RadioError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("command failed: {0}")]
    Command(String),

    #[error("radio not connected")]
    NotConnected,

    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RadioError> for lora_common::Error {
    fn from(err: RadioError) -> Self {
        match err {
            RadioError::Connection(msg) => Self::Connection(msg),
            RadioError::Command(msg) => Self::Command(msg),
            RadioError::NotConnected => Self::not_connected("radio"),
            RadioError::Io(e) => Self::Io(e),
        }
    }
}
