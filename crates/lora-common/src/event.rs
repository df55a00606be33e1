use serde::{Deserialize, Serialize};

/// Free-form message metadata carried inside the encrypted payload.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Radio signal quality for a received packet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalInfo {
    /// Received signal strength in dBm
    pub rssi: i32,
    /// Signal-to-noise ratio in dB
    pub snr: f32,
    pub frequency_mhz: f64,
    /// False when no receive notification has been parsed yet and the
    /// values are placeholders.
    pub measured: bool,
}

impl SignalInfo {
    pub const PLACEHOLDER_RSSI: i32 = -50;
    pub const PLACEHOLDER_SNR: f32 = 10.0;

    /// Placeholder values reported before the first packet arrives.
    pub fn placeholder(frequency_mhz: f64) -> Self {
        Self {
            rssi: Self::PLACEHOLDER_RSSI,
            snr: Self::PLACEHOLDER_SNR,
            frequency_mhz,
            measured: false,
        }
    }
}

/// Event emitted by the receive pipeline to whatever consumes it
/// (API layer, history store, CLI printer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkEvent {
    MessageReceived {
        message: String,
        metadata: Metadata,
        encrypted_size: usize,
        signal: Option<SignalInfo>,
    },
    DecryptFailed {
        reason: String,
    },
    TransportError {
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Sent,
    Received,
}

/// One entry of message history, in the shape the API layer stores and
/// pushes to its clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message: String,
    pub direction: Direction,
    /// Local wall-clock time the record was created (RFC 3339)
    pub timestamp: String,
    pub metadata: Metadata,
    pub encrypted_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_info: Option<SignalInfo>,
}

impl MessageRecord {
    pub fn sent(message: impl Into<String>, metadata: Metadata, encrypted_size: usize) -> Self {
        Self {
            message: message.into(),
            direction: Direction::Sent,
            timestamp: chrono::Local::now().to_rfc3339(),
            metadata,
            encrypted_size,
            signal_info: None,
        }
    }

    /// Build a history record from a `MessageReceived` event.
    ///
    /// Returns `None` for the failure events, which are not history entries.
    pub fn from_event(event: &LinkEvent) -> Option<Self> {
        match event {
            LinkEvent::MessageReceived {
                message,
                metadata,
                encrypted_size,
                signal,
            } => Some(Self {
                message: message.clone(),
                direction: Direction::Received,
                timestamp: chrono::Local::now().to_rfc3339(),
                metadata: metadata.clone(),
                encrypted_size: *encrypted_size,
                signal_info: *signal,
            }),
            LinkEvent::DecryptFailed { .. } | LinkEvent::TransportError { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_json_shape() {
        let event = LinkEvent::DecryptFailed {
            reason: "tag mismatch".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"type": "decrypt_failed", "reason": "tag mismatch"}));
    }

    #[test]
    fn test_record_from_received_event() {
        let mut metadata = Metadata::new();
        metadata.insert("priority".into(), json!("high"));
        let event = LinkEvent::MessageReceived {
            message: "hello".into(),
            metadata: metadata.clone(),
            encrypted_size: 77,
            signal: Some(SignalInfo::placeholder(865.125)),
        };

        let record = MessageRecord::from_event(&event).unwrap();
        assert_eq!(record.direction, Direction::Received);
        assert_eq!(record.message, "hello");
        assert_eq!(record.metadata, metadata);
        assert_eq!(record.encrypted_size, 77);
        assert_eq!(record.signal_info.map(|s| s.rssi), Some(-50));
        assert!(chrono::DateTime::parse_from_rfc3339(&record.timestamp).is_ok());

        let failure = LinkEvent::TransportError {
            reason: "port closed".into(),
        };
        assert!(MessageRecord::from_event(&failure).is_none());
    }

    #[test]
    fn test_sent_record_omits_signal() {
        let record = MessageRecord::sent("hi", Metadata::new(), 40);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["direction"], "sent");
        assert!(value.get("signal_info").is_none());
    }
}
