//! Link and radio configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::{Error, Result};

/// RF parameters sent to the module with `AT+TEST=rfcfg`.
///
/// Field order matches the command's positional arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Carrier frequency in MHz
    pub frequency_mhz: f64,
    /// Spreading factor (7-12), rendered as `sf<n>`
    pub spreading_factor: u8,
    /// Bandwidth in kHz
    pub bandwidth_khz: u16,
    pub tx_preamble: u16,
    pub rx_preamble: u16,
    /// Transmit power in dBm
    pub tx_power: i8,
    pub crc: bool,
    pub iq_inverted: bool,
    pub public_network: bool,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            frequency_mhz: 865.125,
            spreading_factor: 7,
            bandwidth_khz: 125,
            tx_preamble: 14,
            rx_preamble: 15,
            tx_power: 14,
            crc: true,
            iq_inverted: false,
            public_network: false,
        }
    }
}

impl RadioConfig {
    /// Render the `AT+TEST=rfcfg,...` configuration command.
    pub fn rfcfg_command(&self) -> String {
        format!(
            "AT+TEST=rfcfg,{},sf{},{},{},{},{},{},{},{}",
            self.frequency_mhz,
            self.spreading_factor,
            self.bandwidth_khz,
            self.tx_preamble,
            self.rx_preamble,
            self.tx_power,
            on_off(self.crc),
            on_off(self.iq_inverted),
            on_off(self.public_network),
        )
    }

    pub fn validate(&self) -> Result<()> {
        if !(7..=12).contains(&self.spreading_factor) {
            return Err(Error::config(format!(
                "spreading factor must be 7-12, got {}",
                self.spreading_factor
            )));
        }
        if !matches!(self.bandwidth_khz, 125 | 250 | 500) {
            return Err(Error::config(format!(
                "bandwidth must be 125, 250 or 500 kHz, got {}",
                self.bandwidth_khz
            )));
        }
        if !self.frequency_mhz.is_finite() || self.frequency_mhz <= 0.0 {
            return Err(Error::config(format!(
                "invalid frequency {}",
                self.frequency_mhz
            )));
        }
        Ok(())
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

/// Settings for one link session (a sender and a receiver module).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub baud_rate: u32,
    /// Serial read timeout used while opening and probing a module
    pub connect_timeout_ms: u64,
    /// How long one listener iteration waits for a packet
    pub poll_timeout_ms: u64,
    /// Back-off after a transport error inside the listener
    pub retry_delay_ms: u64,
    /// Pause after `ATZ` before the port is closed
    pub reset_settle_ms: u64,
    /// Value of the `sender` metadata field on outgoing messages
    pub sender_name: String,
    pub radio: RadioConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            connect_timeout_ms: 1000,
            poll_timeout_ms: 1000,
            retry_delay_ms: 100,
            reset_settle_ms: 500,
            sender_name: "web_interface".to_string(),
            radio: RadioConfig::default(),
        }
    }
}

impl LinkConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
        config.radio.validate()?;
        debug!(path = %path.display(), "loaded link config");
        Ok(config)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rfcfg_command() {
        let cfg = RadioConfig::default();
        assert_eq!(
            cfg.rfcfg_command(),
            "AT+TEST=rfcfg,865.125,sf7,125,14,15,14,on,off,off"
        );
    }

    #[test]
    fn test_custom_rfcfg_command() {
        let cfg = RadioConfig {
            frequency_mhz: 868.0,
            spreading_factor: 12,
            bandwidth_khz: 250,
            crc: false,
            ..RadioConfig::default()
        };
        assert_eq!(
            cfg.rfcfg_command(),
            "AT+TEST=rfcfg,868,sf12,250,14,15,14,off,off,off"
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_sf = RadioConfig {
            spreading_factor: 6,
            ..RadioConfig::default()
        };
        assert!(bad_sf.validate().is_err());

        let bad_bw = RadioConfig {
            bandwidth_khz: 100,
            ..RadioConfig::default()
        };
        assert!(bad_bw.validate().is_err());

        assert!(RadioConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: LinkConfig =
            serde_json::from_str(r#"{"baud_rate": 115200, "radio": {"spreading_factor": 9}}"#)
                .unwrap();
        assert_eq!(cfg.baud_rate, 115200);
        assert_eq!(cfg.radio.spreading_factor, 9);
        assert_eq!(cfg.radio.frequency_mhz, 865.125);
        assert_eq!(cfg.poll_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.sender_name, "web_interface");
    }
}
