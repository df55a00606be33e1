//! Driver for modules controlled through the LoRa-E5 `AT+TEST` dialect.

use lora_common::{RadioConfig, SignalInfo};
use std::io::{self, ErrorKind};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::channel::{PortOpener, SerialChannel, SystemPorts};
use crate::error::RadioError;
use crate::{Radio, RadioState};

/// Timeout for the liveness probe and mode switch while connecting.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Timeout for the RF configuration command while connecting.
pub const CONFIGURE_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause after the initial line terminator so the module's parser settles.
const FLUSH_SETTLE: Duration = Duration::from_millis(50);

const LINE_TERMINATOR: &str = "\r\n";
const ARM_RX_COMMAND: &str = "AT+TEST=RXLRPKT";
const RESET_COMMAND: &str = "ATZ";

/// Marker of an inbound packet notification.
const RX_MARKER: &str = "+TEST: RX";

/// Marker of the notification carrying RSSI/SNR for the next packet.
const LEN_MARKER: &str = "+TEST: LEN";

/// An open serial line with its partially read input.
struct Connection {
    port: String,
    channel: Box<dyn SerialChannel>,
    pending: Vec<u8>,
    command_timeout: Duration,
}

impl Connection {
    fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.channel.write_all(bytes)?;
        self.channel.flush()
    }

    /// Write one command and read one response line.
    ///
    /// A module that stays silent until the deadline yields an empty
    /// response.
    fn command(&mut self, text: &str, timeout: Duration) -> Result<String, RadioError> {
        debug!(port = %self.port, "AT > {}", text);
        self.write_raw(format!("{text}{LINE_TERMINATOR}").as_bytes())?;

        let deadline = Instant::now() + timeout;
        let Some(response) = self.read_line(deadline)? else {
            debug!(port = %self.port, command = text, "no response");
            return Ok(String::new());
        };
        debug!(port = %self.port, "AT < {}", response);

        if response.contains("ERROR") {
            return Err(RadioError::Command(format!("{text}: {response}")));
        }
        Ok(response)
    }

    /// Read one line, without its terminator, or `None` once `deadline`
    /// passes.
    fn read_line(&mut self, deadline: Instant) -> Result<Option<String>, RadioError> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            self.channel.set_timeout(deadline - now)?;
            let mut buf = [0u8; 256];
            match self.channel.read(&mut buf) {
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// AT-command radio driver.
///
/// Owns at most one serial connection. The connection mutex doubles as the
/// half-duplex lock: a command and its response are exchanged while it is
/// held.
pub struct AtRadio {
    config: RadioConfig,
    opener: Arc<dyn PortOpener>,
    link: Mutex<Option<Connection>>,
    state: Mutex<RadioState>,
    /// RSSI and SNR from the latest `+TEST: LEN` notification
    last_signal: Mutex<Option<(i32, f32)>>,
}

impl AtRadio {
    /// Create a driver for real serial devices.
    pub fn new(config: RadioConfig) -> Self {
        Self::with_opener(config, Arc::new(SystemPorts))
    }

    /// Create a driver that opens ports through `opener`.
    pub fn with_opener(config: RadioConfig, opener: Arc<dyn PortOpener>) -> Self {
        Self {
            config,
            opener,
            link: Mutex::new(None),
            state: Mutex::new(RadioState::Disconnected),
            last_signal: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    pub fn state(&self) -> RadioState {
        *lock(&self.state)
    }

    /// Port name of the open connection.
    pub fn port(&self) -> Option<String> {
        lock(&self.link).as_ref().map(|conn| conn.port.clone())
    }

    fn set_state(&self, state: RadioState) {
        *lock(&self.state) = state;
    }

    /// Send one AT command and return the module's response line.
    ///
    /// Fails with `Command` if the response contains `ERROR`. Returns an
    /// empty string if no complete line arrives in time.
    pub fn send_command(&self, text: &str, timeout: Duration) -> Result<String, RadioError> {
        let mut link = lock(&self.link);
        let conn = self.connection(&mut link)?;
        conn.command(text, timeout)
    }

    fn connection<'a>(
        &self,
        link: &'a mut MutexGuard<'_, Option<Connection>>,
    ) -> Result<&'a mut Connection, RadioError> {
        if self.state() != RadioState::Connected {
            return Err(RadioError::NotConnected);
        }
        link.as_mut().ok_or(RadioError::NotConnected)
    }

    /// Run the connect sequence on a channel that is already open.
    ///
    /// Replaces any existing connection.
    pub fn attach(
        &self,
        port: &str,
        channel: Box<dyn SerialChannel>,
        timeout: Duration,
    ) -> Result<(), RadioError> {
        let mut link = lock(&self.link);
        if link.take().is_some() {
            debug!(port, "replacing existing connection");
        }
        self.set_state(RadioState::Connecting);
        self.bring_up(&mut link, port, channel, timeout)
    }

    /// Flush the module's parser, switch it to test mode and apply the RF
    /// configuration. Leaves the radio disconnected on any failure.
    fn bring_up(
        &self,
        link: &mut Option<Connection>,
        port: &str,
        channel: Box<dyn SerialChannel>,
        timeout: Duration,
    ) -> Result<(), RadioError> {
        let mut conn = Connection {
            port: port.to_string(),
            channel,
            pending: Vec::new(),
            command_timeout: timeout,
        };

        // A bare terminator flushes whatever the module's parser holds.
        if let Err(e) = conn.write_raw(LINE_TERMINATOR.as_bytes()) {
            self.set_state(RadioState::Disconnected);
            return Err(RadioError::Connection(format!("failed to write to {port}: {e}")));
        }
        thread::sleep(FLUSH_SETTLE);

        self.set_state(RadioState::Connected);

        let setup = [
            ("AT".to_string(), PROBE_TIMEOUT),
            ("AT+MODE=TEST".to_string(), PROBE_TIMEOUT),
            (self.config.rfcfg_command(), CONFIGURE_TIMEOUT),
        ];
        for (command, step_timeout) in setup {
            if let Err(e) = conn.command(&command, step_timeout) {
                warn!(port, command = %command, error = %e, "radio setup failed");
                self.set_state(RadioState::Disconnected);
                return Err(RadioError::Connection(format!("{command}: {e}")));
            }
        }

        *lock(&self.last_signal) = None;
        *link = Some(conn);
        info!(port, "radio module ready");
        Ok(())
    }

    fn record_signal(&self, line: &str) {
        if let Some(signal) = parse_signal_line(line) {
            *lock(&self.last_signal) = Some(signal);
        }
    }
}

impl Radio for AtRadio {
    fn connect(&self, port: &str, baud_rate: u32, timeout: Duration) -> Result<(), RadioError> {
        let mut link = lock(&self.link);
        if link.take().is_some() {
            debug!(port, "replacing existing connection");
        }

        self.set_state(RadioState::Connecting);
        info!(port, baud_rate, "connecting to radio module");

        let channel = match self.opener.open(port, baud_rate, timeout) {
            Ok(channel) => channel,
            Err(e) => {
                self.set_state(RadioState::Disconnected);
                warn!(port, error = %e, "failed to open serial port");
                return Err(RadioError::Connection(format!("failed to open {port}: {e}")));
            }
        };

        self.bring_up(&mut link, port, channel, timeout)
    }

    fn disconnect(&self) {
        let mut link = lock(&self.link);
        if let Some(conn) = link.take() {
            info!(port = %conn.port, "radio disconnected");
        }
        self.set_state(RadioState::Disconnected);
    }

    fn is_connected(&self) -> bool {
        self.state() == RadioState::Connected
    }

    fn send_packet(&self, data: &[u8]) -> bool {
        let command = format!("AT+TEST=TXLRPKT,\"{}\"", hex::encode_upper(data));

        let mut link = lock(&self.link);
        let result = self.connection(&mut link).and_then(|conn| {
            let timeout = conn.command_timeout;
            conn.command(&command, timeout)
        });

        match result {
            Ok(_) => {
                debug!(bytes = data.len(), "packet sent");
                true
            }
            Err(e) => {
                warn!(bytes = data.len(), error = %e, "failed to send packet");
                false
            }
        }
    }

    fn receive_packet(&self, timeout: Duration) -> Result<Vec<u8>, RadioError> {
        let mut link = lock(&self.link);
        let conn = self.connection(&mut link)?;

        // A silent module may still deliver; only an ERROR answer aborts.
        let arm_timeout = conn.command_timeout;
        conn.command(ARM_RX_COMMAND, arm_timeout)?;

        let deadline = Instant::now() + timeout;
        while let Some(line) = conn.read_line(deadline)? {
            if line.contains(LEN_MARKER) {
                self.record_signal(&line);
                continue;
            }
            if !line.contains(RX_MARKER) {
                continue;
            }
            match parse_rx_line(&line) {
                Some(packet) => {
                    debug!(bytes = packet.len(), "packet received");
                    return Ok(packet);
                }
                None => debug!(line = %line, "ignoring malformed receive notification"),
            }
        }

        Ok(Vec::new())
    }

    fn signal_info(&self) -> SignalInfo {
        match *lock(&self.last_signal) {
            Some((rssi, snr)) => SignalInfo {
                rssi,
                snr,
                frequency_mhz: self.config.frequency_mhz,
                measured: true,
            },
            None => SignalInfo::placeholder(self.config.frequency_mhz),
        }
    }

    fn reset(&self) -> Result<(), RadioError> {
        let mut link = lock(&self.link);
        let conn = self.connection(&mut link)?;
        let timeout = conn.command_timeout;
        conn.command(RESET_COMMAND, timeout).map(|_| ())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Extract the payload of a `+TEST: RX "<hex>"` line.
///
/// The payload sits between the first and the last double quote. Empty or
/// non-hex payloads yield `None`.
pub fn parse_rx_line(line: &str) -> Option<Vec<u8>> {
    if !line.contains(RX_MARKER) {
        return None;
    }
    let start = line.find('"')? + 1;
    let end = line.rfind('"')?;
    if end <= start {
        return None;
    }
    hex::decode(&line[start..end]).ok()
}

/// Parse RSSI and SNR out of `+TEST: LEN:<n>, RSSI:<dBm>, SNR:<dB>`.
pub fn parse_signal_line(line: &str) -> Option<(i32, f32)> {
    if !line.contains(LEN_MARKER) {
        return None;
    }
    let mut rssi = None;
    let mut snr = None;
    for part in line.split(',') {
        if let Some((key, value)) = part.trim().split_once(':') {
            match key.trim() {
                "RSSI" => rssi = value.trim().parse().ok(),
                "SNR" => snr = value.trim().parse().ok(),
                _ => {}
            }
        }
    }
    Some((rssi?, snr?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rx_line() {
        assert_eq!(
            parse_rx_line("+TEST: RX \"48656C6C6F\""),
            Some(b"Hello".to_vec())
        );
        assert_eq!(parse_rx_line("+TEST: RX \"00ff\""), Some(vec![0x00, 0xFF]));
    }

    #[test]
    fn test_parse_rx_line_rejects_garbage() {
        assert_eq!(parse_rx_line("+TEST: RXLRPKT"), None);
        assert_eq!(parse_rx_line("+TEST: RX \"\""), None);
        assert_eq!(parse_rx_line("+TEST: RX \"ABC"), None);
        assert_eq!(parse_rx_line("+TEST: RX \"ZZZZ\""), None);
        assert_eq!(parse_rx_line("+TEST: RX \"ABC\""), None);
        assert_eq!(parse_rx_line("+TEST: TX DONE"), None);
    }

    #[test]
    fn test_parse_signal_line() {
        assert_eq!(
            parse_signal_line("+TEST: LEN:250, RSSI:-106, SNR:10"),
            Some((-106, 10.0))
        );
        assert_eq!(
            parse_signal_line("+TEST: LEN:5, RSSI:-41, SNR:-7.5"),
            Some((-41, -7.5))
        );
        assert_eq!(parse_signal_line("+TEST: LEN:5"), None);
        assert_eq!(parse_signal_line("+TEST: RX \"00\""), None);
    }
}
