//! Simulated modems sharing an in-memory air link.
//!
//! Each simulated modem speaks the subset of the AT dialect the driver uses
//! and answers every command with exactly one line. A packet transmitted by
//! one modem is delivered to every other modem on the same [`AirLink`];
//! a modem surfaces delivered packets only while it is in receive mode.
//!
//! Faults can be injected per port: commands answered with `ERROR`,
//! modems that never answer, missing devices, broken lines and raw
//! notification lines.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::channel::{PortOpener, SerialChannel};

/// Longest a simulated read blocks before reporting a timeout.
const IDLE_POLL: Duration = Duration::from_millis(10);

const DEFAULT_RSSI: i32 = -42;
const DEFAULT_SNR: f32 = 9.0;

#[derive(Debug)]
struct ModemState {
    /// Bytes written by the host not yet forming a full line
    input: Vec<u8>,
    /// Bytes waiting to be read by the host
    output: VecDeque<u8>,
    /// Packets on the air addressed to this modem
    inbox: VecDeque<Vec<u8>>,
    test_mode: bool,
    rx_armed: bool,
    broken: bool,
    /// Commands take effect but produce no response line
    muted: bool,
    /// Command prefixes answered with ERROR
    failing: HashSet<String>,
    commands: Vec<String>,
    transmitted: Vec<Vec<u8>>,
    rssi: i32,
    snr: f32,
}

impl ModemState {
    fn new() -> Self {
        Self {
            input: Vec::new(),
            output: VecDeque::new(),
            inbox: VecDeque::new(),
            test_mode: false,
            rx_armed: false,
            broken: false,
            muted: false,
            failing: HashSet::new(),
            commands: Vec::new(),
            transmitted: Vec::new(),
            rssi: DEFAULT_RSSI,
            snr: DEFAULT_SNR,
        }
    }

    fn push_line(&mut self, line: &str) {
        self.output.extend(line.as_bytes());
        self.output.extend(b"\r\n");
    }

    /// Move one delivered packet into the output as the module would
    /// report it.
    fn surface_packet(&mut self) -> bool {
        if !self.rx_armed {
            return false;
        }
        match self.inbox.pop_front() {
            Some(packet) => {
                let (rssi, snr) = (self.rssi, self.snr);
                self.push_line(&format!(
                    "+TEST: LEN:{}, RSSI:{}, SNR:{}",
                    packet.len(),
                    rssi,
                    snr
                ));
                self.push_line(&format!("+TEST: RX \"{}\"", hex::encode_upper(&packet)));
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Default)]
struct AirState {
    modems: HashMap<String, ModemState>,
    /// Ports that fail to open
    missing: HashSet<String>,
}

impl AirState {
    fn modem(&mut self, port: &str) -> &mut ModemState {
        self.modems
            .entry(port.to_string())
            .or_insert_with(ModemState::new)
    }

    fn handle_command(&mut self, port: &str, command: &str) {
        let modem = self.modem(port);
        modem.commands.push(command.to_string());
        let (muted, pending) = (modem.muted, modem.output.len());

        self.respond(port, command);

        if muted {
            self.modem(port).output.truncate(pending);
        }
    }

    fn respond(&mut self, port: &str, command: &str) {
        let modem = self.modem(port);

        let upper = command.to_ascii_uppercase();
        if modem.failing.iter().any(|prefix| upper.starts_with(prefix)) {
            modem.push_line("+AT: ERROR(-1)");
            return;
        }

        let needs_test_mode = upper.starts_with("AT+TEST=");
        if needs_test_mode && !modem.test_mode {
            modem.push_line("+TEST: ERROR(-12)");
            return;
        }

        match upper.as_str() {
            "AT" => modem.push_line("+AT: OK"),
            "AT+MODE=TEST" => {
                modem.test_mode = true;
                modem.push_line("+MODE: TEST");
            }
            "ATZ" => {
                modem.test_mode = false;
                modem.rx_armed = false;
                modem.push_line("+RESET: OK");
            }
            "AT+TEST=RXLRPKT" => {
                modem.rx_armed = true;
                modem.push_line("+TEST: RXLRPKT");
            }
            _ if upper.starts_with("AT+TEST=RFCFG,") => {
                let args = &command["AT+TEST=RFCFG,".len()..];
                modem.push_line(&format!("+TEST: RFCFG {args}"));
            }
            _ if upper.starts_with("AT+TEST=TXLRPKT,") => {
                let packet = quoted_hex(command);
                match packet {
                    Some(packet) => {
                        modem.rx_armed = false;
                        modem.transmitted.push(packet.clone());
                        modem.push_line("+TEST: TX DONE");
                        for (other, state) in self.modems.iter_mut() {
                            if other != port {
                                state.inbox.push_back(packet.clone());
                            }
                        }
                    }
                    None => modem.push_line("+TEST: ERROR(-1)"),
                }
            }
            _ => modem.push_line("+AT: ERROR(-1)"),
        }
    }
}

fn quoted_hex(command: &str) -> Option<Vec<u8>> {
    let start = command.find('"')? + 1;
    let end = command.rfind('"')?;
    if end < start {
        return None;
    }
    hex::decode(&command[start..end]).ok()
}

/// Shared medium connecting simulated modems by port name.
#[derive(Debug, Clone, Default)]
pub struct AirLink {
    state: Arc<Mutex<AirState>>,
}

impl AirLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AirState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open a channel to the modem on `port`, creating it if needed.
    pub fn modem(&self, port: &str) -> SimulatedModem {
        let mut state = self.lock();
        let modem = state.modem(port);
        modem.input.clear();
        modem.output.clear();
        modem.broken = false;
        SimulatedModem {
            port: port.to_string(),
            air: self.clone(),
            timeout: IDLE_POLL,
        }
    }

    /// Answer every command starting with `prefix` with ERROR.
    pub fn fail_command(&self, port: &str, prefix: &str) {
        self.lock()
            .modem(port)
            .failing
            .insert(prefix.to_ascii_uppercase());
    }

    /// Let commands on `port` take effect without any response line.
    pub fn mute(&self, port: &str) {
        self.lock().modem(port).muted = true;
    }

    /// Make opening `port` fail as if no device were plugged in.
    pub fn remove_device(&self, port: &str) {
        self.lock().missing.insert(port.to_string());
    }

    /// Make every further read and write on `port` fail.
    pub fn break_line(&self, port: &str) {
        self.lock().modem(port).broken = true;
    }

    /// Put a packet on the air for `port` only.
    pub fn deliver(&self, port: &str, packet: &[u8]) {
        self.lock().modem(port).inbox.push_back(packet.to_vec());
    }

    /// Queue a raw line for the host on `port`, bypassing the dialect.
    pub fn inject_line(&self, port: &str, line: &str) {
        self.lock().modem(port).push_line(line);
    }

    pub fn set_signal(&self, port: &str, rssi: i32, snr: f32) {
        let mut state = self.lock();
        let modem = state.modem(port);
        modem.rssi = rssi;
        modem.snr = snr;
    }

    /// Commands received on `port`, in order.
    pub fn commands(&self, port: &str) -> Vec<String> {
        self.lock().modem(port).commands.clone()
    }

    /// Packets transmitted from `port`, in order.
    pub fn transmitted(&self, port: &str) -> Vec<Vec<u8>> {
        self.lock().modem(port).transmitted.clone()
    }

    pub fn in_test_mode(&self, port: &str) -> bool {
        self.lock().modem(port).test_mode
    }
}

impl PortOpener for AirLink {
    fn open(
        &self,
        port: &str,
        _baud_rate: u32,
        timeout: Duration,
    ) -> io::Result<Box<dyn SerialChannel>> {
        if self.lock().missing.contains(port) {
            return Err(io::Error::new(
                ErrorKind::NotFound,
                format!("no such device: {port}"),
            ));
        }
        let mut modem = self.modem(port);
        modem.set_timeout(timeout)?;
        Ok(Box::new(modem))
    }
}

/// Host side of one simulated modem.
#[derive(Debug)]
pub struct SimulatedModem {
    port: String,
    air: AirLink,
    timeout: Duration,
}

impl SimulatedModem {
    pub fn port(&self) -> &str {
        &self.port
    }
}

fn broken_pipe(port: &str) -> io::Error {
    io::Error::new(ErrorKind::BrokenPipe, format!("{port}: device gone"))
}

impl Read for SimulatedModem {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        {
            let mut state = self.air.lock();
            let modem = state.modem(&self.port);
            if modem.broken {
                return Err(broken_pipe(&self.port));
            }
            if modem.output.is_empty() {
                modem.surface_packet();
            }
            if !modem.output.is_empty() {
                let n = buf.len().min(modem.output.len());
                for (slot, byte) in buf.iter_mut().zip(modem.output.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
        }

        thread::sleep(self.timeout.min(IDLE_POLL));
        Err(io::Error::new(ErrorKind::TimedOut, "no data"))
    }
}

impl Write for SimulatedModem {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.air.lock();
        let modem = state.modem(&self.port);
        if modem.broken {
            return Err(broken_pipe(&self.port));
        }
        modem.input.extend_from_slice(buf);

        let mut lines = Vec::new();
        while let Some(pos) = modem.input.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = modem.input.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        for line in lines {
            state.handle_command(&self.port, &line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialChannel for SimulatedModem {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.timeout = timeout;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(modem: &mut SimulatedModem, command: &str) -> String {
        modem.write_all(format!("{command}\r\n").as_bytes()).unwrap();
        let mut buf = [0u8; 512];
        let n = modem.read(&mut buf).unwrap();
        String::from_utf8_lossy(&buf[..n]).trim_end().to_string()
    }

    #[test]
    fn test_dialect_responses() {
        let air = AirLink::new();
        let mut modem = air.modem("sim0");

        assert_eq!(exchange(&mut modem, "AT+TEST=RXLRPKT"), "+TEST: ERROR(-12)");
        assert_eq!(exchange(&mut modem, "AT"), "+AT: OK");
        assert_eq!(exchange(&mut modem, "AT+MODE=TEST"), "+MODE: TEST");
        assert_eq!(
            exchange(&mut modem, "AT+TEST=rfcfg,865.125,sf7,125,14,15,14,on,off,off"),
            "+TEST: RFCFG 865.125,sf7,125,14,15,14,on,off,off"
        );
        assert_eq!(exchange(&mut modem, "AT+BOGUS"), "+AT: ERROR(-1)");
        assert_eq!(exchange(&mut modem, "ATZ"), "+RESET: OK");
        assert!(!air.in_test_mode("sim0"));
    }

    #[test]
    fn test_packet_crosses_air() {
        let air = AirLink::new();
        let mut tx = air.modem("tx");
        let mut rx = air.modem("rx");

        exchange(&mut tx, "AT+MODE=TEST");
        exchange(&mut rx, "AT+MODE=TEST");
        assert_eq!(exchange(&mut rx, "AT+TEST=RXLRPKT"), "+TEST: RXLRPKT");
        assert_eq!(
            exchange(&mut tx, "AT+TEST=TXLRPKT,\"CAFE\""),
            "+TEST: TX DONE"
        );

        let mut buf = [0u8; 512];
        let n = rx.read(&mut buf).unwrap();
        let text = String::from_utf8_lossy(&buf[..n]).to_string();
        assert!(text.contains("+TEST: LEN:2, RSSI:-42, SNR:9"));
        assert!(text.contains("+TEST: RX \"CAFE\""));
        assert_eq!(air.transmitted("tx"), vec![vec![0xCA, 0xFE]]);
    }

    #[test]
    fn test_idle_read_times_out() {
        let air = AirLink::new();
        let mut modem = air.modem("idle");
        let mut buf = [0u8; 16];
        let err = modem.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
    }

    #[test]
    fn test_faults() {
        let air = AirLink::new();
        air.remove_device("ghost");
        assert!(air.open("ghost", 9600, IDLE_POLL).is_err());

        let mut modem = air.modem("flaky");
        air.fail_command("flaky", "AT+MODE");
        assert_eq!(exchange(&mut modem, "AT+MODE=TEST"), "+AT: ERROR(-1)");

        air.break_line("flaky");
        assert!(modem.write(b"AT\r\n").is_err());
    }
}
