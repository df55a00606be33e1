//! Serial channel abstraction.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

/// A byte stream to a radio module with an adjustable read timeout.
///
/// Reads that see no data before the timeout fail with
/// `io::ErrorKind::TimedOut`.
pub trait SerialChannel: Read + Write + Send {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

/// Opens serial channels by port name.
pub trait PortOpener: Send + Sync {
    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> io::Result<Box<dyn SerialChannel>>;
}

/// Opens real serial devices through the `serialport` crate (8N1, no flow
/// control).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl PortOpener for SystemPorts {
    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> io::Result<Box<dyn SerialChannel>> {
        let port = serialport::new(port, baud_rate)
            .timeout(timeout)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .open()?;
        Ok(Box::new(SystemChannel(port)))
    }
}

struct SystemChannel(Box<dyn SerialPort>);

impl Read for SystemChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for SystemChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl SerialChannel for SystemChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.0.set_timeout(timeout).map_err(io::Error::from)
    }
}
