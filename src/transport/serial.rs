//! Serial-port byte transport (optical probe or RS-232/485 adapter).

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::transport::Transport;

/// C12.18 default line speed before negotiation.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default per-read timeout.
pub const DEFAULT_SERIAL_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Line settings: 8 data bits, no parity, one stop bit.
pub const DATA_BITS: DataBits = DataBits::Eight;
pub const PARITY: Parity = Parity::None;
pub const STOP_BITS: StopBits = StopBits::One;

/// Serial transport over the `serialport` crate.
///
/// ```no_run
/// use ansi_c12::transport::serial::SerialTransport;
///
/// let transport = SerialTransport::open("/dev/ttyUSB0", 9600)?;
/// # Ok::<(), serialport::Error>(())
/// ```
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl core::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SerialTransport").field("port", &self.port.name()).finish()
    }
}

impl SerialTransport {
    /// Opens `path` at `baud_rate` with 8N1 framing and the default timeout.
    pub fn open(path: &str, baud_rate: u32) -> serialport::Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DATA_BITS)
            .parity(PARITY)
            .stop_bits(STOP_BITS)
            .flow_control(FlowControl::None)
            .timeout(DEFAULT_SERIAL_READ_TIMEOUT)
            .open()?;
        Ok(Self { port })
    }

    /// Wraps an already opened port.
    pub fn from_port(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }

    /// Switches line speed, e.g. after a negotiate response selected a new rate.
    pub fn set_baud_rate(&mut self, baud_rate: u32) -> serialport::Result<()> {
        self.port.set_baud_rate(baud_rate)
    }
}

impl Transport for SerialTransport {
    type Error = serialport::Error;

    fn send(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn recv(&mut self, buffer: &mut [u8]) -> Result<usize, Self::Error> {
        match self.port.read(buffer) {
            Ok(read) => Ok(read),
            Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), Self::Error> {
        // The port has no blocking-forever mode; fall back to a long timeout
        self.port.set_timeout(timeout.unwrap_or(Duration::from_secs(u32::MAX as u64)))
    }

    fn clear(&mut self) -> Result<(), Self::Error> {
        self.port.clear(ClearBuffer::All)
    }
}
