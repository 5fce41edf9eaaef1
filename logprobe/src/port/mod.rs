//! Port abstraction for serial communication.
//!
//! The loopback session never talks to a driver directly. It goes through the
//! [`Port`] trait so that the same round logic runs against real hardware and
//! against the scripted [`MockPort`]:
//!
//! ```text
//! +-------------------+
//! |  LoopbackSession  |
//! +---------+---------+
//!           |
//!           v
//! +---------+---------+
//! |    Port trait     |
//! +----+---------+----+
//!      |         |
//!      v         v
//! +----+----+ +--+-------+
//! |NativePort| | MockPort |
//! |serialport| | (tests)  |
//! +---------+ +----------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use logprobe::port::Port;
//!
//! fn ping<P: Port>(port: &mut P) -> logprobe::Result<Vec<u8>> {
//!     port.write_all_bytes(b"ping")?;
//!     port.read_available(1024)
//! }
//! ```

pub mod mock;
#[cfg(feature = "native")]
pub mod native;

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::{Error, Result};

/// Baud rates the logger firmware's autobaud detector can lock onto.
pub const LOGGER_BAUD_RATES: &[u32] = &[
    19200, 38400, 57600, 74880, 115200, 230400, 460800, 921600, 1000000, 1500000, 2000000,
];

/// Whether the logger's autobaud table contains `baud_rate`.
pub fn is_logger_baud_rate(baud_rate: u32) -> bool {
    LOGGER_BAUD_RATES.contains(&baud_rate)
}

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM7").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
    /// Data bits (typically 8).
    pub data_bits: DataBits,
    /// Parity (typically None).
    pub parity: Parity,
    /// Stop bits (typically One).
    pub stop_bits: StopBits,
    /// Flow control (typically None).
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(1000),
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    /// 5 data bits.
    Five,
    /// 6 data bits.
    Six,
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
    /// Software flow control (XON/XOFF).
    Software,
}

/// Byte-oriented serial channel.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Get the current read timeout.
    fn timeout(&self) -> Duration;

    /// Number of received bytes waiting in the input buffer.
    fn bytes_to_read(&self) -> Result<usize>;

    /// Close the port and release resources.
    ///
    /// Closing an already closed port is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes and flush, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        Write::write_all(self, buf).map_err(Error::Write)?;
        Write::flush(self).map_err(Error::Write)?;
        Ok(())
    }

    /// Drain at most `max` bytes that are already buffered.
    ///
    /// Never waits for more data to arrive: the amount read is decided by
    /// [`Port::bytes_to_read`] at call time. A read timeout yields whatever
    /// was collected so far.
    fn read_available(&mut self, max: usize) -> Result<Vec<u8>> {
        let pending = self
            .bytes_to_read()?
            .min(max);
        let mut buf = vec![0u8; pending];
        let mut filled = 0;

        while filled < pending {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => return Err(Error::Read(e)),
            }
        }

        buf.truncate(filled);
        Ok(buf)
    }
}

/// Acquires a [`Port`] for a [`SerialConfig`].
///
/// Any `FnMut(&SerialConfig) -> Result<P>` is an opener, so
/// `NativePort::open` can be passed as is.
pub trait PortOpener {
    /// Port type produced by this opener.
    type Port: Port;

    /// Open the channel described by `config`.
    fn open(&mut self, config: &SerialConfig) -> Result<Self::Port>;
}

impl<P, F> PortOpener for F
where
    P: Port,
    F: FnMut(&SerialConfig) -> Result<P>,
{
    type Port = P;

    fn open(&mut self, config: &SerialConfig) -> Result<P> {
        self(config)
    }
}

pub use mock::{Echo, MockPort};
#[cfg(feature = "native")]
pub use native::NativePort;
