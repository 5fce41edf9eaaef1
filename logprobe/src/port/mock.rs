//! Scripted serial port for exercising the loopback session without hardware.
//!
//! A `MockPort` is a cheap handle around shared state: clone it before handing
//! it to a session and inspect writes and releases afterwards.
//!
//! ```rust
//! use logprobe::port::{Echo, MockPort, Port};
//!
//! let mut port = MockPort::new("MOCK0", Echo::Exact);
//! port.write_all_bytes(b"abc").unwrap();
//! assert_eq!(port.read_available(64).unwrap(), b"abc");
//! assert_eq!(port.writes(), vec![b"abc".to_vec()]);
//! ```

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::echo::{LOGGER_CHUNK_LEN, format_logger_frame};
use crate::error::{Error, Result};
use crate::port::Port;

/// How the simulated device answers a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    /// Echo the written bytes unchanged.
    Exact,
    /// Never answer.
    Silent,
    /// Answer like the logger firmware: timestamp header, data, newline.
    LoggerFramed,
    /// Answer with bytes that are not valid UTF-8 and lack the payload.
    Garbled,
    /// Echo everything except the last written byte.
    Truncated,
}

#[derive(Debug)]
struct MockState {
    echo: Echo,
    rx: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    timeout: Duration,
    uptime_ms: u64,
    fail_write_at: Option<usize>,
    fail_read_at: Option<usize>,
    reads: usize,
    open: bool,
    releases: usize,
}

/// In-memory [`Port`] with a scripted echo and fault injection.
#[derive(Debug, Clone)]
pub struct MockPort {
    name: String,
    baud_rate: u32,
    state: Arc<Mutex<MockState>>,
}

impl MockPort {
    /// Create an open mock port answering with `echo`.
    pub fn new(name: impl Into<String>, echo: Echo) -> Self {
        Self {
            name: name.into(),
            baud_rate: 115200,
            state: Arc::new(Mutex::new(MockState {
                echo,
                rx: VecDeque::new(),
                writes: Vec::new(),
                timeout: Duration::from_secs(1),
                uptime_ms: 0,
                fail_write_at: None,
                fail_read_at: None,
                reads: 0,
                open: true,
                releases: 0,
            })),
        }
    }

    /// Set the reported baud rate.
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Fail the write with the given zero-based index.
    #[must_use]
    pub fn fail_write_at(self, index: usize) -> Self {
        self.lock().fail_write_at = Some(index);
        self
    }

    /// Fail the drain with the given zero-based index.
    #[must_use]
    pub fn fail_read_at(self, index: usize) -> Self {
        self.lock().fail_read_at = Some(index);
        self
    }

    /// Change the echo behaviour for subsequent writes.
    pub fn set_echo(&self, echo: Echo) {
        self.lock().echo = echo;
    }

    /// Queue bytes as if the device had sent them unprompted.
    pub fn inject_rx(&self, data: &[u8]) {
        self.lock().rx.extend(data);
    }

    /// Every successful write, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// How many times the channel was actually released.
    pub fn releases(&self) -> usize {
        self.lock().releases
    }

    /// Whether the port is still open.
    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the state from the next assertion.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn closed_error() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "port closed")
    }
}

impl Port for MockPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn timeout(&self) -> Duration {
        self.lock().timeout
    }

    fn bytes_to_read(&self) -> Result<usize> {
        let mut state = self.lock();
        if !state.open {
            return Err(Error::Read(Self::closed_error()));
        }
        let index = state.reads;
        state.reads += 1;
        if state.fail_read_at == Some(index) {
            return Err(Error::Read(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "device disconnected",
            )));
        }
        Ok(state.rx.len())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.lock();
        if state.open {
            state.open = false;
            state.releases += 1;
        }
        Ok(())
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if !state.open {
            return Err(Self::closed_error());
        }
        if state.rx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
        }
        let n = buf.len().min(state.rx.len());
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if !state.open {
            return Err(Self::closed_error());
        }
        if state.fail_write_at == Some(state.writes.len()) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device disconnected"));
        }
        state.writes.push(buf.to_vec());

        match state.echo {
            Echo::Exact => state.rx.extend(buf),
            Echo::Silent => {},
            Echo::LoggerFramed => {
                for chunk in buf.chunks(LOGGER_CHUNK_LEN) {
                    state.uptime_ms += 100;
                    let frame = format_logger_frame(state.uptime_ms, chunk);
                    state.rx.extend(frame);
                }
            },
            Echo::Garbled => state.rx.extend([0xFF, 0xFE, 0x80, b'?']),
            Echo::Truncated => state.rx.extend(&buf[..buf.len().saturating_sub(1)]),
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.lock().open {
            Ok(())
        } else {
            Err(Self::closed_error())
        }
    }
}
