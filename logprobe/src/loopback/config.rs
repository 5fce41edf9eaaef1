//! Loopback session configuration.

use std::time::Duration;

use log::warn;

use crate::error::{Error, Result};
use crate::port::{SerialConfig, is_logger_baud_rate};

/// Time the session waits after a write before draining the echo.
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Read timeout applied to the serial channel.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Default payload length in characters.
pub const DEFAULT_PAYLOAD_LEN: usize = 100;

/// Default send frequency in rounds per second.
pub const DEFAULT_FREQUENCY: f64 = 10.0;

/// Default baud rate.
pub const DEFAULT_BAUD: u32 = 115200;

/// Immutable parameters of one loopback session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Port name/path.
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Characters per payload.
    pub payload_len: usize,
    /// Rounds per second (upper bound on throughput).
    pub frequency: f64,
    /// Wait between write and drain.
    pub settle: Duration,
    /// Read timeout of the channel.
    pub read_timeout: Duration,
}

impl SessionConfig {
    /// Configuration with default payload length, frequency and timing.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            payload_len: DEFAULT_PAYLOAD_LEN,
            frequency: DEFAULT_FREQUENCY,
            settle: SETTLE_DELAY,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Set the payload length.
    #[must_use]
    pub fn with_payload_len(mut self, payload_len: usize) -> Self {
        self.payload_len = payload_len;
        self
    }

    /// Set the send frequency in rounds per second.
    #[must_use]
    pub fn with_frequency(mut self, frequency: f64) -> Self {
        self.frequency = frequency;
        self
    }

    /// Set the settle delay.
    #[must_use]
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Set the channel read timeout.
    #[must_use]
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Reject configurations the session cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self
            .port_name
            .trim()
            .is_empty()
        {
            return Err(Error::InvalidConfig("port name is empty".to_string()));
        }
        if self.baud_rate == 0 {
            return Err(Error::InvalidConfig("baud rate must be positive".to_string()));
        }
        if self.payload_len == 0 {
            return Err(Error::InvalidConfig(
                "payload length must be positive".to_string(),
            ));
        }
        if !self
            .frequency
            .is_finite()
            || self.frequency <= 0.0
        {
            return Err(Error::InvalidConfig(format!(
                "send frequency must be a positive number, got {}",
                self.frequency
            )));
        }
        if Duration::try_from_secs_f64(1.0 / self.frequency).is_err() {
            return Err(Error::InvalidConfig(format!(
                "send frequency {:e} is too low: the round interval does not fit a duration",
                self.frequency
            )));
        }
        if !is_logger_baud_rate(self.baud_rate) {
            warn!(
                "{} baud is not in the logger's autobaud table; the device may not lock on",
                self.baud_rate
            );
        }
        Ok(())
    }

    /// Pause between the end of one round and the start of the next.
    ///
    /// Saturates at [`Duration::MAX`] for frequencies [`validate`](Self::validate)
    /// would reject.
    pub fn round_interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.frequency).unwrap_or(Duration::MAX)
    }

    /// Serial settings for acquiring the channel.
    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig::new(self.port_name.clone(), self.baud_rate).with_timeout(self.read_timeout)
    }
}
