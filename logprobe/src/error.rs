//! Error types for logprobe.

use std::io;
use thiserror::Error;

/// Result type for logprobe operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for logprobe operations.
///
/// A missing BLE device or MTU, a garbled echo and an echo that lacks the
/// payload are ordinary outcomes and never show up here.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error outside of a specific serial operation.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The serial channel could not be acquired.
    #[error("Cannot open serial port {port}: {reason}")]
    PortOpen {
        /// Port name/path that was requested.
        port: String,
        /// Reason reported by the driver.
        reason: String,
    },

    /// Writing a payload to the channel failed.
    #[error("Serial write failed: {0}")]
    Write(#[source] io::Error),

    /// Draining the channel failed.
    #[error("Serial read failed: {0}")]
    Read(#[source] io::Error),

    /// No serial port to auto-select.
    #[error("No serial ports found")]
    DeviceNotFound,

    /// BLE stack error (adapter missing, scan or connect failure).
    #[error("BLE error: {0}")]
    Ble(String),

    /// Invalid session or probe configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unsupported operation on this build or platform.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Whether this error is a transport fault (fatal to the current session).
    #[must_use]
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Io(_) | Self::PortOpen { .. } | Self::Write(_) | Self::Read(_) | Self::Ble(_) => {
                true
            },
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            Self::DeviceNotFound | Self::InvalidConfig(_) | Self::Unsupported(_) => false,
        }
    }
}
