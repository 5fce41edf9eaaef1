//! # logprobe
//!
//! Host-side checks for an ESP32-C3 UART logger.
//!
//! This crate provides:
//!
//! - A serial loopback session that writes random payloads and verifies the
//!   logger echoes them back
//! - Knuth-Morris-Pratt substring search used for echo verification
//! - Random alphanumeric payload generation
//! - Serial port discovery with USB bridge classification
//! - A BLE probe that finds the logger by name and reads its negotiated MTU
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `ble`: `bluest` BLE central (needs the platform Bluetooth stack)
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use logprobe::loopback::{LogObserver, SessionConfig, run_loopback};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let config = SessionConfig::new("/dev/ttyUSB0", 115200)
//!             .with_payload_len(100)
//!             .with_frequency(10.0);
//!
//!         // Runs until the interrupt checker fires or the port faults.
//!         let outcome = run_loopback(config, &mut logprobe::NativePort::open, &mut LogObserver)?;
//!         println!("{} rounds", outcome.rounds());
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod ble;
pub mod device;
pub mod echo;
pub mod error;
pub mod loopback;
pub mod matcher;
pub mod port;
pub mod sequence;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Only the first
/// registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use device::auto_detect_port;
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    ble::{
        Advertisement, BleCentral, BleLink, MtuProbe, connect_and_get_mtu, discover_device_address,
        probe_mtu,
    },
    device::{DetectedPort, DeviceKind, detect_ports, format_port_list},
    echo::{DecodedEcho, decode_echo},
    error::{Error, Result},
    loopback::{
        LoopbackSession, RoundObserver, RoundResult, SessionConfig, SessionOutcome, SessionState,
        Verdict, run_loopback,
    },
    matcher::{FailureTable, Matcher, build_failure_table, search, search_str},
    port::{Echo, MockPort, Port, PortOpener, SerialConfig},
    sequence::SequenceGenerator,
};
