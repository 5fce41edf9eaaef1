//! Per-round outcomes and their observers.

use log::{info, warn};

/// Outcome of a single round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Verdict {
    /// The echo contained the payload.
    Pass,
    /// The echo was missing, truncated, garbled or otherwise lacked the payload.
    Fail,
}

impl Verdict {
    /// Upper-case label used in console output.
    pub fn label(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
        }
    }
}

/// Everything recorded about one send/settle/drain/verify cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RoundResult {
    /// One-based round number within the session.
    pub round: u64,
    /// Payload written to the channel.
    pub payload: String,
    /// Raw bytes drained after the settle delay.
    pub received: Vec<u8>,
    /// Decoded echo text.
    pub text: String,
    /// Whether the echo was not valid UTF-8.
    pub lossy: bool,
    /// Char index of the payload inside `text`.
    pub match_index: Option<usize>,
    /// Pass iff `match_index` is present.
    pub verdict: Verdict,
}

impl RoundResult {
    /// Whether this round passed.
    pub fn is_pass(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

/// Receives session lifecycle events.
pub trait RoundObserver {
    /// The channel was acquired.
    fn on_open(&mut self, _port: &str, _baud_rate: u32) {}

    /// A round finished.
    fn on_round(&mut self, result: &RoundResult);

    /// The channel was released.
    fn on_close(&mut self, _port: &str) {}
}

/// Collects every round, mostly for tests and embedding.
impl RoundObserver for Vec<RoundResult> {
    fn on_round(&mut self, result: &RoundResult) {
        self.push(result.clone());
    }
}

/// Reports rounds through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl RoundObserver for LogObserver {
    fn on_open(&mut self, port: &str, baud_rate: u32) {
        info!("Opened {port} at {baud_rate} baud");
    }

    fn on_round(&mut self, result: &RoundResult) {
        match result.verdict {
            Verdict::Pass => info!("round {}: echo contains payload", result.round),
            Verdict::Fail => warn!(
                "round {}: echo does not contain payload ({} bytes received)",
                result.round,
                result.received.len()
            ),
        }
    }

    fn on_close(&mut self, port: &str) {
        info!("Closed {port}");
    }
}
