//! Serial loopback session.
//!
//! A session writes a random payload, waits for the logger to echo it, drains
//! whatever arrived and checks that the payload occurs in the echo. Rounds
//! repeat at a bounded frequency until the embedding application interrupts
//! the loop or the channel faults.
//!
//! ```text
//!   Idle --open--> Open --run--> Running --interrupt/limit--> Closed
//!     |                             |
//!     +--open fails--> Faulted <----+--transport fault
//! ```
//!
//! The channel is released by a single routine on every exit path, including
//! drop.
//!
//! ```rust
//! use std::time::Duration;
//! use logprobe::loopback::{LoopbackSession, RoundResult, SessionConfig, SessionOutcome};
//! use logprobe::port::{Echo, MockPort, SerialConfig};
//!
//! let config = SessionConfig::new("MOCK0", 115200)
//!     .with_payload_len(10)
//!     .with_frequency(1000.0)
//!     .with_settle(Duration::ZERO);
//! let mut session = LoopbackSession::new(config).unwrap();
//! session
//!     .open(&mut |c: &SerialConfig| {
//!         Ok::<_, logprobe::Error>(MockPort::new(&c.port_name, Echo::Exact))
//!     })
//!     .unwrap();
//!
//! let mut rounds: Vec<RoundResult> = Vec::new();
//! let outcome = session.run_rounds(3, &mut rounds).unwrap();
//! assert_eq!(outcome, SessionOutcome::Completed { rounds: 3 });
//! assert!(rounds.iter().all(|r| r.is_pass()));
//! ```

mod config;
mod round;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{Level, debug, log_enabled, trace, warn};
use rand::Rng;
use rand::rngs::StdRng;

use crate::echo::{decode_echo, split_logger_frames};
use crate::error::{Error, Result};
use crate::matcher::search_str;
use crate::port::{Port, PortOpener};
use crate::sequence::SequenceGenerator;

pub use config::{
    DEFAULT_BAUD, DEFAULT_FREQUENCY, DEFAULT_PAYLOAD_LEN, DEFAULT_READ_TIMEOUT, SETTLE_DELAY,
    SessionConfig,
};
pub use round::{LogObserver, RoundObserver, RoundResult, Verdict};

/// Upper bound on bytes drained per round.
pub const MAX_DRAIN: usize = 64 * 1024;

/// Longest uninterrupted sleep; the interrupt flag is polled between slices.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Lifecycle state of a [`LoopbackSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, channel not yet acquired.
    Idle,
    /// Channel acquired, no round started.
    Open,
    /// Round loop in progress.
    Running,
    /// Channel released after a clean exit.
    Closed,
    /// Open failed or a transport fault aborted the loop.
    Faulted,
}

/// How a round loop ended without a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Stopped by the interrupt checker.
    Interrupted {
        /// Rounds completed before the interrupt.
        rounds: u64,
    },
    /// Reached the requested number of rounds.
    Completed {
        /// Rounds completed.
        rounds: u64,
    },
}

impl SessionOutcome {
    /// Rounds completed regardless of how the loop ended.
    pub fn rounds(&self) -> u64 {
        match self {
            Self::Interrupted { rounds } | Self::Completed { rounds } => *rounds,
        }
    }
}

type InterruptCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Loopback tester owning one serial channel.
pub struct LoopbackSession<P: Port, R: Rng = StdRng> {
    config: SessionConfig,
    state: SessionState,
    port: Option<P>,
    generator: SequenceGenerator<R>,
    interrupted: InterruptCheck,
    rounds: u64,
    passed: u64,
}

impl<P: Port> LoopbackSession<P, StdRng> {
    /// Validate `config` and create an idle session with an OS-seeded generator.
    pub fn new(config: SessionConfig) -> Result<Self> {
        Self::with_rng(config, SequenceGenerator::new())
    }
}

impl<P: Port, R: Rng> LoopbackSession<P, R> {
    /// Validate `config` and create an idle session with the given generator.
    pub fn with_rng(config: SessionConfig, generator: SequenceGenerator<R>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: SessionState::Idle,
            port: None,
            generator,
            interrupted: Arc::new(crate::is_interrupted_requested),
            rounds: 0,
            passed: 0,
        })
    }

    /// Replace the process-wide interrupt checker for this session.
    #[must_use]
    pub fn with_interrupt_checker<F>(mut self, checker: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.interrupted = Arc::new(checker);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Rounds completed so far.
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// Rounds that passed so far.
    pub fn passed(&self) -> u64 {
        self.passed
    }

    /// Acquire the channel. `Idle -> Open`, or `Idle -> Faulted` on failure.
    pub fn open<O>(&mut self, opener: &mut O) -> Result<()>
    where
        O: PortOpener<Port = P> + ?Sized,
    {
        if self.state != SessionState::Idle {
            return Err(Error::Unsupported(format!(
                "cannot open a session in state {:?}",
                self.state
            )));
        }

        let serial = self.config.serial_config();
        match opener.open(&serial) {
            Ok(port) => {
                debug!(
                    "Loopback channel {} open at {} baud",
                    port.name(),
                    port.baud_rate()
                );
                self.port = Some(port);
                self.state = SessionState::Open;
                Ok(())
            },
            Err(e) => {
                debug!("Failed to open {}: {e}", serial.port_name);
                self.state = SessionState::Faulted;
                Err(e)
            },
        }
    }

    /// Run rounds until interrupted or faulted.
    pub fn run<O>(&mut self, observer: &mut O) -> Result<SessionOutcome>
    where
        O: RoundObserver + ?Sized,
    {
        self.drive(None, observer)
    }

    /// Run at most `limit` rounds.
    pub fn run_rounds<O>(&mut self, limit: u64, observer: &mut O) -> Result<SessionOutcome>
    where
        O: RoundObserver + ?Sized,
    {
        self.drive(Some(limit), observer)
    }

    /// Release the channel if it is still held. Returns whether it was.
    ///
    /// Safe to call any number of times; only the first call after a
    /// successful open touches the port.
    pub fn close(&mut self) -> bool {
        let Some(mut port) = self.port.take() else {
            return false;
        };
        if let Err(e) = port.close() {
            warn!("Error while closing {}: {e}", port.name());
        }
        if self.state != SessionState::Faulted {
            self.state = SessionState::Closed;
        }
        debug!("Loopback channel {} released", port.name());
        true
    }

    fn drive<O>(&mut self, limit: Option<u64>, observer: &mut O) -> Result<SessionOutcome>
    where
        O: RoundObserver + ?Sized,
    {
        if self.state != SessionState::Open || self.port.is_none() {
            return Err(Error::Unsupported(format!(
                "cannot run a session in state {:?}",
                self.state
            )));
        }

        let port_name = self.config.port_name.clone();
        observer.on_open(&port_name, self.config.baud_rate);
        self.state = SessionState::Running;

        let result = self.round_loop(limit, observer);
        if result.is_err() {
            self.state = SessionState::Faulted;
        }
        if self.close() {
            observer.on_close(&port_name);
        }
        result
    }

    fn round_loop<O>(&mut self, limit: Option<u64>, observer: &mut O) -> Result<SessionOutcome>
    where
        O: RoundObserver + ?Sized,
    {
        let interval = self.config.round_interval();
        let mut completed = 0u64;

        loop {
            if limit.is_some_and(|n| completed >= n) {
                return Ok(SessionOutcome::Completed { rounds: completed });
            }
            if (self.interrupted)() {
                debug!("Interrupt requested after {completed} rounds");
                return Ok(SessionOutcome::Interrupted { rounds: completed });
            }

            let result = self.round()?;
            completed += 1;
            observer.on_round(&result);

            if limit.is_some_and(|n| completed >= n) {
                continue;
            }
            self.sleep_interruptibly(interval);
        }
    }

    fn round(&mut self) -> Result<RoundResult> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| Error::Unsupported("session has no open channel".to_string()))?;

        let payload = self
            .generator
            .generate(self.config.payload_len);
        port.write_all_bytes(payload.as_bytes())?;

        thread::sleep(self.config.settle);

        let received = port.read_available(MAX_DRAIN)?;
        let decoded = decode_echo(&received);
        if decoded.lossy {
            debug!("Echo of {} bytes is not valid UTF-8", received.len());
        }
        if log_enabled!(Level::Trace) {
            for frame in split_logger_frames(&decoded.text) {
                trace!("echo frame @{}ms: {}", frame.uptime_ms, frame.body);
            }
        }

        let match_index = search_str(&payload, &decoded.text);
        let verdict = if match_index.is_some() {
            Verdict::Pass
        } else {
            Verdict::Fail
        };

        self.rounds += 1;
        if verdict == Verdict::Pass {
            self.passed += 1;
        }

        Ok(RoundResult {
            round: self.rounds,
            payload,
            received,
            text: decoded.text,
            lossy: decoded.lossy,
            match_index,
            verdict,
        })
    }

    fn sleep_interruptibly(&self, total: Duration) {
        // No representable deadline: wait in slices until interrupted.
        let Some(deadline) = Instant::now().checked_add(total) else {
            while !(self.interrupted)() {
                thread::sleep(SLEEP_SLICE);
            }
            return;
        };
        loop {
            let now = Instant::now();
            if now >= deadline || (self.interrupted)() {
                return;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

impl<P: Port, R: Rng> Drop for LoopbackSession<P, R> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Open a channel through `opener`, run the unbounded loop and release it.
pub fn run_loopback<O, Obs>(
    config: SessionConfig,
    opener: &mut O,
    observer: &mut Obs,
) -> Result<SessionOutcome>
where
    O: PortOpener + ?Sized,
    Obs: RoundObserver + ?Sized,
{
    let mut session: LoopbackSession<O::Port> = LoopbackSession::new(config)?;
    session.open(opener)?;
    session.run(observer)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::port::{Echo, MockPort, SerialConfig};

    fn fast_config() -> SessionConfig {
        SessionConfig::new("MOCK0", 115200)
            .with_payload_len(10)
            .with_frequency(1000.0)
            .with_settle(Duration::ZERO)
    }

    fn session_over(port: &MockPort) -> LoopbackSession<MockPort> {
        let port = port.clone();
        let mut session = LoopbackSession::with_rng(fast_config(), SequenceGenerator::seeded(7))
            .unwrap()
            .with_interrupt_checker(|| false);
        session
            .open(&mut move |_: &SerialConfig| Ok::<_, Error>(port.clone()))
            .unwrap();
        session
    }

    #[derive(Default)]
    struct Events {
        opened: usize,
        closed: usize,
        rounds: Vec<RoundResult>,
    }

    impl RoundObserver for Events {
        fn on_open(&mut self, _port: &str, _baud_rate: u32) {
            self.opened += 1;
        }

        fn on_round(&mut self, result: &RoundResult) {
            self.rounds.push(result.clone());
        }

        fn on_close(&mut self, _port: &str) {
            self.closed += 1;
        }
    }

    #[test]
    fn test_exact_echo_passes() {
        let port = MockPort::new("MOCK0", Echo::Exact);
        let mut session = session_over(&port);
        let mut rounds: Vec<RoundResult> = Vec::new();

        let outcome = session
            .run_rounds(1, &mut rounds)
            .unwrap();

        assert_eq!(outcome, SessionOutcome::Completed { rounds: 1 });
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].payload.len(), 10);
        assert_eq!(rounds[0].verdict, Verdict::Pass);
        assert_eq!(rounds[0].match_index, Some(0));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_empty_echo_fails_and_loop_continues() {
        let port = MockPort::new("MOCK0", Echo::Silent);
        let mut session = session_over(&port);
        let mut rounds: Vec<RoundResult> = Vec::new();

        let outcome = session
            .run_rounds(3, &mut rounds)
            .unwrap();

        assert_eq!(outcome.rounds(), 3);
        assert!(
            rounds
                .iter()
                .all(|r| r.verdict == Verdict::Fail && r.received.is_empty())
        );
        assert_eq!(port.writes().len(), 3);
        assert_eq!(session.passed(), 0);
    }

    #[test]
    fn test_logger_framed_echo_passes() {
        let port = MockPort::new("MOCK0", Echo::LoggerFramed);
        let mut session = session_over(&port);
        let mut rounds: Vec<RoundResult> = Vec::new();

        session
            .run_rounds(2, &mut rounds)
            .unwrap();

        for round in &rounds {
            assert!(round.is_pass());
            assert_eq!(round.match_index, Some(15));
        }
    }

    #[test]
    fn test_garbled_echo_is_a_failed_round_not_a_fault() {
        let port = MockPort::new("MOCK0", Echo::Garbled);
        let mut session = session_over(&port);
        let mut rounds: Vec<RoundResult> = Vec::new();

        let outcome = session
            .run_rounds(2, &mut rounds)
            .unwrap();

        assert_eq!(outcome, SessionOutcome::Completed { rounds: 2 });
        assert!(rounds.iter().all(|r| r.lossy && !r.is_pass()));
    }

    #[test]
    fn test_echo_with_overflowing_timestamp_is_not_a_fault() {
        // Frame splitting only runs with trace logging on.
        let _ = env_logger::builder()
            .is_test(true)
            .filter_level(log::LevelFilter::Trace)
            .try_init();
        let port = MockPort::new("MOCK0", Echo::Exact);
        let mut session = session_over(&port);
        port.inject_rx(b"[18446744073709551615:59:59.999] noise\n");
        let mut rounds: Vec<RoundResult> = Vec::new();

        let outcome = session
            .run_rounds(1, &mut rounds)
            .unwrap();

        assert_eq!(outcome, SessionOutcome::Completed { rounds: 1 });
        assert!(rounds[0].is_pass());
        assert!(rounds[0].match_index > Some(0));
    }

    #[test]
    fn test_truncated_echo_fails() {
        let port = MockPort::new("MOCK0", Echo::Truncated);
        let mut session = session_over(&port);
        let mut rounds: Vec<RoundResult> = Vec::new();

        session
            .run_rounds(1, &mut rounds)
            .unwrap();

        assert_eq!(rounds[0].verdict, Verdict::Fail);
        assert_eq!(rounds[0].received.len(), 9);
    }

    #[test]
    fn test_echo_recovers_after_silence() {
        struct Wake(MockPort, Vec<RoundResult>);
        impl RoundObserver for Wake {
            fn on_round(&mut self, result: &RoundResult) {
                self.1.push(result.clone());
                self.0.set_echo(Echo::Exact);
            }
        }

        let port = MockPort::new("MOCK0", Echo::Silent);
        let mut session = session_over(&port);
        let mut observer = Wake(port.clone(), Vec::new());

        session
            .run_rounds(3, &mut observer)
            .unwrap();

        let verdicts: Vec<_> = observer.1.iter().map(|r| r.verdict).collect();
        assert_eq!(verdicts, vec![Verdict::Fail, Verdict::Pass, Verdict::Pass]);
    }

    #[test]
    fn test_stale_bytes_before_round_do_not_break_match() {
        let port = MockPort::new("MOCK0", Echo::Exact);
        port.inject_rx(b"boot: ok\r\n");
        let mut session = session_over(&port);
        let mut rounds: Vec<RoundResult> = Vec::new();

        session
            .run_rounds(1, &mut rounds)
            .unwrap();

        assert!(rounds[0].is_pass());
        assert_eq!(rounds[0].match_index, Some(10));
    }

    #[test]
    fn test_open_failure_faults_without_writing() {
        let attempts = AtomicUsize::new(0);
        let mut session: LoopbackSession<MockPort> = LoopbackSession::new(fast_config()).unwrap();

        let err = session
            .open(&mut |c: &SerialConfig| {
                attempts.fetch_add(1, Ordering::Relaxed);
                Err::<MockPort, _>(Error::PortOpen {
                    port: c.port_name.clone(),
                    reason: "No such file or directory".to_string(),
                })
            })
            .unwrap_err();

        assert!(err.is_transport());
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
        assert_eq!(session.state(), SessionState::Faulted);
        assert!(!session.close());

        let mut events = Events::default();
        assert!(session.run(&mut events).is_err());
        assert_eq!(events.opened, 0);
        assert!(events.rounds.is_empty());
    }

    #[test]
    fn test_write_fault_releases_once() {
        let port = MockPort::new("MOCK0", Echo::Exact).fail_write_at(2);
        let mut session = session_over(&port);
        let mut events = Events::default();

        let err = session
            .run(&mut events)
            .unwrap_err();

        assert!(matches!(err, Error::Write(_)));
        assert_eq!(events.rounds.len(), 2);
        assert_eq!(session.state(), SessionState::Faulted);
        assert_eq!(port.releases(), 1);
        assert_eq!(events.closed, 1);

        assert!(!session.close());
        drop(session);
        assert_eq!(port.releases(), 1);
    }

    #[test]
    fn test_read_fault_releases_once() {
        let port = MockPort::new("MOCK0", Echo::Exact).fail_read_at(0);
        let mut session = session_over(&port);
        let mut events = Events::default();

        let err = session
            .run(&mut events)
            .unwrap_err();

        assert!(matches!(err, Error::Read(_)));
        assert!(events.rounds.is_empty());
        assert_eq!(port.writes().len(), 1);
        assert_eq!(port.releases(), 1);
        assert!(!port.is_open());
    }

    #[test]
    fn test_interrupt_stops_before_next_round() {
        let port = MockPort::new("MOCK0", Echo::Exact);
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let mut session =
            session_over(&port).with_interrupt_checker(move || flag.load(Ordering::Relaxed));

        struct StopAfter(u64, Arc<AtomicBool>, Vec<RoundResult>);
        impl RoundObserver for StopAfter {
            fn on_round(&mut self, result: &RoundResult) {
                self.2.push(result.clone());
                if result.round >= self.0 {
                    self.1.store(true, Ordering::Relaxed);
                }
            }
        }

        let mut observer = StopAfter(3, stop, Vec::new());
        let outcome = session
            .run(&mut observer)
            .unwrap();

        assert_eq!(outcome, SessionOutcome::Interrupted { rounds: 3 });
        assert_eq!(observer.2.len(), 3);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(port.releases(), 1);
    }

    #[test]
    fn test_interrupt_cuts_long_sleep_short() {
        let port = MockPort::new("MOCK0", Echo::Exact);
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let config = fast_config().with_frequency(0.01);
        let moved = port.clone();
        let mut session = LoopbackSession::new(config)
            .unwrap()
            .with_interrupt_checker(move || flag.load(Ordering::Relaxed));
        session
            .open(&mut move |_: &SerialConfig| Ok::<_, Error>(moved.clone()))
            .unwrap();

        let trigger = Arc::clone(&stop);
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            trigger.store(true, Ordering::Relaxed);
        });

        let started = Instant::now();
        let outcome = session
            .run(&mut LogObserver)
            .unwrap();
        waker.join().unwrap();

        assert_eq!(outcome, SessionOutcome::Interrupted { rounds: 1 });
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_rounds_are_paced_by_frequency() {
        let port = MockPort::new("MOCK0", Echo::Exact);
        let moved = port.clone();
        let config = fast_config().with_frequency(20.0);
        let mut session = LoopbackSession::new(config)
            .unwrap()
            .with_interrupt_checker(|| false);
        session
            .open(&mut move |_: &SerialConfig| Ok::<_, Error>(moved.clone()))
            .unwrap();

        let started = Instant::now();
        session
            .run_rounds(3, &mut Vec::<RoundResult>::new())
            .unwrap();

        // Two 50 ms pauses separate three rounds; none follows the last.
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_payloads_differ_between_rounds() {
        let port = MockPort::new("MOCK0", Echo::Exact);
        let mut session = session_over(&port);
        let mut rounds: Vec<RoundResult> = Vec::new();

        session
            .run_rounds(5, &mut rounds)
            .unwrap();

        let writes = port.writes();
        assert_eq!(writes.len(), 5);
        for pair in writes.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
        for (round, write) in rounds.iter().zip(&writes) {
            assert_eq!(round.payload.as_bytes(), write.as_slice());
        }
    }

    #[test]
    fn test_session_cannot_run_twice() {
        let port = MockPort::new("MOCK0", Echo::Exact);
        let mut session = session_over(&port);
        session
            .run_rounds(1, &mut Vec::<RoundResult>::new())
            .unwrap();
        assert!(
            session
                .run_rounds(1, &mut Vec::<RoundResult>::new())
                .is_err()
        );
        assert_eq!(port.writes().len(), 1);
    }

    #[test]
    fn test_drop_releases_open_channel() {
        let port = MockPort::new("MOCK0", Echo::Exact);
        let session = session_over(&port);
        assert_eq!(session.state(), SessionState::Open);
        drop(session);
        assert_eq!(port.releases(), 1);
    }

    #[test]
    fn test_invalid_config_is_rejected_before_open() {
        let result: Result<LoopbackSession<MockPort>> =
            LoopbackSession::new(fast_config().with_payload_len(0));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_unrepresentable_interval_is_rejected_before_open() {
        let result: Result<LoopbackSession<MockPort>> =
            LoopbackSession::new(fast_config().with_frequency(1e-300));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_sleep_without_deadline_still_honours_interrupt() {
        let session = LoopbackSession::<MockPort>::new(fast_config())
            .unwrap()
            .with_interrupt_checker(|| true);
        let started = Instant::now();
        session.sleep_interruptibly(Duration::MAX);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_run_loopback_helper_opens_and_releases() {
        let port = MockPort::new("MOCK0", Echo::Exact).fail_write_at(1);
        let moved = port.clone();
        let mut rounds: Vec<RoundResult> = Vec::new();

        let result = run_loopback(
            fast_config(),
            &mut move |_: &SerialConfig| Ok::<_, Error>(moved.clone()),
            &mut rounds,
        );

        assert!(result.is_err());
        assert_eq!(rounds.len(), 1);
        assert_eq!(port.releases(), 1);
    }
}
