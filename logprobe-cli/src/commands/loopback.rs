//! Serial loopback command implementation.
//!
//! Prints one line per round on stdout; status lines go to stderr.

use anyhow::{Context, Result};
use console::style;
use log::debug;
use logprobe::loopback::{
    DEFAULT_BAUD, DEFAULT_FREQUENCY, DEFAULT_PAYLOAD_LEN, DEFAULT_READ_TIMEOUT, SETTLE_DELAY,
};
use logprobe::{
    LoopbackSession, RoundObserver, RoundResult, SequenceGenerator, SessionConfig, SessionOutcome,
    Verdict,
};
use std::io::{self, Write as _};
use std::time::Duration;

use crate::config::Config;
use crate::{Cli, CliError, LoopbackArgs, get_port};

/// Merge flags, environment and config files into a session configuration.
///
/// `port` is the already selected port name.
pub(crate) fn resolve_session_config(
    cli: &Cli,
    args: &LoopbackArgs,
    config: &Config,
    port: String,
) -> SessionConfig {
    let file = &config.loopback;
    let baud = cli
        .baud
        .or(file.baud)
        .unwrap_or(DEFAULT_BAUD);

    let mut session = SessionConfig::new(port, baud)
        .with_payload_len(
            args.length
                .or(file.payload_len)
                .unwrap_or(DEFAULT_PAYLOAD_LEN),
        )
        .with_frequency(
            args.frequency
                .or(file.frequency)
                .unwrap_or(DEFAULT_FREQUENCY),
        );

    session.settle = args
        .settle_ms
        .or(file.settle_ms)
        .map_or(SETTLE_DELAY, Duration::from_millis);
    session.read_timeout = args
        .read_timeout_ms
        .or(file.read_timeout_ms)
        .map_or(DEFAULT_READ_TIMEOUT, Duration::from_millis);
    session
}

/// Writes round lines to stdout and lifecycle lines to stderr.
pub(crate) struct ConsoleObserver<W: io::Write> {
    out: W,
    quiet: bool,
    total: u64,
    passed: u64,
}

impl<W: io::Write> ConsoleObserver<W> {
    pub(crate) fn new(out: W, quiet: bool) -> Self {
        Self {
            out,
            quiet,
            total: 0,
            passed: 0,
        }
    }

    fn summary(&self) -> String {
        format!("{}/{} rounds passed", self.passed, self.total)
    }
}

/// `[round N] PASS sent=... received="..."`
pub(crate) fn format_round(result: &RoundResult) -> String {
    let verdict = match result.verdict {
        Verdict::Pass => style(result.verdict.label()).green(),
        Verdict::Fail => style(result.verdict.label()).red().bold(),
    };
    let lossy = if result.lossy { " (invalid UTF-8)" } else { "" };
    format!(
        "[round {}] {verdict} sent={} received={:?}{lossy}",
        result.round, result.payload, result.text
    )
}

impl<W: io::Write> RoundObserver for ConsoleObserver<W> {
    fn on_open(&mut self, port: &str, baud_rate: u32) {
        if !self.quiet {
            eprintln!(
                "{} Opened {} at {baud_rate} baud",
                style("🔌").cyan(),
                style(port).cyan()
            );
        }
    }

    fn on_round(&mut self, result: &RoundResult) {
        self.total += 1;
        if result.is_pass() {
            self.passed += 1;
        }
        // A closed stdout (e.g. `| head`) must not abort the session.
        if writeln!(self.out, "{}", format_round(result)).is_err() {
            debug!("stdout closed, dropping round {}", result.round);
        }
        let _ = self.out.flush();
    }

    fn on_close(&mut self, port: &str) {
        if !self.quiet {
            eprintln!(
                "{} Closed {} ({})",
                style("✓").green(),
                style(port).cyan(),
                self.summary()
            );
        }
    }
}

/// Loopback command implementation.
pub(crate) fn cmd_loopback(cli: &Cli, config: &mut Config, args: &LoopbackArgs) -> Result<()> {
    // Reject bad numbers before touching any port.
    let probe = resolve_session_config(cli, args, config, "-".to_string());
    probe
        .validate()
        .map_err(|e| CliError::Config(e.to_string()))?;

    let port = get_port(cli, config)?;
    let session_config = resolve_session_config(cli, args, config, port);
    debug!("Session config: {session_config:?}");

    let mut session = match args.seed {
        Some(seed) => LoopbackSession::with_rng(session_config, SequenceGenerator::seeded(seed))?,
        None => LoopbackSession::new(session_config)?,
    };

    if !cli.quiet && crate::use_fancy_output() {
        eprintln!("{}", style("Press Ctrl+C to stop").dim());
    }

    session
        .open(&mut logprobe::NativePort::open)
        .context("Failed to open serial port")?;

    let mut observer = ConsoleObserver::new(io::stdout(), cli.quiet);
    let outcome = match args.rounds {
        Some(limit) => session.run_rounds(limit, &mut observer),
        None => session.run(&mut observer),
    }
    .map_err(|e| -> anyhow::Error {
        if e.is_transport() {
            CliError::Transport(format!("Loopback session aborted: {e}")).into()
        } else {
            e.into()
        }
    })?;

    match outcome {
        SessionOutcome::Completed { .. } => Ok(()),
        SessionOutcome::Interrupted { rounds } => Err(CliError::Cancelled(format!(
            "Interrupted after {rounds} rounds ({})",
            observer.summary()
        ))
        .into()),
    }
}
