//! logprobe CLI - Bench checks for the ESP32-C3 UART logger.
//!
//! ## Features
//!
//! - Serial loopback soak test with per-round PASS/FAIL output
//! - BLE probe that finds the logger by name and reads its MTU
//! - Serial port discovery and interactive selection
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod commands;
mod config;
mod serial;

use commands::completions::{cmd_completions, cmd_completions_install};
use commands::list_ports::cmd_list_ports;
use commands::loopback::cmd_loopback;
use commands::mtu::cmd_mtu;
use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// logprobe - Loopback and BLE checks for the ESP32-C3 UART logger.
///
/// Environment variables:
///   LOGPROBE_PORT              - Default serial port
///   LOGPROBE_BAUD              - Default baud rate (default: 115200)
///   LOGPROBE_LENGTH            - Loopback payload length (default: 100)
///   LOGPROBE_FREQUENCY         - Loopback rounds per second (default: 10)
///   LOGPROBE_BLE_NAME          - Advertised BLE name to probe
///   LOGPROBE_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser, Debug)]
#[command(name = "logprobe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "LOGPROBE_PORT")]
    port: Option<String>,

    /// Serial baud rate [default: 115200].
    #[arg(short, long, global = true, env = "LOGPROBE_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "LOGPROBE_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    confirm_port: bool,

    /// List all available ports (including unknown types).
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Write random payloads to the logger and check they are echoed back.
    Loopback(LoopbackArgs),

    /// Find the logger over BLE and read its negotiated MTU.
    Mtu(MtuArgs),

    /// List available serial ports.
    ListPorts {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (auto-detected with --install if omitted).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Install completions for the current shell.
        #[arg(long)]
        install: bool,
    },
}

/// Options of the `loopback` command.
#[derive(Args, Debug)]
struct LoopbackArgs {
    /// Characters per payload [default: 100].
    #[arg(short = 'n', long, env = "LOGPROBE_LENGTH")]
    length: Option<usize>,

    /// Rounds per second [default: 10].
    #[arg(short, long, env = "LOGPROBE_FREQUENCY")]
    frequency: Option<f64>,

    /// Stop after this many rounds instead of running until Ctrl+C.
    #[arg(long)]
    rounds: Option<u64>,

    /// Delay between writing a payload and draining the echo, in ms [default: 100].
    #[arg(long, value_name = "MS")]
    settle_ms: Option<u64>,

    /// Serial read timeout, in ms [default: 1000].
    #[arg(long, value_name = "MS")]
    read_timeout_ms: Option<u64>,

    /// Seed for reproducible payloads.
    #[arg(long)]
    seed: Option<u64>,
}

/// Options of the `mtu` command.
#[derive(Args, Debug)]
struct MtuArgs {
    /// Advertised name to look for (case-insensitive substring) [default: ESP32C3_UARTLOGGER].
    #[arg(long, env = "LOGPROBE_BLE_NAME")]
    name: Option<String>,

    /// Scan window in seconds [default: 5].
    #[arg(long, value_name = "SECS")]
    scan_secs: Option<u64>,

    /// GATT characteristic UUID read for the MTU when the stack reports none.
    #[arg(long, value_name = "UUID")]
    mtu_characteristic: Option<String>,

    /// Output in JSON format.
    #[arg(long)]
    json: bool,
}

/// Failures with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
enum CliError {
    /// Bad invocation or a port choice that needs the user.
    #[error("{0}")]
    Usage(String),
    /// Invalid configuration value.
    #[error("{0}")]
    Config(String),
    /// BLE device or MTU not found.
    #[error("{0}")]
    NotFound(String),
    /// The serial or BLE transport failed.
    #[error("{0}")]
    Transport(String),
    /// Interrupted or cancelled by the user.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::NotFound(_) => 1,
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
            Self::Transport(_) => 4,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Map an error chain to a process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return cli_err.exit_code();
    }

    for cause in err.chain() {
        if let Some(lib_err) = cause.downcast_ref::<logprobe::Error>() {
            return match lib_err {
                logprobe::Error::InvalidConfig(_) => 3,
                logprobe::Error::DeviceNotFound => 2,
                e if e.is_transport() => 4,
                _ => 1,
            };
        }
    }

    1
}

fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Route Ctrl-C into the library's interrupt checker. A second Ctrl-C exits at once.
fn install_interrupt_handler() {
    let installed = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::Relaxed) {
            std::process::exit(130);
        }
    });
    if let Err(e) = installed {
        debug!("Failed to install Ctrl-C handler: {e}");
    }
    logprobe::set_interrupt_checker(was_interrupted);
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = exit_code_for(&err);
            if code == 130 {
                eprintln!("{} {err:#}", style("Interrupted:").yellow().bold());
            } else {
                eprintln!("{} {err:#}", style("Error:").red().bold());
            }
            ExitCode::from(code)
        },
    }
}

fn run() -> Result<()> {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "logprobe v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Loopback(args) => {
            install_interrupt_handler();
            cmd_loopback(&cli, &mut config, args)?;
        },
        Commands::Mtu(args) => {
            cmd_mtu(&config, args)?;
        },
        Commands::ListPorts { json } => {
            cmd_list_ports(&config, *json);
        },
        Commands::Completions { shell, install } => {
            if *install {
                cmd_completions_install(*shell)?;
            } else {
                let shell = shell.ok_or_else(|| {
                    CliError::Usage(
                        "specify a shell type, e.g.: logprobe completions bash \
                         (or use `logprobe completions --install`)"
                            .to_string(),
                    )
                })?;
                cmd_completions(shell);
            }
        },
    }

    Ok(())
}

/// Get serial port from CLI args or interactive selection.
fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };

    let selected = select_serial_port(&options, config)?;

    // Offer to remember unknown bridges, but never for an explicitly named port.
    if !selected.is_known && !cli.non_interactive && cli.port.is_none() {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name)
}
