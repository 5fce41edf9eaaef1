//! Interactive serial port selection.
//!
//! Picks the port the logger is attached to:
//! - Explicit `--port` / `LOGPROBE_PORT`, then `[loopback] port` from config
//! - Auto-detection of known USB bridges and configured `[[usb_device]]` entries
//! - Interactive selection via dialoguer
//! - Non-interactive mode for CI/CD

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    logprobe::{DetectedPort, detect_ports},
    log::{debug, error, info},
    std::{cmp::Ordering, io::IsTerminal},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// List all ports (including unknown types).
    pub list_all_ports: bool,
    /// Non-interactive mode (fail if multiple ports).
    pub non_interactive: bool,
    /// Force confirmation even for single recognized port.
    pub confirm_port: bool,
}

/// Result of port selection including whether it was a known device.
pub struct SelectedPort {
    /// The selected port info.
    pub port: DetectedPort,
    /// Whether this port matched a known/configured device.
    pub is_known: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    // Selection failures are setup problems: exit code 2, not 1.
    CliError::Usage(message.to_string()).into()
}

fn cancelled() -> anyhow::Error {
    CliError::Cancelled("Port selection cancelled".to_string()).into()
}

fn take_single(ports: Vec<DetectedPort>) -> Result<DetectedPort> {
    ports
        .into_iter()
        .next()
        .ok_or_else(|| usage_err("No serial ports available"))
}

fn select_non_interactive_port(
    selection_ports: Vec<DetectedPort>,
    config: &Config,
) -> Result<SelectedPort> {
    // Exactly one candidate is a valid auto-selection; anything else would need a prompt.
    match selection_ports
        .len()
        .cmp(&1)
    {
        Ordering::Equal => {
            let port = take_single(selection_ports)?;
            Ok(SelectedPort {
                is_known: is_known_device(&port, config),
                port,
            })
        },
        Ordering::Greater => Err(usage_err(
            "Found multiple serial ports; pass --port to choose one in non-interactive mode",
        )),
        Ordering::Less => Err(usage_err("No serial ports available")),
    }
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name, detect_ports(), config));
    }

    if let Some(port_name) = &config.loopback.port {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name, detect_ports(), config));
    }

    let ports = detect_ports();
    if ports.is_empty() {
        return Err(usage_err(
            "No serial ports found; connect the logger or pass --port",
        ));
    }

    // Known devices (built-in + config) first, unless the user asks for all.
    let known_ports: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| is_known_device(p, config))
        .cloned()
        .collect();

    let selection_ports = if options.list_all_ports || known_ports.is_empty() {
        ports
    } else {
        known_ports
    };

    if options.non_interactive {
        return select_non_interactive_port(selection_ports, config);
    }

    match selection_ports
        .len()
        .cmp(&1)
    {
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_port_interactive(selection_ports, config)
        },
        Ordering::Equal => {
            let port = take_single(selection_ports)?;
            let is_known = is_known_device(&port, config);

            if is_known && !options.confirm_port {
                info!(
                    "Auto-selected port: {} [{}]",
                    port.name,
                    port.device.name()
                );
                Ok(SelectedPort { port, is_known })
            } else {
                ensure_interactive_terminal()?;
                confirm_single_port(port)
            }
        },
        Ordering::Less => Err(usage_err("No serial ports available")),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Port selection needs an interactive terminal; pass --port",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                cancelled()
            } else {
                usage_err("Failed to show the port prompt")
            }
        },
    }
}

/// Resolve a user-given port name against the detected ports.
fn find_port_by_name(name: &str, ports: Vec<DetectedPort>, config: &Config) -> SelectedPort {
    // Exact match first, then case-insensitive (Windows COM names).
    let found = ports
        .iter()
        .position(|p| p.name == name)
        .or_else(|| {
            ports
                .iter()
                .position(|p| p.name.eq_ignore_ascii_case(name))
        });

    match found {
        Some(index) => {
            let port = ports.into_iter().nth(index).unwrap_or_else(|| DetectedPort::unlisted(name));
            SelectedPort {
                is_known: is_known_device(&port, config),
                port,
            }
        },
        // Not enumerated, but the user asked for it explicitly.
        None => SelectedPort {
            port: DetectedPort::unlisted(name),
            is_known: false,
        },
    }
}

/// Check if a port matches a known device (from config or built-in list).
pub fn is_known_device(port: &DetectedPort, config: &Config) -> bool {
    if port.device.is_known() {
        return true;
    }

    match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => config.is_configured_usb(vid, pid),
        _ => false,
    }
}

fn port_label(port: &DetectedPort, config: &Config) -> String {
    let name = if is_known_device(port, config) {
        style(&port.name)
            .bold()
            .to_string()
    } else {
        port.name.clone()
    };

    let device_info = if port.device.is_known() {
        format!(" [{}]", style(port.device.name()).yellow())
    } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{name}{device_info}{product}")
}

/// Interactive port selection.
fn select_port_interactive(mut ports: Vec<DetectedPort>, config: &Config) -> Result<SelectedPort> {
    eprintln!(
        "{} Detected {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );
    eprintln!("{}", style("Known USB bridges are shown in bold").dim());

    ports.sort_by_key(|p| !is_known_device(p, config));

    // Keep labels on one line in narrow terminals.
    let term_width = console::Term::stderr()
        .size()
        .1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|port| {
            console::truncate_str(&port_label(port, config), max_item_width, "\u{2026}")
                .into_owned()
        })
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the logger's serial port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let port = ports
                .into_iter()
                .nth(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
            let is_known = is_known_device(&port, config);
            Ok(SelectedPort { port, is_known })
        },
        None => Err(cancelled()),
    }
}

/// Confirm use of a single unrecognized port.
fn confirm_single_port(port: DetectedPort) -> Result<SelectedPort> {
    let product_info = port
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {}{product_info}?", port.name))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort {
            port,
            is_known: false,
        })
    } else {
        Err(cancelled())
    }
}

/// Ask user if they want to remember this port's USB device.
pub fn ask_remember_port(port: &DetectedPort, config: &mut Config) -> Result<()> {
    let (Some(vid), Some(pid)) = (port.vid, port.pid) else {
        return Ok(());
    };
    if config.is_configured_usb(vid, pid) {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!(
            "Remember USB device {vid:04X}:{pid:04X} as a logger for next time?"
        ))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        match config.remember_usb_device(vid, pid) {
            Ok(path) => debug!("Remembered {vid:04X}:{pid:04X} in {}", path.display()),
            Err(e) => error!("Failed to save port configuration: {e}"),
        }
    }

    Ok(())
}
