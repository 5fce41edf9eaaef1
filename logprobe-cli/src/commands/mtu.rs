//! BLE MTU probe command implementation.

use anyhow::Result;
use console::style;
use logprobe::MtuProbe;
use logprobe::ble::{DEFAULT_SCAN_WINDOW, DEFAULT_TARGET_NAME};
use std::io::{self, Write as _};
use std::time::Duration;

use crate::config::Config;
use crate::{CliError, MtuArgs};

/// Probe settings after merging flags, environment and config files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MtuSettings {
    pub(crate) name: String,
    pub(crate) window: Duration,
    pub(crate) characteristic: Option<String>,
}

pub(crate) fn resolve_settings(args: &MtuArgs, config: &Config) -> MtuSettings {
    let ble = &config.ble;
    MtuSettings {
        name: args
            .name
            .clone()
            .or_else(|| ble.target_name.clone())
            .unwrap_or_else(|| DEFAULT_TARGET_NAME.to_string()),
        window: args
            .scan_secs
            .or(ble.scan_secs)
            .map_or(DEFAULT_SCAN_WINDOW, Duration::from_secs),
        characteristic: args
            .mtu_characteristic
            .clone()
            .or_else(|| ble.mtu_characteristic.clone()),
    }
}

/// MTU command implementation.
pub(crate) fn cmd_mtu(config: &Config, args: &MtuArgs) -> Result<()> {
    let settings = resolve_settings(args, config);
    if settings.window.is_zero() {
        return Err(CliError::Config("scan window must be at least one second".to_string()).into());
    }

    let probe = run_probe(&settings)?;
    report(&mut io::stdout(), &probe, &settings.name, args.json)
}

#[cfg(feature = "ble")]
fn run_probe(settings: &MtuSettings) -> Result<MtuProbe> {
    use anyhow::Context;
    use indicatif::{ProgressBar, ProgressStyle};
    use logprobe::ble::bluest::{BluestCentral, parse_characteristic};

    let characteristic = settings
        .characteristic
        .as_deref()
        .map(parse_characteristic)
        .transpose()
        .map_err(|e| CliError::Config(e.to_string()))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let pb = if crate::use_fancy_output() {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(style);
        }
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    } else {
        ProgressBar::hidden()
    };
    pb.set_message(format!(
        "Scanning {}s for {}...",
        settings.window.as_secs(),
        settings.name
    ));

    let probe = runtime.block_on(async {
        let central = BluestCentral::default_adapter()
            .await?
            .with_mtu_characteristic(characteristic);
        logprobe::probe_mtu(&central, &settings.name, settings.window).await
    });
    pb.finish_and_clear();

    probe.context("BLE probe failed")
}

#[cfg(not(feature = "ble"))]
fn run_probe(_settings: &MtuSettings) -> Result<MtuProbe> {
    Err(logprobe::Error::Unsupported(
        "this build has no BLE backend; rebuild logprobe-cli with --features ble".to_string(),
    )
    .into())
}

/// Print the probe outcome. Anything but an MTU is a not-found error.
pub(crate) fn report(
    out: &mut dyn io::Write,
    probe: &MtuProbe,
    name: &str,
    json: bool,
) -> Result<()> {
    if json {
        let mut value = serde_json::to_value(probe)?;
        if let Some(fields) = value.as_object_mut() {
            fields.insert("name".to_string(), name.into());
        }
        writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
    }

    match probe {
        MtuProbe::Mtu { address, mtu } => {
            if !json {
                writeln!(out, "MTU size: {mtu}")?;
                eprintln!(
                    "{} Read MTU from {} ({})",
                    style("✓").green(),
                    style(name).cyan(),
                    address
                );
            }
            Ok(())
        },
        MtuProbe::MtuUnavailable { address } => Err(CliError::NotFound(format!(
            "Failed to get MTU size from {name} ({address})"
        ))
        .into()),
        MtuProbe::DeviceNotFound => {
            Err(CliError::NotFound(format!("Device {name} not found")).into())
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn mtu_args(argv: &[&str]) -> MtuArgs {
        match crate::Cli::try_parse_from(argv).unwrap().command {
            crate::Commands::Mtu(args) => args,
            _ => panic!("expected mtu command"),
        }
    }

    #[test]
    fn test_resolve_defaults() {
        let settings = resolve_settings(&mtu_args(&["logprobe", "mtu"]), &Config::default());
        assert_eq!(settings.name, "ESP32C3_UARTLOGGER");
        assert_eq!(settings.window, Duration::from_secs(5));
        assert!(settings.characteristic.is_none());
    }

    #[test]
    fn test_resolve_flag_beats_file() {
        let mut config = Config::default();
        config.ble.target_name = Some("bench".to_string());
        config.ble.scan_secs = Some(2);
        config.ble.mtu_characteristic = Some("file-uuid".to_string());

        let settings = resolve_settings(
            &mtu_args(&["logprobe", "mtu", "--name", "other", "--scan-secs", "9"]),
            &config,
        );
        assert_eq!(settings.name, "other");
        assert_eq!(settings.window, Duration::from_secs(9));
        assert_eq!(settings.characteristic.as_deref(), Some("file-uuid"));
    }

    #[test]
    fn test_report_mtu_succeeds() {
        let mut out = Vec::new();
        let probe = MtuProbe::Mtu {
            address: "AA:BB".to_string(),
            mtu: 247,
        };
        report(&mut out, &probe, "ESP32C3_UARTLOGGER", false).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "MTU size: 247\n");
    }

    #[test]
    fn test_report_not_found_is_not_found_error() {
        let mut out = Vec::new();
        let err = report(&mut out, &MtuProbe::DeviceNotFound, "ESP32C3_UARTLOGGER", false)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::NotFound(_))
        ));
        assert_eq!(crate::exit_code_for(&err), 1);
        assert!(out.is_empty());
    }

    #[test]
    fn test_report_unavailable_is_not_found_error() {
        let mut out = Vec::new();
        let probe = MtuProbe::MtuUnavailable {
            address: "AA:BB".to_string(),
        };
        let err = report(&mut out, &probe, "logger", false).unwrap_err();
        assert!(err.to_string().contains("AA:BB"));
        assert_eq!(crate::exit_code_for(&err), 1);
    }

    #[test]
    fn test_report_json_is_written_even_on_not_found() {
        let mut out = Vec::new();
        let _ = report(&mut out, &MtuProbe::DeviceNotFound, "logger", true);
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["status"], "device_not_found");
        assert_eq!(value["name"], "logger");

        let mut out = Vec::new();
        let probe = MtuProbe::Mtu {
            address: "AA:BB".to_string(),
            mtu: 185,
        };
        report(&mut out, &probe, "logger", true).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["mtu"], 185);
    }

    #[test]
    fn test_report_json_follows_library_serialization() {
        let probe = MtuProbe::MtuUnavailable {
            address: "AA:BB".to_string(),
        };
        let mut out = Vec::new();
        let _ = report(&mut out, &probe, "logger", true);
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();

        let mut expected = serde_json::to_value(&probe).unwrap();
        expected["name"] = "logger".into();
        assert_eq!(value, expected);
        assert_eq!(value["status"], "mtu_unavailable");
        assert_eq!(value["address"], "AA:BB");
        assert!(value.get("mtu").is_none());
    }

    #[cfg(not(feature = "ble"))]
    #[test]
    fn test_probe_without_backend_is_unsupported() {
        let settings = resolve_settings(&mtu_args(&["logprobe", "mtu"]), &Config::default());
        let err = run_probe(&settings).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<logprobe::Error>(),
            Some(logprobe::Error::Unsupported(_))
        ));
    }
}
