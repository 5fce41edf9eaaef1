//! List ports command implementation.

use console::style;
use logprobe::DetectedPort;

use crate::config::Config;
use crate::serial::is_known_device;

fn port_json(port: &DetectedPort, config: &Config) -> serde_json::Value {
    serde_json::json!({
        "name": port.name,
        "device": port.device.name(),
        "known": is_known_device(port, config),
        "vid": port.vid,
        "pid": port.pid,
        "manufacturer": port.manufacturer,
        "product": port.product,
        "serial": port.serial,
    })
}

pub(crate) fn ports_json(ports: &[DetectedPort], config: &Config) -> String {
    let values: Vec<serde_json::Value> = ports
        .iter()
        .map(|p| port_json(p, config))
        .collect();
    serde_json::to_string_pretty(&values).unwrap_or_else(|_| "[]".to_string())
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(config: &Config, json: bool) {
    let detected = logprobe::detect_ports();

    if json {
        println!("{}", ports_json(&detected, config));
        return;
    }

    eprintln!("{}", style("Available serial ports:").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return;
    }

    for port in &detected {
        let device_type = if is_known_device(port, config) {
            format!(" [{}]", style(port.device.name()).yellow())
        } else {
            String::new()
        };

        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };

        let product = match port.product.as_deref() {
            Some(product) if !product.is_empty() => format!(" - {}", style(product).dim()),
            _ => String::new(),
        };

        eprintln!(
            "  {} {}{device_type}{vid_pid}{product}",
            style("•").green(),
            style(&port.name).cyan(),
        );
    }

    if let Ok(auto_port) = logprobe::auto_detect_port() {
        eprintln!(
            "\n{} Auto-detected: {}",
            style("→").green().bold(),
            style(&auto_port.name).cyan().bold()
        );
    }
}
