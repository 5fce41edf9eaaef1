//! Configuration file support for logprobe.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (LOGPROBE_*)
//! 3. Local config file (./logprobe.toml)
//! 4. Global config file (~/.config/logprobe/config.toml)
//!
//! `--config <PATH>` replaces steps 3 and 4 with a single file.

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-directory config file.
pub const LOCAL_CONFIG_FILE: &str = "logprobe.toml";

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// `[loopback]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoopbackConfig {
    /// Serial port (e.g., "/dev/ttyUSB0" or "COM7").
    pub port: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
    /// Characters per payload.
    pub payload_len: Option<usize>,
    /// Rounds per second.
    pub frequency: Option<f64>,
    /// Delay between write and drain, in milliseconds.
    pub settle_ms: Option<u64>,
    /// Serial read timeout, in milliseconds.
    pub read_timeout_ms: Option<u64>,
}

/// `[ble]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BleConfig {
    /// Advertised name to look for.
    pub target_name: Option<String>,
    /// Scan window in seconds.
    pub scan_secs: Option<u64>,
    /// GATT characteristic read for the MTU when the stack reports none.
    pub mtu_characteristic: Option<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Loopback settings.
    #[serde(default)]
    pub loopback: LoopbackConfig,
    /// BLE probe settings.
    #[serde(default)]
    pub ble: BleConfig,
    /// Extra USB devices treated as known loggers.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

impl Config {
    /// Load configuration from the global and local files.
    pub fn load() -> Self {
        Self::load_layered(Self::global_config_path().as_deref(), Path::new(LOCAL_CONFIG_FILE))
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Merge `global` then `local`, skipping files that are absent or broken.
    fn load_layered(global: Option<&Path>, local: &Path) -> Self {
        let mut config = Self::default();

        if let Some(global_path) = global {
            if let Some(global_config) = Self::load_from_file(global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(local) {
            debug!("Loaded local config from {}", local.display());
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "logprobe").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; set values in `other` win.
    fn merge(&mut self, other: Self) {
        let Self {
            loopback,
            ble,
            usb_device,
        } = other;

        // Loopback config
        if loopback.port.is_some() {
            self.loopback.port = loopback.port;
        }
        if loopback.baud.is_some() {
            self.loopback.baud = loopback.baud;
        }
        if loopback.payload_len.is_some() {
            self.loopback.payload_len = loopback.payload_len;
        }
        if loopback.frequency.is_some() {
            self.loopback.frequency = loopback.frequency;
        }
        if loopback.settle_ms.is_some() {
            self.loopback.settle_ms = loopback.settle_ms;
        }
        if loopback.read_timeout_ms.is_some() {
            self.loopback.read_timeout_ms = loopback.read_timeout_ms;
        }

        // BLE config
        if ble.target_name.is_some() {
            self.ble.target_name = ble.target_name;
        }
        if ble.scan_secs.is_some() {
            self.ble.scan_secs = ble.scan_secs;
        }
        if ble.mtu_characteristic.is_some() {
            self.ble.mtu_characteristic = ble.mtu_characteristic;
        }

        for device in usb_device {
            if !self.usb_device.contains(&device) {
                self.usb_device.push(device);
            }
        }
    }

    /// Whether a VID/PID pair was configured as a known logger.
    pub fn is_configured_usb(&self, vid: u16, pid: u16) -> bool {
        self.usb_device
            .iter()
            .any(|d| d.matches(vid, pid))
    }

    /// Save USB device for future auto-detection.
    ///
    /// Written to the local file when one exists, otherwise to the global one.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<PathBuf> {
        let path = if Path::new(LOCAL_CONFIG_FILE).exists() {
            PathBuf::from(LOCAL_CONFIG_FILE)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("config.toml")
        } else {
            PathBuf::from(LOCAL_CONFIG_FILE)
        };

        self.remember_usb_device_at(&path, vid, pid)?;
        Ok(path)
    }

    fn remember_usb_device_at(&mut self, path: &Path, vid: u16, pid: u16) -> anyhow::Result<()> {
        let device = UsbDevice { vid, pid };
        if !self.usb_device.contains(&device) {
            self.usb_device.push(device.clone());
        }

        // Only touch the device list of the target file, keep its other keys.
        let mut on_disk = Self::load_from_file(path).unwrap_or_default();
        if on_disk.usb_device.contains(&device) {
            return Ok(());
        }
        on_disk.usb_device.push(device);

        let content = toml::to_string_pretty(&on_disk)?;
        fs::write(path, content)?;
        info!("Saved USB device to {}", path.display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    // ---- Default values ----

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.loopback.port.is_none());
        assert!(config.loopback.baud.is_none());
        assert!(config.ble.target_name.is_none());
        assert!(config.usb_device.is_empty());
    }

    // ---- UsbDevice ----

    #[test]
    fn test_usb_device_matches() {
        let device = UsbDevice {
            vid: 0x303A,
            pid: 0x1001,
        };
        assert!(device.matches(0x303A, 0x1001));
        assert!(!device.matches(0x303A, 0x0002));
        assert!(!device.matches(0x10C4, 0x1001));
    }

    // ---- Parsing ----

    #[test]
    fn test_parse_full_file() {
        let config: Config = toml::from_str(
            r#"
            [loopback]
            port = "/dev/ttyUSB0"
            baud = 921600
            payload_len = 64
            frequency = 2.5
            settle_ms = 20
            read_timeout_ms = 500

            [ble]
            target_name = "ESP32C3_UARTLOGGER"
            scan_secs = 8
            mtu_characteristic = "6e400004-b5a3-f393-e0a9-e50e24dcca9e"

            [[usb_device]]
            vid = 0x1A86
            pid = 0x55D3
            "#,
        )
        .unwrap();

        assert_eq!(config.loopback.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.loopback.baud, Some(921600));
        assert_eq!(config.loopback.payload_len, Some(64));
        assert_eq!(config.loopback.frequency, Some(2.5));
        assert_eq!(config.loopback.settle_ms, Some(20));
        assert_eq!(config.loopback.read_timeout_ms, Some(500));
        assert_eq!(config.ble.scan_secs, Some(8));
        assert!(config.is_configured_usb(0x1A86, 0x55D3));
    }

    #[test]
    fn test_parse_empty_file() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_rejects_wrong_types() {
        assert!(toml::from_str::<Config>("[loopback]\nbaud = \"fast\"\n").is_err());
    }

    // ---- Config merge ----

    #[test]
    fn test_config_merge_overrides_set_values_only() {
        let mut base = Config::default();
        base.loopback.port = Some("COM7".to_string());
        base.loopback.baud = Some(115200);

        let mut other = Config::default();
        other.loopback.baud = Some(460800);
        other.ble.target_name = Some("logger".to_string());

        base.merge(other);
        assert_eq!(base.loopback.port.as_deref(), Some("COM7"));
        assert_eq!(base.loopback.baud, Some(460800));
        assert_eq!(base.ble.target_name.as_deref(), Some("logger"));
    }

    #[test]
    fn test_config_merge_usb_devices_dedup() {
        let mut base = Config::default();
        base.usb_device.push(UsbDevice { vid: 1, pid: 2 });
        let mut other = Config::default();
        other.usb_device.push(UsbDevice { vid: 1, pid: 2 });
        other.usb_device.push(UsbDevice { vid: 3, pid: 4 });

        base.merge(other);
        assert_eq!(base.usb_device.len(), 2);
    }

    // ---- File loading ----

    #[test]
    fn test_local_overrides_global() {
        let dir = tempdir().unwrap();
        let global = dir.path().join("config.toml");
        let local = dir.path().join(LOCAL_CONFIG_FILE);
        fs::write(&global, "[loopback]\nport = \"COM3\"\nbaud = 57600\n").unwrap();
        fs::write(&local, "[loopback]\nbaud = 921600\n").unwrap();

        let config = Config::load_layered(Some(&global), &local);
        assert_eq!(config.loopback.port.as_deref(), Some("COM3"));
        assert_eq!(config.loopback.baud, Some(921600));
    }

    #[test]
    fn test_malformed_file_is_ignored() {
        let dir = tempdir().unwrap();
        let global = dir.path().join("config.toml");
        let local = dir.path().join(LOCAL_CONFIG_FILE);
        fs::write(&global, "[loopback]\nbaud = 57600\n").unwrap();
        fs::write(&local, "invalid toml [[[").unwrap();

        let config = Config::load_layered(Some(&global), &local);
        assert_eq!(config.loopback.baud, Some(57600));
    }

    #[test]
    fn test_load_from_missing_path_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from_path(&dir.path().join("absent.toml"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_remember_usb_device_keeps_other_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOCAL_CONFIG_FILE);
        fs::write(&path, "[loopback]\nport = \"COM7\"\n").unwrap();

        let mut config = Config::default();
        config
            .remember_usb_device_at(&path, 0x1A86, 0x7523)
            .unwrap();
        config
            .remember_usb_device_at(&path, 0x1A86, 0x7523)
            .unwrap();

        let saved = Config::load_from_path(&path);
        assert_eq!(saved.loopback.port.as_deref(), Some("COM7"));
        assert_eq!(saved.usb_device, vec![UsbDevice { vid: 0x1A86, pid: 0x7523 }]);
        assert_eq!(config.usb_device.len(), 1);
    }
}
