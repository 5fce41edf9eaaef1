//! BLE MTU probe for the logger's BLE interface.
//!
//! The probe scans for a device whose advertised name contains a pattern,
//! connects to it, reads the negotiated ATT MTU and disconnects again. The
//! radio stack sits behind [`BleCentral`] so the probe logic is independent of
//! the backend; the `ble` feature provides one over `bluest`.
//!
//! A missing device or an unreadable MTU is an ordinary outcome: the probe
//! returns `None` for it. Only a broken stack (no adapter, scan failure) is an
//! error.

#[cfg(feature = "ble")]
pub mod bluest;

use std::time::Duration;

use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, warn};

use crate::error::Result;
use crate::matcher::contains_ignore_case;

/// Advertised name of the UART logger firmware.
pub const DEFAULT_TARGET_NAME: &str = "ESP32C3_UARTLOGGER";

/// Default scan window.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(5);

/// A device seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Backend-specific device address.
    pub address: String,
}

/// Scanning and connecting side of a BLE stack.
#[async_trait]
pub trait BleCentral: Send + Sync {
    /// Scan for `window` and return every device seen.
    async fn scan(&self, window: Duration) -> Result<Vec<Advertisement>>;

    /// Connect to the device at `address`.
    async fn connect(&self, address: &str) -> Result<Box<dyn BleLink>>;
}

/// An established BLE connection.
#[async_trait]
pub trait BleLink: Send + Sync {
    /// Whether the link is still up.
    async fn is_connected(&self) -> Result<bool>;

    /// ATT MTU negotiated by the stack, if the backend can report it.
    async fn att_mtu(&self) -> Result<Option<u16>>;

    /// MTU published by the firmware in a GATT characteristic, if one is
    /// configured.
    async fn characteristic_mtu(&self) -> Result<Option<u16>>;

    /// Tear the connection down.
    async fn disconnect(&mut self) -> Result<()>;
}

/// Result of a full scan/connect/read probe.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "status", rename_all = "snake_case"))]
pub enum MtuProbe {
    /// No advertised name matched.
    DeviceNotFound,
    /// The device was found but no MTU could be read.
    MtuUnavailable {
        /// Address of the matched device.
        address: String,
    },
    /// The MTU was read.
    Mtu {
        /// Address of the matched device.
        address: String,
        /// Negotiated MTU in bytes.
        mtu: u16,
    },
}

impl MtuProbe {
    /// The MTU, when one was obtained.
    pub fn mtu(&self) -> Option<u16> {
        match self {
            Self::Mtu { mtu, .. } => Some(*mtu),
            _ => None,
        }
    }
}

/// Decode an MTU reported as a little-endian `u16`.
///
/// Extra trailing bytes are ignored; fewer than two bytes or a zero value
/// mean no MTU.
pub fn mtu_from_le_bytes(bytes: &[u8]) -> Option<u16> {
    if bytes.len() < 2 {
        return None;
    }
    match LittleEndian::read_u16(bytes) {
        0 => None,
        mtu => Some(mtu),
    }
}

/// First advertisement whose name contains `name_pattern`, ignoring case.
pub fn find_advertisement<'a>(
    advertisements: &'a [Advertisement],
    name_pattern: &str,
) -> Option<&'a Advertisement> {
    advertisements.iter().find(|adv| {
        adv.name
            .as_deref()
            .is_some_and(|name| contains_ignore_case(name, name_pattern))
    })
}

/// Scan for `window` and return the address of the first matching device.
pub async fn discover_device_address<C>(
    central: &C,
    name_pattern: &str,
    window: Duration,
) -> Result<Option<String>>
where
    C: BleCentral + ?Sized,
{
    debug!("Scanning {window:?} for \"{name_pattern}\"");
    let advertisements = central.scan(window).await?;
    debug!("Scan saw {} devices", advertisements.len());

    let found = find_advertisement(&advertisements, name_pattern).map(|adv| {
        info!(
            "Found {} at {}",
            adv.name.as_deref().unwrap_or_default(),
            adv.address
        );
        adv.address.clone()
    });
    Ok(found)
}

/// Connect to `address`, read the MTU and disconnect.
///
/// The link is always disconnected once established, even if the MTU read
/// fails. Connection failures and unreadable MTUs yield `None`.
pub async fn connect_and_get_mtu<C>(central: &C, address: &str) -> Option<u16>
where
    C: BleCentral + ?Sized,
{
    let mut link = match central.connect(address).await {
        Ok(link) => link,
        Err(e) => {
            warn!("Failed to connect to {address}: {e}");
            return None;
        },
    };

    let mtu = read_mtu(link.as_ref()).await;

    if let Err(e) = link.disconnect().await {
        warn!("Failed to disconnect from {address}: {e}");
    }
    mtu
}

async fn read_mtu(link: &dyn BleLink) -> Option<u16> {
    match link.is_connected().await {
        Ok(true) => {},
        Ok(false) => {
            warn!("Link dropped before the MTU could be read");
            return None;
        },
        Err(e) => {
            warn!("Failed to query link state: {e}");
            return None;
        },
    }

    match link.att_mtu().await {
        Ok(Some(mtu)) => return Some(mtu),
        Ok(None) => debug!("Stack did not report an ATT MTU"),
        Err(e) => warn!("Failed to query ATT MTU: {e}"),
    }

    match link.characteristic_mtu().await {
        Ok(Some(mtu)) => Some(mtu),
        Ok(None) => {
            warn!("No MTU reported by the stack or a characteristic");
            None
        },
        Err(e) => {
            warn!("Failed to read MTU characteristic: {e}");
            None
        },
    }
}

/// Discover the device named like `name_pattern` and read its MTU.
pub async fn probe_mtu<C>(central: &C, name_pattern: &str, window: Duration) -> Result<MtuProbe>
where
    C: BleCentral + ?Sized,
{
    let Some(address) = discover_device_address(central, name_pattern, window).await? else {
        return Ok(MtuProbe::DeviceNotFound);
    };

    Ok(match connect_and_get_mtu(central, &address).await {
        Some(mtu) => MtuProbe::Mtu { address, mtu },
        None => MtuProbe::MtuUnavailable { address },
    })
}
