//! `bluest` backend for the BLE probe.
//!
//! The ATT MTU comes from the stack: the largest write the platform accepts
//! on any discovered characteristic plus the 3-byte ATT header. A GATT
//! characteristic publishing the MTU (little-endian `u16`) can be configured
//! as a fallback for stacks that report no write length.

use std::sync::Mutex;
use std::time::Duration;

use ::bluest::{Adapter, AdvertisingDevice, Characteristic, Device};
use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, trace, warn};
use uuid::Uuid;

use super::{Advertisement, BleCentral, BleLink, mtu_from_le_bytes};
use crate::error::{Error, Result};

/// ATT header bytes that precede the value in a write request.
pub const ATT_HEADER_LEN: usize = 3;

fn ble_err(context: &str, err: ::bluest::Error) -> Error {
    Error::Ble(format!("{context}: {err}"))
}

/// Parse a characteristic UUID from its textual form.
pub fn parse_characteristic(text: &str) -> Result<Uuid> {
    Uuid::parse_str(text.trim())
        .map_err(|e| Error::InvalidConfig(format!("invalid characteristic UUID {text:?}: {e}")))
}

/// ATT MTU for a platform-reported maximum write length.
///
/// Lengths that do not fit a `u16` MTU are not an MTU.
pub fn att_mtu_from_write_len(max_write_len: usize) -> Option<u16> {
    max_write_len
        .checked_add(ATT_HEADER_LEN)
        .and_then(|mtu| u16::try_from(mtu).ok())
}

/// BLE central backed by the platform's default adapter.
pub struct BluestCentral {
    adapter: Adapter,
    mtu_characteristic: Option<Uuid>,
    // Devices from the last scan, keyed by the address handed out.
    seen: Mutex<Vec<(String, Device)>>,
}

impl BluestCentral {
    /// Open the default adapter and wait until it is powered on.
    pub async fn default_adapter() -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| Error::Ble("no Bluetooth adapter found".to_string()))?;
        adapter
            .wait_available()
            .await
            .map_err(|e| ble_err("adapter is not available", e))?;
        debug!("Bluetooth adapter is available");

        Ok(Self {
            adapter,
            mtu_characteristic: None,
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Characteristic to read the MTU from when the stack reports none.
    #[must_use]
    pub fn with_mtu_characteristic(mut self, uuid: Option<Uuid>) -> Self {
        self.mtu_characteristic = uuid;
        self
    }

    fn known_device(&self, address: &str) -> Result<Device> {
        let seen = self
            .seen
            .lock()
            .map_err(|_| Error::Ble("device table poisoned".to_string()))?;
        seen.iter()
            .find(|(known, _)| known == address)
            .map(|(_, device)| device.clone())
            .ok_or_else(|| Error::Ble(format!("device {address} was not seen in the last scan")))
    }
}

fn device_address(device: &Device) -> String {
    format!("{:?}", device.id())
}

fn record(seen: &mut Vec<Advertisement>, devices: &mut Vec<(String, Device)>, found: AdvertisingDevice) {
    let address = device_address(&found.device);
    let name = found
        .adv_data
        .local_name
        .or_else(|| found.device.name().ok());
    trace!("Advertisement from {address}: {name:?}");

    if let Some(existing) = seen.iter_mut().find(|adv| adv.address == address) {
        if existing.name.is_none() {
            existing.name = name;
        }
        return;
    }
    seen.push(Advertisement {
        name,
        address: address.clone(),
    });
    devices.push((address, found.device));
}

#[async_trait]
impl BleCentral for BluestCentral {
    async fn scan(&self, window: Duration) -> Result<Vec<Advertisement>> {
        let mut stream = self
            .adapter
            .scan(&[])
            .await
            .map_err(|e| ble_err("failed to start scan", e))?;

        let mut seen = Vec::new();
        let mut devices = Vec::new();
        let collect = async {
            while let Some(found) = stream.next().await {
                record(&mut seen, &mut devices, found);
            }
        };
        if tokio::time::timeout(window, collect).await.is_ok() {
            debug!("Scan stream ended before the window closed");
        }

        match self.seen.lock() {
            Ok(mut known) => *known = devices,
            Err(_) => return Err(Error::Ble("device table poisoned".to_string())),
        }
        Ok(seen)
    }

    async fn connect(&self, address: &str) -> Result<Box<dyn BleLink>> {
        let device = self.known_device(address)?;
        if !device.is_connected().await {
            self.adapter
                .connect_device(&device)
                .await
                .map_err(|e| ble_err("failed to connect", e))?;
        }

        let mut link = BluestLink {
            adapter: self.adapter.clone(),
            device,
            characteristics: Vec::new(),
            mtu_characteristic: self.mtu_characteristic,
        };
        // Keep the link on failure so the caller's disconnect still runs.
        match link.discover().await {
            Ok(characteristics) => link.characteristics = characteristics,
            Err(e) => warn!("Service discovery failed: {e}"),
        }
        Ok(Box::new(link))
    }
}

struct BluestLink {
    adapter: Adapter,
    device: Device,
    characteristics: Vec<Characteristic>,
    mtu_characteristic: Option<Uuid>,
}

impl BluestLink {
    async fn discover(&self) -> Result<Vec<Characteristic>> {
        let services = self
            .device
            .discover_services()
            .await
            .map_err(|e| ble_err("failed to discover services", e))?;

        let mut characteristics = Vec::new();
        for service in services {
            match service.discover_characteristics().await {
                Ok(found) => characteristics.extend(found),
                Err(e) => warn!("Characteristic discovery failed: {e}"),
            }
        }
        debug!("Discovered {} characteristics", characteristics.len());
        Ok(characteristics)
    }
}

#[async_trait]
impl BleLink for BluestLink {
    async fn is_connected(&self) -> Result<bool> {
        Ok(self.device.is_connected().await)
    }

    async fn att_mtu(&self) -> Result<Option<u16>> {
        let mut last_err = None;
        for characteristic in &self.characteristics {
            match characteristic.max_write_len() {
                Ok(len) => {
                    trace!("Max write length {len} on {}", characteristic.uuid());
                    return Ok(att_mtu_from_write_len(len));
                },
                Err(e) => last_err = Some(e),
            }
        }
        match last_err {
            Some(e) => Err(ble_err("failed to query write length", e)),
            None => Ok(None),
        }
    }

    async fn characteristic_mtu(&self) -> Result<Option<u16>> {
        let Some(uuid) = self.mtu_characteristic else {
            return Ok(None);
        };
        let Some(characteristic) = self
            .characteristics
            .iter()
            .find(|c| c.uuid() == uuid)
        else {
            warn!("Characteristic {uuid} not found on {}", device_address(&self.device));
            return Ok(None);
        };
        let value = characteristic
            .read()
            .await
            .map_err(|e| ble_err("failed to read MTU characteristic", e))?;
        trace!("MTU characteristic value: {value:02X?}");
        Ok(mtu_from_le_bytes(&value))
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.adapter
            .disconnect_device(&self.device)
            .await
            .map_err(|e| ble_err("failed to disconnect", e))
    }
}
