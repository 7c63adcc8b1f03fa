//! Bluetooth device representation and related functionality

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::core::bluetooth::constants::UNKNOWN_DEVICE_NAME;

/// One unique advertiser observed during a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScannedDevice {
    /// The advertised name, if the device sends one and the platform exposes it
    pub name: Option<String>,
    /// Hardware address; the deduplication key
    pub address: String,
    /// The signal strength (RSSI) in dBm
    pub rssi: i16,
    /// Whether the advertisement marks the device as connectable
    pub connectable: bool,
}

impl ScannedDevice {
    /// Creates a new ScannedDevice instance
    pub fn new(name: Option<String>, address: String, rssi: i16, connectable: bool) -> Self {
        Self {
            name,
            address,
            rssi,
            connectable,
        }
    }

    /// Name suitable for display, falling back to a placeholder
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_DEVICE_NAME)
    }
}

fn mac_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").expect("MAC pattern is valid")
    })
}

/// Pulls a MAC address out of a platform device identifier.
/// Identifiers often wrap the address (e.g. `BluetoothLE#BluetoothLEaa:bb:...-11:22:33:44:55:66`),
/// in which case the last match is the remote address. Returned upper-case, colon-separated.
pub fn extract_mac_address(device_id: &str) -> Option<String> {
    mac_pattern()
        .find_iter(device_id)
        .last()
        .map(|m| m.as_str().replace('-', ":").to_uppercase())
}

/// Canonical form of an address used as the deduplication and lookup key.
/// Identifiers without an embedded MAC (e.g. CoreBluetooth UUIDs) are kept verbatim.
pub fn normalize_address(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(extract_mac_address(trimmed).unwrap_or_else(|| trimmed.to_string()))
}
