//! Bluetooth functionality
//! This module handles scanning for advertising devices and managing a single
//! GATT connection, including service discovery.

pub mod constants;
pub mod device;
pub mod error;
pub mod permission;
pub mod radio;
pub mod scanner;
pub mod types;

mod connection;
mod manager;

#[cfg(feature = "bluest")]
pub mod bluest_radio;
#[cfg(test)]
pub(crate) mod fake;

// Re-export types that should be publicly accessible
pub use connection::ConnectionController;
pub use device::{ScannedDevice, extract_mac_address, normalize_address};
pub use error::BleError;
pub use manager::BluetoothManager;
pub use permission::{Capability, LocationProvider, PermissionGate, PlatformContext, PlatformProfile};
pub use radio::{
    Advertisement, GattCallback, GattEvent, GattSession, RadioAdapter, RemoteDevice, ScanCallback,
    ScanEvent, ScanMode, ScanRegistration, ScanSettings,
};
pub use scanner::{ScanEnd, ScanSession, ScanState, ScanSummary};
pub use types::{ConnectionState, GattCharacteristic, GattService, LinkState, ServiceCatalog};
