//! Defines shared data structures for the Bluetooth module.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    PROPERTY_INDICATE, PROPERTY_NOTIFY, PROPERTY_READ, PROPERTY_WRITE, PROPERTY_WRITE_NO_RESPONSE,
};
use crate::core::bluetooth::error::BleError;

/// The published state of the single managed connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection resources held
    #[default]
    Disconnected,
    /// Link establishment or service discovery in progress
    Connecting,
    /// Link live, service catalog available
    Connected,
    /// The last attempt ended with this cause
    Failed(BleError),
}

impl ConnectionState {
    /// Returns true for the states that resolve a pending connect call
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConnectionState::Connecting)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Human-readable reason accompanying a failure
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            ConnectionState::Failed(cause) => Some(cause.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Failed(cause) => write!(f, "Failed: {}", cause),
        }
    }
}

/// Link-layer state reported by the radio with each connection-state callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LinkState::Disconnected => "DISCONNECTED",
            LinkState::Connecting => "CONNECTING",
            LinkState::Connected => "CONNECTED",
            LinkState::Disconnecting => "DISCONNECTING",
        };
        f.write_str(label)
    }
}

/// A characteristic discovered inside a GATT service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    /// Standard GATT property bitmask (read/write/notify...)
    pub properties: u32,
}

impl GattCharacteristic {
    pub fn new(uuid: Uuid, properties: u32) -> Self {
        Self { uuid, properties }
    }

    pub fn can_read(&self) -> bool {
        self.properties & PROPERTY_READ != 0
    }

    pub fn can_write(&self) -> bool {
        self.properties & (PROPERTY_WRITE | PROPERTY_WRITE_NO_RESPONSE) != 0
    }

    pub fn can_notify(&self) -> bool {
        self.properties & PROPERTY_NOTIFY != 0
    }

    pub fn can_indicate(&self) -> bool {
        self.properties & PROPERTY_INDICATE != 0
    }
}

/// A discovered GATT service and its characteristics, in discovery order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    pub fn new(uuid: Uuid, characteristics: Vec<GattCharacteristic>) -> Self {
        Self {
            uuid,
            characteristics,
        }
    }
}

/// Services of the connected device, in discovery order. Empty unless connected.
pub type ServiceCatalog = Vec<GattService>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::PROPERTY_BROADCAST;

    #[test]
    fn only_connecting_is_non_terminal() {
        assert!(!ConnectionState::Connecting.is_terminal());
        assert!(ConnectionState::Connected.is_terminal());
        assert!(ConnectionState::Disconnected.is_terminal());
        assert!(ConnectionState::Failed(BleError::DiscoveryFailed(129)).is_terminal());
    }

    #[test]
    fn failure_reason_only_on_failed() {
        let failed = ConnectionState::Failed(BleError::AddressNotFound("AA".into()));
        assert_eq!(failed.failure_reason().as_deref(), Some("Device not found: AA"));
        assert_eq!(ConnectionState::Connected.failure_reason(), None);
    }

    #[test]
    fn property_helpers_decode_bitmask() {
        let notify_write =
            GattCharacteristic::new(Uuid::nil(), PROPERTY_NOTIFY | PROPERTY_WRITE_NO_RESPONSE);
        assert!(notify_write.can_notify());
        assert!(notify_write.can_write());
        assert!(!notify_write.can_read());
        assert!(!notify_write.can_indicate());

        let broadcast_only = GattCharacteristic::new(Uuid::nil(), PROPERTY_BROADCAST);
        assert!(!broadcast_only.can_write());
    }
}
