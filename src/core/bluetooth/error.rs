//! Error taxonomy for scan and connection operations.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::core::bluetooth::permission::Capability;
use crate::core::bluetooth::types::LinkState;

/// Every failure the scanner or the connection controller can surface.
/// The `Display` text is the one human-readable reason shown to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BleError {
    #[error("Bluetooth unsupported on this device")]
    UnsupportedRadio,
    #[error("Bluetooth disabled on this device")]
    RadioDisabled,
    #[error("Missing permissions: {}", format_capabilities(.0))]
    PermissionDenied(BTreeSet<Capability>),
    #[error("Location disabled; enable a location provider to scan")]
    LocationServiceRequired,
    #[error("Scan failed: {0}")]
    ScanFailed(i32),
    #[error("Device not found: {0}")]
    AddressNotFound(String),
    #[error("GATT status={status} state={state}")]
    LinkError { status: i32, state: LinkState },
    #[error("Discover failed: {0}")]
    DiscoveryFailed(i32),
    #[error("Bluetooth platform error: {0}")]
    Platform(String),
}

fn format_capabilities(capabilities: &BTreeSet<Capability>) -> String {
    capabilities
        .iter()
        .map(|capability| capability.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_lists_every_missing_capability() {
        let missing: BTreeSet<_> = [Capability::BluetoothConnect, Capability::BluetoothScan]
            .into_iter()
            .collect();
        let message = BleError::PermissionDenied(missing).to_string();
        assert_eq!(message, "Missing permissions: BLUETOOTH_SCAN, BLUETOOTH_CONNECT");
    }

    #[test]
    fn link_error_reports_status_and_state() {
        let err = BleError::LinkError {
            status: 133,
            state: LinkState::Disconnected,
        };
        assert_eq!(err.to_string(), "GATT status=133 state=DISCONNECTED");
    }
}
