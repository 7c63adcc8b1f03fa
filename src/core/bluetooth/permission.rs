//! Platform capability checks run before any scan or connect attempt.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// An OS-granted permission required for radio operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Runtime permission to scan (newer platforms)
    BluetoothScan,
    /// Runtime permission to connect and read device names (newer platforms)
    BluetoothConnect,
    /// Fine location, which gates scanning on older platforms
    FineLocation,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Capability::BluetoothScan => "BLUETOOTH_SCAN",
            Capability::BluetoothConnect => "BLUETOOTH_CONNECT",
            Capability::FineLocation => "ACCESS_FINE_LOCATION",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationProvider {
    Gps,
    Network,
}

impl LocationProvider {
    pub const ALL: [LocationProvider; 2] = [LocationProvider::Gps, LocationProvider::Network];
}

/// Platform-version-dependent behaviour, fixed when the radio backend is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformProfile {
    /// Scan/connect runtime permissions exist; location is not required
    pub runtime_radio_permissions: bool,
    /// The advertisement connectable flag is reported reliably
    pub reports_connectable: bool,
}

impl PlatformProfile {
    /// Current platforms: dedicated radio permissions, reliable connectable flag
    pub const MODERN: PlatformProfile = PlatformProfile {
        runtime_radio_permissions: true,
        reports_connectable: true,
    };

    /// Old platforms: location-gated scanning, no connectable flag
    pub const LEGACY: PlatformProfile = PlatformProfile {
        runtime_radio_permissions: false,
        reports_connectable: false,
    };
}

impl Default for PlatformProfile {
    fn default() -> Self {
        Self::MODERN
    }
}

/// Read-only view of what the platform currently grants
pub trait PlatformContext: Send + Sync {
    fn profile(&self) -> PlatformProfile;
    fn is_granted(&self, capability: Capability) -> bool;
    fn is_location_provider_enabled(&self, provider: LocationProvider) -> bool;
}

/// Pure query over a platform profile; holds no state beyond it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PermissionGate {
    profile: PlatformProfile,
}

impl PermissionGate {
    pub fn new(profile: PlatformProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> PlatformProfile {
        self.profile
    }

    pub fn required_capabilities(&self) -> BTreeSet<Capability> {
        if self.profile.runtime_radio_permissions {
            [Capability::BluetoothScan, Capability::BluetoothConnect]
                .into_iter()
                .collect()
        } else {
            [Capability::FineLocation].into_iter().collect()
        }
    }

    pub fn missing<C: PlatformContext + ?Sized>(&self, context: &C) -> BTreeSet<Capability> {
        self.required_capabilities()
            .into_iter()
            .filter(|capability| !context.is_granted(*capability))
            .collect()
    }

    pub fn has_all_permissions<C: PlatformContext + ?Sized>(&self, context: &C) -> bool {
        self.required_capabilities()
            .into_iter()
            .all(|capability| context.is_granted(capability))
    }

    pub fn location_service_satisfied<C: PlatformContext + ?Sized>(&self, context: &C) -> bool {
        if self.profile.runtime_radio_permissions {
            return true;
        }
        LocationProvider::ALL
            .iter()
            .any(|provider| context.is_location_provider_enabled(*provider))
    }
}
