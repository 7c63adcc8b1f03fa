//! The narrow capability interface the scanner and connection controller consume.
//! Platform backends implement [`RadioAdapter`]; results come back through
//! [`ScanCallback`] and [`GattCallback`], which may be invoked from any thread.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::permission::PlatformContext;
use crate::core::bluetooth::types::{GattService, LinkState};

/// Radio duty cycle requested for a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    LowPower,
    Balanced,
    #[default]
    LowLatency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanSettings {
    pub mode: ScanMode,
    /// Advertisements weaker than this are ignored
    pub min_rssi: Option<i16>,
}

/// One advertisement exactly as the platform reported it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub address: Option<String>,
    pub name: Option<String>,
    pub rssi: i16,
    pub connectable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Advertisement(Advertisement),
    /// The radio aborted the scan with this platform error code
    Failed(i32),
}

/// Handed to the backend when a scan opens. Cloneable and thread-safe.
#[derive(Debug, Clone)]
pub struct ScanCallback {
    tx: mpsc::UnboundedSender<ScanEvent>,
}

impl ScanCallback {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<ScanEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false once the owning scan session has gone away
    pub fn on_scan_result(&self, advertisement: Advertisement) -> bool {
        self.tx.send(ScanEvent::Advertisement(advertisement)).is_ok()
    }

    pub fn on_scan_failed(&self, error_code: i32) {
        let _ = self.tx.send(ScanEvent::Failed(error_code));
    }
}

/// A platform scan registration. Dropping the scan session always calls `stop`.
pub trait ScanRegistration: Send {
    /// Stops the radio scan and releases the callback registration. Must be idempotent.
    fn stop(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattEvent {
    ConnectionStateChanged { status: i32, state: LinkState },
    ServicesDiscovered { status: i32, services: Vec<GattService> },
}

/// Handed to the backend when a GATT session opens. Cloneable and thread-safe.
#[derive(Debug, Clone)]
pub struct GattCallback {
    tx: mpsc::UnboundedSender<GattEvent>,
}

impl GattCallback {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<GattEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn on_connection_state_change(&self, status: i32, state: LinkState) {
        let _ = self
            .tx
            .send(GattEvent::ConnectionStateChanged { status, state });
    }

    pub fn on_services_discovered(&self, status: i32, services: Vec<GattService>) {
        let _ = self
            .tx
            .send(GattEvent::ServicesDiscovered { status, services });
    }
}

/// An open GATT client session. Requests are asynchronous: their outcome
/// arrives through the session's [`GattCallback`].
pub trait GattSession: Send + Sync {
    fn discover_services(&self) -> Result<(), BleError>;
    fn disconnect(&self) -> Result<(), BleError>;
    /// Releases every platform resource held by the session
    fn close(&self);
}

/// A remote device the platform can open a GATT session to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDevice {
    pub address: String,
    pub name: Option<String>,
}

#[async_trait]
pub trait RadioAdapter: PlatformContext {
    async fn is_supported(&self) -> bool;

    async fn is_enabled(&self) -> bool;

    async fn start_scan(
        &self,
        settings: &ScanSettings,
        callback: ScanCallback,
    ) -> Result<Box<dyn ScanRegistration>, BleError>;

    /// Maps an address onto a device handle; `None` when the platform does not know it
    async fn resolve_device(&self, address: &str) -> Option<RemoteDevice>;

    async fn connect_gatt(
        &self,
        device: &RemoteDevice,
        auto_connect: bool,
        callback: GattCallback,
    ) -> Result<Box<dyn GattSession>, BleError>;
}
