//! Bluetooth manager
//! This module provides the main interface for bluetooth operations: capability queries,
//! scanning (suspending or in the background) and the single managed connection.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, ConnectionConfig, ScanConfig};
use crate::core::bluetooth::connection::ConnectionController;
use crate::core::bluetooth::device::ScannedDevice;
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::permission::{Capability, PermissionGate};
use crate::core::bluetooth::radio::RadioAdapter;
use crate::core::bluetooth::scanner::{ScanSession, ScanState, ScanSummary};
use crate::core::bluetooth::types::{ConnectionState, ServiceCatalog};

struct BackgroundScan {
    cancel_token: CancellationToken,
    handle: JoinHandle<Result<ScanSummary, BleError>>,
}

/// Manages Bluetooth operations
pub struct BluetoothManager {
    adapter: Arc<dyn RadioAdapter>,
    gate: PermissionGate,
    scanner: ScanSession,
    connection: ConnectionController,
    scan_config: ScanConfig,
    connection_config: ConnectionConfig,
    /// Scan started with `start_scan`, if any
    scan_task: Mutex<Option<BackgroundScan>>,
}

impl BluetoothManager {
    /// Creates a new BluetoothManager on top of the given radio backend
    pub fn new(adapter: Arc<dyn RadioAdapter>, config: &AppConfig) -> Self {
        let gate = PermissionGate::new(adapter.profile());
        Self {
            scanner: ScanSession::new(adapter.clone()),
            connection: ConnectionController::new(adapter.clone()),
            adapter,
            gate,
            scan_config: config.scan.clone(),
            connection_config: config.connection.clone(),
            scan_task: Mutex::new(None),
        }
    }

    /// Creates a manager backed by the system's default Bluetooth adapter.
    #[cfg(feature = "bluest")]
    pub async fn with_system_adapter(config: &AppConfig) -> anyhow::Result<Self> {
        let radio = crate::core::bluetooth::bluest_radio::BluestRadio::new().await?;
        info!("Bluetooth adapter is available.");
        Ok(Self::new(Arc::new(radio), config))
    }

    pub async fn is_bluetooth_supported(&self) -> bool {
        self.adapter.is_supported().await
    }

    pub async fn is_bluetooth_enabled(&self) -> bool {
        self.adapter.is_enabled().await
    }

    pub fn has_required_permissions(&self) -> bool {
        self.gate.has_all_permissions(self.adapter.as_ref())
    }

    pub fn missing_permissions(&self) -> BTreeSet<Capability> {
        self.gate.missing(self.adapter.as_ref())
    }

    /// Capabilities the platform must grant before scanning
    pub fn required_permissions(&self) -> BTreeSet<Capability> {
        self.gate.required_capabilities()
    }

    pub fn scan_timeout(&self) -> Duration {
        self.scan_config.timeout()
    }

    pub fn auto_connect(&self) -> bool {
        self.connection_config.auto_connect
    }

    pub fn scan_state(&self) -> ScanState {
        self.scanner.state()
    }

    /// Scans until `timeout` elapses or [`BluetoothManager::stop_scan`] is called.
    pub async fn scan<F>(&self, timeout: Duration, on_device: F) -> Result<ScanSummary, BleError>
    where
        F: FnMut(ScannedDevice) + Send,
    {
        self.scanner
            .start(timeout, self.scan_config.settings(), on_device)
            .await
    }

    /// Starts a scan on a background task. Precondition failures are returned here;
    /// any previous background scan is stopped first.
    pub async fn start_scan<F>(&self, timeout: Duration, on_device: F) -> Result<(), BleError>
    where
        F: FnMut(ScannedDevice) + Send + 'static,
    {
        self.scanner.check_preconditions().await?;

        let mut scan_task = self.scan_task.lock().await;
        if let Some(previous) = scan_task.take() {
            Self::finish_background_scan(previous).await;
        }

        let cancel_token = CancellationToken::new();
        let cancel_token_for_task = cancel_token.clone();
        let scanner_for_task = self.scanner.clone();
        let settings = self.scan_config.settings();

        let handle = tokio::spawn(async move {
            scanner_for_task
                .start_with_cancel(timeout, settings, cancel_token_for_task, on_device)
                .await
        });

        *scan_task = Some(BackgroundScan {
            cancel_token,
            handle,
        });
        info!("Device scan task started.");
        Ok(())
    }

    /// Stops the background scan and waits for its task. Returns the scan summary
    /// when the task finished cleanly.
    pub async fn stop_scan(&self) -> Option<ScanSummary> {
        info!("Stopping Bluetooth scan.");
        // A suspended `scan` call is stopped too
        self.scanner.stop().await;

        match self.scan_task.lock().await.take() {
            Some(background) => Self::finish_background_scan(background).await,
            None => {
                info!("No active scan task handle found to wait for.");
                None
            }
        }
    }

    async fn finish_background_scan(background: BackgroundScan) -> Option<ScanSummary> {
        background.cancel_token.cancel();

        info!("Waiting for scan task to finish...");
        match background.handle.await {
            Ok(Ok(summary)) => {
                info!(
                    "Scan task finished ({:?}) with {} devices.",
                    summary.reason,
                    summary.devices.len()
                );
                Some(summary)
            }
            Ok(Err(e)) => {
                error!("Scan task finished with an error: {}", e);
                None
            }
            Err(e) => {
                if e.is_cancelled() {
                    info!("Scan task was cancelled successfully.");
                } else {
                    error!("Scan task finished with an unexpected join error: {:?}", e);
                }
                None
            }
        }
    }

    pub async fn connect(&self, address: &str, auto_connect: bool) -> ConnectionState {
        self.connect_with_cancel(address, auto_connect, &CancellationToken::new())
            .await
    }

    /// Connects to `address`, honouring the configured connect timeout. A timeout
    /// behaves exactly like cancellation and resolves with `Disconnected`.
    pub async fn connect_with_cancel(
        &self,
        address: &str,
        auto_connect: bool,
        cancel_token: &CancellationToken,
    ) -> ConnectionState {
        let attempt = self
            .connection
            .connect_with_cancel(address, auto_connect, cancel_token);

        let Some(limit) = self.connection_config.connect_timeout() else {
            return attempt.await;
        };
        match tokio::time::timeout(limit, attempt).await {
            Ok(state) => state,
            Err(_) => {
                warn!("Connection to {} timed out after {:?}.", address, limit);
                ConnectionState::Disconnected
            }
        }
    }

    /// Disconnects from the current device; publishes `Disconnected` even when idle.
    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    /// Observable connection state
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    /// Observable service catalog of the connected device
    pub fn services(&self) -> watch::Receiver<ServiceCatalog> {
        self.connection.subscribe_services()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.connection.current_state()
    }

    pub fn current_services(&self) -> ServiceCatalog {
        self.connection.current_services()
    }
}
