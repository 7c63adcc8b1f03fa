//! Radio backend for desktop platforms built on the `bluest` crate.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bluest::{Adapter, ConnectionEvent, Device};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::core::bluetooth::constants::{GATT_FAILURE, GATT_SUCCESS, SCAN_FAILED_INTERNAL_ERROR};
use crate::core::bluetooth::device::normalize_address;
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::permission::{
    Capability, LocationProvider, PlatformContext, PlatformProfile,
};
use crate::core::bluetooth::radio::{
    Advertisement, GattCallback, GattSession, RadioAdapter, RemoteDevice, ScanCallback,
    ScanRegistration, ScanSettings,
};
use crate::core::bluetooth::types::{GattCharacteristic, GattService, LinkState};

/// Reported when the platform delivers an advertisement without signal strength
const RSSI_UNAVAILABLE: i16 = -127;

impl From<bluest::Error> for BleError {
    fn from(e: bluest::Error) -> Self {
        BleError::Platform(e.to_string())
    }
}

/// Devices seen while scanning, keyed by normalized address
type DeviceRegistry = Arc<Mutex<HashMap<String, Device>>>;

pub struct BluestRadio {
    adapter: Adapter,
    devices: DeviceRegistry,
}

impl BluestRadio {
    /// Opens the default adapter. Fails with `UnsupportedRadio` when the machine has none.
    pub async fn new() -> Result<Self, BleError> {
        let adapter = Adapter::default().await.ok_or_else(|| {
            error!("No Bluetooth adapter found");
            BleError::UnsupportedRadio
        })?;
        Ok(Self {
            adapter,
            devices: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn advertisement(discovered: &bluest::AdvertisingDevice, address: Option<String>) -> Advertisement {
        let name = discovered
            .adv_data
            .local_name
            .clone()
            .or_else(|| discovered.device.name().ok());
        Advertisement {
            address,
            name,
            rssi: discovered.rssi.unwrap_or(RSSI_UNAVAILABLE),
            connectable: discovered.adv_data.is_connectable,
        }
    }

    async fn scan_task(adapter: Adapter, devices: DeviceRegistry, callback: ScanCallback) {
        info!("Starting bluetooth scan");
        let mut scan_stream = match adapter.scan(&[]).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to start bluetooth scan: {}", e);
                callback.on_scan_failed(SCAN_FAILED_INTERNAL_ERROR);
                return;
            }
        };

        while let Some(discovered) = scan_stream.next().await {
            let id = discovered.device.id().to_string();
            let address = normalize_address(&id);
            if let Some(address) = &address {
                devices
                    .lock()
                    .insert(address.clone(), discovered.device.clone());
            }
            if !callback.on_scan_result(Self::advertisement(&discovered, address)) {
                debug!("Scan session gone; leaving scan loop.");
                return;
            }
        }
        info!("Bluetooth scan stream has ended.");
    }
}

impl PlatformContext for BluestRadio {
    fn profile(&self) -> PlatformProfile {
        PlatformProfile::MODERN
    }

    // Desktop stacks grant radio access at the OS level
    fn is_granted(&self, _capability: Capability) -> bool {
        true
    }

    fn is_location_provider_enabled(&self, _provider: LocationProvider) -> bool {
        true
    }
}

struct BluestScan {
    task: JoinHandle<()>,
}

impl ScanRegistration for BluestScan {
    fn stop(&mut self) {
        // dropping the stream inside the task ends the platform scan
        self.task.abort();
    }
}

struct BluestGatt {
    adapter: Adapter,
    device: Device,
    callback: GattCallback,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BluestGatt {
    async fn discover(device: &Device) -> Result<Vec<GattService>, bluest::Error> {
        let mut catalog = Vec::new();
        for service in device.discover_services().await? {
            let mut characteristics = Vec::new();
            for characteristic in service.discover_characteristics().await? {
                let properties = characteristic.properties().await?;
                characteristics.push(GattCharacteristic::new(
                    characteristic.uuid(),
                    properties.to_bits(),
                ));
            }
            catalog.push(GattService::new(service.uuid(), characteristics));
        }
        Ok(catalog)
    }

    async fn link_task(adapter: Adapter, device: Device, callback: GattCallback) {
        let mut connection_events = match adapter.device_connection_events(&device).await {
            Ok(events) => Some(events),
            Err(e) => {
                warn!("Link events unavailable for {}: {}", device.id(), e);
                None
            }
        };

        if !device.is_connected().await {
            info!("Initiating connection to {}...", device.id());
            if let Err(e) = adapter.connect_device(&device).await {
                error!("Connection to {} failed: {}", device.id(), e);
                callback.on_connection_state_change(GATT_FAILURE, LinkState::Disconnected);
                return;
            }
        }
        callback.on_connection_state_change(GATT_SUCCESS, LinkState::Connected);

        if let Some(events) = connection_events.as_mut() {
            while let Some(event) = events.next().await {
                if let ConnectionEvent::Disconnected = event {
                    info!("Device {} dropped the link.", device.id());
                    callback.on_connection_state_change(GATT_SUCCESS, LinkState::Disconnected);
                    return;
                }
            }
        }
    }
}

impl GattSession for BluestGatt {
    fn discover_services(&self) -> Result<(), BleError> {
        let device = self.device.clone();
        let callback = self.callback.clone();
        let task = tokio::spawn(async move {
            match Self::discover(&device).await {
                Ok(catalog) => callback.on_services_discovered(GATT_SUCCESS, catalog),
                Err(e) => {
                    error!("Service discovery on {} failed: {}", device.id(), e);
                    callback.on_services_discovered(GATT_FAILURE, Vec::new());
                }
            }
        });
        self.tasks.lock().push(task);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), BleError> {
        let adapter = self.adapter.clone();
        let device = self.device.clone();
        // Not tracked in `tasks`: it must outlive `close`
        tokio::spawn(async move {
            if let Err(e) = adapter.disconnect_device(&device).await {
                warn!("Disconnecting {} failed: {}", device.id(), e);
            } else {
                info!("Successfully disconnected {}", device.id());
            }
        });
        Ok(())
    }

    fn close(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl RadioAdapter for BluestRadio {
    async fn is_supported(&self) -> bool {
        true
    }

    async fn is_enabled(&self) -> bool {
        match self.adapter.is_available().await {
            Ok(available) => available,
            Err(e) => {
                warn!("Could not query adapter availability: {}", e);
                false
            }
        }
    }

    async fn start_scan(
        &self,
        settings: &ScanSettings,
        callback: ScanCallback,
    ) -> Result<Box<dyn ScanRegistration>, BleError> {
        // The OS picks the duty cycle on desktop platforms
        debug!("Opening scan with {:?}", settings.mode);
        let task = tokio::spawn(Self::scan_task(
            self.adapter.clone(),
            self.devices.clone(),
            callback,
        ));
        Ok(Box::new(BluestScan { task }))
    }

    async fn resolve_device(&self, address: &str) -> Option<RemoteDevice> {
        let address = normalize_address(address)?;
        let known = self.devices.lock().get(&address).cloned();
        let device = match known {
            Some(device) => device,
            None => {
                // Devices paired and connected by the OS never show up in a scan
                let connected = match self.adapter.connected_devices().await {
                    Ok(devices) => devices,
                    Err(e) => {
                        warn!("Listing connected devices failed: {}", e);
                        return None;
                    }
                };
                let device = connected.into_iter().find(|device| {
                    normalize_address(&device.id().to_string()).as_deref() == Some(address.as_str())
                })?;
                self.devices.lock().insert(address.clone(), device.clone());
                device
            }
        };
        Some(RemoteDevice {
            name: device.name().ok(),
            address,
        })
    }

    async fn connect_gatt(
        &self,
        device: &RemoteDevice,
        auto_connect: bool,
        callback: GattCallback,
    ) -> Result<Box<dyn GattSession>, BleError> {
        let bluest_device = self
            .devices
            .lock()
            .get(&device.address)
            .cloned()
            .ok_or_else(|| BleError::AddressNotFound(device.address.clone()))?;
        if auto_connect {
            info!("Background reconnection is managed by the OS here; connecting directly.");
        }

        let link = tokio::spawn(BluestGatt::link_task(
            self.adapter.clone(),
            bluest_device.clone(),
            callback.clone(),
        ));
        Ok(Box::new(BluestGatt {
            adapter: self.adapter.clone(),
            device: bluest_device,
            callback,
            tasks: Mutex::new(vec![link]),
        }))
    }
}
