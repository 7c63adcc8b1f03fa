use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ble_manager_lib::config::AppConfig;
use ble_manager_lib::core::bluetooth::constants::{GATT_SUCCESS, PROPERTY_NOTIFY, PROPERTY_READ};
use ble_manager_lib::core::bluetooth::{
    Advertisement, BleError, BluetoothManager, Capability, ConnectionState, GattCallback,
    GattCharacteristic, GattService, GattSession, LinkState, LocationProvider, PlatformContext,
    PlatformProfile, RadioAdapter, RemoteDevice, ScanCallback, ScanEnd, ScanRegistration,
    ScanSettings,
};
use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

const HEART_RATE: &str = "C0:FF:EE:00:00:01";
const THERMOMETER: &str = "C0:FF:EE:00:00:02";

fn heart_rate_catalog() -> Vec<GattService> {
    vec![GattService::new(
        Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb),
        vec![GattCharacteristic::new(
            Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb),
            PROPERTY_NOTIFY | PROPERTY_READ,
        )],
    )]
}

/// A radio that advertises two devices and lets the heart-rate one connect.
#[derive(Default)]
struct ScriptedRadio {
    granted: Mutex<HashSet<Capability>>,
    gatt_callback: Mutex<Option<GattCallback>>,
    scans_stopped: Arc<Mutex<usize>>,
    sessions_closed: Arc<Mutex<usize>>,
}

impl ScriptedRadio {
    fn granted() -> Self {
        let radio = Self::default();
        radio
            .granted
            .lock()
            .extend([Capability::BluetoothScan, Capability::BluetoothConnect]);
        radio
    }

    fn drop_link(&self) {
        let callback = self.gatt_callback.lock().clone().expect("session opened");
        callback.on_connection_state_change(GATT_SUCCESS, LinkState::Disconnected);
    }
}

impl PlatformContext for ScriptedRadio {
    fn profile(&self) -> PlatformProfile {
        PlatformProfile::MODERN
    }

    fn is_granted(&self, capability: Capability) -> bool {
        self.granted.lock().contains(&capability)
    }

    fn is_location_provider_enabled(&self, _provider: LocationProvider) -> bool {
        false
    }
}

struct CountingRegistration {
    stopped: Arc<Mutex<usize>>,
    done: bool,
}

impl ScanRegistration for CountingRegistration {
    fn stop(&mut self) {
        if !self.done {
            self.done = true;
            *self.stopped.lock() += 1;
        }
    }
}

struct Session {
    callback: GattCallback,
    closed: Arc<Mutex<usize>>,
}

impl GattSession for Session {
    fn discover_services(&self) -> Result<(), BleError> {
        self.callback
            .on_services_discovered(GATT_SUCCESS, heart_rate_catalog());
        Ok(())
    }

    fn disconnect(&self) -> Result<(), BleError> {
        Ok(())
    }

    fn close(&self) {
        *self.closed.lock() += 1;
    }
}

#[async_trait]
impl RadioAdapter for ScriptedRadio {
    async fn is_supported(&self) -> bool {
        true
    }

    async fn is_enabled(&self) -> bool {
        true
    }

    async fn start_scan(
        &self,
        _settings: &ScanSettings,
        callback: ScanCallback,
    ) -> Result<Box<dyn ScanRegistration>, BleError> {
        for (address, rssi) in [(HEART_RATE, -48), (THERMOMETER, -80), (HEART_RATE, -45)] {
            callback.on_scan_result(Advertisement {
                address: Some(address.to_string()),
                name: None,
                rssi,
                connectable: true,
            });
        }
        Ok(Box::new(CountingRegistration {
            stopped: self.scans_stopped.clone(),
            done: false,
        }))
    }

    async fn resolve_device(&self, address: &str) -> Option<RemoteDevice> {
        (address == HEART_RATE).then(|| RemoteDevice {
            address: address.to_string(),
            name: Some("Heart Rate".to_string()),
        })
    }

    async fn connect_gatt(
        &self,
        _device: &RemoteDevice,
        _auto_connect: bool,
        callback: GattCallback,
    ) -> Result<Box<dyn GattSession>, BleError> {
        *self.gatt_callback.lock() = Some(callback.clone());
        callback.on_connection_state_change(GATT_SUCCESS, LinkState::Connected);
        Ok(Box::new(Session {
            callback,
            closed: self.sessions_closed.clone(),
        }))
    }
}

#[tokio::test(start_paused = true)]
async fn scan_connect_and_lose_the_link() {
    let radio = Arc::new(ScriptedRadio::granted());
    let manager = BluetoothManager::new(radio.clone(), &AppConfig::default());

    let summary = manager.scan(manager.scan_timeout(), |_| {}).await.unwrap();
    let addresses: Vec<_> = summary.devices.iter().map(|d| d.address.as_str()).collect();
    assert_eq!(addresses, vec![HEART_RATE, THERMOMETER]);
    assert_eq!(summary.reason, ScanEnd::Timeout);
    assert_eq!(*radio.scans_stopped.lock(), 1);

    let state = manager.connect(HEART_RATE, false).await;
    assert_eq!(state, ConnectionState::Connected);
    assert_eq!(manager.current_services(), heart_rate_catalog());
    assert!(manager.current_services()[0].characteristics[0].can_notify());

    let mut states = manager.connection_state();
    radio.drop_link();
    states
        .wait_for(|state| *state == ConnectionState::Disconnected)
        .await
        .unwrap();
    assert!(manager.services().borrow().is_empty());
    assert_eq!(*radio.sessions_closed.lock(), 1);
}

#[tokio::test]
async fn unknown_device_fails_with_reason() {
    let manager = BluetoothManager::new(Arc::new(ScriptedRadio::granted()), &AppConfig::default());

    let state = manager.connect(THERMOMETER, false).await;

    assert_eq!(
        state.failure_reason().as_deref(),
        Some("Device not found: C0:FF:EE:00:00:02")
    );
}

#[tokio::test]
async fn scanning_without_permissions_is_refused() {
    let manager = BluetoothManager::new(Arc::new(ScriptedRadio::default()), &AppConfig::default());

    let err = manager
        .scan(Duration::from_secs(1), |_| {})
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "Missing permissions: BLUETOOTH_SCAN, BLUETOOTH_CONNECT"
    );
    assert!(!manager.has_required_permissions());
}

#[tokio::test(start_paused = true)]
async fn saved_scan_timeout_drives_the_next_scan() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ble").join("config.json");
    let mut config = AppConfig::default();
    config.scan.timeout_secs = 3;
    config.scan.min_rssi = Some(-60);
    config.save(&path).await.unwrap();

    let loaded = AppConfig::load(&path).await.unwrap();
    let manager = BluetoothManager::new(Arc::new(ScriptedRadio::granted()), &loaded);
    let started = Instant::now();

    let summary = manager.scan(manager.scan_timeout(), |_| {}).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(started.elapsed() < Duration::from_secs(4));
    // the weak thermometer is filtered out
    assert_eq!(summary.devices.len(), 1);
    assert_eq!(summary.devices[0].address, HEART_RATE);
}
