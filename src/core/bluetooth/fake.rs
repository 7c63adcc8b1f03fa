//! Scripted radio used by the unit tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::permission::{
    Capability, LocationProvider, PlatformContext, PlatformProfile,
};
use crate::core::bluetooth::radio::{
    Advertisement, GattCallback, GattEvent, GattSession, RadioAdapter, RemoteDevice, ScanCallback,
    ScanEvent, ScanRegistration, ScanSettings,
};

pub(crate) fn adv(address: &str, rssi: i16) -> ScanEvent {
    ScanEvent::Advertisement(Advertisement {
        address: Some(address.to_string()),
        name: Some(format!("dev-{}", address)),
        rssi,
        connectable: true,
    })
}

#[derive(Default)]
pub(crate) struct Counters {
    pub scans_opened: AtomicUsize,
    pub scans_stopped: AtomicUsize,
    pub sessions_opened: AtomicUsize,
    pub sessions_disconnected: AtomicUsize,
    pub sessions_closed: AtomicUsize,
}

pub(crate) struct FakeRadio {
    pub profile: PlatformProfile,
    pub supported: bool,
    pub enabled: bool,
    pub granted: Mutex<HashSet<Capability>>,
    pub location_providers: Mutex<HashSet<LocationProvider>>,
    /// Events replayed after each offset from the moment the scan opens
    pub scan_script: Mutex<Vec<(Duration, ScanEvent)>>,
    pub scan_open_error: Mutex<Option<BleError>>,
    /// How long `start_scan` takes before the radio answers
    pub scan_open_delay: Mutex<Duration>,
    /// How long `resolve_device` takes before answering
    pub resolve_delay: Mutex<Duration>,
    pub known_devices: Mutex<HashSet<String>>,
    /// Fired synchronously while the session opens
    pub connect_events: Mutex<Vec<GattEvent>>,
    /// Fired when the controller requests service discovery
    pub discovery_reply: Mutex<Option<GattEvent>>,
    pub last_scan_callback: Mutex<Option<ScanCallback>>,
    pub last_gatt_callback: Mutex<Option<GattCallback>>,
    pub counters: Arc<Counters>,
}

impl FakeRadio {
    pub fn new() -> Self {
        let granted = [Capability::BluetoothScan, Capability::BluetoothConnect]
            .into_iter()
            .collect();
        Self {
            profile: PlatformProfile::MODERN,
            supported: true,
            enabled: true,
            granted: Mutex::new(granted),
            location_providers: Mutex::new(HashSet::new()),
            scan_script: Mutex::new(Vec::new()),
            scan_open_error: Mutex::new(None),
            scan_open_delay: Mutex::new(Duration::ZERO),
            resolve_delay: Mutex::new(Duration::ZERO),
            known_devices: Mutex::new(HashSet::new()),
            connect_events: Mutex::new(Vec::new()),
            discovery_reply: Mutex::new(None),
            last_scan_callback: Mutex::new(None),
            last_gatt_callback: Mutex::new(None),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn with_profile(mut self, profile: PlatformProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn unsupported(mut self) -> Self {
        self.supported = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_scan_script(self, script: Vec<(Duration, ScanEvent)>) -> Self {
        *self.scan_script.lock() = script;
        self
    }

    pub fn with_scan_open_delay(self, delay: Duration) -> Self {
        *self.scan_open_delay.lock() = delay;
        self
    }

    pub fn with_resolve_delay(self, delay: Duration) -> Self {
        *self.resolve_delay.lock() = delay;
        self
    }

    pub fn with_device(self, address: &str) -> Self {
        self.known_devices.lock().insert(address.to_string());
        self
    }

    pub fn on_connect(self, events: Vec<GattEvent>) -> Self {
        *self.connect_events.lock() = events;
        self
    }

    pub fn on_discovery(self, reply: GattEvent) -> Self {
        *self.discovery_reply.lock() = Some(reply);
        self
    }

    pub fn gatt_callback(&self) -> GattCallback {
        self.last_gatt_callback
            .lock()
            .clone()
            .expect("a GATT session was opened")
    }

    pub fn scans_opened(&self) -> usize {
        self.counters.scans_opened.load(Ordering::SeqCst)
    }

    pub fn scans_stopped(&self) -> usize {
        self.counters.scans_stopped.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.counters.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn sessions_disconnected(&self) -> usize {
        self.counters.sessions_disconnected.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.counters.sessions_closed.load(Ordering::SeqCst)
    }
}

impl PlatformContext for FakeRadio {
    fn profile(&self) -> PlatformProfile {
        self.profile
    }

    fn is_granted(&self, capability: Capability) -> bool {
        self.granted.lock().contains(&capability)
    }

    fn is_location_provider_enabled(&self, provider: LocationProvider) -> bool {
        self.location_providers.lock().contains(&provider)
    }
}

struct FakeScan {
    replay: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
    stopped: bool,
}

impl ScanRegistration for FakeScan {
    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Some(replay) = self.replay.take() {
            replay.abort();
        }
        self.counters.scans_stopped.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeGatt {
    callback: GattCallback,
    discovery_reply: Option<GattEvent>,
    counters: Arc<Counters>,
}

impl GattSession for FakeGatt {
    fn discover_services(&self) -> Result<(), BleError> {
        if let Some(reply) = self.discovery_reply.clone() {
            match reply {
                GattEvent::ServicesDiscovered { status, services } => {
                    self.callback.on_services_discovered(status, services)
                }
                GattEvent::ConnectionStateChanged { status, state } => {
                    self.callback.on_connection_state_change(status, state)
                }
            }
        }
        Ok(())
    }

    fn disconnect(&self) -> Result<(), BleError> {
        self.counters
            .sessions_disconnected
            .fetch_add(1, Ordering::SeqCst);
        Err(BleError::Platform("session already dead".into()))
    }

    fn close(&self) {
        self.counters.sessions_closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RadioAdapter for FakeRadio {
    async fn is_supported(&self) -> bool {
        self.supported
    }

    async fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn start_scan(
        &self,
        _settings: &ScanSettings,
        callback: ScanCallback,
    ) -> Result<Box<dyn ScanRegistration>, BleError> {
        let delay = *self.scan_open_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.scan_open_error.lock().clone() {
            return Err(err);
        }
        self.counters.scans_opened.fetch_add(1, Ordering::SeqCst);
        *self.last_scan_callback.lock() = Some(callback.clone());

        let script = self.scan_script.lock().clone();
        let opened_at = Instant::now();
        let replay = tokio::spawn(async move {
            for (offset, event) in script {
                tokio::time::sleep_until(opened_at + offset).await;
                match event {
                    ScanEvent::Advertisement(advertisement) => {
                        callback.on_scan_result(advertisement);
                    }
                    ScanEvent::Failed(code) => callback.on_scan_failed(code),
                }
            }
        });

        Ok(Box::new(FakeScan {
            replay: Some(replay),
            counters: self.counters.clone(),
            stopped: false,
        }))
    }

    async fn resolve_device(&self, address: &str) -> Option<RemoteDevice> {
        let delay = *self.resolve_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.known_devices
            .lock()
            .contains(address)
            .then(|| RemoteDevice {
                address: address.to_string(),
                name: None,
            })
    }

    async fn connect_gatt(
        &self,
        _device: &RemoteDevice,
        _auto_connect: bool,
        callback: GattCallback,
    ) -> Result<Box<dyn GattSession>, BleError> {
        self.counters.sessions_opened.fetch_add(1, Ordering::SeqCst);
        *self.last_gatt_callback.lock() = Some(callback.clone());
        for event in self.connect_events.lock().iter().cloned() {
            match event {
                GattEvent::ConnectionStateChanged { status, state } => {
                    callback.on_connection_state_change(status, state)
                }
                GattEvent::ServicesDiscovered { status, services } => {
                    callback.on_services_discovered(status, services)
                }
            }
        }
        Ok(Box::new(FakeGatt {
            callback,
            discovery_reply: self.discovery_reply.lock().clone(),
            counters: self.counters.clone(),
        }))
    }
}
