use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::device::{ScannedDevice, normalize_address};
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::permission::PermissionGate;
use crate::core::bluetooth::radio::{
    Advertisement, RadioAdapter, ScanCallback, ScanEvent, ScanRegistration, ScanSettings,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Active,
}

/// Why a scan that did not fail came to an end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanEnd {
    Timeout,
    Stopped,
    /// The platform closed the advertisement stream on its own
    StreamEnded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    pub reason: ScanEnd,
    /// Unique devices in first-seen order
    pub devices: Vec<ScannedDevice>,
}

struct ActiveScan {
    id: u64,
    cancel_token: CancellationToken,
    /// Resolves (by sender drop) once the platform scan has been stopped
    released: oneshot::Receiver<()>,
}

/// Owns the slot entry, and the platform scan once it is open, and releases both on
/// every exit path, including a drop while the radio is still opening.
struct ScanGuard {
    registration: Option<Box<dyn ScanRegistration>>,
    slot: Arc<Mutex<Option<ActiveScan>>>,
    id: u64,
    released: Option<oneshot::Sender<()>>,
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.as_mut() {
            registration.stop();
        }
        {
            let mut slot = self.slot.lock();
            if slot.as_ref().is_some_and(|active| active.id == self.id) {
                *slot = None;
            }
        }
        debug!("Scan #{} released its radio handle.", self.id);
        // stop() waiters resume only after the radio scan is gone
        drop(self.released.take());
    }
}

/// One scan lifecycle at a time: start, deduplicate, deliver, stop.
#[derive(Clone)]
pub struct ScanSession {
    adapter: Arc<dyn RadioAdapter>,
    gate: PermissionGate,
    slot: Arc<Mutex<Option<ActiveScan>>>,
    next_id: Arc<AtomicU64>,
}

impl ScanSession {
    pub fn new(adapter: Arc<dyn RadioAdapter>) -> Self {
        let gate = PermissionGate::new(adapter.profile());
        Self {
            adapter,
            gate,
            slot: Arc::new(Mutex::new(None)),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn state(&self) -> ScanState {
        if self.slot.lock().is_some() {
            ScanState::Active
        } else {
            ScanState::Idle
        }
    }

    /// Checks everything a scan needs, in order, without touching the radio.
    pub async fn check_preconditions(&self) -> Result<(), BleError> {
        if !self.adapter.is_supported().await {
            return Err(BleError::UnsupportedRadio);
        }
        if !self.adapter.is_enabled().await {
            return Err(BleError::RadioDisabled);
        }
        let missing = self.gate.missing(self.adapter.as_ref());
        if !missing.is_empty() {
            return Err(BleError::PermissionDenied(missing));
        }
        if !self.gate.location_service_satisfied(self.adapter.as_ref()) {
            return Err(BleError::LocationServiceRequired);
        }
        Ok(())
    }

    /// Scans until `timeout` elapses, `stop` is called, or the radio fails,
    /// invoking `on_device` once per distinct address in first-seen order.
    ///
    /// Dropping the returned future stops the platform scan before the drop completes.
    pub async fn start<F>(
        &self,
        timeout: Duration,
        settings: ScanSettings,
        on_device: F,
    ) -> Result<ScanSummary, BleError>
    where
        F: FnMut(ScannedDevice) + Send,
    {
        self.start_with_cancel(timeout, settings, CancellationToken::new(), on_device)
            .await
    }

    /// Same as [`ScanSession::start`], but also ends with `Stopped` once `cancel_token`
    /// is cancelled, including before the radio scan has been opened.
    pub async fn start_with_cancel<F>(
        &self,
        timeout: Duration,
        settings: ScanSettings,
        cancel_token: CancellationToken,
        mut on_device: F,
    ) -> Result<ScanSummary, BleError>
    where
        F: FnMut(ScannedDevice) + Send,
    {
        self.check_preconditions().await?;

        if cancel_token.is_cancelled() {
            debug!("Scan cancelled before the radio was opened.");
            return Ok(ScanSummary {
                reason: ScanEnd::Stopped,
                devices: Vec::new(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (released_tx, released_rx) = oneshot::channel();
        let previous = self.slot.lock().replace(ActiveScan {
            id,
            cancel_token: cancel_token.clone(),
            released: released_rx,
        });
        let mut guard = ScanGuard {
            registration: None,
            slot: self.slot.clone(),
            id,
            released: Some(released_tx),
        };

        // Never two radio scans from one owner
        if let Some(previous) = previous {
            info!("Scan #{} replaces scan #{}.", id, previous.id);
            previous.cancel_token.cancel();
            let _ = previous.released.await;
        }
        if cancel_token.is_cancelled() {
            debug!("Scan #{} cancelled before the radio was opened.", id);
            return Ok(ScanSummary {
                reason: ScanEnd::Stopped,
                devices: Vec::new(),
            });
        }

        let (callback, mut events) = ScanCallback::channel();
        match self.adapter.start_scan(&settings, callback).await {
            Ok(registration) => guard.registration = Some(registration),
            Err(e) => {
                warn!("Radio refused to start scan #{}: {}", id, e);
                return Err(e);
            }
        }
        info!("Scan #{} started ({:?}, timeout {:?}).", id, settings.mode, timeout);

        let profile = self.gate.profile();
        let deadline = Instant::now() + timeout;
        let mut seen = HashSet::new();
        let mut devices = Vec::new();

        let reason = loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break ScanEnd::Stopped,
                _ = tokio::time::sleep_until(deadline) => break ScanEnd::Timeout,
                event = events.recv() => match event {
                    Some(ScanEvent::Advertisement(advertisement)) => {
                        let Some(device) = Self::accept(advertisement, &settings, profile.reports_connectable) else {
                            continue;
                        };
                        if seen.insert(device.address.clone()) {
                            debug!("Found device - Address: {}, Name: {:?}, RSSI: {}", device.address, device.name, device.rssi);
                            devices.push(device.clone());
                            on_device(device);
                        }
                    }
                    Some(ScanEvent::Failed(code)) => {
                        warn!("Scan #{} failed with code {}", id, code);
                        drop(guard);
                        return Err(BleError::ScanFailed(code));
                    }
                    None => break ScanEnd::StreamEnded,
                },
            }
        };

        drop(guard);
        info!(
            "Scan #{} finished ({:?}) with {} unique devices.",
            id,
            reason,
            devices.len()
        );
        Ok(ScanSummary { reason, devices })
    }

    /// Stops the active scan, if any, and returns once its radio handle is released.
    pub async fn stop(&self) {
        let active = self.slot.lock().take();
        match active {
            Some(active) => {
                info!("Stopping scan #{}.", active.id);
                active.cancel_token.cancel();
                // Err means the guard dropped its sender, i.e. the scan is released
                let _ = active.released.await;
            }
            None => debug!("No active scan to stop."),
        }
    }

    fn accept(
        advertisement: Advertisement,
        settings: &ScanSettings,
        reports_connectable: bool,
    ) -> Option<ScannedDevice> {
        let Some(address) = advertisement.address.as_deref().and_then(normalize_address) else {
            debug!("Dropping advertisement without an address");
            return None;
        };
        if let Some(min_rssi) = settings.min_rssi {
            if advertisement.rssi < min_rssi {
                return None;
            }
        }
        Some(ScannedDevice::new(
            advertisement.name,
            address,
            advertisement.rssi,
            reports_connectable && advertisement.connectable,
        ))
    }
}
