//! Bluetooth connection handling
//! Drives connect -> discover services -> ready -> disconnect for a single remote device
//! and republishes every transition as observable state.

use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::constants::{GATT_FAILURE, GATT_SUCCESS};
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::radio::{GattCallback, GattEvent, GattSession, RadioAdapter};
use crate::core::bluetooth::types::{ConnectionState, LinkState, ServiceCatalog};

struct ActiveSession {
    session: Box<dyn GattSession>,
    monitor: Option<JoinHandle<()>>,
}

impl ActiveSession {
    /// Terminates and closes the session; errors from a dead link are expected and ignored.
    fn release(self) {
        if let Some(monitor) = self.monitor {
            monitor.abort();
        }
        if let Err(e) = self.session.disconnect() {
            warn!("GATT disconnect during release failed: {}", e);
        }
        self.session.close();
    }
}

/// The single GATT slot. `generation` identifies the connect attempt that owns it;
/// callbacks and cancellations from older attempts are ignored.
#[derive(Default)]
struct Slot {
    generation: u64,
    active: Option<ActiveSession>,
}

struct Shared {
    state: watch::Sender<ConnectionState>,
    services: watch::Sender<ServiceCatalog>,
    slot: Mutex<Slot>,
}

impl Shared {
    fn publish(&self, state: ConnectionState) {
        info!("Connection state -> {}", state);
        self.state.send_replace(state);
    }

    fn clear_services(&self) {
        self.services.send_replace(Vec::new());
    }

    /// Releases whatever the given attempt still owns and publishes `Disconnected`,
    /// unless a newer attempt has taken the slot since.
    fn release_generation(&self, generation: u64) {
        let mut slot = self.slot.lock();
        if slot.generation != generation {
            debug!("Attempt #{} superseded; nothing to release.", generation);
            return;
        }
        if let Some(active) = slot.active.take() {
            active.release();
        }
        self.clear_services();
        self.publish(ConnectionState::Disconnected);
    }
}

/// Releases the attempt's session if the connect future is dropped before it resolves.
struct ConnectGuard {
    shared: Arc<Shared>,
    generation: u64,
    armed: bool,
}

impl ConnectGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectGuard {
    fn drop(&mut self) {
        if self.armed {
            info!("Connect attempt #{} dropped mid-flight; releasing.", self.generation);
            self.shared.release_generation(self.generation);
        }
    }
}

enum Step {
    Continue,
    Finished,
}

/// Owns the one active GATT session and the published connection state.
#[derive(Clone)]
pub struct ConnectionController {
    adapter: Arc<dyn RadioAdapter>,
    shared: Arc<Shared>,
}

impl ConnectionController {
    pub fn new(adapter: Arc<dyn RadioAdapter>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (services, _) = watch::channel(Vec::new());
        Self {
            adapter,
            shared: Arc::new(Shared {
                state,
                services,
                slot: Mutex::new(Slot::default()),
            }),
        }
    }

    /// Observable connection state; a new receiver sees the current value immediately.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Observable service catalog; empty whenever not connected.
    pub fn subscribe_services(&self) -> watch::Receiver<ServiceCatalog> {
        self.shared.services.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    pub fn current_services(&self) -> ServiceCatalog {
        self.shared.services.borrow().clone()
    }

    pub async fn connect(&self, address: &str, auto_connect: bool) -> ConnectionState {
        self.connect_with_cancel(address, auto_connect, &CancellationToken::new())
            .await
    }

    /// Connects and suspends until the link or discovery outcome is known.
    /// Cancelling `cancel_token` (or dropping the future) releases the session and
    /// resolves with `Disconnected`.
    pub async fn connect_with_cancel(
        &self,
        address: &str,
        auto_connect: bool,
        cancel_token: &CancellationToken,
    ) -> ConnectionState {
        let generation = {
            let mut slot = self.shared.slot.lock();
            slot.generation += 1;
            if let Some(previous) = slot.active.take() {
                info!("Tearing down previous GATT session before connecting.");
                previous.release();
            }
            slot.generation
        };
        self.shared.clear_services();

        let mut guard = ConnectGuard {
            shared: self.shared.clone(),
            generation,
            armed: true,
        };

        let resolved = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => None,
            device = self.adapter.resolve_device(address) => Some(device),
        };
        let device = match resolved {
            None => return self.abandon(&mut guard, generation),
            Some(_) if self.superseded(generation) => return self.abandon(&mut guard, generation),
            Some(Some(device)) => device,
            Some(None) => {
                guard.disarm();
                let state = ConnectionState::Failed(BleError::AddressNotFound(address.to_string()));
                self.publish_if_current(generation, state.clone());
                return state;
            }
        };

        info!("Initiating connection to {} (attempt #{})...", device.address, generation);
        self.publish_if_current(generation, ConnectionState::Connecting);

        let (callback, events) = GattCallback::channel();
        let opened = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => None,
            opened = self.adapter.connect_gatt(&device, auto_connect, callback) => Some(opened),
        };
        let session = match opened {
            None => return self.abandon(&mut guard, generation),
            Some(Ok(session)) => session,
            Some(Err(e)) => {
                guard.disarm();
                error!("Failed to open GATT session to {}: {}", device.address, e);
                if self.superseded(generation) {
                    return ConnectionState::Disconnected;
                }
                let state = ConnectionState::Failed(e);
                self.publish_if_current(generation, state.clone());
                return state;
            }
        };

        let (outcome_tx, outcome_rx) = oneshot::channel();
        {
            let mut slot = self.shared.slot.lock();
            if slot.generation != generation {
                // superseded while the session was opening
                drop(slot);
                guard.disarm();
                ActiveSession {
                    session,
                    monitor: None,
                }
                .release();
                return ConnectionState::Disconnected;
            }
            let monitor = tokio::spawn(Self::monitor(
                self.shared.clone(),
                generation,
                events,
                outcome_tx,
            ));
            slot.active = Some(ActiveSession {
                session,
                monitor: Some(monitor),
            });
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                info!("Connect attempt #{} cancelled.", generation);
                self.shared.release_generation(generation);
                ConnectionState::Disconnected
            }
            // A dropped sender means the session was released underneath us
            outcome = outcome_rx => outcome.unwrap_or(ConnectionState::Disconnected),
        };
        guard.disarm();
        outcome
    }

    /// Terminates any session and publishes `Disconnected`, even when idle.
    /// An attempt still resolving or opening its session is superseded and
    /// resolves with `Disconnected`.
    pub fn disconnect(&self) {
        {
            let mut slot = self.shared.slot.lock();
            slot.generation += 1;
            if let Some(active) = slot.active.take() {
                info!("Disconnecting GATT session.");
                active.release();
            } else {
                debug!("No GATT session to disconnect.");
            }
        }
        self.shared.clear_services();
        self.shared.publish(ConnectionState::Disconnected);
    }

    fn superseded(&self, generation: u64) -> bool {
        self.shared.slot.lock().generation != generation
    }

    /// Ends an attempt that never installed a session.
    fn abandon(&self, guard: &mut ConnectGuard, generation: u64) -> ConnectionState {
        guard.disarm();
        info!("Connect attempt #{} abandoned before the session opened.", generation);
        self.shared.release_generation(generation);
        ConnectionState::Disconnected
    }

    fn publish_if_current(&self, generation: u64, state: ConnectionState) {
        let slot = self.shared.slot.lock();
        if slot.generation == generation {
            self.shared.publish(state);
        }
    }

    /// Consumes the session's callbacks for as long as it owns the slot.
    async fn monitor(
        shared: Arc<Shared>,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<GattEvent>,
        outcome: oneshot::Sender<ConnectionState>,
    ) {
        let mut outcome = Some(outcome);
        while let Some(event) = events.recv().await {
            let mut slot = shared.slot.lock();
            if slot.generation != generation || slot.active.is_none() {
                debug!("Ignoring stale GATT callback from attempt #{}", generation);
                return;
            }
            match Self::handle_event(&shared, &mut slot, event, &mut outcome) {
                Step::Continue => {}
                Step::Finished => return,
            }
        }

        let mut slot = shared.slot.lock();
        if slot.generation == generation && slot.active.is_some() {
            warn!("GATT callback channel closed; treating link as terminated.");
            Self::finish(&shared, &mut slot, ConnectionState::Disconnected, &mut outcome);
        }
    }

    fn handle_event(
        shared: &Shared,
        slot: &mut Slot,
        event: GattEvent,
        outcome: &mut Option<oneshot::Sender<ConnectionState>>,
    ) -> Step {
        match event {
            GattEvent::ConnectionStateChanged { status, state } => {
                if status != GATT_SUCCESS && state != LinkState::Connected {
                    let cause = BleError::LinkError { status, state };
                    Self::finish(shared, slot, ConnectionState::Failed(cause), outcome);
                    return Step::Finished;
                }
                if status != GATT_SUCCESS {
                    warn!("GATT status {} reported with CONNECTED; continuing.", status);
                }
                match state {
                    LinkState::Connected => {
                        info!("Link established, discovering services...");
                        let requested = slot
                            .active
                            .as_ref()
                            .map(|active| active.session.discover_services());
                        if let Some(Err(e)) = requested {
                            error!("Service discovery could not be started: {}", e);
                            let cause = BleError::DiscoveryFailed(GATT_FAILURE);
                            Self::finish(shared, slot, ConnectionState::Failed(cause), outcome);
                            return Step::Finished;
                        }
                        Step::Continue
                    }
                    LinkState::Disconnected => {
                        Self::finish(shared, slot, ConnectionState::Disconnected, outcome);
                        Step::Finished
                    }
                    LinkState::Connecting | LinkState::Disconnecting => {
                        debug!("Link is {}", state);
                        Step::Continue
                    }
                }
            }
            GattEvent::ServicesDiscovered { status, services } => {
                if status != GATT_SUCCESS {
                    let cause = BleError::DiscoveryFailed(status);
                    Self::finish(shared, slot, ConnectionState::Failed(cause), outcome);
                    return Step::Finished;
                }
                info!("Discovered {} services.", services.len());
                for service in &services {
                    debug!(
                        "Service {} with {} characteristics",
                        service.uuid,
                        service.characteristics.len()
                    );
                }
                shared.services.send_replace(services);
                shared.publish(ConnectionState::Connected);
                if let Some(tx) = outcome.take() {
                    let _ = tx.send(ConnectionState::Connected);
                }
                Step::Continue
            }
        }
    }

    /// Terminal transition: release the session, clear the catalog, publish, resolve.
    fn finish(
        shared: &Shared,
        slot: &mut Slot,
        state: ConnectionState,
        outcome: &mut Option<oneshot::Sender<ConnectionState>>,
    ) {
        if let Some(active) = slot.active.take() {
            // Runs on the monitor task itself, so it must not be aborted here
            if let Err(e) = active.session.disconnect() {
                debug!("GATT disconnect after {} failed: {}", state, e);
            }
            active.session.close();
        }
        shared.clear_services();
        shared.publish(state.clone());
        if let Some(tx) = outcome.take() {
            let _ = tx.send(state);
        }
    }
}
