//! Front-end commands
//! This module defines the commands a front end invokes. Progress is reported as
//! named events through an [`EventSink`].

use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;

use crate::core::BluetoothManager;
use crate::core::bluetooth::scanner::{ScanEnd, ScanSummary};
use crate::core::bluetooth::types::{ConnectionState, GattService};
use crate::state::AppState;

/// Receives the events emitted while commands run.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: Value) -> anyhow::Result<()>;
}

#[derive(Debug, Serialize)]
struct ScanCompletePayload {
    reason: ScanEnd,
    count: usize,
}

#[derive(Debug, Serialize)]
struct ConnectionStatePayload<'a> {
    address: Option<&'a str>,
    state: &'static str,
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct ServicesPayload<'a> {
    count: usize,
    services: &'a [GattService],
}

fn state_label(state: &ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "disconnected",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Connected => "connected",
        ConnectionState::Failed(_) => "failed",
    }
}

fn emit<S: EventSink + ?Sized, P: Serialize>(sink: &S, event: &str, payload: P) {
    let payload = match serde_json::to_value(payload) {
        Ok(value) => value,
        Err(e) => {
            error!("Failed to serialize {} payload: {}", event, e);
            return;
        }
    };
    if let Err(e) = sink.emit(event, payload) {
        error!("Failed to emit {} event: {}", event, e);
    }
}

fn emit_connection_state<S: EventSink + ?Sized>(
    sink: &S,
    address: Option<&str>,
    state: &ConnectionState,
) {
    emit(
        sink,
        "connection-state",
        ConnectionStatePayload {
            address,
            state: state_label(state),
            reason: state.failure_reason(),
        },
    );
}

/// Scans for Bluetooth devices with real-time updates through events
///
/// # Arguments
/// * `app_state` - The application state
/// * `sink` - Where events are emitted
/// * `timeout` - Scan duration; the configured timeout when `None`
///
/// # Returns
/// The scan summary, emitting events during scanning:
/// - "scan-start" when scanning is started
/// - "device-found" with device details when a new device is discovered
/// - "scan-complete" when scanning is finished, or "scan-failed" with the reason
pub async fn scan_devices<S: EventSink + ?Sized>(
    app_state: &AppState,
    sink: &S,
    timeout: Option<Duration>,
) -> Result<ScanSummary, String> {
    let bluetooth_manager = app_state.get_bluetooth_manager_arc();
    let timeout = timeout.unwrap_or_else(|| bluetooth_manager.scan_timeout());

    emit(sink, "scan-start", json!({ "timeout_secs": timeout.as_secs() }));
    let result = bluetooth_manager
        .scan(timeout, |device| emit(sink, "device-found", &device))
        .await;

    match result {
        Ok(summary) => {
            emit(
                sink,
                "scan-complete",
                ScanCompletePayload {
                    reason: summary.reason,
                    count: summary.devices.len(),
                },
            );
            Ok(summary)
        }
        Err(e) => {
            emit(sink, "scan-failed", json!({ "reason": e.to_string() }));
            Err(e.to_string())
        }
    }
}

/// Stops any running scan
pub async fn stop_scan<S: EventSink + ?Sized>(app_state: &AppState, sink: &S) -> Result<(), String> {
    app_state.bluetooth_manager.stop_scan().await;
    emit(sink, "stop-scan-complete", ());
    Ok(())
}

/// Connects to a Bluetooth device
///
/// # Arguments
/// * `address` - Hardware address of the device, as reported by "device-found"
/// * `auto_connect` - Overrides the configured auto-connect flag
///
/// Emits "connection-state" for every transition and, once connected,
/// "services" with the discovered catalog.
pub async fn connect_to_device<S: EventSink + ?Sized>(
    app_state: &AppState,
    sink: &S,
    address: String,
    auto_connect: Option<bool>,
) -> Result<ConnectionState, String> {
    let bluetooth_manager = app_state.get_bluetooth_manager_arc();
    let auto_connect = auto_connect.unwrap_or_else(|| bluetooth_manager.auto_connect());

    let mut states = bluetooth_manager.connection_state();
    states.borrow_and_update();
    let mut last_emitted: Option<ConnectionState> = None;

    let attempt = bluetooth_manager.connect(&address, auto_connect);
    tokio::pin!(attempt);
    let outcome = loop {
        tokio::select! {
            outcome = &mut attempt => break outcome,
            changed = states.changed() => {
                if changed.is_err() {
                    continue;
                }
                let state = states.borrow_and_update().clone();
                emit_connection_state(sink, Some(&address), &state);
                last_emitted = Some(state);
            }
        }
    };

    if last_emitted.as_ref() != Some(&outcome) {
        emit_connection_state(sink, Some(&address), &outcome);
    }

    match &outcome {
        ConnectionState::Connected => {
            let services = bluetooth_manager.current_services();
            info!("Connected to {} with {} services.", address, services.len());
            emit(
                sink,
                "services",
                ServicesPayload {
                    count: services.len(),
                    services: &services,
                },
            );
            Ok(outcome)
        }
        ConnectionState::Failed(cause) => Err(cause.to_string()),
        _ => Ok(outcome),
    }
}

/// Disconnects from the currently connected device
pub async fn disconnect<S: EventSink + ?Sized>(app_state: &AppState, sink: &S) -> Result<(), String> {
    let bluetooth_manager = app_state.get_bluetooth_manager_arc();
    bluetooth_manager.disconnect();
    emit_connection_state(sink, None, &bluetooth_manager.current_state());
    Ok(())
}

/// Forwards every later connection-state change (e.g. link loss) to `sink`
/// until the returned task is aborted.
pub fn watch_connection(
    bluetooth_manager: Arc<BluetoothManager>,
    sink: Arc<dyn EventSink>,
) -> JoinHandle<()> {
    let mut states = bluetooth_manager.connection_state();
    states.borrow_and_update();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            emit_connection_state(sink.as_ref(), None, &state);
            if !state.is_connected() {
                emit(sink.as_ref(), "services", ServicesPayload { count: 0, services: &[] });
            }
        }
    })
}
