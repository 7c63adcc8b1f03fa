//! Core functionality
//! This module contains the radio-facing parts of the application.

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::{BleError, BluetoothManager, ConnectionState};
