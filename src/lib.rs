//! BLE manager library
//! Scanning, connection management and service discovery for Bluetooth Low Energy
//! devices, plus the command layer a front end drives.

// Module declarations
pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod state;
pub mod utils;
