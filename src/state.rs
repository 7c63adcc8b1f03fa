//! Application state management
//! This module defines the state shared by the command handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use log::info;

use crate::config::AppConfig;
use crate::core::BluetoothManager;

/// Global application state
pub struct AppState {
    /// The Bluetooth manager instance
    pub bluetooth_manager: Arc<BluetoothManager>,
    pub config: AppConfig,
    /// Where `config` was loaded from and is saved back to
    pub config_path: PathBuf,
}

impl AppState {
    pub fn new(bluetooth_manager: BluetoothManager, config: AppConfig, config_path: PathBuf) -> Self {
        Self {
            bluetooth_manager: Arc::new(bluetooth_manager),
            config,
            config_path,
        }
    }

    /// Loads the config and opens the system Bluetooth adapter
    #[cfg(feature = "bluest")]
    pub async fn initialize(config_path: PathBuf) -> Result<Self> {
        let config = AppConfig::load(&config_path).await?;
        info!("Initializing BluetoothManager...");
        let manager = BluetoothManager::with_system_adapter(&config).await?;
        Ok(Self::new(manager, config, config_path))
    }

    /// Gets a reference to the Bluetooth manager
    pub fn get_bluetooth_manager_arc(&self) -> Arc<BluetoothManager> {
        self.bluetooth_manager.clone()
    }
}
