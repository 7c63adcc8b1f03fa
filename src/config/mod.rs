//! Application configuration
//! Scan and connection defaults, persisted as pretty-printed JSON.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::bluetooth::constants::DEFAULT_SCAN_TIMEOUT_SECS;
use crate::core::bluetooth::radio::{ScanMode, ScanSettings};
use crate::utils::ensure_parent_directory;

pub const CONFIG_FILE_NAME: &str = "config.json";
const APP_DIR_NAME: &str = "ble-manager";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// How long a scan runs before it stops on its own
    pub timeout_secs: u64,
    pub mode: ScanMode,
    /// Advertisements weaker than this (dBm) are ignored
    pub min_rssi: Option<i16>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_SCAN_TIMEOUT_SECS,
            mode: ScanMode::LowLatency,
            min_rssi: None,
        }
    }
}

impl ScanConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn settings(&self) -> ScanSettings {
        ScanSettings {
            mode: self.mode,
            min_rssi: self.min_rssi,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Let the platform reconnect whenever the device comes into range
    pub auto_connect: bool,
    /// Give up on a connect attempt after this many seconds; `None` waits indefinitely
    pub connect_timeout_secs: Option<u64>,
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scan: ScanConfig,
    pub connection: ConnectionConfig,
}

impl AppConfig {
    /// Default location: `<platform config dir>/ble-manager/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Loads the config from `path`, falling back to defaults when the file is missing.
    pub async fn load(path: &Path) -> Result<Self> {
        let path_str = path.to_string_lossy().into_owned();

        if !path.exists() {
            warn!("Config file not found at {:?}, using default.", path_str);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config {}", path_str))?;
        let config: Self = serde_json::from_str(&config_json)
            .with_context(|| format!("parsing config {}", path_str))?;

        info!("Config loaded from {:?}", path_str);
        Ok(config)
    }

    /// Saves the config to `path`, creating its directory if needed.
    pub async fn save(&self, path: &Path) -> Result<()> {
        ensure_parent_directory(path).await?;
        let path_str = path.to_string_lossy().into_owned();

        let config_json = match serde_json::to_string_pretty(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(path, config_json).await?;

        info!("Config saved to {:?}.", path_str);
        Ok(())
    }
}
