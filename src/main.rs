use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use ble_manager_lib::commands::{self, EventSink};
use ble_manager_lib::config::{AppConfig, CONFIG_FILE_NAME};
use ble_manager_lib::core::bluetooth::Capability;
use ble_manager_lib::logging;
use ble_manager_lib::state::AppState;
use clap::{Parser, Subcommand};
use log::{LevelFilter, info};
use serde_json::{Value, json};

#[derive(Parser)]
#[command(name = "ble-manager")]
#[command(about = "Scan for BLE devices and manage a GATT connection", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file; defaults to the platform config directory
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report adapter and permission status
    Status,
    /// Scan and print every unique advertiser
    Scan {
        /// Scan duration in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Connect to a device, print its services and stay connected until Ctrl-C
    Connect {
        address: String,
        #[arg(short, long)]
        auto_connect: bool,
        /// Scan this long first so the device can be resolved
        #[arg(short, long, default_value = "5")]
        scan_secs: u64,
    },
    /// Write the effective config to the config file
    InitConfig,
}

/// Prints every event as one JSON line on stdout.
struct StdoutSink;

impl EventSink for StdoutSink {
    fn emit(&self, event: &str, payload: Value) -> Result<()> {
        println!("{}", json!({ "event": event, "payload": payload }));
        Ok(())
    }
}

async fn open(config_path: PathBuf) -> Result<AppState> {
    AppState::initialize(config_path)
        .await
        .context("Failed to initialize AppState with BluetoothManager")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    let config_path = match cli.config {
        Some(path) => path,
        None => AppConfig::default_path().unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME)),
    };

    let sink = Arc::new(StdoutSink);

    match cli.command {
        Commands::InitConfig => {
            let config = AppConfig::load(&config_path).await?;
            config.save(&config_path).await?;
            println!("{}", config_path.display());
        }
        Commands::Status => {
            let app_state = open(config_path).await?;
            let manager = app_state.get_bluetooth_manager_arc();
            let names = |capabilities: BTreeSet<Capability>| -> Vec<String> {
                capabilities.iter().map(|capability| capability.to_string()).collect()
            };
            let required = names(manager.required_permissions());
            let missing = names(manager.missing_permissions());
            println!(
                "{}",
                json!({
                    "supported": manager.is_bluetooth_supported().await,
                    "enabled": manager.is_bluetooth_enabled().await,
                    "permissions_granted": manager.has_required_permissions(),
                    "required_permissions": required,
                    "missing_permissions": missing,
                })
            );
        }
        Commands::Scan { timeout } => {
            let app_state = open(config_path).await?;
            let timeout = timeout.map(Duration::from_secs);
            tokio::select! {
                result = commands::scan_devices(&app_state, sink.as_ref(), timeout) => {
                    result.map_err(|e| anyhow!(e))?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, stopping scan.");
                    commands::stop_scan(&app_state, sink.as_ref()).await.map_err(|e| anyhow!(e))?;
                }
            }
        }
        Commands::Connect {
            address,
            auto_connect,
            scan_secs,
        } => {
            let app_state = open(config_path).await?;
            if scan_secs > 0 {
                commands::scan_devices(&app_state, sink.as_ref(), Some(Duration::from_secs(scan_secs)))
                    .await
                    .map_err(|e| anyhow!(e))?;
            }
            let auto_connect = auto_connect.then_some(true);
            commands::connect_to_device(&app_state, sink.as_ref(), address, auto_connect)
                .await
                .map_err(|e| anyhow!(e))?;

            let watcher = commands::watch_connection(app_state.get_bluetooth_manager_arc(), sink.clone());
            tokio::signal::ctrl_c().await?;
            watcher.abort();
            commands::disconnect(&app_state, sink.as_ref())
                .await
                .map_err(|e| anyhow!(e))?;
        }
    }

    Ok(())
}
