//! M2 Relay Node - Onyx M2 to cloud relay daemon
//!
//! This binary connects to an Onyx M2 over Bluetooth Low Energy and relays
//! its bus traffic to the relay server:
//! - settings from a JSON config file, overridden by flags
//! - ctrl-c shuts down, closing the session with "Service stopped"
//! - SIGHUP is treated as a network change and cycles the session

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use m2_relay::{
    BleProfile, BridgeHandle, BtleplugDriver, RelayBridge, RelayConfig, RelayConfigBuilder,
    WsConnector,
};

#[derive(Parser)]
#[command(name = "m2-relay-node")]
#[command(about = "Relay an Onyx M2 vehicle bus adapter to a cloud relay server")]
struct Args {
    /// JSON config file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// BLE name of the adapter
    #[arg(long)]
    device_name: Option<String>,

    /// BLE address of the adapter, matched instead of the name
    #[arg(long)]
    address: Option<String>,

    /// GATT profile of the adapter
    #[arg(long, value_enum)]
    profile: Option<ProfileArg>,

    /// Relay server hostname
    #[arg(long, requires = "pin")]
    host: Option<String>,

    /// Relay server pin
    #[arg(long, requires = "host")]
    pin: Option<String>,

    /// Write the device settings to the M2 once it connects
    #[arg(long)]
    sync_config: bool,

    /// Print the effective config as JSON and exit
    #[arg(long)]
    print_config: bool,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProfileArg {
    /// M2 board
    Characteristic,
    /// DFRobot serial bridge
    Serial,
}

impl From<ProfileArg> for BleProfile {
    fn from(profile: ProfileArg) -> Self {
        match profile {
            ProfileArg::Characteristic => BleProfile::Characteristic,
            ProfileArg::Serial => BleProfile::Serial,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging, RUST_LOG overrides the default level
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&args)?;
    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    info!(
        device = %config.ble.device_name,
        address = ?config.ble.device_address,
        profile = %config.ble.profile,
        "Starting M2 relay"
    );
    match config.cloud.url() {
        Ok(url) => info!("Relay server: {}", url),
        Err(_) => warn!("No relay server configured, waiting for a config sync"),
    }

    let (gatt_tx, gatt_rx) = mpsc::unbounded_channel();
    let driver = BtleplugDriver::new(gatt_tx)
        .await
        .context("opening the Bluetooth adapter")?;
    let settings = config.device.clone();
    let (bridge, handle) = RelayBridge::new(config, driver, gatt_rx, WsConnector::new());

    let mut bridge_task = tokio::spawn(bridge.run());
    spawn_status_log(handle.clone());
    if args.sync_config {
        spawn_config_sync(handle.clone(), settings);
    }
    #[cfg(unix)]
    spawn_network_watch(handle.clone())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("listening for ctrl-c")?,
        result = &mut bridge_task => {
            result??;
            warn!("Relay bridge exited");
            return Ok(());
        }
    }

    info!("Shutting down");
    handle.shutdown().await?;
    bridge_task.await??;
    Ok(())
}

/// Config file (or defaults) with the command line applied
fn load_config(args: &Args) -> anyhow::Result<RelayConfig> {
    let config = match &args.config {
        Some(path) => RelayConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RelayConfig::default(),
    };

    let mut builder = RelayConfigBuilder::from_config(config);
    if let Some(name) = &args.device_name {
        builder = builder.device_name(name);
    }
    if let Some(address) = &args.address {
        builder = builder.device_address(address);
    }
    if let Some(profile) = args.profile {
        builder = builder.profile(profile.into());
    }
    if let (Some(host), Some(pin)) = (&args.host, &args.pin) {
        builder = builder.server(host, pin);
    }
    let mut config = builder.build();

    // a sync pushes the relay credentials unless the file names others
    if config.device.server_hostname.is_empty() {
        config.device.server_hostname = config.cloud.hostname.clone().unwrap_or_default();
    }
    if config.device.server_pin.is_empty() {
        config.device.server_pin = config.cloud.pin.clone().unwrap_or_default();
    }

    config.validate()?;
    Ok(config)
}

/// Log every status change
fn spawn_status_log(handle: BridgeHandle) {
    let mut status = handle.status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let summary = status.borrow_and_update().summary();
            info!("{}", summary);
        }
    });
}

/// Write the device settings the first time the M2 connects
fn spawn_config_sync(handle: BridgeHandle, settings: m2_relay::m2_protocol::DeviceSettings) {
    let mut status = handle.status();
    tokio::spawn(async move {
        if status.wait_for(|s| s.ble_connected).await.is_err() {
            return;
        }
        match handle.sync_config(settings).await {
            Ok(()) => info!("Device settings queued"),
            Err(e) => error!("Config sync failed: {}", e),
        }
    });
}

/// Treat SIGHUP as a network change
#[cfg(unix)]
fn spawn_network_watch(handle: BridgeHandle) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("installing the SIGHUP handler")?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("SIGHUP received, cycling relay session");
            if handle.network_changed().await.is_err() {
                break;
            }
        }
    });
    Ok(())
}
