//! Onyx M2 cloud relay
//!
//! This crate relays vehicle bus traffic between an Onyx M2 adapter, reached
//! over Bluetooth Low Energy, and a relay server reached over a WebSocket.
//!
//! # Architecture
//!
//! The relay operates in three layers:
//!
//! 1. **BLE Link** - scans for the M2, keeps the GATT connection up and
//!    serializes writes (one outstanding GATT write at a time)
//! 2. **Cloud Link** - keeps a WebSocket session to
//!    `wss://<host>/relay?pin=<pin>` open with keepalive and reconnect
//! 3. **Bridge** - routes frames between the two, applies the server's
//!    mute directive and publishes status
//!
//! Both links are plain state machines. The Bluetooth stack and the socket
//! are behind the [`GattDriver`] and [`CloudConnector`] traits and report
//! back through channels, so the bridge task is the only owner of state.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! // Cargo.toml: m2-relay = { version = "0.1", features = ["ble"] }
//!
//! use m2_relay::{BtleplugDriver, RelayBridge, RelayConfigBuilder, WsConnector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RelayConfigBuilder::new()
//!         .server("relay.example.com", "1234")
//!         .build();
//!
//!     let (gatt_tx, gatt_rx) = tokio::sync::mpsc::unbounded_channel();
//!     let driver = BtleplugDriver::new(gatt_tx).await?;
//!     let (bridge, handle) = RelayBridge::new(config, driver, gatt_rx, WsConnector::new());
//!
//!     tokio::spawn(bridge.run());
//!     tokio::signal::ctrl_c().await?;
//!     handle.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `ble` - `btleplug` GATT driver (requires `libdbus-1-dev` on Linux)

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod ble;
pub mod bridge;
pub mod cloud;
pub mod config;
pub mod error;

// Testing utilities
pub mod test_utils;

pub use ble::{
    BleLink, BleNotice, BleState, CharacteristicSet, DeviceId, GattDriver, GattEvent,
    GattService, InboundFrame, WriteKind,
};
pub use bridge::{BridgeCommand, BridgeHandle, BridgeStats, RelayBridge, RelayStatus, StatusSummary};
pub use cloud::{
    CloudConnector, CloudEvent, CloudLink, CloudNotice, DesiredState, SendOutcome, SessionId,
    SessionState, WsConnector,
};
pub use config::{
    BleConfig, BleProfile, BridgeConfig, CloudConfig, RelayConfig, RelayConfigBuilder,
};
pub use error::{RelayError, Result};

#[cfg(feature = "ble")]
pub use ble::BtleplugDriver;

pub use m2_protocol;
