//! BLE link to the M2 device
//!
//! The link is a state machine driven by [`GattEvent`]s. It never talks to a
//! Bluetooth stack directly: every request goes through a [`GattDriver`],
//! which starts the operation and later reports its outcome as an event on
//! the channel it was built with.
//!
//! - [`BleLink`] - discovery, connection lifecycle, notification decoding
//! - [`WriteQueue`] - single-outstanding-write serializer
//! - `BtleplugDriver` - desktop/Linux driver (requires `ble` feature)
//!
//! # Feature Requirements
//!
//! - `ble`: Requires BlueZ development files on Linux
//!   ```bash
//!   apt install libdbus-1-dev
//!   ```

mod link;
mod queue;
mod registry;

#[cfg(feature = "ble")]
mod platform;

pub use link::{BleLink, BleNotice, CharacteristicSet, InboundFrame};
pub use queue::{PendingWrite, WriteKind, WriteQueue, WriteTarget};

#[cfg(feature = "ble")]
pub use platform::BtleplugDriver;

use bytes::Bytes;
use uuid::Uuid;

/// Address of a discovered peripheral
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(pub String);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A discovered GATT service and its characteristics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    /// Service UUID
    pub uuid: Uuid,
    /// Characteristic UUIDs
    pub characteristics: Vec<Uuid>,
}

/// Outcome of a driver request, or an unsolicited change on the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattEvent {
    /// Advertisement seen while scanning
    DeviceFound {
        /// Peripheral address
        device: DeviceId,
        /// Advertised local name
        name: Option<String>,
    },
    /// Scan could not be started
    ScanFailed {
        /// Failure reason
        reason: String,
    },
    /// GATT connection established
    Connected,
    /// GATT connection could not be established
    ConnectFailed {
        /// Failure reason
        reason: String,
    },
    /// Service discovery finished
    ServicesDiscovered {
        /// Services exposed by the peripheral
        services: Vec<GattService>,
    },
    /// Service discovery or notification setup failed
    DiscoveryFailed {
        /// Failure reason
        reason: String,
    },
    /// Characteristic value notification
    Notification {
        /// Characteristic that changed
        characteristic: Uuid,
        /// New value
        value: Bytes,
    },
    /// A write finished
    WriteComplete {
        /// Characteristic written
        characteristic: Uuid,
        /// `Err` carries the transport's reason
        result: std::result::Result<(), String>,
    },
    /// GATT connection lost or closed
    Disconnected,
}

/// Requests the BLE link issues to a Bluetooth stack
///
/// Methods return immediately. Completions are reported as [`GattEvent`]s.
/// At most one `write` is outstanding at any time; the link guarantees it.
pub trait GattDriver: Send + 'static {
    /// Start scanning; matching advertisements arrive as `DeviceFound`
    fn start_scan(&mut self);

    /// Stop scanning
    fn stop_scan(&mut self);

    /// Connect to a discovered device
    fn connect(&mut self, device: &DeviceId);

    /// Ask for low-latency connection parameters
    fn request_high_priority(&mut self);

    /// Discover services on the connected device
    fn discover_services(&mut self);

    /// Subscribe to notifications of a characteristic
    fn enable_notifications(&mut self, characteristic: Uuid);

    /// Write a characteristic value (with response)
    fn write(&mut self, characteristic: Uuid, value: Bytes);

    /// Close the GATT connection
    fn disconnect(&mut self);

    /// Driver name for logging
    fn name(&self) -> &str;
}

/// Connection state of the BLE link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleState {
    /// Not started, or stopped
    Idle,
    /// Looking for the device
    Scanning,
    /// Connection in progress
    Connecting,
    /// Connected, resolving characteristics
    DiscoveringServices,
    /// Characteristics resolved, notifications enabled
    Ready,
    /// Connection lost, about to scan again
    Disconnected,
}

impl std::fmt::Display for BleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BleState::Idle => write!(f, "idle"),
            BleState::Scanning => write!(f, "scanning"),
            BleState::Connecting => write!(f, "connecting"),
            BleState::DiscoveringServices => write!(f, "discovering services"),
            BleState::Ready => write!(f, "ready"),
            BleState::Disconnected => write!(f, "disconnected"),
        }
    }
}
