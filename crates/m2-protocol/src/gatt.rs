//! GATT service and characteristic identifiers
//!
//! Two hardware revisions exist. The M2 board exposes a dedicated service with
//! one characteristic per concern and sends one message per notification. The
//! older DFRobot serial bridge exposes a single serial characteristic that
//! carries a raw byte stream in both directions.

use uuid::Uuid;

/// Client characteristic configuration descriptor (enables notifications)
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid =
    Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// M2 relay service
pub const M2_SERVICE: Uuid = Uuid::from_u128(0xe9377e45_d4d2_4fdc_9e1c_448d8b4e05d5);

/// Config characteristic (write)
pub const M2_CONFIG_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x3c1a503d_06bd_4153_874c_c03e4866f19b);

/// Relay status characteristic (write, one byte)
pub const M2_RELAY_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x8e9e4115_30a8_4ce6_9362_5afec3315d7d);

/// Command characteristic (write)
pub const M2_COMMAND_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x25b9cc8b_9741_4beb_81fc_a0df9b155f8d);

/// Message characteristic (notify)
pub const M2_MESSAGE_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x7d363f56_9154_4168_8ee8_034a216edfb4);

/// DFRobot serial bridge service
pub const SERIAL_SERVICE: Uuid = Uuid::from_u128(0x0000dfb0_0000_1000_8000_00805f9b34fb);

/// DFRobot serial characteristic (notify + write)
pub const SERIAL_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000dfb1_0000_1000_8000_00805f9b34fb);

/// Advertised name of the M2 device
pub const DEFAULT_DEVICE_NAME: &str = "Onyx M2";

/// Relay status byte when the cloud session is open
pub const RELAY_STATUS_OPEN: u8 = 1;

/// Relay status byte when the cloud session is closed
pub const RELAY_STATUS_CLOSED: u8 = 0;
