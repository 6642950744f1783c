//! M2 Protocol - Wire formats shared by the BLE device and the cloud relay
//!
//! The Onyx M2 device and the relay server speak the same binary framing, so
//! the relay is byte-transparent: frames received from the device are
//! forwarded to the server untouched and commands from the server are written
//! to the device untouched. This crate only interprets the bytes where the
//! relay itself needs to look inside them.
//!
//! # Frames
//!
//! Message frame (device → server):
//! - Bytes 0-3: Timestamp (little-endian u32)
//! - Byte 4: Bus id
//! - Bytes 5-6: Message id (little-endian u16)
//! - Byte 7: Payload length (0-8)
//! - Bytes 8+: Payload
//!
//! Command frame (server → device):
//! - Byte 0: Opcode
//! - Byte 1: Flags (when applicable)
//!
//! Config frame (relay → device): UTF-8 `KEY=VALUE`, terminated by `RESET`.
//!
//! The serial bridge hardware delivers raw bytes instead of framed
//! notifications; [`FrameReassembler`] splits that stream back into frames.

#![warn(missing_docs)]

pub mod command;
pub mod directive;
pub mod error;
pub mod gatt;
pub mod message;
pub mod stream;

pub use command::{Command, MessageFlags, Opcode};
pub use directive::{ConfigDirective, ConfigKey, DeviceSettings, WifiSettings, RESET_DIRECTIVE};
pub use error::{ProtocolError, Result};
pub use message::{Message, MAX_PAYLOAD_LEN, MESSAGE_HEADER_LEN};
pub use stream::{
    decode_frame_stream, FrameReassembler, Resync, StreamOutput, MAX_SERIAL_FRAME_LEN,
    SERIAL_HEADER_LEN, SERIAL_LENGTH_OFFSET,
};
