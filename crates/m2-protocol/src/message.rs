//! Decoded vehicle bus messages
//!
//! A message frame is an 8-byte header followed by up to 8 payload bytes.
//! Every multi-byte field is little-endian and every field is unsigned.

use serde::Serialize;

use crate::error::{ProtocolError, Result};

/// Size of the message frame header
pub const MESSAGE_HEADER_LEN: usize = 8;

/// Maximum payload carried by one CAN frame
pub const MAX_PAYLOAD_LEN: usize = 8;

/// A single CAN bus message as relayed by the M2 device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Message {
    timestamp: u32,
    bus: u8,
    id: u16,
    data: Vec<u8>,
}

impl Message {
    /// Create a message, rejecting payloads longer than 8 bytes
    pub fn new(timestamp: u32, bus: u8, id: u16, data: impl Into<Vec<u8>>) -> Result<Self> {
        let data = data.into();
        if data.len() > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::InvalidLength {
                len: data.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        Ok(Self {
            timestamp,
            bus,
            id,
            data,
        })
    }

    /// Decode a message frame
    ///
    /// Reads exactly the header plus the declared payload; trailing bytes are
    /// ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MESSAGE_HEADER_LEN {
            return Err(ProtocolError::Truncated {
                needed: MESSAGE_HEADER_LEN,
                got: bytes.len(),
            });
        }

        let len = bytes[7] as usize;
        if len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::InvalidLength {
                len,
                max: MAX_PAYLOAD_LEN,
            });
        }

        let total = MESSAGE_HEADER_LEN + len;
        if bytes.len() < total {
            return Err(ProtocolError::Truncated {
                needed: total,
                got: bytes.len(),
            });
        }

        Ok(Self {
            timestamp: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            bus: bytes[4],
            id: u16::from_le_bytes([bytes[5], bytes[6]]),
            data: bytes[MESSAGE_HEADER_LEN..total].to_vec(),
        })
    }

    /// Encode into the wire layout understood by the device and the server
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(MESSAGE_HEADER_LEN + self.data.len());
        frame.extend_from_slice(&self.timestamp.to_le_bytes());
        frame.push(self.bus);
        frame.extend_from_slice(&self.id.to_le_bytes());
        frame.push(self.data.len() as u8);
        frame.extend_from_slice(&self.data);
        frame
    }

    /// Device timestamp
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Bus the message was seen on
    pub fn bus(&self) -> u8 {
        self.bus
    }

    /// CAN message id
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ts: {}, bus: {}, id: 0x{:03X}, len: {}",
            self.timestamp,
            self.bus,
            self.id,
            self.data.len()
        )
    }
}
