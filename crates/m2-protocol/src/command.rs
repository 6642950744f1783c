//! Commands addressed to the M2 device
//!
//! Commands arrive from the relay server as raw bytes and are written to the
//! device's command characteristic unchanged. The relay only inspects them to
//! recognise the "set all message flags" directives, which it uses to pause
//! and resume telemetry forwarding.

use bytes::Bytes;
use std::ops::{BitOr, BitOrAssign};

use crate::error::{ProtocolError, Result};

/// Command opcodes understood by the M2 firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Set the flags of every message
    SetAllMsgFlags = 0x01,
    /// Set the flags of one message
    SetMsgFlags = 0x02,
    /// Request the last value of one message
    GetMsgLastValue = 0x03,
    /// Request the last value of every message
    GetAllMsgLastValue = 0x04,
    /// Capture a snapshot
    TakeSnapshot = 0x05,
    /// Start logging to a custom file
    StartLogging = 0x06,
    /// Stop logging to a custom file
    StopLogging = 0x07,
}

impl Opcode {
    /// Map a raw opcode byte, `None` for opcodes the relay does not know
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Opcode::SetAllMsgFlags),
            0x02 => Some(Opcode::SetMsgFlags),
            0x03 => Some(Opcode::GetMsgLastValue),
            0x04 => Some(Opcode::GetAllMsgLastValue),
            0x05 => Some(Opcode::TakeSnapshot),
            0x06 => Some(Opcode::StartLogging),
            0x07 => Some(Opcode::StopLogging),
            _ => None,
        }
    }
}

/// Per-message flag bits carried in byte 1 of flag commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageFlags(u8);

impl MessageFlags {
    /// No flags: stop transmitting
    pub const NONE: MessageFlags = MessageFlags(0x00);
    /// Transmit the message
    pub const TRANSMIT: MessageFlags = MessageFlags(0x01);
    /// Transmit even when the value did not change
    pub const TRANSMIT_UNMODIFIED: MessageFlags = MessageFlags(0x02);
    /// Skip down-sampling
    pub const FULL_RESOLUTION: MessageFlags = MessageFlags(0x04);
    /// Ignore rolling counters when detecting changes
    pub const IGNORE_COUNTERS: MessageFlags = MessageFlags(0x08);

    /// Wrap a raw flag byte
    pub const fn from_bits(bits: u8) -> Self {
        MessageFlags(bits)
    }

    /// Raw flag byte
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether every bit of `other` is set
    pub const fn contains(self, other: MessageFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MessageFlags {
    type Output = MessageFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        MessageFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for MessageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// A raw command for the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    bytes: Bytes,
}

impl Command {
    /// Wrap raw command bytes received from the server
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(ProtocolError::EmptyCommand);
        }
        Ok(Self { bytes })
    }

    /// `SET_ALL_MSG_FLAGS` with the given flags
    pub fn set_all_msg_flags(flags: MessageFlags) -> Self {
        Self::build(Opcode::SetAllMsgFlags, &[flags.bits()])
    }

    /// `SET_MSG_FLAGS` for one bus/message id pair
    pub fn set_msg_flags(bus: u8, id: u16, flags: MessageFlags) -> Self {
        let id = id.to_le_bytes();
        Self::build(Opcode::SetMsgFlags, &[bus, id[0], id[1], flags.bits()])
    }

    /// `GET_MSG_LAST_VALUE` for one bus/message id pair
    pub fn get_msg_last_value(bus: u8, id: u16) -> Self {
        let id = id.to_le_bytes();
        Self::build(Opcode::GetMsgLastValue, &[bus, id[0], id[1]])
    }

    /// `GET_ALL_MSG_LAST_VALUE`
    pub fn get_all_msg_last_value() -> Self {
        Self::build(Opcode::GetAllMsgLastValue, &[])
    }

    /// `TAKE_SNAPSHOT`
    pub fn take_snapshot() -> Self {
        Self::build(Opcode::TakeSnapshot, &[])
    }

    /// `START_LOGGING` to the named file
    pub fn start_logging(file_name: &str) -> Self {
        Self::build(Opcode::StartLogging, file_name.as_bytes())
    }

    /// `STOP_LOGGING`
    pub fn stop_logging() -> Self {
        Self::build(Opcode::StopLogging, &[])
    }

    fn build(opcode: Opcode, args: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(1 + args.len());
        bytes.push(opcode as u8);
        bytes.extend_from_slice(args);
        Self {
            bytes: Bytes::from(bytes),
        }
    }

    /// Raw opcode byte
    pub fn opcode_byte(&self) -> u8 {
        self.bytes[0]
    }

    /// Decoded opcode, if known
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_byte(self.opcode_byte())
    }

    /// Flag byte for `SET_ALL_MSG_FLAGS`, `None` for other commands
    pub fn all_msg_flags(&self) -> Option<MessageFlags> {
        if self.opcode() != Some(Opcode::SetAllMsgFlags) {
            return None;
        }
        self.bytes.get(1).map(|b| MessageFlags::from_bits(*b))
    }

    /// Server asks to stop all messages (the relay's mute directive)
    pub fn is_mute(&self) -> bool {
        self.all_msg_flags() == Some(MessageFlags::NONE)
    }

    /// Server asks to transmit all messages again
    pub fn is_unmute(&self) -> bool {
        self.all_msg_flags() == Some(MessageFlags::TRANSMIT)
    }

    /// Raw bytes as written to the device
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume into the raw bytes
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_command_rejected() {
        assert_eq!(
            Command::from_bytes(Vec::<u8>::new()),
            Err(ProtocolError::EmptyCommand)
        );
    }

    #[test]
    fn test_mute_and_unmute() {
        let mute = Command::from_bytes(vec![0x01, 0x00]).unwrap();
        assert!(mute.is_mute());
        assert!(!mute.is_unmute());

        let unmute = Command::from_bytes(vec![0x01, 0x01]).unwrap();
        assert!(unmute.is_unmute());
        assert!(!unmute.is_mute());

        assert_eq!(Command::set_all_msg_flags(MessageFlags::NONE), mute);
        assert_eq!(Command::set_all_msg_flags(MessageFlags::TRANSMIT), unmute);
    }

    #[test]
    fn test_other_flags_are_neither() {
        let cmd = Command::set_all_msg_flags(MessageFlags::TRANSMIT | MessageFlags::FULL_RESOLUTION);
        assert!(!cmd.is_mute());
        assert!(!cmd.is_unmute());
    }

    #[test]
    fn test_truncated_set_all_is_not_mute() {
        let cmd = Command::from_bytes(vec![0x01]).unwrap();
        assert_eq!(cmd.all_msg_flags(), None);
        assert!(!cmd.is_mute());
    }

    #[test]
    fn test_set_msg_flags_is_not_mute() {
        let cmd = Command::set_msg_flags(0, 0x102, MessageFlags::NONE);
        assert_eq!(cmd.as_bytes(), &[0x02, 0x00, 0x02, 0x01, 0x00]);
        assert!(!cmd.is_mute());
    }

    #[test]
    fn test_opcode_mapping() {
        assert_eq!(Opcode::from_byte(0x05), Some(Opcode::TakeSnapshot));
        assert_eq!(Opcode::from_byte(0x7F), None);
        assert_eq!(Command::take_snapshot().opcode(), Some(Opcode::TakeSnapshot));
        assert_eq!(Command::stop_logging().as_bytes(), &[0x07]);
    }

    #[test]
    fn test_flags() {
        let mut flags = MessageFlags::TRANSMIT;
        flags |= MessageFlags::IGNORE_COUNTERS;
        assert_eq!(flags.bits(), 0x09);
        assert!(flags.contains(MessageFlags::TRANSMIT));
        assert!(!flags.contains(MessageFlags::FULL_RESOLUTION));
    }
}
