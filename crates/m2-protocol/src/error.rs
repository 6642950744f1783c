//! Error types for frame decoding

use thiserror::Error;

/// Errors produced while decoding M2 wire frames
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Fewer bytes than the header or the declared payload require
    #[error("Truncated frame: need {needed} bytes, got {got}")]
    Truncated {
        /// Bytes required for a complete frame
        needed: usize,
        /// Bytes available
        got: usize,
    },

    /// Declared payload length outside 0-8
    #[error("Invalid payload length {len} (max {max})")]
    InvalidLength {
        /// Declared length
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Command without an opcode byte
    #[error("Empty command frame")]
    EmptyCommand,

    /// Config directive that is not valid UTF-8
    #[error("Config directive is not valid UTF-8")]
    InvalidUtf8,
}

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
