//! Error types for relay operations
//!
//! Nothing here is fatal to the hosting process. Transport errors degrade to
//! queued retries, malformed frames to a resync, session errors to a
//! reconnect, and missing configuration to silence until it is supplied.

use m2_protocol::ProtocolError;
use thiserror::Error;

/// Main error type for relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    // ===== BLE Errors =====
    /// BLE operation failed (scan, connect, write)
    #[error("BLE transport error: {0}")]
    Transport(String),

    /// Frame could not be decoded
    #[error("Malformed frame: {0}")]
    MalformedFrame(#[from] ProtocolError),

    /// BLE link is not ready
    #[error("Onyx M2 not connected")]
    NotConnected,

    /// No Bluetooth adapter on this host
    #[error("No Bluetooth adapter found")]
    NoAdapter,

    // ===== Cloud Errors =====
    /// WebSocket failure or timeout
    #[error("Cloud session error: {0}")]
    Session(String),

    /// Server hostname or pin not set
    #[error("Missing relay server configuration: {0}")]
    ConfigurationMissing(&'static str),

    // ===== Configuration Errors =====
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ===== General Errors =====
    /// Bridge task is gone
    #[error("Channel closed")]
    ChannelClosed,

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file parse error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RelayError {
    /// Check if the operation may succeed when retried later
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            RelayError::Transport(_) | RelayError::Session(_) | RelayError::NotConnected
        )
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            RelayError::Transport(_) => "TRANSPORT_ERROR",
            RelayError::MalformedFrame(_) => "MALFORMED_FRAME",
            RelayError::NotConnected => "NOT_CONNECTED",
            RelayError::NoAdapter => "NO_ADAPTER",
            RelayError::Session(_) => "SESSION_ERROR",
            RelayError::ConfigurationMissing(_) => "CONFIGURATION_MISSING",
            RelayError::InvalidConfig(_) => "INVALID_CONFIG",
            RelayError::ChannelClosed => "CHANNEL_CLOSED",
            RelayError::Io(_) => "IO_ERROR",
            RelayError::Json(_) => "JSON_ERROR",
        }
    }
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(feature = "ble")]
impl From<btleplug::Error> for RelayError {
    fn from(err: btleplug::Error) -> Self {
        RelayError::Transport(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        RelayError::Session(err.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for RelayError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        RelayError::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for RelayError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        RelayError::ChannelClosed
    }
}
