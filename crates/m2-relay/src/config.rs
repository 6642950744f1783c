//! Configuration types for the relay
//!
//! This module provides configuration structures for the BLE link, the cloud
//! session, the settings pushed to the device, and bridge behavior.

use m2_protocol::gatt::DEFAULT_DEVICE_NAME;
use m2_protocol::DeviceSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{RelayError, Result};

/// Delay before reconnecting a failed cloud session
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

/// Interval between WebSocket keepalive pings
pub const DEFAULT_PING_INTERVAL_MS: u64 = 2000;

/// Delay before cycling the session after a network change
pub const DEFAULT_NETWORK_CHANGE_DELAY_MS: u64 = 5000;

/// WebSocket connect timeout
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10000;

/// Window of the forwarded-messages rate counter
pub const DEFAULT_RATE_INTERVAL_MS: u64 = 1000;

/// Frames buffered towards the WebSocket before dropping
pub const DEFAULT_OUTBOUND_QUEUE_SIZE: usize = 256;

/// Attempts per GATT write before it is dropped
pub const MAX_WRITE_ATTEMPTS: u8 = 3;

/// Path of the relay endpoint on the server
pub const RELAY_PATH: &str = "/relay";

/// Main configuration for the relay
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// BLE device selection
    #[serde(default)]
    pub ble: BleConfig,

    /// Cloud session settings
    #[serde(default)]
    pub cloud: CloudConfig,

    /// Settings written to the device on sync
    #[serde(default)]
    pub device: DeviceSettings,

    /// Bridge behavior
    #[serde(default)]
    pub bridge: BridgeConfig,
}

impl RelayConfig {
    /// Load a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: RelayConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the relay cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.ble.device_name.is_empty() && self.ble.device_address.is_none() {
            return Err(RelayError::InvalidConfig(
                "either ble.device_name or ble.device_address is required".to_string(),
            ));
        }
        if self.cloud.ping_interval.is_zero() {
            return Err(RelayError::InvalidConfig(
                "cloud.ping_interval must be positive".to_string(),
            ));
        }
        if self.cloud.outbound_queue_size == 0 {
            return Err(RelayError::InvalidConfig(
                "cloud.outbound_queue_size must be positive".to_string(),
            ));
        }
        if self.bridge.message_buffer == 0 || self.bridge.command_queue_size == 0 {
            return Err(RelayError::InvalidConfig(
                "bridge buffers must be positive".to_string(),
            ));
        }
        if self.bridge.rate_interval.is_zero() {
            return Err(RelayError::InvalidConfig(
                "bridge.rate_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which hardware revision the relay talks to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BleProfile {
    /// M2 board: one characteristic per concern, one message per notification
    #[default]
    Characteristic,
    /// DFRobot serial bridge: raw byte stream on one characteristic
    Serial,
}

impl std::fmt::Display for BleProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BleProfile::Characteristic => write!(f, "characteristic"),
            BleProfile::Serial => write!(f, "serial"),
        }
    }
}

impl std::str::FromStr for BleProfile {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "characteristic" => Ok(BleProfile::Characteristic),
            "serial" => Ok(BleProfile::Serial),
            other => Err(RelayError::InvalidConfig(format!("unknown BLE profile: {other}"))),
        }
    }
}

/// BLE device selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BleConfig {
    /// Advertised device name to connect to
    #[serde(default = "default_device_name")]
    pub device_name: String,

    /// Device address; matches regardless of name when set
    #[serde(default)]
    pub device_address: Option<String>,

    /// Hardware revision
    #[serde(default)]
    pub profile: BleProfile,
}

fn default_device_name() -> String {
    DEFAULT_DEVICE_NAME.to_string()
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            device_address: None,
            profile: BleProfile::Characteristic,
        }
    }
}

impl BleConfig {
    /// Whether an advertisement belongs to the configured device
    pub fn matches(&self, name: Option<&str>, address: &str) -> bool {
        if let Some(expected) = &self.device_address {
            if expected.eq_ignore_ascii_case(address) {
                return true;
            }
        }
        match name {
            Some(name) => !self.device_name.is_empty() && name == self.device_name,
            None => false,
        }
    }
}

/// Cloud session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Relay server hostname (with optional port)
    #[serde(default)]
    pub hostname: Option<String>,

    /// Relay pin
    #[serde(default)]
    pub pin: Option<String>,

    /// URL scheme, `wss` unless testing against a local server
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Keepalive ping interval
    #[serde(with = "humantime_serde", default = "default_ping_interval")]
    pub ping_interval: Duration,

    /// Delay before reconnecting after a failure
    #[serde(with = "humantime_serde", default = "default_reconnect_delay")]
    pub reconnect_delay: Duration,

    /// Delay before cycling the session after a network change
    #[serde(with = "humantime_serde", default = "default_network_change_delay")]
    pub network_change_delay: Duration,

    /// Connect timeout
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// Frames buffered towards the socket before new ones are dropped
    #[serde(default = "default_outbound_queue_size")]
    pub outbound_queue_size: usize,
}

fn default_scheme() -> String {
    "wss".to_string()
}

fn default_ping_interval() -> Duration {
    Duration::from_millis(DEFAULT_PING_INTERVAL_MS)
}

fn default_reconnect_delay() -> Duration {
    Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS)
}

fn default_network_change_delay() -> Duration {
    Duration::from_millis(DEFAULT_NETWORK_CHANGE_DELAY_MS)
}

fn default_connect_timeout() -> Duration {
    Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS)
}

fn default_outbound_queue_size() -> usize {
    DEFAULT_OUTBOUND_QUEUE_SIZE
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            pin: None,
            scheme: default_scheme(),
            ping_interval: default_ping_interval(),
            reconnect_delay: default_reconnect_delay(),
            network_change_delay: default_network_change_delay(),
            connect_timeout: default_connect_timeout(),
            outbound_queue_size: DEFAULT_OUTBOUND_QUEUE_SIZE,
        }
    }
}

impl CloudConfig {
    /// Relay URL, `wss://<hostname>/relay?pin=<pin>`
    ///
    /// Empty values count as missing.
    pub fn url(&self) -> Result<String> {
        let hostname =
            non_empty(&self.hostname).ok_or(RelayError::ConfigurationMissing("hostname"))?;
        let pin = non_empty(&self.pin).ok_or(RelayError::ConfigurationMissing("pin"))?;
        Ok(format!("{}://{}{}?pin={}", self.scheme, hostname, RELAY_PATH, pin))
    }

    /// Whether both hostname and pin are set
    pub fn is_configured(&self) -> bool {
        self.url().is_ok()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Bridge behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Window of the forwarded-messages rate counter
    #[serde(with = "humantime_serde", default = "default_rate_interval")]
    pub rate_interval: Duration,

    /// Capacity of the local message broadcast
    #[serde(default = "default_message_buffer")]
    pub message_buffer: usize,

    /// Queue size for handle commands
    #[serde(default = "default_command_queue_size")]
    pub command_queue_size: usize,
}

fn default_rate_interval() -> Duration {
    Duration::from_millis(DEFAULT_RATE_INTERVAL_MS)
}

fn default_message_buffer() -> usize {
    256
}

fn default_command_queue_size() -> usize {
    64
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            rate_interval: default_rate_interval(),
            message_buffer: default_message_buffer(),
            command_queue_size: default_command_queue_size(),
        }
    }
}

/// Builder for RelayConfig
#[derive(Debug, Default)]
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration
    pub fn from_config(config: RelayConfig) -> Self {
        Self { config }
    }

    /// Set the advertised device name
    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.config.ble.device_name = name.into();
        self
    }

    /// Set the device address
    pub fn device_address(mut self, address: impl Into<String>) -> Self {
        self.config.ble.device_address = Some(address.into());
        self
    }

    /// Set the hardware profile
    pub fn profile(mut self, profile: BleProfile) -> Self {
        self.config.ble.profile = profile;
        self
    }

    /// Set the relay server hostname and pin
    pub fn server(mut self, hostname: impl Into<String>, pin: impl Into<String>) -> Self {
        let hostname = hostname.into();
        let pin = pin.into();
        self.config.device.server_hostname = hostname.clone();
        self.config.device.server_pin = pin.clone();
        self.config.cloud.hostname = Some(hostname);
        self.config.cloud.pin = Some(pin);
        self
    }

    /// Set the URL scheme
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.config.cloud.scheme = scheme.into();
        self
    }

    /// Set the keepalive interval
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.cloud.ping_interval = interval;
        self
    }

    /// Set the reconnect delay
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.cloud.reconnect_delay = delay;
        self
    }

    /// Set the network change cycle delay
    pub fn network_change_delay(mut self, delay: Duration) -> Self {
        self.config.cloud.network_change_delay = delay;
        self
    }

    /// Set the outbound frame queue size
    pub fn outbound_queue_size(mut self, size: usize) -> Self {
        self.config.cloud.outbound_queue_size = size;
        self
    }

    /// Set the settings written to the device on sync
    pub fn device_settings(mut self, settings: DeviceSettings) -> Self {
        self.config.device = settings;
        self
    }

    /// Build the configuration
    pub fn build(self) -> RelayConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
