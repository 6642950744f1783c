//! Configuration directives written to the device's config characteristic
//!
//! The device stores its server and Wi-Fi settings from a sequence of
//! `KEY=VALUE` strings and applies them when it receives `RESET`.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Literal that tells the device to apply the received settings
pub const RESET_DIRECTIVE: &str = "RESET";

/// Keys understood by the device firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    /// `SH`: relay server hostname
    ServerHost,
    /// `SP`: relay server pin
    ServerPin,
    /// `HE`: home Wi-Fi enabled
    HomeWifiEnabled,
    /// `HS`: home Wi-Fi SSID
    HomeWifiSsid,
    /// `HP`: home Wi-Fi password
    HomeWifiPassword,
    /// `ME`: mobile hotspot enabled
    MobileWifiEnabled,
    /// `MS`: mobile hotspot SSID
    MobileWifiSsid,
    /// `MP`: mobile hotspot password
    MobileWifiPassword,
}

impl ConfigKey {
    /// Two-letter key as sent on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::ServerHost => "SH",
            ConfigKey::ServerPin => "SP",
            ConfigKey::HomeWifiEnabled => "HE",
            ConfigKey::HomeWifiSsid => "HS",
            ConfigKey::HomeWifiPassword => "HP",
            ConfigKey::MobileWifiEnabled => "ME",
            ConfigKey::MobileWifiSsid => "MS",
            ConfigKey::MobileWifiPassword => "MP",
        }
    }

    fn parse(key: &str) -> Option<Self> {
        match key {
            "SH" => Some(ConfigKey::ServerHost),
            "SP" => Some(ConfigKey::ServerPin),
            "HE" => Some(ConfigKey::HomeWifiEnabled),
            "HS" => Some(ConfigKey::HomeWifiSsid),
            "HP" => Some(ConfigKey::HomeWifiPassword),
            "ME" => Some(ConfigKey::MobileWifiEnabled),
            "MS" => Some(ConfigKey::MobileWifiSsid),
            "MP" => Some(ConfigKey::MobileWifiPassword),
            _ => None,
        }
    }
}

/// One config write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigDirective {
    /// `KEY=VALUE`
    Set {
        /// Setting key
        key: ConfigKey,
        /// Setting value
        value: String,
    },
    /// `RESET`
    Reset,
}

impl ConfigDirective {
    /// `KEY=VALUE` directive
    pub fn set(key: ConfigKey, value: impl Into<String>) -> Self {
        ConfigDirective::Set {
            key,
            value: value.into(),
        }
    }

    /// UTF-8 bytes written to the config characteristic
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Parse a directive as the device would see it
    ///
    /// Returns `Ok(None)` for well-formed text with an unknown key.
    pub fn decode(bytes: &[u8]) -> Result<Option<Self>> {
        let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
        if text == RESET_DIRECTIVE {
            return Ok(Some(ConfigDirective::Reset));
        }
        let Some((key, value)) = text.split_once('=') else {
            return Ok(None);
        };
        Ok(ConfigKey::parse(key).map(|key| ConfigDirective::set(key, value)))
    }
}

impl std::fmt::Display for ConfigDirective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigDirective::Set { key, value } => write!(f, "{}={}", key.as_str(), value),
            ConfigDirective::Reset => f.write_str(RESET_DIRECTIVE),
        }
    }
}

/// Settings pushed to the device by a config sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Relay server hostname
    #[serde(default)]
    pub server_hostname: String,

    /// Relay server pin
    #[serde(default)]
    pub server_pin: String,

    /// Home Wi-Fi network
    #[serde(default)]
    pub home_wifi: WifiSettings,

    /// Mobile hotspot network
    #[serde(default)]
    pub mobile_wifi: WifiSettings,
}

/// One Wi-Fi network the device may join
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiSettings {
    /// Whether the device should use this network
    #[serde(default)]
    pub enabled: bool,

    /// Network SSID
    #[serde(default)]
    pub ssid: String,

    /// Network password
    #[serde(default)]
    pub password: String,
}

impl DeviceSettings {
    /// The fixed directive sequence, terminated by `RESET`
    pub fn directives(&self) -> Vec<ConfigDirective> {
        vec![
            ConfigDirective::set(ConfigKey::ServerHost, &self.server_hostname),
            ConfigDirective::set(ConfigKey::ServerPin, &self.server_pin),
            ConfigDirective::set(ConfigKey::HomeWifiEnabled, flag(self.home_wifi.enabled)),
            ConfigDirective::set(ConfigKey::HomeWifiSsid, &self.home_wifi.ssid),
            ConfigDirective::set(ConfigKey::HomeWifiPassword, &self.home_wifi.password),
            ConfigDirective::set(ConfigKey::MobileWifiEnabled, flag(self.mobile_wifi.enabled)),
            ConfigDirective::set(ConfigKey::MobileWifiSsid, &self.mobile_wifi.ssid),
            ConfigDirective::set(ConfigKey::MobileWifiPassword, &self.mobile_wifi.password),
            ConfigDirective::Reset,
        ]
    }
}

fn flag(enabled: bool) -> &'static str {
    if enabled {
        "1"
    } else {
        "0"
    }
}
