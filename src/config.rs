// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bridge configuration.
//!
//! The configuration is a TOML file with four optional sections. Every key
//! has a fallback, so an empty (or missing) file yields a runnable bridge
//! that counts pulses on GPIO 18 and reports them to `domoticz/in`.
//!
//! ```toml
//! [mqtt]
//! broker = "192.168.1.10"
//! username = "bridge"
//! password = "secret"
//! qos = 1
//!
//! [domoticz]
//! gpio_pin = 18
//! meterfile = "/var/lib/gpio2mqtt/meterstand.txt"
//! idx = 42
//!
//! [main]
//! script_name = "garage"
//! lights = ["porch", "hall"]
//! gpio_porch = 17
//! active_high_porch = true
//! ```
//!
//! Lights are declared by name; each name needs a `gpio_<name>` key in the
//! same section. A light without one is skipped when the registry is built.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use rumqttc::QoS;
use serde::Deserialize;

use crate::error::ConfigError;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Broker connection and topic settings.
    pub mqtt: MqttSection,
    /// Pulse meter settings.
    #[serde(alias = "meter")]
    pub domoticz: MeterSection,
    /// Script identity and lights.
    pub main: MainSection,
    /// Metadata announced in discovery messages.
    pub device: DeviceInfoSection,
}

impl BridgeConfig {
    /// Loads the configuration from `path`.
    ///
    /// A missing file is not an error: defaults are used and a warning is
    /// logged. An unreadable or malformed file is an error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, is not valid
    /// TOML, or holds invalid values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Configuration file not found, using defaults");
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&contents)?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parses and validates a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the text is not valid TOML or holds
    /// invalid values.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that cannot be expressed in the TOML types alone.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidQos`] for a QoS outside 0..=2 and
    /// [`ConfigError::NothingToBridge`] when the meter is disabled and no
    /// light has a pin.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mqtt.qos()?;
        let any_light = self.main.light_entries().iter().any(|l| l.pin.is_some());
        if !self.domoticz.enabled && !any_light {
            return Err(ConfigError::NothingToBridge);
        }
        Ok(())
    }
}

/// `[mqtt]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttSection {
    /// Broker host name or address.
    pub broker: String,
    /// Broker TCP port.
    pub port: u16,
    /// Optional user name; used only together with `password`.
    pub username: Option<String>,
    /// Optional password; used only together with `username`.
    pub password: Option<String>,
    /// Quality-of-service level (0, 1 or 2) for publishes and subscriptions.
    #[serde(rename = "qos")]
    pub qos_level: u8,
    /// Retain flag for meter readings.
    pub retain: bool,
    /// Home Assistant discovery prefix.
    pub hatopic: String,
    /// Topic meter readings are published to.
    pub domoticzin: String,
    /// MQTT keep-alive interval in seconds.
    pub keep_alive_secs: u64,
    /// Client identifier; derived from the script name when absent.
    pub client_id: Option<String>,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            qos_level: 0,
            retain: true,
            hatopic: "homeassistant".to_string(),
            domoticzin: "domoticz/in".to_string(),
            keep_alive_secs: 60,
            client_id: None,
        }
    }
}

impl MqttSection {
    /// Returns the configured quality-of-service level.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidQos`] for levels above 2.
    pub fn qos(&self) -> Result<QoS, ConfigError> {
        match self.qos_level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(ConfigError::InvalidQos(other)),
        }
    }

    /// Returns the credentials when both user name and password are set.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
                Some((user, pass))
            }
            _ => None,
        }
    }

    /// Returns the keep-alive interval.
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

/// `[domoticz]` section: the pulse meter.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MeterSection {
    /// Whether the pulse input is watched at all.
    pub enabled: bool,
    /// BCM pin number of the pulse input.
    pub gpio_pin: u8,
    /// Path of the durable counter file.
    pub meterfile: String,
    /// Index of the meter device in the downstream integration.
    pub idx: i64,
    /// Debounce interval applied by the GPIO driver, in milliseconds.
    pub bounce_ms: u64,
}

impl Default for MeterSection {
    fn default() -> Self {
        Self {
            enabled: true,
            gpio_pin: 18,
            meterfile: "meterstand.txt".to_string(),
            idx: 0,
            bounce_ms: 50,
        }
    }
}

impl MeterSection {
    /// Returns the debounce interval.
    #[must_use]
    pub fn bounce(&self) -> Duration {
        Duration::from_millis(self.bounce_ms)
    }
}

/// `[main]` section: script identity and light declarations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MainSection {
    /// Identity used as the first topic level and in unique ids.
    pub script_name: String,
    /// Names of the lights, in announcement order.
    #[serde(alias = "lampen")]
    pub lights: Vec<String>,
    /// Seconds between liveness checks of the broker session.
    pub reconnect_interval_secs: u64,
    /// Remaining keys, holding the per-light `gpio_<name>` and
    /// `active_high_<name>` entries.
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

impl Default for MainSection {
    fn default() -> Self {
        Self {
            script_name: "gpio2mqtt".to_string(),
            lights: Vec::new(),
            reconnect_interval_secs: 10,
            extra: BTreeMap::new(),
        }
    }
}

impl MainSection {
    /// Returns the liveness check interval.
    #[must_use]
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs.max(1))
    }

    /// Resolves the declared lights into entries, in declaration order.
    ///
    /// Blank names are dropped. A light whose `gpio_<name>` key is missing
    /// or not a valid pin number gets `pin: None`.
    #[must_use]
    pub fn light_entries(&self) -> Vec<LightEntry> {
        self.lights
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(|name| LightEntry {
                name: name.to_string(),
                pin: self.pin_for(name),
                active_high: self
                    .extra
                    .get(&format!("active_high_{name}"))
                    .and_then(toml::Value::as_bool)
                    .unwrap_or(true),
            })
            .collect()
    }

    fn pin_for(&self, name: &str) -> Option<u8> {
        let key = format!("gpio_{name}");
        let value = self.extra.get(&key)?;
        let pin = value.as_integer().and_then(|n| u8::try_from(n).ok());
        if pin.is_none() {
            tracing::warn!(key = %key, value = %value, "Ignoring invalid GPIO pin number");
        }
        pin
    }
}

/// One declared light, before any hardware is claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightEntry {
    /// Logical name, unique within the bridge.
    pub name: String,
    /// BCM pin number, if configured.
    pub pin: Option<u8>,
    /// Whether "on" drives the line high.
    pub active_high: bool,
}

impl LightEntry {
    /// Creates an entry with a pin assignment.
    #[must_use]
    pub fn new(name: impl Into<String>, pin: u8, active_high: bool) -> Self {
        Self {
            name: name.into(),
            pin: Some(pin),
            active_high,
        }
    }
}

/// `[device]` section: metadata announced with every discovery message.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceInfoSection {
    /// Stable identifier of this host; the host name when absent.
    pub identifier: Option<String>,
    /// Manufacturer string.
    pub manufacturer: String,
    /// Model string; `<os>-<arch>` when absent.
    pub model: Option<String>,
}

impl Default for DeviceInfoSection {
    fn default() -> Self {
        Self {
            identifier: None,
            manufacturer: "Raspberry Pi".to_string(),
            model: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_file() {
        let config = BridgeConfig::from_toml_str("").unwrap();
        assert_eq!(config.mqtt.broker, "localhost");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.qos().unwrap(), QoS::AtMostOnce);
        assert!(config.mqtt.retain);
        assert_eq!(config.mqtt.hatopic, "homeassistant");
        assert_eq!(config.mqtt.domoticzin, "domoticz/in");
        assert_eq!(config.domoticz.gpio_pin, 18);
        assert_eq!(config.domoticz.meterfile, "meterstand.txt");
        assert_eq!(config.domoticz.idx, 0);
        assert_eq!(config.main.script_name, "gpio2mqtt");
        assert_eq!(config.main.reconnect_interval(), Duration::from_secs(10));
        assert!(config.main.light_entries().is_empty());
        assert_eq!(config.device.manufacturer, "Raspberry Pi");
    }

    #[test]
    fn light_entries_with_missing_pin() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [main]
            script_name = "X"
            lights = ["porch", "hall", " "]
            gpio_porch = 17
            active_high_porch = false
            "#,
        )
        .unwrap();

        let entries = config.main.light_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], LightEntry::new("porch", 17, false));
        assert_eq!(entries[1].name, "hall");
        assert_eq!(entries[1].pin, None);
        assert!(entries[1].active_high);
    }

    #[test]
    fn invalid_pin_number_is_ignored() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [main]
            lights = ["porch"]
            gpio_porch = 300
            "#,
        )
        .unwrap();
        assert_eq!(config.main.light_entries()[0].pin, None);
    }

    #[test]
    fn lampen_alias() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [main]
            lampen = ["keuken"]
            gpio_keuken = 22
            "#,
        )
        .unwrap();
        assert_eq!(config.main.light_entries()[0].pin, Some(22));
    }

    #[test]
    fn invalid_qos_rejected() {
        let result = BridgeConfig::from_toml_str("[mqtt]\nqos = 3\n");
        assert!(matches!(result, Err(ConfigError::InvalidQos(3))));
    }

    #[test]
    fn nothing_to_bridge_rejected() {
        let result = BridgeConfig::from_toml_str(
            r#"
            [domoticz]
            enabled = false

            [main]
            lights = ["hall"]
            "#,
        );
        assert!(matches!(result, Err(ConfigError::NothingToBridge)));
    }

    #[test]
    fn malformed_toml_rejected() {
        let result = BridgeConfig::from_toml_str("[mqtt\nbroker = ");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn credentials_need_both_parts() {
        let mut mqtt = MqttSection {
            username: Some("user".to_string()),
            ..MqttSection::default()
        };
        assert!(mqtt.credentials().is_none());
        mqtt.password = Some("pass".to_string());
        assert_eq!(mqtt.credentials(), Some(("user", "pass")));
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.main.script_name, "gpio2mqtt");
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[mqtt]\nbroker = \"10.0.0.2\"\nport = 1884\n").unwrap();
        let config = BridgeConfig::load(&path).unwrap();
        assert_eq!(config.mqtt.broker, "10.0.0.2");
        assert_eq!(config.mqtt.port, 1884);
    }
}
