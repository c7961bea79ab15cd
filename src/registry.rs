// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Registry of lights and their topics.
//!
//! The registry is built once at startup from the configured light entries.
//! Each accepted light claims its output line (driven to OFF for its
//! polarity) and gets three derived topics:
//!
//! ```text
//! discovery: {ha_prefix}/light/{script_name}/{name}/config
//! command:   {script_name}/light/{name}/set
//! state:     {script_name}/light/{name}/state
//! ```

use std::collections::HashMap;

use parking_lot::{Mutex, MutexGuard};

use crate::config::LightEntry;
use crate::gpio::{GpioBackend, OutputLine};
use crate::types::{LightState, Polarity};

/// Derives topic names from the script identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    script_name: String,
    ha_prefix: String,
}

impl TopicScheme {
    /// Creates a scheme for `script_name` announcing under `ha_prefix`.
    #[must_use]
    pub fn new(script_name: impl Into<String>, ha_prefix: impl Into<String>) -> Self {
        Self {
            script_name: script_name.into(),
            ha_prefix: ha_prefix.into(),
        }
    }

    /// Returns the script identity.
    #[must_use]
    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    /// Returns the discovery prefix.
    #[must_use]
    pub fn ha_prefix(&self) -> &str {
        &self.ha_prefix
    }

    /// Returns the three topics of the light called `name`.
    #[must_use]
    pub fn topics_for(&self, name: &str) -> DeviceTopics {
        let script = &self.script_name;
        DeviceTopics {
            discovery: format!("{}/light/{script}/{name}/config", self.ha_prefix),
            command: format!("{script}/light/{name}/set"),
            state: format!("{script}/light/{name}/state"),
        }
    }

    /// Returns the unique id announced for the light called `name`.
    #[must_use]
    pub fn unique_id(&self, name: &str) -> String {
        format!("{}_{name}_light", self.script_name)
    }
}

/// The topics belonging to one light.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTopics {
    /// Retained discovery announcement.
    pub discovery: String,
    /// Subscribed command topic.
    pub command: String,
    /// Published state topic.
    pub state: String,
}

/// A light: one named output line with its cached state.
pub struct Device {
    name: String,
    pin: u8,
    polarity: Polarity,
    topics: DeviceTopics,
    output: Mutex<DeviceOutput>,
}

struct DeviceOutput {
    line: Box<dyn OutputLine>,
    state: LightState,
}

impl Device {
    /// Returns the light's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the BCM pin number.
    #[must_use]
    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Returns the wiring polarity.
    #[must_use]
    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    /// Returns the light's topics.
    #[must_use]
    pub fn topics(&self) -> &DeviceTopics {
        &self.topics
    }

    /// Returns the last state applied to the light.
    #[must_use]
    pub fn state(&self) -> LightState {
        self.output.lock().state
    }

    /// Takes exclusive control of the light.
    ///
    /// Anything done while the guard is held, including publishing the new
    /// state, is atomic with respect to other commands for this light.
    pub fn lock(&self) -> DeviceGuard<'_> {
        DeviceGuard {
            polarity: self.polarity,
            output: self.output.lock(),
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("pin", &self.pin)
            .field("polarity", &self.polarity)
            .field("state", &self.output.try_lock().map(|o| o.state))
            .finish_non_exhaustive()
    }
}

/// Exclusive access to one light.
pub struct DeviceGuard<'a> {
    polarity: Polarity,
    output: MutexGuard<'a, DeviceOutput>,
}

impl DeviceGuard<'_> {
    /// Returns the cached state.
    #[must_use]
    pub fn state(&self) -> LightState {
        self.output.state
    }

    /// Returns the state the physical line currently represents.
    #[must_use]
    pub fn line_state(&self) -> LightState {
        self.polarity.state_for(self.output.line.is_set_high())
    }

    /// Drives the line for `state` and caches it.
    pub fn apply(&mut self, state: LightState) {
        let high = self.polarity.level_for(state);
        self.output.line.set_level(high);
        self.output.state = state;
    }
}

/// The set of lights, keyed by unique name.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
    by_command_topic: HashMap<String, usize>,
}

impl DeviceRegistry {
    /// Builds the registry, claiming one output line per accepted entry.
    ///
    /// Entries without a pin, with a name already taken, or whose pin cannot
    /// be claimed are logged and skipped; the rest of the build carries on.
    #[must_use]
    pub fn build(entries: &[LightEntry], scheme: &TopicScheme, gpio: &dyn GpioBackend) -> Self {
        let mut registry = Self::default();

        for entry in entries {
            let Some(pin) = entry.pin else {
                tracing::warn!(light = %entry.name, "No GPIO pin configured, skipping light");
                continue;
            };
            if registry.get(&entry.name).is_some() {
                tracing::warn!(light = %entry.name, "Duplicate light name, skipping");
                continue;
            }

            let polarity = Polarity::from_active_high(entry.active_high);
            let line = match gpio.output(pin, polarity.level_for(LightState::Off)) {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(light = %entry.name, pin, error = %e, "Cannot claim GPIO pin, skipping light");
                    continue;
                }
            };

            tracing::info!(
                light = %entry.name,
                pin,
                active_high = entry.active_high,
                "Configured light"
            );

            let topics = scheme.topics_for(&entry.name);
            registry
                .by_command_topic
                .insert(topics.command.clone(), registry.devices.len());
            registry.devices.push(Device {
                name: entry.name.clone(),
                pin,
                polarity,
                topics,
                output: Mutex::new(DeviceOutput {
                    line,
                    state: LightState::Off,
                }),
            });
        }

        registry
    }

    /// Iterates over the lights in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    /// Returns the light called `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Returns the light whose command topic is `topic`.
    #[must_use]
    pub fn lookup_by_command_topic(&self, topic: &str) -> Option<&Device> {
        self.by_command_topic
            .get(topic)
            .and_then(|&index| self.devices.get(index))
    }

    /// Returns the number of lights.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns `true` when no light is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::SimulatedGpio;

    fn scheme() -> TopicScheme {
        TopicScheme::new("X", "homeassistant")
    }

    #[test]
    fn topic_derivation() {
        let topics = scheme().topics_for("porch");
        assert_eq!(topics.discovery, "homeassistant/light/X/porch/config");
        assert_eq!(topics.command, "X/light/porch/set");
        assert_eq!(topics.state, "X/light/porch/state");
        assert_eq!(scheme().unique_id("porch"), "X_porch_light");
    }

    #[test]
    fn build_starts_lights_off() {
        let gpio = SimulatedGpio::new();
        let entries = [
            LightEntry::new("porch", 17, true),
            LightEntry::new("shed", 27, false),
        ];
        let registry = DeviceRegistry::build(&entries, &scheme(), &gpio);

        assert_eq!(registry.len(), 2);
        assert_eq!(gpio.level(17), Some(false));
        // Active-low lines are de-asserted by driving them high.
        assert_eq!(gpio.level(27), Some(true));
        for device in registry.iter() {
            assert_eq!(device.state(), LightState::Off);
            assert_eq!(device.lock().line_state(), LightState::Off);
        }
    }

    #[test]
    fn build_skips_light_without_pin() {
        let gpio = SimulatedGpio::new();
        let entries = [
            LightEntry::new("porch", 17, true),
            LightEntry {
                name: "hall".to_string(),
                pin: None,
                active_high: true,
            },
        ];
        let registry = DeviceRegistry::build(&entries, &scheme(), &gpio);

        assert_eq!(registry.len(), 1);
        assert!(registry.get("hall").is_none());
        assert!(registry.lookup_by_command_topic("X/light/hall/set").is_none());
    }

    #[test]
    fn build_skips_duplicates_and_busy_pins() {
        let gpio = SimulatedGpio::new();
        let entries = [
            LightEntry::new("porch", 17, true),
            LightEntry::new("porch", 22, true),
            LightEntry::new("hall", 17, true),
        ];
        let registry = DeviceRegistry::build(&entries, &scheme(), &gpio);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("porch").unwrap().pin(), 17);
        assert_eq!(gpio.level(22), None);
    }

    #[test]
    fn lookup_by_command_topic() {
        let gpio = SimulatedGpio::new();
        let entries = [
            LightEntry::new("porch", 17, true),
            LightEntry::new("hall", 22, true),
        ];
        let registry = DeviceRegistry::build(&entries, &scheme(), &gpio);

        let device = registry.lookup_by_command_topic("X/light/hall/set").unwrap();
        assert_eq!(device.name(), "hall");
        assert!(registry.lookup_by_command_topic("X/light/hall/state").is_none());
        assert!(registry.lookup_by_command_topic("Y/light/hall/set").is_none());
    }

    #[test]
    fn iteration_keeps_configuration_order() {
        let gpio = SimulatedGpio::new();
        let entries = [
            LightEntry::new("c", 5, true),
            LightEntry::new("a", 6, true),
            LightEntry::new("b", 13, true),
        ];
        let registry = DeviceRegistry::build(&entries, &scheme(), &gpio);
        let names: Vec<_> = registry.iter().map(Device::name).collect();
        assert_eq!(names, ["c", "a", "b"]);
    }

    #[test]
    fn apply_respects_polarity() {
        let gpio = SimulatedGpio::new();
        let entries = [LightEntry::new("shed", 27, false)];
        let registry = DeviceRegistry::build(&entries, &scheme(), &gpio);
        let device = registry.get("shed").unwrap();

        device.lock().apply(LightState::On);
        assert_eq!(gpio.level(27), Some(false));
        assert_eq!(device.state(), LightState::On);

        device.lock().apply(LightState::Off);
        assert_eq!(gpio.level(27), Some(true));
    }
}
