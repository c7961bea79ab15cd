// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Home Assistant MQTT discovery announcements.
//!
//! One retained message per light tells Home Assistant that the light
//! exists and which topics drive it. Announcements are sent once per
//! process lifetime; the supervisor holds the flag that enforces this.

use serde::Serialize;

use crate::config::DeviceInfoSection;
use crate::protocol::{QoS, Transport};
use crate::registry::{Device, DeviceRegistry, TopicScheme};
use crate::types::LightState;

/// Host metadata shared by every announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceMetadata {
    /// Stable identifiers of the host.
    pub identifiers: Vec<String>,
    /// Display name; the script identity.
    pub name: String,
    /// Hardware or platform model.
    pub model: String,
    /// Manufacturer.
    pub manufacturer: String,
    /// Version of this bridge.
    pub sw_version: String,
}

impl DeviceMetadata {
    /// Resolves metadata from configuration, filling gaps from the host.
    #[must_use]
    pub fn resolve(info: &DeviceInfoSection, script_name: &str) -> Self {
        let identifier = info
            .identifier
            .clone()
            .or_else(host_name)
            .unwrap_or_else(|| script_name.to_string());
        let model = info.model.clone().unwrap_or_else(|| {
            format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
        });

        Self {
            identifiers: vec![identifier],
            name: script_name.to_string(),
            model,
            manufacturer: info.manufacturer.clone(),
            sw_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Reads the kernel host name.
fn host_name() -> Option<String> {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Body of one discovery message.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryPayload<'a> {
    /// Light name.
    pub name: &'a str,
    /// Unique id: `{script_name}_{name}_light`.
    pub unique_id: String,
    /// Topic the light's state is published on.
    pub state_topic: &'a str,
    /// Topic commands are accepted on.
    pub command_topic: &'a str,
    /// Payload meaning "on".
    pub payload_on: &'static str,
    /// Payload meaning "off".
    pub payload_off: &'static str,
    /// Host metadata.
    pub device: &'a DeviceMetadata,
    /// Integration platform.
    pub platform: &'static str,
}

impl<'a> DiscoveryPayload<'a> {
    /// Builds the announcement for `device`.
    #[must_use]
    pub fn for_device(device: &'a Device, scheme: &TopicScheme, metadata: &'a DeviceMetadata) -> Self {
        Self {
            name: device.name(),
            unique_id: scheme.unique_id(device.name()),
            state_topic: &device.topics().state,
            command_topic: &device.topics().command,
            payload_on: LightState::On.as_str(),
            payload_off: LightState::Off.as_str(),
            device: metadata,
            platform: "mqtt",
        }
    }
}

/// Outcome of one announcement round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Announcements handed to the transport.
    pub published: usize,
    /// Announcements that could not be serialized or sent.
    pub failed: usize,
}

/// Publishes a retained discovery message for every registered light.
///
/// Failures are logged per light and counted in the report; they do not
/// stop the remaining announcements.
pub fn publish_discovery(
    registry: &DeviceRegistry,
    scheme: &TopicScheme,
    metadata: &DeviceMetadata,
    transport: &dyn Transport,
    qos: QoS,
) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();

    for device in registry.iter() {
        let topic = &device.topics().discovery;
        let payload = DiscoveryPayload::for_device(device, scheme, metadata);
        let sent = serde_json::to_vec(&payload)
            .map_err(crate::Error::from)
            .and_then(|body| {
                transport
                    .publish(topic, qos, true, body)
                    .map_err(crate::Error::from)
            });

        match sent {
            Ok(()) => {
                tracing::info!(topic = %topic, light = %device.name(), "Published discovery message");
                report.published += 1;
            }
            Err(e) => {
                tracing::warn!(topic = %topic, light = %device.name(), error = %e, "Failed to publish discovery message");
                report.failed += 1;
            }
        }
    }

    report
}
