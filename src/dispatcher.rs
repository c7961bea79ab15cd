// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Routing of inbound light commands.
//!
//! ```text
//! MQTT Message: X/light/porch/set → on
//!                     ↓
//!     registry.lookup_by_command_topic()
//!                     ↓
//!        parse "on" / "off" (any case)
//!                     ↓
//!   lock device → drive line → publish X/light/porch/state ON (retained)
//! ```
//!
//! The device lock is held from the level change until the state message
//! has been handed to the transport, so two commands for the same light can
//! never interleave their level and state updates.

use crate::protocol::{QoS, Transport};
use crate::registry::DeviceRegistry;
use crate::types::LightState;

/// What became of one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The light was switched.
    Applied {
        /// Light name.
        light: String,
        /// State applied.
        state: LightState,
        /// Whether the state message was accepted by the transport.
        published: bool,
    },
    /// The payload was not a valid command; nothing changed.
    Rejected {
        /// Light name.
        light: String,
        /// The offending payload, lossily decoded.
        payload: String,
    },
    /// No light listens on this topic.
    UnknownTopic,
}

/// Applies light commands and mirrors the result to the state topic.
#[derive(Debug, Clone, Copy)]
pub struct CommandDispatcher {
    qos: QoS,
}

impl CommandDispatcher {
    /// Creates a dispatcher publishing state messages at `qos`.
    #[must_use]
    pub fn new(qos: QoS) -> Self {
        Self { qos }
    }

    /// Handles one message received on `topic`.
    pub fn dispatch(
        &self,
        registry: &DeviceRegistry,
        transport: &dyn Transport,
        topic: &str,
        payload: &[u8],
    ) -> DispatchOutcome {
        let Some(device) = registry.lookup_by_command_topic(topic) else {
            tracing::trace!(topic = %topic, "Ignoring message for unknown topic");
            return DispatchOutcome::UnknownTopic;
        };

        let text = String::from_utf8_lossy(payload);
        let state = match text.parse::<LightState>() {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(light = %device.name(), payload = %text, error = %e, "Unknown payload for light");
                return DispatchOutcome::Rejected {
                    light: device.name().to_string(),
                    payload: text.into_owned(),
                };
            }
        };

        tracing::info!(light = %device.name(), pin = device.pin(), command = %text, "Received light command");

        let mut guard = device.lock();
        tracing::debug!(light = %device.name(), before = %guard.line_state(), "Output before switching");
        guard.apply(state);

        let state_topic = &device.topics().state;
        let published = match transport.publish(state_topic, self.qos, true, state.as_str().into()) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(topic = %state_topic, error = %e, "Failed to publish light state");
                false
            }
        };
        tracing::info!(light = %device.name(), after = %guard.line_state(), "Light switched");
        drop(guard);

        DispatchOutcome::Applied {
            light: device.name().to_string(),
            state,
            published,
        }
    }
}
