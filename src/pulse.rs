// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Meter pulse handling.
//!
//! Each debounced edge on the meter input bumps the durable counter and
//! reports the new total to the integration topic:
//!
//! ```json
//! {"command":"udevice","idx":12,"nvalue":1043,"svalue":"1043"}
//! ```

use serde::Serialize;

use crate::counter::CounterStore;
use crate::protocol::{QoS, Transport};

/// Device update message understood by the metering integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeterReading {
    /// Always `"udevice"`.
    pub command: &'static str,
    /// Integration index of the meter.
    pub idx: i64,
    /// Counter total.
    pub nvalue: u64,
    /// Counter total as a string.
    pub svalue: String,
}

impl MeterReading {
    /// Creates a reading for meter `idx` at `value`.
    #[must_use]
    pub fn new(idx: i64, value: u64) -> Self {
        Self {
            command: "udevice",
            idx,
            nvalue: value,
            svalue: value.to_string(),
        }
    }
}

/// What one pulse produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseOutcome {
    /// Counter value after the pulse.
    pub value: u64,
    /// Whether the new value reached the counter file.
    pub persisted: bool,
    /// Whether the reading was accepted by the transport.
    pub published: bool,
}

/// Counts pulses and publishes meter readings.
#[derive(Debug)]
pub struct PulseHandler {
    store: CounterStore,
    idx: i64,
    topic: String,
    qos: QoS,
    retain: bool,
}

impl PulseHandler {
    /// Creates a handler reporting meter `idx` on `topic`.
    #[must_use]
    pub fn new(store: CounterStore, idx: i64, topic: impl Into<String>, qos: QoS, retain: bool) -> Self {
        Self {
            store,
            idx,
            topic: topic.into(),
            qos,
            retain,
        }
    }

    /// Returns the counter store.
    #[must_use]
    pub fn store(&self) -> &CounterStore {
        &self.store
    }

    /// Returns the integration topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Handles one pulse.
    ///
    /// The reading is published even when the counter file could not be
    /// written; the in-memory total is what gets reported.
    pub fn on_pulse(&self, transport: &dyn Transport) -> PulseOutcome {
        let increment = self.store.increment();
        let persisted = match &increment.persisted {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(value = increment.value, error = %e, "Failed to persist meter counter");
                false
            }
        };
        tracing::debug!(previous = increment.previous, value = increment.value, "Meter pulse");

        let reading = MeterReading::new(self.idx, increment.value);
        let sent = serde_json::to_vec(&reading)
            .map_err(crate::Error::from)
            .and_then(|body| {
                transport
                    .publish(&self.topic, self.qos, self.retain, body)
                    .map_err(crate::Error::from)
            });
        let published = match sent {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(topic = %self.topic, value = increment.value, error = %e, "Failed to publish meter reading");
                false
            }
        };

        PulseOutcome {
            value: increment.value,
            persisted,
            published,
        }
    }
}
