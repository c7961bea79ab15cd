// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Events feeding the bridge.
//!
//! Every asynchronous source (the MQTT session driver, the GPIO interrupt
//! thread) pushes a [`BridgeEvent`] onto one ordered intake channel. The
//! supervisor is the only consumer, so handlers never run concurrently.

use tokio::sync::mpsc;

/// Sending half of the bridge intake.
pub type EventSender = mpsc::UnboundedSender<BridgeEvent>;

/// Receiving half of the bridge intake.
pub type EventReceiver = mpsc::UnboundedReceiver<BridgeEvent>;

/// Creates the bridge intake.
///
/// The channel is unbounded so that the GPIO interrupt thread never blocks
/// and no pulse is ever dropped for lack of capacity.
#[must_use]
pub fn intake() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// An event delivered to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// The broker acknowledged a connection.
    Connected,

    /// The session went down, or a connect attempt failed.
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },

    /// A message arrived on a subscribed topic.
    MessageReceived {
        /// Topic the message was published to.
        topic: String,
        /// Raw payload.
        payload: Vec<u8>,
    },

    /// One debounced edge on the meter input.
    PulseDetected,
}

impl BridgeEvent {
    /// Creates a [`BridgeEvent::MessageReceived`].
    #[must_use]
    pub fn message(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self::MessageReceived {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Creates a [`BridgeEvent::Disconnected`].
    #[must_use]
    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::Disconnected {
            reason: reason.into(),
        }
    }
}
