// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broker transport.
//!
//! Components that publish talk to a [`Transport`] rather than to the MQTT
//! client directly. [`MqttSession`] is the production implementation; tests
//! substitute a recording one.

mod mqtt_session;

pub use mqtt_session::{MqttSession, MqttSessionBuilder, MqttSessionConfig};
pub use rumqttc::QoS;

use crate::error::ProtocolError;

/// The outbound side of a broker session.
///
/// Every method returns immediately. `publish` and `subscribe` hand the
/// request to the session and report only whether it was accepted, so they
/// may be called concurrently from any context.
pub trait Transport: Send + Sync {
    /// Publishes `payload` to `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NotConnected`] while the session is down;
    /// the message is dropped, not queued.
    fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), ProtocolError>;

    /// Subscribes to `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the request cannot be handed over.
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ProtocolError>;

    /// Returns whether the broker has acknowledged the current connection.
    fn is_connected(&self) -> bool;

    /// Starts a connection attempt; the outcome arrives as a bridge event.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the attempt cannot be started.
    fn connect(&self) -> Result<(), ProtocolError>;

    /// Closes the session, best effort.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the disconnect request cannot be sent.
    fn disconnect(&self) -> Result<(), ProtocolError>;
}
