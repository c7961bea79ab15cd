// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The broker session, backed by `rumqttc`.
//!
//! A [`MqttSession`] owns one `rumqttc` client. A background driver task
//! polls the client's event loop and turns what it sees into
//! [`BridgeEvent`]s on the bridge intake:
//!
//! ```text
//! ConnAck            -> BridgeEvent::Connected
//! Publish            -> BridgeEvent::MessageReceived
//! Disconnect / error -> BridgeEvent::Disconnected, driver parks
//! ```
//!
//! Once parked the driver does not poll again until [`Transport::connect`]
//! is called, which keeps reconnect attempts at the pace chosen by the
//! supervisor instead of the event loop's own retry loop.
//!
//! # Examples
//!
//! ```no_run
//! use gpio2mqtt::event;
//! use gpio2mqtt::protocol::{MqttSession, Transport};
//!
//! # async fn example() -> gpio2mqtt::Result<()> {
//! let (events, _intake) = event::intake();
//! let session = MqttSession::builder()
//!     .host("192.168.1.50")
//!     .port(1883)
//!     .credentials("user", "password")
//!     .build(events);
//!
//! session.connect()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Transport;
use crate::error::ProtocolError;
use crate::event::{BridgeEvent, EventSender};

/// Capacity of the request channel between client handle and event loop.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Configuration for a broker session.
#[derive(Debug, Clone)]
pub struct MqttSessionConfig {
    host: String,
    port: u16,
    client_id: String,
    credentials: Option<(String, String)>,
    keep_alive: Duration,
}

impl Default for MqttSessionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: format!("gpio2mqtt-{}", std::process::id()),
            credentials: None,
            keep_alive: Duration::from_secs(60),
        }
    }
}

struct SessionShared {
    connected: AtomicBool,
    connect_requested: Notify,
    closed: CancellationToken,
}

/// A broker session shared by every component that publishes.
///
/// Publishing never waits on the network: requests are handed to the event
/// loop and rejected outright while the session is down.
pub struct MqttSession {
    client: AsyncClient,
    shared: Arc<SessionShared>,
    config: MqttSessionConfig,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttSession {
    /// Creates a new builder for configuring a session.
    #[must_use]
    pub fn builder() -> MqttSessionBuilder {
        MqttSessionBuilder::default()
    }

    /// Returns the broker host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Returns the broker port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Returns the client identifier presented to the broker.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    /// Stops the driver, giving a pending DISCONNECT up to `grace` to go out.
    pub async fn close(&self, grace: Duration) {
        let handle = self.driver.lock().take();
        let Some(mut handle) = handle else {
            return;
        };

        let joined = match tokio::time::timeout(grace, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::debug!("MQTT driver did not stop in time, cancelling");
                self.shared.closed.cancel();
                handle.await
            }
        };
        if let Err(e) = joined {
            tracing::warn!(error = %e, "MQTT driver task failed");
        }
        self.shared.connected.store(false, Ordering::Release);
    }
}

impl Transport for MqttSession {
    fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), ProtocolError> {
        if !self.is_connected() {
            return Err(ProtocolError::NotConnected);
        }
        tracing::trace!(topic = %topic, ?qos, retain, "Publishing");
        self.client
            .try_publish(topic, qos, retain, payload)
            .map_err(ProtocolError::Mqtt)
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ProtocolError> {
        if !self.is_connected() {
            return Err(ProtocolError::NotConnected);
        }
        self.client
            .try_subscribe(topic, qos)
            .map_err(ProtocolError::Mqtt)
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    fn connect(&self) -> Result<(), ProtocolError> {
        if self.shared.closed.is_cancelled() {
            return Err(ProtocolError::ChannelClosed(
                "MQTT session is closed".to_string(),
            ));
        }
        tracing::debug!(
            host = %self.config.host,
            port = self.config.port,
            "Requesting MQTT connection"
        );
        self.shared.connect_requested.notify_one();
        Ok(())
    }

    fn disconnect(&self) -> Result<(), ProtocolError> {
        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            "Disconnecting from MQTT broker"
        );
        let sent = if self.is_connected() {
            self.client.try_disconnect().map_err(ProtocolError::Mqtt)
        } else {
            Ok(())
        };
        if !self.is_connected() {
            // Nothing to flush; let the parked driver exit.
            self.shared.closed.cancel();
        }
        sent
    }
}

impl std::fmt::Debug for MqttSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSession")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("client_id", &self.config.client_id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Builder for a broker session.
#[derive(Debug, Default)]
pub struct MqttSessionBuilder {
    config: MqttSessionConfig,
}

impl MqttSessionBuilder {
    /// Sets the broker host (default: `localhost`).
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets the client identifier (default: `gpio2mqtt-<pid>`).
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = client_id.into();
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the keep-alive interval (default: 60 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.config.keep_alive = duration;
        self
    }

    /// Creates the session and spawns its driver task.
    ///
    /// No connection is attempted until [`Transport::connect`] is called.
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn build(self, events: EventSender) -> MqttSession {
        let config = self.config;
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(true);
        if let Some((ref username, ref password)) = config.credentials {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let shared = Arc::new(SessionShared {
            connected: AtomicBool::new(false),
            connect_requested: Notify::new(),
            closed: CancellationToken::new(),
        });

        let driver = tokio::spawn(drive_session(event_loop, Arc::clone(&shared), events));

        MqttSession {
            client,
            shared,
            config,
            driver: Mutex::new(Some(driver)),
        }
    }
}

/// What the driver does after one event loop poll.
enum Step {
    Continue,
    Park,
    Stop,
}

/// Polls the event loop while a connection is wanted, parking in between.
async fn drive_session(mut event_loop: EventLoop, shared: Arc<SessionShared>, events: EventSender) {
    loop {
        tokio::select! {
            () = shared.closed.cancelled() => return,
            () = shared.connect_requested.notified() => {}
        }

        loop {
            let polled = tokio::select! {
                () = shared.closed.cancelled() => return,
                polled = event_loop.poll() => polled,
            };

            match handle_poll(polled, &shared, &events) {
                Step::Continue => {}
                Step::Park => break,
                Step::Stop => return,
            }
        }
    }
}

fn handle_poll(
    polled: Result<Event, rumqttc::ConnectionError>,
    shared: &SessionShared,
    events: &EventSender,
) -> Step {
    let step = match polled {
        Ok(Event::Incoming(Packet::ConnAck(connack))) => {
            tracing::debug!(?connack, "MQTT broker acknowledged connection");
            shared.connected.store(true, Ordering::Release);
            events.send(BridgeEvent::Connected).map(|()| Step::Continue)
        }
        Ok(Event::Incoming(Packet::SubAck(suback))) => {
            tracing::debug!(?suback, "MQTT subscription acknowledged");
            Ok(Step::Continue)
        }
        Ok(Event::Incoming(Packet::Publish(publish))) => {
            tracing::debug!(topic = %publish.topic, "MQTT message received");
            events
                .send(BridgeEvent::message(publish.topic, publish.payload.to_vec()))
                .map(|()| Step::Continue)
        }
        Ok(Event::Incoming(Packet::Disconnect)) => {
            shared.connected.store(false, Ordering::Release);
            events
                .send(BridgeEvent::disconnected("broker closed the session"))
                .map(|()| Step::Park)
        }
        Ok(Event::Outgoing(Outgoing::Disconnect)) => {
            tracing::debug!("MQTT disconnect sent");
            shared.connected.store(false, Ordering::Release);
            Ok(Step::Stop)
        }
        Ok(_) => Ok(Step::Continue),
        Err(e) => {
            shared.connected.store(false, Ordering::Release);
            events
                .send(BridgeEvent::disconnected(e.to_string()))
                .map(|()| Step::Park)
        }
    };

    // The supervisor dropped its intake: nothing left to drive.
    step.unwrap_or(Step::Stop)
}
