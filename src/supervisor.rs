// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection supervision and the bridge event loop.
//!
//! The supervisor is the single consumer of the bridge intake. It tracks the
//! session lifecycle, reacts to acknowledgements (discovery once, then
//! resubscription on every connect), routes commands and pulses, and retries
//! a lost connection at a fixed liveness interval.
//!
//! ```text
//!              connect()                ConnAck
//! Disconnected ─────────▶ Connecting ─────────▶ Connected
//!      ▲                      │                     │
//!      └──────────────────────┴─────────────────────┘
//!                    Disconnected { reason }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::discovery::{DeviceMetadata, publish_discovery};
use crate::dispatcher::{CommandDispatcher, DispatchOutcome};
use crate::event::{BridgeEvent, EventReceiver};
use crate::protocol::{QoS, Transport};
use crate::pulse::PulseHandler;
use crate::registry::{DeviceRegistry, TopicScheme};
use crate::types::SessionState;

/// Default interval between liveness checks.
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(10);

/// Counters reported when the bridge stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Meter pulses handled.
    pub pulses: u64,
    /// Light commands applied.
    pub commands_applied: u64,
    /// Light commands rejected for an invalid payload.
    pub commands_rejected: u64,
    /// Reconnect attempts started by the liveness check.
    pub reconnect_attempts: u64,
}

/// Owns the bridge state and drives it from the intake.
pub struct ConnectionSupervisor {
    transport: Arc<dyn Transport>,
    registry: DeviceRegistry,
    scheme: TopicScheme,
    metadata: DeviceMetadata,
    qos: QoS,
    dispatcher: CommandDispatcher,
    pulses: Option<PulseHandler>,
    liveness_interval: Duration,
    state: SessionState,
    discovery_published: bool,
    stats: BridgeStats,
}

impl ConnectionSupervisor {
    /// Creates a supervisor for `registry`, publishing through `transport`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: DeviceRegistry,
        scheme: TopicScheme,
        metadata: DeviceMetadata,
        qos: QoS,
    ) -> Self {
        Self {
            transport,
            registry,
            scheme,
            metadata,
            qos,
            dispatcher: CommandDispatcher::new(qos),
            pulses: None,
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
            state: SessionState::Disconnected,
            discovery_published: false,
            stats: BridgeStats::default(),
        }
    }

    /// Enables meter pulse handling.
    #[must_use]
    pub fn with_pulse_handler(mut self, handler: PulseHandler) -> Self {
        self.pulses = Some(handler);
        self
    }

    /// Sets the interval between liveness checks.
    #[must_use]
    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval;
        self
    }

    /// Returns the session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns whether discovery has been announced in this process.
    #[must_use]
    pub fn discovery_published(&self) -> bool {
        self.discovery_published
    }

    /// Returns the counters collected so far.
    #[must_use]
    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// Returns the device registry.
    #[must_use]
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Starts a connection attempt.
    pub fn connect(&mut self) {
        match self.transport.connect() {
            Ok(()) => {
                self.state = SessionState::Connecting;
                tracing::debug!("Connection attempt started");
            }
            Err(e) => {
                self.state = SessionState::Disconnected;
                tracing::error!(error = %e, "Failed to start connection attempt");
            }
        }
    }

    /// Handles one intake event.
    pub fn handle_event(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::Connected => self.on_connected(),
            BridgeEvent::Disconnected { reason } => self.on_disconnected(&reason),
            BridgeEvent::MessageReceived { topic, payload } => self.on_message(&topic, &payload),
            BridgeEvent::PulseDetected => self.on_pulse(),
        }
    }

    /// Retries the connection if the session is down.
    pub fn check_liveness(&mut self) {
        if self.transport.is_connected() {
            return;
        }
        if self.state == SessionState::Connecting {
            tracing::debug!("Connection attempt still pending");
            return;
        }

        tracing::info!("Not connected to broker, reconnecting");
        self.stats.reconnect_attempts += 1;
        self.connect();
    }

    /// Runs the event loop until `cancel` fires or the intake closes.
    ///
    /// On exit the session is disconnected, best effort, and the collected
    /// counters are returned.
    pub async fn run(mut self, mut intake: EventReceiver, cancel: CancellationToken) -> BridgeStats {
        self.connect();

        let mut liveness = tokio::time::interval_at(
            Instant::now() + self.liveness_interval,
            self.liveness_interval,
        );
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::info!("Shutdown requested");
                    break;
                }
                event = intake.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        tracing::warn!("Event intake closed");
                        break;
                    }
                },
                _ = liveness.tick() => self.check_liveness(),
            }
        }

        if let Err(e) = self.transport.disconnect() {
            tracing::debug!(error = %e, "Disconnect failed");
        }
        self.state = SessionState::Disconnected;

        let stats = self.stats;
        tracing::info!(
            pulses = stats.pulses,
            commands_applied = stats.commands_applied,
            commands_rejected = stats.commands_rejected,
            reconnect_attempts = stats.reconnect_attempts,
            "Bridge stopped"
        );
        stats
    }

    fn on_connected(&mut self) {
        tracing::info!("Connected to broker");
        self.state = SessionState::Connected;

        if !self.discovery_published {
            let report = publish_discovery(
                &self.registry,
                &self.scheme,
                &self.metadata,
                self.transport.as_ref(),
                self.qos,
            );
            tracing::info!(published = report.published, failed = report.failed, "Discovery announced");
            self.discovery_published = true;
        }

        for device in self.registry.iter() {
            let topic = &device.topics().command;
            match self.transport.subscribe(topic, self.qos) {
                Ok(()) => tracing::info!(topic = %topic, "Subscribed"),
                Err(e) => tracing::warn!(topic = %topic, error = %e, "Failed to subscribe"),
            }
        }
    }

    fn on_disconnected(&mut self, reason: &str) {
        match self.state {
            SessionState::Connected => tracing::warn!(reason = %reason, "Connection to broker lost"),
            SessionState::Connecting => tracing::warn!(reason = %reason, "Connection attempt failed"),
            SessionState::Disconnected => tracing::debug!(reason = %reason, "Disconnected"),
        }
        self.state = SessionState::Disconnected;
    }

    fn on_message(&mut self, topic: &str, payload: &[u8]) {
        match self
            .dispatcher
            .dispatch(&self.registry, self.transport.as_ref(), topic, payload)
        {
            DispatchOutcome::Applied { .. } => self.stats.commands_applied += 1,
            DispatchOutcome::Rejected { .. } => self.stats.commands_rejected += 1,
            DispatchOutcome::UnknownTopic => {}
        }
    }

    fn on_pulse(&mut self) {
        let Some(handler) = &self.pulses else {
            tracing::debug!("Pulse received with meter disabled");
            return;
        };
        let transport = self.transport.as_ref();
        // The counter file is written synchronously; on a multi-threaded
        // runtime other tasks move to another worker meanwhile.
        let outcome = match Handle::try_current().map(|h| h.runtime_flavor()) {
            Ok(RuntimeFlavor::MultiThread) => {
                tokio::task::block_in_place(|| handler.on_pulse(transport))
            }
            _ => handler.on_pulse(transport),
        };
        self.stats.pulses += 1;
        tracing::info!(value = outcome.value, published = outcome.published, "Meter pulse counted");
    }
}

impl std::fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("state", &self.state)
            .field("discovery_published", &self.discovery_published)
            .field("lights", &self.registry.len())
            .field("meter", &self.pulses.is_some())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
