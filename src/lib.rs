// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `gpio2mqtt` - A bridge between Raspberry Pi GPIO lines and an MQTT broker.
//!
//! The bridge does two things:
//!
//! - **Pulse metering**: every debounced edge on a meter input increments a
//!   durable counter and publishes the new total as a `udevice` message to a
//!   metering integration (Domoticz).
//! - **Light control**: named output lines are announced to Home Assistant
//!   through MQTT discovery and switched by `ON`/`OFF` commands, with the
//!   resulting state published back, retained.
//!
//! # Architecture
//!
//! ```text
//!  GPIO interrupt ──┐
//!                   ├──▶ intake ──▶ ConnectionSupervisor ──▶ Transport
//!  MQTT session  ───┘                 │        │                (MqttSession)
//!                                     ▼        ▼
//!                             PulseHandler  CommandDispatcher
//!                             CounterStore  DeviceRegistry
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use gpio2mqtt::gpio::SimulatedGpio;
//! use gpio2mqtt::{
//!     BridgeConfig, ConnectionSupervisor, DeviceMetadata, DeviceRegistry, MqttSession,
//!     TopicScheme, intake,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> gpio2mqtt::Result<()> {
//!     let config = BridgeConfig::from_toml_str(
//!         r#"
//!         [main]
//!         script_name = "garage"
//!         lights = ["porch"]
//!         gpio_porch = 17
//!         "#,
//!     )?;
//!
//!     let gpio = SimulatedGpio::new();
//!     let scheme = TopicScheme::new(&config.main.script_name, &config.mqtt.hatopic);
//!     let registry = DeviceRegistry::build(&config.main.light_entries(), &scheme, &gpio);
//!     let metadata = DeviceMetadata::resolve(&config.device, &config.main.script_name);
//!
//!     let (events, intake) = intake();
//!     let session = Arc::new(MqttSession::builder().host(&config.mqtt.broker).build(events));
//!
//!     let supervisor =
//!         ConnectionSupervisor::new(session, registry, scheme, metadata, config.mqtt.qos()?);
//!     supervisor.run(intake, CancellationToken::new()).await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod counter;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod gpio;
pub mod protocol;
pub mod pulse;
pub mod registry;
pub mod supervisor;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::{BridgeConfig, LightEntry};
pub use counter::CounterStore;
pub use discovery::{DeviceMetadata, publish_discovery};
pub use dispatcher::{CommandDispatcher, DispatchOutcome};
pub use error::{ConfigError, Error, GpioError, ProtocolError, Result, StoreError, ValueError};
pub use event::{BridgeEvent, EventReceiver, EventSender, intake};
pub use gpio::{GpioBackend, OutputLine, PulseWatch};
pub use protocol::{MqttSession, MqttSessionBuilder, QoS, Transport};
pub use pulse::{MeterReading, PulseHandler};
pub use registry::{Device, DeviceRegistry, TopicScheme};
pub use supervisor::{BridgeStats, ConnectionSupervisor};
pub use types::{LightState, Polarity, SessionState};
