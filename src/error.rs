// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the bridge.
//!
//! Nothing below is fatal on its own once the bridge is running: the event
//! loop logs these errors and carries on. Only configuration errors raised
//! during startup end the process.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Error in the configuration file or its values.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Error reading or writing the durable counter.
    #[error("counter store error: {0}")]
    Store(#[from] StoreError),

    /// Error talking to the MQTT broker.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error driving a GPIO line.
    #[error("gpio error: {0}")]
    Gpio(#[from] GpioError),

    /// Error validating a value.
    #[error("value error: {0}")]
    Value(#[from] ValueError),

    /// Failed to serialize an outbound payload.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors related to loading and validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path of the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML or has wrongly typed values.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A quality-of-service level outside 0..=2.
    #[error("invalid MQTT QoS level {0}, expected 0, 1 or 2")]
    InvalidQos(u8),

    /// The meter is disabled and no light is usable.
    #[error("nothing to bridge: meter input disabled and no lights configured")]
    NothingToBridge,
}

/// Errors related to the durable counter file.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The counter file could not be read.
    #[error("failed to read counter from {path}: {source}")]
    Read {
        /// Path of the counter file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The counter file does not hold a non-negative decimal integer.
    #[error("counter file {path} holds {content:?}, not a non-negative integer")]
    Corrupt {
        /// Path of the counter file.
        path: PathBuf,
        /// What was found in the file (trimmed).
        content: String,
    },

    /// The counter file could not be written.
    #[error("failed to write counter to {path}: {source}")]
    Write {
        /// Path of the counter file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Errors related to MQTT communication.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The MQTT client rejected a request.
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// The session is down; the request was dropped rather than queued.
    #[error("not connected to the MQTT broker")]
    NotConnected,

    /// The session driver is gone.
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

/// Errors related to GPIO access.
#[derive(Debug, Error)]
pub enum GpioError {
    /// The GPIO driver reported an error.
    #[cfg(feature = "rpi")]
    #[error("GPIO driver error: {0}")]
    Driver(#[from] rppal::gpio::Error),

    /// The pin is already claimed by another line of this process.
    #[error("GPIO pin {0} is already in use")]
    PinBusy(u8),
}

/// Errors related to value validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// A light command payload other than `on`/`off`.
    #[error("invalid light command: {0:?}")]
    InvalidLightCommand(String),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
