// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gpio2mqtt::config::DEFAULT_CONFIG_PATH;
use gpio2mqtt::{
    BridgeConfig, BridgeEvent, ConnectionSupervisor, CounterStore, DeviceMetadata,
    DeviceRegistry, GpioBackend, MqttSession, PulseHandler, TopicScheme, intake,
};

/// Time given to the MQTT DISCONNECT to leave before the session is dropped.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Bridge Raspberry Pi GPIO lines to an MQTT broker.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path of the TOML configuration file.
    #[arg(short, long, env = "GPIO2MQTT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log filter, e.g. `debug` or `gpio2mqtt=trace`. Overrides `RUST_LOG`.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref());

    let config = BridgeConfig::load(&cli.config)
        .wrap_err_with(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    let qos = config.mqtt.qos()?;
    log_startup(&config);

    let gpio = open_gpio()?;
    let scheme = TopicScheme::new(&config.main.script_name, &config.mqtt.hatopic);
    let registry = DeviceRegistry::build(&config.main.light_entries(), &scheme, gpio.as_ref());
    let metadata = DeviceMetadata::resolve(&config.device, &config.main.script_name);

    let (events, intake) = intake();

    let client_id = config
        .mqtt
        .client_id
        .clone()
        .unwrap_or_else(|| format!("{}-{}", config.main.script_name, std::process::id()));
    let mut builder = MqttSession::builder()
        .host(&config.mqtt.broker)
        .port(config.mqtt.port)
        .client_id(client_id)
        .keep_alive(config.mqtt.keep_alive());
    if let Some((username, password)) = config.mqtt.credentials() {
        builder = builder.credentials(username, password);
    }
    let session = Arc::new(builder.build(events.clone()));

    let mut supervisor = ConnectionSupervisor::new(
        session.clone(),
        registry,
        scheme,
        metadata,
        qos,
    )
    .with_liveness_interval(config.main.reconnect_interval());

    let meter_watch = if config.domoticz.enabled {
        let store = CounterStore::new(&config.domoticz.meterfile);
        info!(value = store.read(), "Meter counter");
        supervisor = supervisor.with_pulse_handler(PulseHandler::new(
            store,
            config.domoticz.idx,
            &config.mqtt.domoticzin,
            qos,
            config.mqtt.retain,
        ));

        let pulses = events.clone();
        let watch = gpio
            .watch_pulses(
                config.domoticz.gpio_pin,
                config.domoticz.bounce(),
                Box::new(move || {
                    if pulses.send(BridgeEvent::PulseDetected).is_err() {
                        tracing::debug!("Pulse dropped, bridge is stopping");
                    }
                }),
            )
            .wrap_err_with(|| format!("Failed to watch meter pin {}", config.domoticz.gpio_pin))?;
        Some(watch)
    } else {
        info!("Meter disabled");
        None
    };
    drop(events);

    let cancel = CancellationToken::new();
    tokio::spawn(wait_for_shutdown(cancel.clone()));

    supervisor.run(intake, cancel).await;

    drop(meter_watch);
    session.close(SHUTDOWN_GRACE).await;
    info!("Exiting");
    Ok(())
}

fn setup_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    }
    .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn log_startup(config: &BridgeConfig) {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting gpio2mqtt");
    if config.domoticz.enabled {
        info!(
            pin = config.domoticz.gpio_pin,
            meterfile = %config.domoticz.meterfile,
            idx = config.domoticz.idx,
            topic = %config.mqtt.domoticzin,
            "Meter"
        );
    }
    info!(
        broker = %config.mqtt.broker,
        port = config.mqtt.port,
        authenticated = config.mqtt.credentials().is_some(),
        "MQTT broker"
    );
    info!(
        script_name = %config.main.script_name,
        hatopic = %config.mqtt.hatopic,
        "Identity"
    );
    for light in config.main.light_entries() {
        info!(light = %light.name, pin = ?light.pin, active_high = light.active_high, "Light");
    }
}

#[cfg(feature = "rpi")]
fn open_gpio() -> Result<Box<dyn GpioBackend>> {
    let gpio = gpio2mqtt::gpio::RppalGpio::new().wrap_err("Failed to open GPIO")?;
    Ok(Box::new(gpio))
}

#[cfg(not(feature = "rpi"))]
fn open_gpio() -> Result<Box<dyn GpioBackend>> {
    warn!("Built without the `rpi` feature, no hardware is driven");
    Ok(Box::new(gpio2mqtt::gpio::SimulatedGpio::new()))
}

async fn wait_for_shutdown(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    () = received("SIGINT", tokio::signal::ctrl_c()) => {}
                    _ = sigterm.recv() => info!(signal = "SIGTERM", "Received signal"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                received("SIGINT", tokio::signal::ctrl_c()).await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        received("SIGINT", tokio::signal::ctrl_c()).await;
    }

    cancel.cancel();
}

/// Resolves once `listener` reports the signal.
///
/// A listener that cannot be registered never resolves, so it cannot
/// trigger a shutdown on its own.
async fn received(name: &str, listener: impl Future<Output = std::io::Result<()>>) {
    match listener.await {
        Ok(()) => info!(signal = name, "Received signal"),
        Err(e) => {
            error!(signal = name, error = %e, "Cannot listen for signal");
            std::future::pending::<()>().await;
        }
    }
}
