// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! GPIO access.
//!
//! The bridge needs two primitives from the GPIO driver: level-settable
//! output lines for lights, and debounced edge notifications for the pulse
//! meter. [`GpioBackend`] captures exactly these.
//!
//! # Backends
//!
//! - [`RppalGpio`] - Raspberry Pi GPIO through `rppal` (feature `rpi`)
//! - [`SimulatedGpio`] - in-memory lines with injectable pulses

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::GpioError;

/// Callback invoked once per debounced pulse edge.
pub type PulseCallback = Box<dyn FnMut() + Send + 'static>;

/// A digital output line.
pub trait OutputLine: Send {
    /// Drives the line high (`true`) or low (`false`).
    fn set_level(&mut self, high: bool);

    /// Returns the level the line is currently driven to.
    fn is_set_high(&self) -> bool;
}

/// A GPIO driver.
pub trait GpioBackend: Send + Sync {
    /// Claims `pin` as an output, initially driven to `initial_high`.
    ///
    /// # Errors
    ///
    /// Returns [`GpioError`] if the pin cannot be claimed.
    fn output(&self, pin: u8, initial_high: bool) -> Result<Box<dyn OutputLine>, GpioError>;

    /// Claims `pin` as a pulled-up input and calls `on_pulse` for every
    /// falling edge, debounced by `bounce`.
    ///
    /// Notifications stop when the returned [`PulseWatch`] is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`GpioError`] if the pin cannot be claimed.
    fn watch_pulses(
        &self,
        pin: u8,
        bounce: Duration,
        on_pulse: PulseCallback,
    ) -> Result<PulseWatch, GpioError>;
}

/// Keeps an edge watch alive.
pub struct PulseWatch {
    pin: u8,
    _guard: Box<dyn Any + Send>,
}

impl PulseWatch {
    fn new(pin: u8, guard: impl Any + Send) -> Self {
        Self {
            pin,
            _guard: Box::new(guard),
        }
    }

    /// Returns the watched pin.
    #[must_use]
    pub fn pin(&self) -> u8 {
        self.pin
    }
}

impl std::fmt::Debug for PulseWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulseWatch").field("pin", &self.pin).finish()
    }
}

#[cfg(feature = "rpi")]
pub use rpi::RppalGpio;

#[cfg(feature = "rpi")]
mod rpi {
    use std::time::Duration;

    use rppal::gpio::{Gpio, OutputPin, Trigger};

    use super::{GpioBackend, OutputLine, PulseCallback, PulseWatch};
    use crate::error::GpioError;

    /// Raspberry Pi GPIO through the `rppal` driver.
    #[derive(Debug)]
    pub struct RppalGpio {
        gpio: Gpio,
    }

    impl RppalGpio {
        /// Opens the GPIO peripheral.
        ///
        /// # Errors
        ///
        /// Returns [`GpioError::Driver`] when not running on supported
        /// hardware or without access to `/dev/gpiomem`.
        pub fn new() -> Result<Self, GpioError> {
            Ok(Self { gpio: Gpio::new()? })
        }
    }

    impl OutputLine for OutputPin {
        fn set_level(&mut self, high: bool) {
            if high {
                self.set_high();
            } else {
                self.set_low();
            }
        }

        fn is_set_high(&self) -> bool {
            OutputPin::is_set_high(self)
        }
    }

    impl GpioBackend for RppalGpio {
        fn output(&self, pin: u8, initial_high: bool) -> Result<Box<dyn OutputLine>, GpioError> {
            let pin = self.gpio.get(pin)?;
            let line = if initial_high {
                pin.into_output_high()
            } else {
                pin.into_output_low()
            };
            Ok(Box::new(line))
        }

        fn watch_pulses(
            &self,
            pin: u8,
            bounce: Duration,
            mut on_pulse: PulseCallback,
        ) -> Result<PulseWatch, GpioError> {
            let mut input = self.gpio.get(pin)?.into_input_pullup();
            input.set_async_interrupt(Trigger::FallingEdge, Some(bounce), move |_event| {
                on_pulse();
            })?;
            Ok(PulseWatch::new(pin, input))
        }
    }
}

/// In-memory GPIO for running without hardware and for tests.
///
/// Output levels can be inspected with [`level`](Self::level) and pulses
/// injected with [`trigger_pulse`](Self::trigger_pulse). Debouncing is not
/// simulated.
#[derive(Clone, Default)]
pub struct SimulatedGpio {
    inner: Arc<SimulatedInner>,
}

#[derive(Default)]
struct SimulatedInner {
    levels: Mutex<HashMap<u8, bool>>,
    watches: Mutex<HashMap<u8, PulseCallback>>,
}

impl SimulatedGpio {
    /// Creates a simulator with no claimed pins.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the level of an output pin, or `None` if it was never claimed.
    #[must_use]
    pub fn level(&self, pin: u8) -> Option<bool> {
        self.inner.levels.lock().get(&pin).copied()
    }

    /// Delivers one pulse on `pin`. Returns `false` if nothing watches it.
    pub fn trigger_pulse(&self, pin: u8) -> bool {
        let mut watches = self.inner.watches.lock();
        match watches.get_mut(&pin) {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for SimulatedGpio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedGpio")
            .field("levels", &*self.inner.levels.lock())
            .finish_non_exhaustive()
    }
}

struct SimulatedLine {
    pin: u8,
    inner: Arc<SimulatedInner>,
}

impl OutputLine for SimulatedLine {
    fn set_level(&mut self, high: bool) {
        tracing::debug!(pin = self.pin, high, "Simulated output level");
        self.inner.levels.lock().insert(self.pin, high);
    }

    fn is_set_high(&self) -> bool {
        self.inner
            .levels
            .lock()
            .get(&self.pin)
            .copied()
            .unwrap_or(false)
    }
}

/// Removes the simulated watch when dropped.
struct SimulatedWatchGuard {
    pin: u8,
    inner: Arc<SimulatedInner>,
}

impl Drop for SimulatedWatchGuard {
    fn drop(&mut self) {
        self.inner.watches.lock().remove(&self.pin);
    }
}

impl GpioBackend for SimulatedGpio {
    fn output(&self, pin: u8, initial_high: bool) -> Result<Box<dyn OutputLine>, GpioError> {
        if self.inner.watches.lock().contains_key(&pin) {
            return Err(GpioError::PinBusy(pin));
        }
        let mut levels = self.inner.levels.lock();
        if levels.contains_key(&pin) {
            return Err(GpioError::PinBusy(pin));
        }
        levels.insert(pin, initial_high);
        Ok(Box::new(SimulatedLine {
            pin,
            inner: Arc::clone(&self.inner),
        }))
    }

    fn watch_pulses(
        &self,
        pin: u8,
        _bounce: Duration,
        on_pulse: PulseCallback,
    ) -> Result<PulseWatch, GpioError> {
        if self.inner.levels.lock().contains_key(&pin) {
            return Err(GpioError::PinBusy(pin));
        }
        let mut watches = self.inner.watches.lock();
        if watches.contains_key(&pin) {
            return Err(GpioError::PinBusy(pin));
        }
        watches.insert(pin, on_pulse);
        let guard = SimulatedWatchGuard {
            pin,
            inner: Arc::clone(&self.inner),
        };
        Ok(PulseWatch::new(pin, guard))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn simulated_output_levels() {
        let gpio = SimulatedGpio::new();
        let mut line = gpio.output(17, false).unwrap();
        assert_eq!(gpio.level(17), Some(false));
        assert!(!line.is_set_high());

        line.set_level(true);
        assert_eq!(gpio.level(17), Some(true));
        assert!(line.is_set_high());
    }

    #[test]
    fn simulated_pin_cannot_be_claimed_twice() {
        let gpio = SimulatedGpio::new();
        let _line = gpio.output(17, false).unwrap();
        assert!(matches!(
            gpio.output(17, false),
            Err(GpioError::PinBusy(17))
        ));
        assert!(gpio
            .watch_pulses(17, Duration::ZERO, Box::new(|| {}))
            .is_err());
    }

    #[test]
    fn simulated_pulses_until_watch_dropped() {
        let gpio = SimulatedGpio::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let watch = gpio
            .watch_pulses(
                18,
                Duration::from_millis(50),
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        assert_eq!(watch.pin(), 18);

        assert!(gpio.trigger_pulse(18));
        assert!(gpio.trigger_pulse(18));
        assert!(!gpio.trigger_pulse(19));
        assert_eq!(count.load(Ordering::SeqCst), 2);

        drop(watch);
        assert!(!gpio.trigger_pulse(18));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
