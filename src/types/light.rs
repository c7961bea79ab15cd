// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! On/off state and wiring polarity of a light output.

use std::fmt;
use std::str::FromStr;

use crate::error::ValueError;

/// Logical state of a light.
///
/// Parsing accepts the command payloads `on` and `off` in any letter case;
/// [`as_str`](Self::as_str) yields the literals published on state topics.
///
/// # Examples
///
/// ```
/// use gpio2mqtt::types::LightState;
///
/// assert_eq!("On".parse::<LightState>().unwrap(), LightState::On);
/// assert_eq!(LightState::Off.as_str(), "OFF");
/// assert!("xyz".parse::<LightState>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LightState {
    /// Light is off.
    #[default]
    Off,
    /// Light is on.
    On,
}

impl LightState {
    /// Returns the payload published on the state topic.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::On => "ON",
        }
    }

    /// Returns `true` for [`LightState::On`].
    #[must_use]
    pub const fn is_on(&self) -> bool {
        matches!(self, Self::On)
    }
}

impl fmt::Display for LightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LightState {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("on") {
            Ok(Self::On)
        } else if s.eq_ignore_ascii_case("off") {
            Ok(Self::Off)
        } else {
            Err(ValueError::InvalidLightCommand(s.to_string()))
        }
    }
}

impl From<bool> for LightState {
    fn from(value: bool) -> Self {
        if value { Self::On } else { Self::Off }
    }
}

/// How a logical state maps onto the physical line level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Polarity {
    /// On drives the line high.
    #[default]
    ActiveHigh,
    /// On drives the line low (typical for relay boards).
    ActiveLow,
}

impl Polarity {
    /// Builds the polarity from an `active_high` configuration flag.
    #[must_use]
    pub const fn from_active_high(active_high: bool) -> Self {
        if active_high {
            Self::ActiveHigh
        } else {
            Self::ActiveLow
        }
    }

    /// Returns whether the line must be driven high for `state`.
    #[must_use]
    pub const fn level_for(&self, state: LightState) -> bool {
        match self {
            Self::ActiveHigh => state.is_on(),
            Self::ActiveLow => !state.is_on(),
        }
    }

    /// Returns the logical state a physical line level represents.
    #[must_use]
    pub const fn state_for(&self, high: bool) -> LightState {
        match self {
            Self::ActiveHigh => {
                if high {
                    LightState::On
                } else {
                    LightState::Off
                }
            }
            Self::ActiveLow => {
                if high {
                    LightState::Off
                } else {
                    LightState::On
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_state_as_str() {
        assert_eq!(LightState::On.as_str(), "ON");
        assert_eq!(LightState::Off.as_str(), "OFF");
    }

    #[test]
    fn light_state_from_str_ignores_case() {
        for payload in ["ON", "on", "On", "oN"] {
            assert_eq!(payload.parse::<LightState>().unwrap(), LightState::On);
        }
        for payload in ["OFF", "off", "Off"] {
            assert_eq!(payload.parse::<LightState>().unwrap(), LightState::Off);
        }
    }

    #[test]
    fn light_state_from_str_invalid() {
        for payload in ["xyz", "", "1", "true", " on"] {
            let result = payload.parse::<LightState>();
            assert!(matches!(
                result.unwrap_err(),
                ValueError::InvalidLightCommand(_)
            ));
        }
    }

    #[test]
    fn light_state_from_bool() {
        assert_eq!(LightState::from(true), LightState::On);
        assert_eq!(LightState::from(false), LightState::Off);
    }

    #[test]
    fn polarity_levels() {
        assert!(Polarity::ActiveHigh.level_for(LightState::On));
        assert!(!Polarity::ActiveHigh.level_for(LightState::Off));
        assert!(!Polarity::ActiveLow.level_for(LightState::On));
        assert!(Polarity::ActiveLow.level_for(LightState::Off));
    }

    #[test]
    fn polarity_state_roundtrip() {
        for polarity in [Polarity::ActiveHigh, Polarity::ActiveLow] {
            for state in [LightState::On, LightState::Off] {
                assert_eq!(polarity.state_for(polarity.level_for(state)), state);
            }
        }
    }

    #[test]
    fn polarity_from_flag() {
        assert_eq!(Polarity::from_active_high(true), Polarity::ActiveHigh);
        assert_eq!(Polarity::from_active_high(false), Polarity::ActiveLow);
    }
}
