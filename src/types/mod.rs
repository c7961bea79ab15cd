// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types shared across the bridge.
//!
//! # Types
//!
//! - [`LightState`] - On/Off state of a light, parsed from command payloads
//! - [`Polarity`] - Active-high or active-low wiring of an output line
//! - [`SessionState`] - Broker session lifecycle

mod light;
mod session;

pub use light::{LightState, Polarity};
pub use session::SessionState;
