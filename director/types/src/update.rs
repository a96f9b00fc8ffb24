// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-instance-group update policy.

use serde::Deserialize;
use serde::Serialize;

/// How an instance group's update is sequenced relative to other groups
/// (`serial`) and within the group (`canaries` / `max_in_flight`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateConfig {
    pub serial: bool,
    pub canaries: usize,
    pub max_in_flight: usize,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self { serial: true, canaries: 1, max_in_flight: 1 }
    }
}
