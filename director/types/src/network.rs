// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Network reservations: an instance's claim on an address (or lack of one,
//! for dynamic networks) on a named network.

use serde::Deserialize;
use serde::Serialize;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationKind {
    Static,
    Dynamic,
}

/// A claim on an address for one instance on one network.
///
/// `ip` is `None` for dynamic reservations, where the concrete address is
/// picked by the IP provider at reserve time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkReservation {
    pub instance_uuid: String,
    pub network_name: String,
    pub ip: Option<IpAddr>,
    pub kind: ReservationKind,
}

impl NetworkReservation {
    pub fn new_static(
        instance_uuid: &str,
        network_name: &str,
        ip: IpAddr,
    ) -> Self {
        Self {
            instance_uuid: instance_uuid.to_string(),
            network_name: network_name.to_string(),
            ip: Some(ip),
            kind: ReservationKind::Static,
        }
    }

    pub fn new_dynamic(instance_uuid: &str, network_name: &str) -> Self {
        Self {
            instance_uuid: instance_uuid.to_string(),
            network_name: network_name.to_string(),
            ip: None,
            kind: ReservationKind::Dynamic,
        }
    }
}
