// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Immutable placement and VM-shape descriptors used as comparison keys.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::net::IpAddr;

/// A named availability zone plus the cloud properties every VM placed in it
/// inherits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityZone {
    pub name: String,
    pub cloud_properties: Value,
}

impl AvailabilityZone {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), cloud_properties: Value::Null }
    }
}

/// A named VM type. Only `cloud_properties` participates in drift detection;
/// the name is a manifest-level alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmType {
    pub name: String,
    pub cloud_properties: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmExtension {
    pub name: String,
    pub cloud_properties: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stemcell {
    pub name: String,
    pub version: String,
}

impl Stemcell {
    pub fn new(name: &str, version: &str) -> Self {
        Self { name: name.to_string(), version: version.to_string() }
    }
}

/// Declarative resource requirements used instead of a concrete VM type.
/// Resolution to cloud properties goes through the (memoized) VM resources
/// cache, keyed on this value plus the availability zone.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct VmResources {
    pub cpu: u32,
    pub ram_mb: u64,
    pub ephemeral_disk_size_mb: u64,
}

/// Desired persistent disk shape for an instance group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSpec {
    pub size_mb: u64,
    pub cloud_properties: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkKind {
    Manual,
    Dynamic,
    Vip,
}

/// One network attachment configured on an instance group.
///
/// A vip network, or a manual network with `static_ips`, calls for static
/// reservations created up front during planning; everything else reserves
/// dynamically at update time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub kind: NetworkKind,
    pub static_ips: Vec<IpAddr>,
}

impl NetworkConfig {
    pub fn dynamic(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: NetworkKind::Dynamic,
            static_ips: Vec::new(),
        }
    }

    pub fn manual(name: &str, static_ips: Vec<IpAddr>) -> Self {
        Self { name: name.to_string(), kind: NetworkKind::Manual, static_ips }
    }

    /// True when instances on this network claim a fixed address.
    pub fn needs_static_reservation(&self) -> bool {
        match self.kind {
            NetworkKind::Vip => true,
            NetworkKind::Manual => !self.static_ips.is_empty(),
            NetworkKind::Dynamic => false,
        }
    }
}
