// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Instance groups, desired instances, and persisted instance records.
//!
//! `ExistingInstanceRecord` is a planning-facing mirror of the persisted
//! instance row: it carries only the fields the reconciliation core compares,
//! not the full database model.

use crate::descriptors::AvailabilityZone;
use crate::descriptors::DiskSpec;
use crate::descriptors::NetworkConfig;
use crate::descriptors::Stemcell;
use crate::descriptors::VmExtension;
use crate::descriptors::VmResources;
use crate::descriptors::VmType;
use crate::network::NetworkReservation;
use crate::update::UpdateConfig;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Desired state of one instance, as declared in the manifest.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InstanceState {
    Started,
    Stopped,
    Detached,
    Recreate,
}

/// Job state as last reported by the agent.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Running,
    Stopped,
    Failing,
    Unresponsive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Service,
    Errand,
}

/// An instance-group rename declaration: instances persisted under
/// `name` are remapped to the declaring group during planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigratedFrom {
    pub name: String,
    pub az: Option<String>,
}

/// Desired configuration of a named set of homogeneous instances.
///
/// Exactly one of `vm_type` / `vm_resources` is set; `vm_resources` groups
/// have their cloud properties resolved through the VM resources cache during
/// planning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceGroupSpec {
    pub name: String,
    pub lifecycle: Lifecycle,
    pub azs: Vec<AvailabilityZone>,
    pub vm_type: Option<VmType>,
    pub vm_resources: Option<VmResources>,
    pub vm_extensions: Vec<VmExtension>,
    pub stemcell: Stemcell,
    pub env: Value,
    pub networks: Vec<NetworkConfig>,
    pub persistent_disk: Option<DiskSpec>,
    /// Package name -> compiled fingerprint.
    pub packages: BTreeMap<String, String>,
    /// Rendered job/template spec (names, versions, sha1s, blobstore ids).
    pub job_spec: Value,
    /// Hash of all rendered templates for this group.
    pub configuration_hash: Option<String>,
    pub update: UpdateConfig,
    pub migrated_from: Vec<MigratedFrom>,
    pub desired_state: InstanceState,
    pub compilation: bool,
}

impl InstanceGroupSpec {
    pub fn network(&self, name: &str) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.name == name)
    }
}

/// The target-state description of one instance slot, before it is matched to
/// a persisted record. `index` is `None` until the index assigner runs.
#[derive(Debug, Clone)]
pub struct DesiredInstance {
    pub instance_group: Arc<InstanceGroupSpec>,
    pub deployment: String,
    pub availability_zone: Option<AvailabilityZone>,
    pub index: Option<i32>,
}

impl DesiredInstance {
    pub fn new(
        instance_group: Arc<InstanceGroupSpec>,
        deployment: &str,
        availability_zone: Option<AvailabilityZone>,
    ) -> Self {
        Self {
            instance_group,
            deployment: deployment.to_string(),
            availability_zone,
            index: None,
        }
    }

    pub fn az_name(&self) -> Option<&str> {
        self.availability_zone.as_ref().map(|az| az.name.as_str())
    }
}

/// One VM row associated with an instance record. At most one is active;
/// the rest are leftovers from create-swap-delete updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmRecord {
    pub id: Uuid,
    /// Cloud-provider VM id.
    pub cid: String,
    pub active: bool,
    pub stemcell: Option<Stemcell>,
    pub env: Value,
    pub cloud_properties: Value,
    pub trusted_certs_digest: Option<String>,
}

/// The last-applied configuration snapshot persisted on an instance record,
/// updated on every successful apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub vm_type: Option<VmType>,
    pub stemcell: Option<Stemcell>,
    pub env: Value,
    /// Merged {vm_type, az, vm_extensions} cloud properties at last apply.
    pub cloud_properties: Value,
    /// Per-network settings, including the volatile `dns_record_name` key.
    pub networks: BTreeMap<String, Value>,
    pub packages: BTreeMap<String, String>,
    pub job_spec: Value,
    pub configuration_hash: Option<String>,
}

/// Persisted record of a previously created instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingInstanceRecord {
    pub job_name: String,
    pub index: i32,
    pub uuid: String,
    pub availability_zone: Option<String>,
    pub bootstrap: bool,
    pub ignore: bool,
    pub state: InstanceState,
    pub variable_set_id: u64,
    pub spec: Option<InstanceSpec>,
    pub vms: Vec<VmRecord>,
    pub active_persistent_disk: Option<DiskSpec>,
    /// IP rows persisted for this instance.
    pub network_reservations: Vec<NetworkReservation>,
}

impl ExistingInstanceRecord {
    pub fn active_vm(&self) -> Option<&VmRecord> {
        self.vms.iter().find(|vm| vm.active)
    }
}

/// Result of the agent's `get_state`, keyed by instance uuid at the planning
/// boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub job_state: JobState,
    pub job_spec: Value,
}
