// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Narrow interfaces consumed from external collaborators.
//!
//! Each component of the planning core depends only on the minimal capability
//! it needs; persistence, the agent RPC transport, and the cloud API live
//! behind these traits and are out of scope here.

use crate::errors::PlanningError;
use crate::instance::Instance;
use director_types::AgentState;
use director_types::AvailabilityZone;
use director_types::DesiredInstance;
use director_types::ExistingInstanceRecord;
use director_types::NetworkReservation;
use director_types::VmResources;
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Builds and persists `Instance` domain objects.
///
/// `create` persists a new instance record with state "started", a generated
/// uuid, deployment linkage, and the group's compilation flag.
pub trait InstanceRepository {
    fn fetch_existing(
        &self,
        record: &ExistingInstanceRecord,
        agent_state: Option<&AgentState>,
        desired: &DesiredInstance,
    ) -> Result<Instance, PlanningError>;

    fn fetch_obsolete(
        &self,
        record: &ExistingInstanceRecord,
        agent_state: Option<&AgentState>,
    ) -> Result<Instance, PlanningError>;

    fn create(
        &self,
        desired: &DesiredInstance,
        index: i32,
    ) -> Result<Instance, PlanningError>;
}

/// Single authority for reservation and release of addresses across all
/// instance plans in a run. The planner never mutates IP state directly on
/// an instance record.
pub trait IpProvider {
    fn reserve(
        &mut self,
        reservation: &NetworkReservation,
    ) -> Result<(), anyhow::Error>;

    fn reserve_existing_ips(
        &mut self,
        reservation: &NetworkReservation,
    ) -> Result<(), anyhow::Error>;

    fn release(
        &mut self,
        reservation: &NetworkReservation,
    ) -> Result<(), anyhow::Error>;
}

/// The slice of the agent RPC surface the planning core touches: shutting
/// down superseded VMs during orphaning.
pub trait AgentClient {
    fn shutdown(&self, vm_cid: &str) -> Result<(), anyhow::Error>;
}

/// Read access to published DNS state, used by `dns_changed`.
pub trait DnsRecords {
    /// True when `name` currently resolves to `ip`.
    fn has_record(&self, name: &str, ip: IpAddr) -> bool;

    /// Local-DNS rows recorded for the given instance (name, ip pairs).
    fn local_rows_for(&self, instance_uuid: &str) -> Vec<(String, IpAddr)>;
}

/// Resolves declarative `vm_resources` into concrete cloud properties for a
/// given availability zone (typically by calling the CPI).
pub trait VmCloudPropsResolver {
    fn resolve(
        &self,
        resources: &VmResources,
        az: Option<&AvailabilityZone>,
    ) -> Result<Value, anyhow::Error>;
}

/// Memoizing wrapper around a `VmCloudPropsResolver`.
///
/// Resolution can be a CPI round trip, so results are cached per unique
/// (resource spec, az) pair for the duration of a planning run.
pub struct VmResourcesCache<'a> {
    resolver: &'a dyn VmCloudPropsResolver,
    cached: BTreeMap<(VmResources, Option<String>), Value>,
}

impl<'a> VmResourcesCache<'a> {
    pub fn new(resolver: &'a dyn VmCloudPropsResolver) -> Self {
        Self { resolver, cached: BTreeMap::new() }
    }

    pub fn get_vm_cloud_properties(
        &mut self,
        resources: &VmResources,
        az: Option<&AvailabilityZone>,
    ) -> Result<Value, PlanningError> {
        let key = (resources.clone(), az.map(|az| az.name.clone()));
        if let Some(props) = self.cached.get(&key) {
            return Ok(props.clone());
        }
        let props = self
            .resolver
            .resolve(resources, az)
            .map_err(PlanningError::VmResourcesResolution)?;
        self.cached.insert(key, props.clone());
        Ok(props)
    }

    /// Number of distinct (resources, az) pairs resolved so far.
    pub fn len(&self) -> usize {
        self.cached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cached.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::example::CountingResolver;

    #[test]
    fn cache_memoizes_per_resources_and_az() {
        let resolver = CountingResolver::default();
        let mut cache = VmResourcesCache::new(&resolver);

        let small =
            VmResources { cpu: 1, ram_mb: 1024, ephemeral_disk_size_mb: 0 };
        let large =
            VmResources { cpu: 4, ram_mb: 8192, ephemeral_disk_size_mb: 0 };
        let z1 = AvailabilityZone::new("z1");

        let first = cache
            .get_vm_cloud_properties(&small, Some(&z1))
            .expect("resolve small/z1");
        let second = cache
            .get_vm_cloud_properties(&small, Some(&z1))
            .expect("resolve small/z1 again");
        assert_eq!(first, second);
        assert_eq!(resolver.calls(), 1);

        cache
            .get_vm_cloud_properties(&small, None)
            .expect("resolve small with no az");
        cache.get_vm_cloud_properties(&large, Some(&z1)).expect("resolve large");
        assert_eq!(resolver.calls(), 3);
        assert_eq!(cache.len(), 3);
    }
}
