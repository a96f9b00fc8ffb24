// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test-support scaffolding: a small in-memory deployment with one instance
//! group, plus stub collaborators.
//!
//! `example_record` produces a persisted record that exactly mirrors the
//! default group configuration, so an `existing_plan` built from untouched
//! defaults reports no changes; tests perturb either side to trigger the
//! predicate under test.

use crate::collaborators::AgentClient;
use crate::collaborators::DnsRecords;
use crate::collaborators::InstanceRepository;
use crate::collaborators::IpProvider;
use crate::collaborators::VmCloudPropsResolver;
use crate::collaborators::VmResourcesCache;
use crate::errors::PlanningError;
use crate::factory::InstancePlanFactory;
use crate::instance::desired_network_settings;
use crate::instance::Instance;
use crate::plan::InstancePlan;
use crate::plan::PlanOptions;
use crate::planner::InstancePlanner;
use director_types::AgentState;
use director_types::AvailabilityZone;
use director_types::DesiredInstance;
use director_types::ExistingInstanceRecord;
use director_types::InstanceGroupSpec;
use director_types::InstanceSpec;
use director_types::InstanceState;
use director_types::JobState;
use director_types::Lifecycle;
use director_types::NetworkConfig;
use director_types::NetworkReservation;
use director_types::PlanningContext;
use director_types::Stemcell;
use director_types::UpdateConfig;
use director_types::VmRecord;
use director_types::VmResources;
use director_types::VmType;
use serde_json::json;
use serde_json::Value;
use slog::o;
use slog::Logger;
use std::cell::Cell;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use uuid::Uuid;

pub fn test_logger() -> Logger {
    Logger::root(slog::Discard, o!())
}

/// A service instance group with one dynamic network and a concrete VM type.
pub fn example_instance_group(name: &str) -> InstanceGroupSpec {
    InstanceGroupSpec {
        name: name.to_string(),
        lifecycle: Lifecycle::Service,
        azs: vec![AvailabilityZone::new("z1"), AvailabilityZone::new("z2")],
        vm_type: Some(VmType {
            name: "default".to_string(),
            cloud_properties: json!({"instance_type": "m1.small"}),
        }),
        vm_resources: None,
        vm_extensions: Vec::new(),
        stemcell: Stemcell::new("ubuntu-jammy", "1.234"),
        env: json!({}),
        networks: vec![NetworkConfig::dynamic("default")],
        persistent_disk: None,
        packages: BTreeMap::new(),
        job_spec: json!({"templates": [{"name": name, "version": "1"}]}),
        configuration_hash: Some("abc123".to_string()),
        update: UpdateConfig::default(),
        migrated_from: Vec::new(),
        desired_state: InstanceState::Started,
        compilation: false,
    }
}

/// A persisted record whose spec snapshot and active VM mirror the default
/// `example_instance_group(job)` exactly.
pub fn example_record(
    job: &str,
    index: i32,
    az: Option<&str>,
) -> ExistingInstanceRecord {
    let group = example_instance_group(job);
    let uuid = format!("{job}-{index}");
    // With null az cloud properties, the merged value is the VM type's.
    let merged = group
        .vm_type
        .as_ref()
        .map(|t| t.cloud_properties.clone())
        .unwrap_or(Value::Null);
    ExistingInstanceRecord {
        job_name: job.to_string(),
        index,
        uuid: uuid.clone(),
        availability_zone: az.map(str::to_string),
        bootstrap: false,
        ignore: false,
        state: InstanceState::Started,
        variable_set_id: 1,
        spec: Some(InstanceSpec {
            vm_type: group.vm_type.clone(),
            stemcell: Some(group.stemcell.clone()),
            env: group.env.clone(),
            cloud_properties: merged.clone(),
            networks: desired_network_settings(&group),
            packages: group.packages.clone(),
            job_spec: group.job_spec.clone(),
            configuration_hash: group.configuration_hash.clone(),
        }),
        vms: vec![VmRecord {
            id: Uuid::new_v4(),
            cid: format!("vm-{job}-{index}"),
            active: true,
            stemcell: Some(group.stemcell.clone()),
            env: group.env.clone(),
            cloud_properties: merged,
            trusted_certs_digest: None,
        }],
        active_persistent_disk: None,
        network_reservations: group
            .networks
            .iter()
            .map(|n| NetworkReservation::new_dynamic(&uuid, &n.name))
            .collect(),
    }
}

/// Repository stub that builds `Instance` values directly, with a fixed
/// desired variable set id.
pub struct InMemoryRepository {
    desired_variable_set_id: u64,
    log: Logger,
}

impl InMemoryRepository {
    pub fn new(desired_variable_set_id: u64, log: Logger) -> Self {
        Self { desired_variable_set_id, log }
    }
}

impl InstanceRepository for InMemoryRepository {
    fn fetch_existing(
        &self,
        record: &ExistingInstanceRecord,
        agent_state: Option<&AgentState>,
        desired: &DesiredInstance,
    ) -> Result<Instance, PlanningError> {
        Ok(Instance::bound_to_existing(
            record,
            agent_state,
            desired,
            self.desired_variable_set_id,
            &self.log,
        ))
    }

    fn fetch_obsolete(
        &self,
        record: &ExistingInstanceRecord,
        agent_state: Option<&AgentState>,
    ) -> Result<Instance, PlanningError> {
        Ok(Instance::obsolete(record, agent_state, &self.log))
    }

    fn create(
        &self,
        desired: &DesiredInstance,
        index: i32,
    ) -> Result<Instance, PlanningError> {
        Ok(Instance::create(
            desired,
            index,
            self.desired_variable_set_id,
            &self.log,
        ))
    }
}

/// IP provider stub that records every call instead of touching address
/// state.
#[derive(Default)]
pub struct RecordingIpProvider {
    pub reserved: Vec<NetworkReservation>,
    pub existing: Vec<NetworkReservation>,
    pub released: Vec<NetworkReservation>,
}

impl IpProvider for RecordingIpProvider {
    fn reserve(
        &mut self,
        reservation: &NetworkReservation,
    ) -> Result<(), anyhow::Error> {
        self.reserved.push(reservation.clone());
        Ok(())
    }

    fn reserve_existing_ips(
        &mut self,
        reservation: &NetworkReservation,
    ) -> Result<(), anyhow::Error> {
        self.existing.push(reservation.clone());
        Ok(())
    }

    fn release(
        &mut self,
        reservation: &NetworkReservation,
    ) -> Result<(), anyhow::Error> {
        self.released.push(reservation.clone());
        Ok(())
    }
}

/// Agent stub recording shutdown calls; the `failing` flavor refuses all of
/// them.
#[derive(Default)]
pub struct RecordingAgent {
    fail: bool,
    shutdowns: RefCell<Vec<String>>,
}

impl RecordingAgent {
    pub fn failing() -> Self {
        Self { fail: true, shutdowns: RefCell::new(Vec::new()) }
    }

    pub fn shutdowns(&self) -> Vec<String> {
        self.shutdowns.borrow().clone()
    }
}

impl AgentClient for RecordingAgent {
    fn shutdown(&self, vm_cid: &str) -> Result<(), anyhow::Error> {
        if self.fail {
            anyhow::bail!("agent unreachable for {vm_cid}");
        }
        self.shutdowns.borrow_mut().push(vm_cid.to_string());
        Ok(())
    }
}

/// DNS stub reporting every record as already published.
pub struct CompleteDns;

impl DnsRecords for CompleteDns {
    fn has_record(&self, _name: &str, _ip: IpAddr) -> bool {
        true
    }

    fn local_rows_for(&self, _instance_uuid: &str) -> Vec<(String, IpAddr)> {
        Vec::new()
    }
}

/// DNS stub with no published records. Remembers every name looked up so
/// tests can assert the exact queries `dns_changed` makes.
#[derive(Default)]
pub struct RecordingDns {
    local_rows: Vec<(String, IpAddr)>,
    queried: RefCell<Vec<String>>,
}

impl RecordingDns {
    pub fn with_local_rows(local_rows: Vec<(String, IpAddr)>) -> Self {
        Self { local_rows, queried: RefCell::new(Vec::new()) }
    }

    pub fn queried(&self) -> Vec<String> {
        self.queried.borrow().clone()
    }
}

impl DnsRecords for RecordingDns {
    fn has_record(&self, name: &str, _ip: IpAddr) -> bool {
        self.queried.borrow_mut().push(name.to_string());
        false
    }

    fn local_rows_for(&self, _instance_uuid: &str) -> Vec<(String, IpAddr)> {
        self.local_rows.clone()
    }
}

/// Resolver stub counting resolutions, for cache behavior assertions.
#[derive(Default)]
pub struct CountingResolver {
    calls: Cell<usize>,
}

impl CountingResolver {
    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl VmCloudPropsResolver for CountingResolver {
    fn resolve(
        &self,
        resources: &VmResources,
        az: Option<&AvailabilityZone>,
    ) -> Result<Value, anyhow::Error> {
        self.calls.set(self.calls.get() + 1);
        Ok(json!({
            "cpu": resources.cpu,
            "az": az.map(|az| az.name.clone()),
        }))
    }
}

/// A deployment fixture holding the collaborators a planner run needs.
pub struct ExampleDeployment {
    deployment: String,
    groups: BTreeMap<String, Arc<InstanceGroupSpec>>,
    repository: InMemoryRepository,
    agent_states: BTreeMap<String, AgentState>,
    context: PlanningContext,
    log: Logger,
}

impl ExampleDeployment {
    pub fn new(deployment: &str) -> Self {
        let log = test_logger();
        let mut groups = BTreeMap::new();
        groups.insert(
            "web".to_string(),
            Arc::new(example_instance_group("web")),
        );
        Self {
            deployment: deployment.to_string(),
            groups,
            repository: InMemoryRepository::new(1, log.clone()),
            agent_states: BTreeMap::new(),
            context: PlanningContext::default(),
            log,
        }
    }

    pub fn group(&self, name: &str) -> InstanceGroupSpec {
        InstanceGroupSpec::clone(
            self.groups.get(name).expect("known example group"),
        )
    }

    pub fn group_arc(&self, name: &str) -> Arc<InstanceGroupSpec> {
        Arc::clone(self.groups.get(name).expect("known example group"))
    }

    /// Replace (or add) a group, keeping everything else.
    pub fn with_group(mut self, group: InstanceGroupSpec) -> Self {
        self.groups.insert(group.name.clone(), Arc::new(group));
        self
    }

    pub fn planner(&self) -> InstancePlanner<'_> {
        InstancePlanner::new(
            InstancePlanFactory::new(
                &self.repository,
                &self.agent_states,
                &self.context,
                &self.log,
            ),
            &self.log,
        )
    }

    /// Plan one desired instance per entry of `azs` against `records`.
    pub fn plan(
        &self,
        name: &str,
        azs: &[Option<&str>],
        records: &[ExistingInstanceRecord],
    ) -> Vec<InstancePlan> {
        self.try_plan(name, azs, records)
            .expect("planning example instance group")
    }

    pub fn try_plan(
        &self,
        name: &str,
        azs: &[Option<&str>],
        records: &[ExistingInstanceRecord],
    ) -> Result<Vec<InstancePlan>, PlanningError> {
        let resolver = CountingResolver::default();
        let mut cache = VmResourcesCache::new(&resolver);
        self.try_plan_with_cache(name, azs, records, &mut cache)
    }

    pub fn plan_with_cache(
        &self,
        name: &str,
        azs: &[Option<&str>],
        records: &[ExistingInstanceRecord],
        cache: &mut VmResourcesCache<'_>,
    ) -> Vec<InstancePlan> {
        self.try_plan_with_cache(name, azs, records, cache)
            .expect("planning example instance group")
    }

    fn try_plan_with_cache(
        &self,
        name: &str,
        azs: &[Option<&str>],
        records: &[ExistingInstanceRecord],
        cache: &mut VmResourcesCache<'_>,
    ) -> Result<Vec<InstancePlan>, PlanningError> {
        let group = self.group_arc(name);
        let desired = azs
            .iter()
            .map(|az| {
                DesiredInstance::new(
                    Arc::clone(&group),
                    &self.deployment,
                    az.map(AvailabilityZone::new),
                )
            })
            .collect();
        self.planner()
            .plan_instance_group_instances(&group, desired, records, cache)
    }

    /// A plan for a brand-new desired slot. A new slot has no agent yet;
    /// the job-state argument exists for symmetry with the other helpers.
    pub fn new_plan(
        &self,
        name: &str,
        _agent_job_state: Option<JobState>,
    ) -> InstancePlan {
        let group = self.group_arc(name);
        let mut desired = DesiredInstance::new(
            Arc::clone(&group),
            &self.deployment,
            None,
        );
        desired.index = Some(0);
        let factory = InstancePlanFactory::new(
            &self.repository,
            &self.agent_states,
            &self.context,
            &self.log,
        );
        let mut plan = factory
            .desired_new_instance_plan(desired, 0)
            .expect("building new example plan");
        let uuid = plan.instance().expect("new plan instance").uuid().to_string();
        plan.set_desired_network_reservations(dynamic_reservations(
            &group, &uuid,
        ));
        plan
    }

    /// A plan binding the default settled record to a matching desired slot.
    pub fn existing_plan(
        &self,
        name: &str,
        index: i32,
        agent_job_state: Option<JobState>,
    ) -> InstancePlan {
        let record = example_record(name, index, Some("z1"));
        let group = self.group_arc(name);
        let mut desired = DesiredInstance::new(
            Arc::clone(&group),
            &self.deployment,
            Some(AvailabilityZone::new("z1")),
        );
        desired.index = Some(index);
        let agent_states = agent_state_map(&record.uuid, &group, agent_job_state);
        let factory = InstancePlanFactory::new(
            &self.repository,
            &agent_states,
            &self.context,
            &self.log,
        );
        let mut plan = factory
            .desired_existing_instance_plan(&record, desired)
            .expect("building existing example plan");
        plan.set_desired_network_reservations(dynamic_reservations(
            &group,
            &record.uuid,
        ));
        plan
    }

    /// A teardown plan for a record no desired slot claims.
    pub fn obsolete_plan(
        &self,
        name: &str,
        index: i32,
        agent_job_state: Option<JobState>,
    ) -> InstancePlan {
        let record = example_record(name, index, None);
        let group = self.group_arc(name);
        let agent_states = agent_state_map(&record.uuid, &group, agent_job_state);
        let factory = InstancePlanFactory::new(
            &self.repository,
            &agent_states,
            &self.context,
            &self.log,
        );
        factory
            .obsolete_instance_plan(&record)
            .expect("building obsolete example plan")
    }

    /// An existing plan with fully controlled sort inputs.
    pub fn synthetic_plan(
        &self,
        az: Option<&str>,
        uuid: &str,
        bootstrap: bool,
    ) -> InstancePlan {
        let group = self.group_arc("web");
        let mut record = example_record("web", 0, az);
        record.uuid = uuid.to_string();
        record.bootstrap = bootstrap;
        let mut desired = DesiredInstance::new(
            group,
            &self.deployment,
            az.map(AvailabilityZone::new),
        );
        desired.index = Some(0);
        let instance =
            Instance::bound_to_existing(&record, None, &desired, 1, &self.log);
        InstancePlan::new(
            Some(desired),
            Some(record),
            Some(instance),
            PlanOptions::default(),
            self.log.new(o!("plan" => uuid.to_string())),
        )
    }
}

fn dynamic_reservations(
    group: &InstanceGroupSpec,
    uuid: &str,
) -> Vec<NetworkReservation> {
    group
        .networks
        .iter()
        .map(|n| NetworkReservation::new_dynamic(uuid, &n.name))
        .collect()
}

fn agent_state_map(
    uuid: &str,
    group: &InstanceGroupSpec,
    job_state: Option<JobState>,
) -> BTreeMap<String, AgentState> {
    job_state
        .map(|job_state| {
            let state =
                AgentState { job_state, job_spec: group.job_spec.clone() };
            BTreeMap::from([(uuid.to_string(), state)])
        })
        .unwrap_or_default()
}
