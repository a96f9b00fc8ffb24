// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `Instance` domain object: the runtime pairing of one instance slot's
//! desired configuration and/or its persisted record, owned exclusively by an
//! instance plan for the duration of a convergence run.

use director_types::AgentState;
use director_types::AvailabilityZone;
use director_types::DesiredInstance;
use director_types::ExistingInstanceRecord;
use director_types::InstanceGroupSpec;
use director_types::InstanceState;
use director_types::JobState;
use director_types::Stemcell;
use director_types::VmExtension;
use director_types::VmType;
use serde_json::Value;
use slog::debug;
use slog::o;
use slog::Logger;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Instance {
    job_name: String,
    index: i32,
    uuid: String,
    deployment: String,
    availability_zone: Option<AvailabilityZone>,
    bootstrap: bool,
    state: InstanceState,
    compilation: bool,
    vm_type: Option<VmType>,
    vm_extensions: Vec<VmExtension>,
    stemcell: Option<Stemcell>,
    env: Value,
    /// Cloud properties resolved from `vm_resources`, when the group declares
    /// resource requirements instead of a concrete VM type.
    resolved_cloud_properties: Option<Value>,
    network_settings: BTreeMap<String, Value>,
    packages: BTreeMap<String, String>,
    job_spec: Value,
    configuration_hash: Option<String>,
    variable_set_id: Option<u64>,
    desired_variable_set_id: Option<u64>,
    current_job_state: Option<JobState>,
    existing: Option<ExistingInstanceRecord>,
    log: Logger,
}

impl Instance {
    /// Build an instance bound to a persisted record that is still desired.
    /// Desired configuration comes from the group; identity (index, uuid,
    /// bootstrap, variable set) comes from the record.
    pub fn bound_to_existing(
        record: &ExistingInstanceRecord,
        agent_state: Option<&AgentState>,
        desired: &DesiredInstance,
        desired_variable_set_id: u64,
        log: &Logger,
    ) -> Instance {
        let group = &desired.instance_group;
        let log = log.new(o!(
            "instance" => format!("{}/{}", record.job_name, record.uuid),
        ));
        Instance {
            job_name: group.name.clone(),
            index: record.index,
            uuid: record.uuid.clone(),
            deployment: desired.deployment.clone(),
            availability_zone: desired.availability_zone.clone(),
            bootstrap: record.bootstrap,
            state: group.desired_state,
            compilation: group.compilation,
            vm_type: group.vm_type.clone(),
            vm_extensions: group.vm_extensions.clone(),
            stemcell: Some(group.stemcell.clone()),
            env: group.env.clone(),
            resolved_cloud_properties: None,
            network_settings: desired_network_settings(group),
            packages: group.packages.clone(),
            job_spec: group.job_spec.clone(),
            configuration_hash: group.configuration_hash.clone(),
            variable_set_id: Some(record.variable_set_id),
            desired_variable_set_id: Some(desired_variable_set_id),
            current_job_state: agent_state.map(|s| s.job_state),
            existing: Some(record.clone()),
            log,
        }
    }

    /// Build an obsolete-flavored instance: no desired configuration, just
    /// enough of the record to tear the instance down.
    pub fn obsolete(
        record: &ExistingInstanceRecord,
        agent_state: Option<&AgentState>,
        log: &Logger,
    ) -> Instance {
        let log = log.new(o!(
            "instance" => format!("{}/{}", record.job_name, record.uuid),
        ));
        Instance {
            job_name: record.job_name.clone(),
            index: record.index,
            uuid: record.uuid.clone(),
            deployment: String::new(),
            availability_zone: record
                .availability_zone
                .as_deref()
                .map(AvailabilityZone::new),
            bootstrap: record.bootstrap,
            state: record.state,
            compilation: false,
            vm_type: None,
            vm_extensions: Vec::new(),
            stemcell: None,
            env: Value::Null,
            resolved_cloud_properties: None,
            network_settings: BTreeMap::new(),
            packages: BTreeMap::new(),
            job_spec: Value::Null,
            configuration_hash: None,
            variable_set_id: Some(record.variable_set_id),
            desired_variable_set_id: None,
            current_job_state: agent_state.map(|s| s.job_state),
            existing: Some(record.clone()),
            log,
        }
    }

    /// Build a brand-new instance for a desired slot with no matching record.
    /// State starts as "started" with a fresh uuid.
    pub fn create(
        desired: &DesiredInstance,
        index: i32,
        desired_variable_set_id: u64,
        log: &Logger,
    ) -> Instance {
        let group = &desired.instance_group;
        let uuid = Uuid::new_v4().to_string();
        let log = log.new(o!(
            "instance" => format!("{}/{}", group.name, uuid),
        ));
        Instance {
            job_name: group.name.clone(),
            index,
            uuid,
            deployment: desired.deployment.clone(),
            availability_zone: desired.availability_zone.clone(),
            bootstrap: false,
            state: InstanceState::Started,
            compilation: group.compilation,
            vm_type: group.vm_type.clone(),
            vm_extensions: group.vm_extensions.clone(),
            stemcell: Some(group.stemcell.clone()),
            env: group.env.clone(),
            resolved_cloud_properties: None,
            network_settings: desired_network_settings(group),
            packages: group.packages.clone(),
            job_spec: group.job_spec.clone(),
            configuration_hash: group.configuration_hash.clone(),
            variable_set_id: Some(desired_variable_set_id),
            desired_variable_set_id: Some(desired_variable_set_id),
            current_job_state: None,
            existing: None,
            log,
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn index(&self) -> i32 {
        self.index
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn deployment(&self) -> &str {
        &self.deployment
    }

    pub fn availability_zone(&self) -> Option<&AvailabilityZone> {
        self.availability_zone.as_ref()
    }

    pub fn az_name(&self) -> Option<&str> {
        self.availability_zone.as_ref().map(|az| az.name.as_str())
    }

    pub fn is_bootstrap(&self) -> bool {
        self.bootstrap
    }

    pub fn set_bootstrap(&mut self, bootstrap: bool) {
        if self.bootstrap != bootstrap {
            debug!(self.log, "bootstrap flag updated"; "bootstrap" => bootstrap);
        }
        self.bootstrap = bootstrap;
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn is_compilation(&self) -> bool {
        self.compilation
    }

    pub fn stemcell(&self) -> Option<&Stemcell> {
        self.stemcell.as_ref()
    }

    pub fn env(&self) -> &Value {
        &self.env
    }

    pub fn network_settings(&self) -> &BTreeMap<String, Value> {
        &self.network_settings
    }

    pub fn packages(&self) -> &BTreeMap<String, String> {
        &self.packages
    }

    pub fn job_spec(&self) -> &Value {
        &self.job_spec
    }

    pub fn configuration_hash(&self) -> Option<&str> {
        self.configuration_hash.as_deref()
    }

    pub fn variable_set_id(&self) -> Option<u64> {
        self.variable_set_id
    }

    pub fn desired_variable_set_id(&self) -> Option<u64> {
        self.desired_variable_set_id
    }

    pub fn current_job_state(&self) -> Option<JobState> {
        self.current_job_state
    }

    pub fn existing_record(&self) -> Option<&ExistingInstanceRecord> {
        self.existing.as_ref()
    }

    /// Install cloud properties resolved from `vm_resources` (through the VM
    /// resources cache). They stand in for the VM type's properties in the
    /// merge below.
    pub fn set_resolved_cloud_properties(&mut self, props: Value) {
        self.resolved_cloud_properties = Some(props);
    }

    /// The effective cloud properties of this instance: availability zone
    /// properties, overlaid with the VM type's (or the resolved
    /// `vm_resources` properties), overlaid with each VM extension's, in
    /// declaration order. Later keys win; the merge is shallow.
    pub fn merged_cloud_properties(&self) -> Value {
        let mut merged = self
            .availability_zone
            .as_ref()
            .map(|az| az.cloud_properties.clone())
            .unwrap_or(Value::Null);
        let vm_props = match &self.resolved_cloud_properties {
            Some(props) => Some(props),
            None => self.vm_type.as_ref().map(|t| &t.cloud_properties),
        };
        if let Some(props) = vm_props {
            merged = merge_json_objects(merged, props);
        }
        for extension in &self.vm_extensions {
            merged = merge_json_objects(merged, &extension.cloud_properties);
        }
        merged
    }

    /// Audit line emitted when an existing record is rebound to a desired
    /// slot.
    pub fn update_description(&self) {
        debug!(
            self.log, "bound existing instance to desired slot";
            "index" => self.index,
            "az" => self.az_name().unwrap_or("-"),
            "state" => %self.state,
        );
    }
}

/// Desired per-network settings for an instance of `group`, keyed by network
/// name. The volatile `dns_record_name` key is never part of the desired
/// side; `networks_changed` strips it from the persisted side too.
pub fn desired_network_settings(
    group: &InstanceGroupSpec,
) -> BTreeMap<String, Value> {
    group
        .networks
        .iter()
        .map(|network| {
            let settings = serde_json::json!({
                "type": network.kind,
            });
            (network.name.clone(), settings)
        })
        .collect()
}

fn merge_json_objects(base: Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                base.insert(key.clone(), value.clone());
            }
            Value::Object(base)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay.clone(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::example::example_instance_group;
    use crate::example::test_logger;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn merged_cloud_properties_layering() {
        let log = test_logger();
        let mut group = example_instance_group("web");
        group.vm_type = Some(VmType {
            name: "default".to_string(),
            cloud_properties: json!({"instance_type": "m1.small", "b": 2}),
        });
        group.vm_extensions = vec![VmExtension {
            name: "elb".to_string(),
            cloud_properties: json!({"elbs": ["lb1"], "b": 3}),
        }];
        let mut az = AvailabilityZone::new("z1");
        az.cloud_properties = json!({"datacenters": ["dc1"], "b": 1});

        let desired = DesiredInstance::new(
            Arc::new(group),
            "simple",
            Some(az),
        );
        let instance = Instance::create(&desired, 0, 1, &log);

        assert_eq!(
            instance.merged_cloud_properties(),
            json!({
                "datacenters": ["dc1"],
                "instance_type": "m1.small",
                "elbs": ["lb1"],
                "b": 3,
            })
        );
    }

    #[test]
    fn resolved_vm_resources_stand_in_for_vm_type() {
        let log = test_logger();
        let mut group = example_instance_group("web");
        group.vm_type = None;
        let desired = DesiredInstance::new(Arc::new(group), "simple", None);
        let mut instance = Instance::create(&desired, 0, 1, &log);

        assert_eq!(instance.merged_cloud_properties(), Value::Null);
        instance.set_resolved_cloud_properties(json!({"cpu": 2}));
        assert_eq!(instance.merged_cloud_properties(), json!({"cpu": 2}));
    }
}
