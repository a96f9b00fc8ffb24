// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Builds instance plans for the three classification cases, wiring the same
//! deployment-wide options into each one so behavior never depends on how a
//! plan was constructed.

use crate::collaborators::InstanceRepository;
use crate::errors::PlanningError;
use crate::plan::trusted_certs_digest;
use crate::plan::InstancePlan;
use crate::plan::PlanOptions;
use director_types::AgentState;
use director_types::DesiredInstance;
use director_types::ExistingInstanceRecord;
use director_types::PlanningContext;
use slog::o;
use slog::Logger;
use std::collections::BTreeMap;

pub struct InstancePlanFactory<'a> {
    repository: &'a dyn InstanceRepository,
    /// Last `get_state` results, keyed by instance uuid. Instances whose
    /// agents never answered are simply absent.
    agent_states: &'a BTreeMap<String, AgentState>,
    context: &'a PlanningContext,
    log: Logger,
}

impl<'a> InstancePlanFactory<'a> {
    pub fn new(
        repository: &'a dyn InstanceRepository,
        agent_states: &'a BTreeMap<String, AgentState>,
        context: &'a PlanningContext,
        log: &Logger,
    ) -> Self {
        Self {
            repository,
            agent_states,
            context,
            log: log.new(o!("component" => "InstancePlanFactory")),
        }
    }

    pub fn context(&self) -> &PlanningContext {
        self.context
    }

    fn plan_options(&self, job_name: &str) -> PlanOptions {
        PlanOptions {
            recreate_deployment: self.context.recreate_deployment,
            recreate_persistent_disks: self.context.recreate_persistent_disks,
            skip_drain: self.context.skip_drain.for_job(job_name),
            use_dns_addresses: self.context.use_dns_addresses,
            use_short_dns_addresses: self.context.use_short_dns_addresses,
            use_link_dns_addresses: self.context.use_link_dns_addresses,
            local_dns_enabled: self.context.local_dns_enabled,
            randomize_az_placement: self.context.randomize_az_placement,
            dns_domain: self.context.dns_domain.clone(),
            tags: self.context.tags.clone(),
            trusted_certs_digest: self
                .context
                .trusted_certs
                .as_deref()
                .map(trusted_certs_digest),
        }
    }

    fn agent_state(&self, uuid: &str) -> Option<&AgentState> {
        self.agent_states.get(uuid)
    }

    pub fn obsolete_instance_plan(
        &self,
        record: &ExistingInstanceRecord,
    ) -> Result<InstancePlan, PlanningError> {
        let instance = self
            .repository
            .fetch_obsolete(record, self.agent_state(&record.uuid))?;
        Ok(InstancePlan::new(
            None,
            Some(record.clone()),
            Some(instance),
            self.plan_options(&record.job_name),
            self.log.new(o!(
                "plan" => format!("{}/{}", record.job_name, record.uuid),
            )),
        ))
    }

    pub fn desired_existing_instance_plan(
        &self,
        record: &ExistingInstanceRecord,
        desired: DesiredInstance,
    ) -> Result<InstancePlan, PlanningError> {
        let instance = self.repository.fetch_existing(
            record,
            self.agent_state(&record.uuid),
            &desired,
        )?;
        let job_name = desired.instance_group.name.clone();
        Ok(InstancePlan::new(
            Some(desired),
            Some(record.clone()),
            Some(instance),
            self.plan_options(&job_name),
            self.log.new(o!(
                "plan" => format!("{}/{}", job_name, record.uuid),
            )),
        ))
    }

    pub fn desired_new_instance_plan(
        &self,
        desired: DesiredInstance,
        index: i32,
    ) -> Result<InstancePlan, PlanningError> {
        let instance = self.repository.create(&desired, index)?;
        let job_name = desired.instance_group.name.clone();
        let uuid = instance.uuid().to_string();
        Ok(InstancePlan::new(
            Some(desired),
            None,
            Some(instance),
            self.plan_options(&job_name),
            self.log.new(o!("plan" => format!("{job_name}/{uuid}"))),
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::example::example_instance_group;
    use crate::example::test_logger;
    use crate::example::InMemoryRepository;
    use director_types::SkipDrain;
    use std::sync::Arc;

    #[test]
    fn plan_options_mirror_the_planning_context() {
        let log = test_logger();
        let repository = InMemoryRepository::new(1, log.clone());
        let agent_states = BTreeMap::new();
        let context = PlanningContext {
            recreate_deployment: true,
            recreate_persistent_disks: true,
            use_dns_addresses: true,
            use_short_dns_addresses: true,
            use_link_dns_addresses: true,
            local_dns_enabled: true,
            randomize_az_placement: true,
            skip_drain: SkipDrain::Jobs(vec!["web".to_string()]),
            trusted_certs: Some("-----BEGIN CERTIFICATE-----".to_string()),
            ..PlanningContext::default()
        };
        let factory = InstancePlanFactory::new(
            &repository,
            &agent_states,
            &context,
            &log,
        );

        let desired = DesiredInstance::new(
            Arc::new(example_instance_group("web")),
            "simple",
            None,
        );
        let plan =
            factory.desired_new_instance_plan(desired, 0).expect("new plan");
        let options = plan.options();
        assert!(options.recreate_deployment);
        assert!(options.recreate_persistent_disks);
        assert!(options.use_dns_addresses);
        assert!(options.use_short_dns_addresses);
        assert!(options.use_link_dns_addresses);
        assert!(options.local_dns_enabled);
        assert!(options.randomize_az_placement);
        assert!(options.skip_drain);
        assert_eq!(
            options.trusted_certs_digest,
            Some(trusted_certs_digest("-----BEGIN CERTIFICATE-----")),
        );

        // skip_drain is the one per-job option.
        let worker = DesiredInstance::new(
            Arc::new(example_instance_group("worker")),
            "simple",
            None,
        );
        let plan =
            factory.desired_new_instance_plan(worker, 0).expect("new plan");
        assert!(!plan.options().skip_drain);
    }
}
