// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The instance planner: matches the desired instances of one instance group
//! against its persisted records and emits the full set of instance plans
//! (new + existing + obsolete), resolves the bootstrap assignment, and
//! reconciles network plans.
//!
//! Planning is single-threaded and, apart from index allocation and record
//! creation through the repository, free of side effects. All fatal
//! configuration errors surface here, before any VM mutation begins.

use crate::collaborators::AgentClient;
use crate::collaborators::IpProvider;
use crate::collaborators::VmResourcesCache;
use crate::errors::PlanningError;
use crate::factory::InstancePlanFactory;
use crate::plan::InstancePlan;
use crate::plan::NetworkPlan;
use director_types::DesiredInstance;
use director_types::ExistingInstanceRecord;
use director_types::InstanceGroupSpec;
use director_types::NetworkReservation;
use itertools::Itertools;
use slog::debug;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

use crate::index_assigner::IndexAssigner;

pub struct InstancePlanner<'a> {
    factory: InstancePlanFactory<'a>,
    log: Logger,
}

impl<'a> InstancePlanner<'a> {
    pub fn new(factory: InstancePlanFactory<'a>, log: &Logger) -> Self {
        Self {
            factory,
            log: log.new(o!("component" => "InstancePlanner")),
        }
    }

    /// Produce the complete list of instance plans for `group`.
    ///
    /// Existing records match desired instances strictly by availability
    /// zone name (no zone matches no zone), consumed in ascending index
    /// order within a zone; a zone move always yields an obsolete plan plus
    /// a new one. Desired instances left unmatched take the lowest free
    /// index across the whole group, including indices still claimed by
    /// records headed for obsolescence.
    pub fn plan_instance_group_instances(
        &self,
        group: &Arc<InstanceGroupSpec>,
        desired_instances: Vec<DesiredInstance>,
        existing_records: &[ExistingInstanceRecord],
        vm_cache: &mut VmResourcesCache<'_>,
    ) -> Result<Vec<InstancePlan>, PlanningError> {
        let mut assigner = IndexAssigner::new(existing_records.iter());

        // Pools of unmatched records per az name, lowest index first.
        let mut pools: BTreeMap<Option<String>, VecDeque<&ExistingInstanceRecord>> =
            BTreeMap::new();
        for record in existing_records.iter().sorted_by_key(|r| r.index) {
            pools
                .entry(record.availability_zone.clone())
                .or_default()
                .push_back(record);
        }

        let mut existing_plans = Vec::new();
        let mut unmatched_desired = Vec::new();
        for mut desired in desired_instances {
            let pool = pools.entry(desired.az_name().map(str::to_string));
            let matched = match pool {
                std::collections::btree_map::Entry::Occupied(mut entry) => {
                    let record = entry.get_mut().pop_front();
                    if entry.get().is_empty() {
                        entry.remove();
                    }
                    record
                }
                std::collections::btree_map::Entry::Vacant(_) => None,
            };
            match matched {
                Some(record) => {
                    if record.ignore && group.desired_state != record.state {
                        return Err(PlanningError::IgnoredInstanceChanged {
                            job_name: record.job_name.clone(),
                            uuid: record.uuid.clone(),
                        });
                    }
                    assigner.claim(record.index);
                    desired.index = Some(record.index);
                    let plan = self
                        .factory
                        .desired_existing_instance_plan(record, desired)?;
                    if let Some(instance) = plan.instance() {
                        instance.update_description();
                    }
                    existing_plans.push(plan);
                }
                None => unmatched_desired.push(desired),
            }
        }

        let mut new_plans = Vec::new();
        for mut desired in unmatched_desired {
            let index = assigner.next_free();
            desired.index = Some(index);
            new_plans.push(self.factory.desired_new_instance_plan(desired, index)?);
        }

        let mut obsolete_plans = Vec::new();
        for pool in pools.into_values() {
            for record in pool {
                // Scale-down inside a still-desired group: an ignored record
                // cannot be torn down.
                if record.ignore {
                    return Err(PlanningError::IgnoredInstanceChanged {
                        job_name: record.job_name.clone(),
                        uuid: record.uuid.clone(),
                    });
                }
                obsolete_plans.push(self.factory.obsolete_instance_plan(record)?);
            }
        }

        let mut plans = existing_plans;
        plans.append(&mut new_plans);
        plans.append(&mut obsolete_plans);

        self.resolve_bootstrap(&mut plans);
        self.resolve_vm_resources(group, &mut plans, vm_cache)?;
        self.assign_desired_reservations(group, &mut plans)?;

        info!(
            self.log, "planned instance group";
            "group" => &group.name,
            "existing" => plans.iter().filter(|p| p.is_existing()).count(),
            "new" => plans.iter().filter(|p| p.is_new()).count(),
            "obsolete" => plans.iter().filter(|p| p.is_obsolete()).count(),
        );
        Ok(plans)
    }

    /// Exactly one non-obsolete plan's instance carries `bootstrap`. An
    /// existing carrier keeps the flag; with none, the lowest-indexed plan
    /// takes it; with several (corrupted state), the lowest-indexed carrier
    /// keeps it and the rest are cleared.
    fn resolve_bootstrap(&self, plans: &mut [InstancePlan]) {
        let mut carriers: Vec<(i32, usize)> = Vec::new();
        let mut lowest: Option<(i32, usize)> = None;
        for (i, plan) in plans.iter().enumerate() {
            if plan.is_obsolete() {
                continue;
            }
            let Some(instance) = plan.instance() else { continue };
            let key = (instance.index(), i);
            if instance.is_bootstrap() {
                carriers.push(key);
            }
            if lowest.map_or(true, |best| key < best) {
                lowest = Some(key);
            }
        }

        // The lowest-indexed carrier keeps the flag; clearing additional
        // carriers repairs corrupted multi-bootstrap state. With no carrier
        // at all, the lowest-indexed plan takes it.
        let keeper = match carriers.iter().min() {
            Some(&(_, i)) => i,
            None => {
                let Some((_, i)) = lowest else { return };
                debug!(self.log, "assigning bootstrap to lowest-indexed plan");
                i
            }
        };

        for (i, plan) in plans.iter_mut().enumerate() {
            if plan.is_obsolete() {
                continue;
            }
            if let Some(instance) = plan.instance_mut() {
                instance.set_bootstrap(i == keeper);
            }
        }
    }

    /// Resolve `vm_resources` into concrete cloud properties for every
    /// non-obsolete plan. Obsolete plans never trigger a cache lookup.
    fn resolve_vm_resources(
        &self,
        group: &InstanceGroupSpec,
        plans: &mut [InstancePlan],
        vm_cache: &mut VmResourcesCache<'_>,
    ) -> Result<(), PlanningError> {
        let Some(resources) = &group.vm_resources else { return Ok(()) };
        for plan in plans.iter_mut() {
            if plan.is_obsolete() {
                continue;
            }
            let Some(instance) = plan.instance_mut() else { continue };
            let az = instance.availability_zone().cloned();
            let props =
                vm_cache.get_vm_cloud_properties(resources, az.as_ref())?;
            instance.set_resolved_cloud_properties(props);
        }
        Ok(())
    }

    /// Fix each non-obsolete plan's desired reservations: static addresses
    /// (vip, manual with static_ips) are assigned up front by index order,
    /// dynamic networks get ip-less reservations for the provider to fill.
    fn assign_desired_reservations(
        &self,
        group: &InstanceGroupSpec,
        plans: &mut [InstancePlan],
    ) -> Result<(), PlanningError> {
        let mut order: Vec<usize> = plans
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_obsolete())
            .map(|(i, _)| i)
            .collect();
        order.sort_by_key(|&i| plans[i].instance().map(|inst| inst.index()));

        for (position, &i) in order.iter().enumerate() {
            let uuid = plans[i]
                .instance()
                .map(|inst| inst.uuid().to_string())
                .unwrap_or_default();
            let mut reservations = Vec::new();
            for network in &group.networks {
                if network.needs_static_reservation() {
                    let ip = network.static_ips.get(position).ok_or_else(
                        || PlanningError::StaticIpsExhausted {
                            group: group.name.clone(),
                            network: network.name.clone(),
                        },
                    )?;
                    reservations.push(NetworkReservation::new_static(
                        &uuid,
                        &network.name,
                        *ip,
                    ));
                } else {
                    reservations.push(NetworkReservation::new_dynamic(
                        &uuid,
                        &network.name,
                    ));
                }
            }
            plans[i].set_desired_network_reservations(reservations);
        }
        Ok(())
    }

    /// Records whose job name matches none of the given instance groups
    /// become obsolete plans. Fails fast if any such record is ignored.
    pub fn plan_obsolete_instance_groups(
        &self,
        instance_groups: &[Arc<InstanceGroupSpec>],
        all_existing_records: &[ExistingInstanceRecord],
    ) -> Result<Vec<InstancePlan>, PlanningError> {
        let desired_names: BTreeSet<&str> =
            instance_groups.iter().map(|g| g.name.as_str()).collect();
        let mut plans = Vec::new();
        for record in all_existing_records {
            if desired_names.contains(record.job_name.as_str()) {
                continue;
            }
            if record.ignore {
                return Err(PlanningError::IgnoredInstancesDeletion {
                    group: record.job_name.clone(),
                });
            }
            plans.push(self.factory.obsolete_instance_plan(record)?);
        }
        Ok(plans)
    }

    /// Intersect each plan's desired reservations with the reservations
    /// persisted on its record: persisted reservations still wanted become
    /// existing (not re-requested), persisted reservations no longer wanted
    /// become obsolete, and the rest stay desired.
    ///
    /// Pure flag computation from fixed inputs; calling it twice yields the
    /// same network plans.
    pub fn reconcile_network_plans(&self, plans: &mut [InstancePlan]) {
        for plan in plans.iter_mut() {
            let persisted: Vec<NetworkReservation> = plan
                .existing_instance()
                .map(|r| r.network_reservations.clone())
                .unwrap_or_default();
            let mut remaining: Vec<NetworkReservation> =
                plan.desired_network_reservations().to_vec();

            let mut network_plans = Vec::new();
            for reservation in persisted {
                let still_wanted = remaining.iter().position(|want| {
                    want.network_name == reservation.network_name
                        && (want.ip.is_none() || want.ip == reservation.ip)
                });
                match still_wanted {
                    Some(pos) => {
                        remaining.remove(pos);
                        network_plans
                            .push(NetworkPlan::new_existing(reservation));
                    }
                    None => {
                        network_plans
                            .push(NetworkPlan::new_obsolete(reservation));
                    }
                }
            }
            network_plans
                .extend(remaining.into_iter().map(NetworkPlan::new_desired));
            plan.set_network_plans(network_plans);
        }
    }

    /// Push the reconciled network plans through the IP provider: desired
    /// reservations are requested, surviving ones re-registered, obsolete
    /// ones released. The provider is the single authority for address
    /// state.
    pub fn apply_network_plans(
        &self,
        plans: &[InstancePlan],
        ip_provider: &mut dyn IpProvider,
    ) -> Result<(), PlanningError> {
        for plan in plans {
            for network_plan in plan.network_plans() {
                let reservation = &network_plan.reservation;
                let result = if network_plan.obsolete {
                    ip_provider.release(reservation)
                } else if network_plan.existing {
                    ip_provider.reserve_existing_ips(reservation)
                } else {
                    ip_provider.reserve(reservation)
                };
                result.map_err(|source| PlanningError::IpProvider {
                    network: reservation.network_name.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }

    /// Shut down leftover VMs (from create-swap-delete updates) that no
    /// non-obsolete plan can reuse. Best effort: a failed shutdown is logged
    /// and skipped rather than aborting the plan. Returns the ids of the VMs
    /// actually orphaned.
    pub fn orphan_unreusable_vms(
        &self,
        instance_plans: &[InstancePlan],
        existing_instance_records: &[ExistingInstanceRecord],
        agent: &dyn AgentClient,
    ) -> Vec<Uuid> {
        let mut orphaned = Vec::new();
        for record in existing_instance_records {
            for vm in &record.vms {
                if vm.active {
                    continue;
                }
                let reusable = instance_plans
                    .iter()
                    .filter(|plan| !plan.is_obsolete())
                    .any(|plan| plan.vm_matches_plan(vm));
                if reusable {
                    continue;
                }
                match agent.shutdown(&vm.cid) {
                    Ok(()) => {
                        info!(
                            self.log, "orphaned unreusable vm";
                            "instance" => &record.uuid, "vm_cid" => &vm.cid,
                        );
                        orphaned.push(vm.id);
                    }
                    Err(error) => {
                        warn!(
                            self.log, "failed to shut down unreusable vm";
                            "instance" => &record.uuid,
                            "vm_cid" => &vm.cid,
                            "error" => #%error,
                        );
                    }
                }
            }
        }
        orphaned
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::example::example_record;
    use crate::example::CountingResolver;
    use crate::example::ExampleDeployment;
    use crate::example::RecordingAgent;
    use crate::example::RecordingIpProvider;
    use director_types::InstanceState;
    use director_types::ReservationKind;
    use std::net::IpAddr;

    #[test]
    fn simple_reuse_of_an_existing_record() {
        let example = ExampleDeployment::new("simple");
        let record = example_record("web", 0, Some("z1"));
        let plans = example.plan("web", &[Some("z1")], &[record.clone()]);

        assert_eq!(plans.len(), 1);
        let plan = &plans[0];
        assert!(plan.is_existing());
        assert!(plan.instance().unwrap().is_bootstrap());
        assert_eq!(plan.existing_instance(), Some(&record));
        assert_eq!(plan.instance().unwrap().index(), 0);
    }

    #[test]
    fn az_move_obsoletes_and_assigns_a_fresh_index() {
        let example = ExampleDeployment::new("simple");
        let records = vec![
            example_record("web", 0, Some("old")),
            example_record("web", 1, Some("old")),
        ];
        let plans = example.plan("web", &[Some("new")], &records);

        assert_eq!(plans.len(), 3);
        assert_eq!(plans.iter().filter(|p| p.is_obsolete()).count(), 2);
        let new_plan =
            plans.iter().find(|p| p.is_new()).expect("one new plan");
        assert_eq!(new_plan.instance().unwrap().index(), 2);
    }

    #[test]
    fn classification_partitions_desired_and_existing_inputs() {
        let example = ExampleDeployment::new("simple");
        let records = vec![
            example_record("web", 0, Some("z1")),
            example_record("web", 1, Some("z2")),
            example_record("web", 2, Some("gone")),
        ];
        let plans = example
            .plan("web", &[Some("z1"), Some("z2"), Some("z2")], &records);

        assert_eq!(plans.len(), 4);
        assert_eq!(plans.iter().filter(|p| p.is_existing()).count(), 2);
        assert_eq!(plans.iter().filter(|p| p.is_new()).count(), 1);
        assert_eq!(plans.iter().filter(|p| p.is_obsolete()).count(), 1);
        for plan in &plans {
            let classifications = [
                plan.is_new(),
                plan.is_existing(),
                plan.is_obsolete(),
            ];
            assert_eq!(
                classifications.iter().filter(|&&c| c).count(),
                1,
                "exactly one classification must hold"
            );
        }
    }

    #[test]
    fn index_stays_stable_when_the_az_does() {
        let example = ExampleDeployment::new("simple");
        let records = vec![example_record("web", 1, Some("z1"))];
        let plans =
            example.plan("web", &[Some("z1"), Some("z2")], &records);

        let reused = plans.iter().find(|p| p.is_existing()).unwrap();
        assert_eq!(reused.instance().unwrap().index(), 1);
        // The new z2 instance must not steal an index still claimed by a
        // record; index 0 is genuinely free here.
        let fresh = plans.iter().find(|p| p.is_new()).unwrap();
        assert_eq!(fresh.instance().unwrap().index(), 0);
    }

    #[test]
    fn bootstrap_is_unique_and_prefers_an_existing_carrier() {
        let example = ExampleDeployment::new("simple");
        let mut carrier = example_record("web", 1, Some("z1"));
        carrier.bootstrap = true;
        let records = vec![example_record("web", 0, Some("z1")), carrier];
        let plans =
            example.plan("web", &[Some("z1"), Some("z1")], &records);

        let bootstrap: Vec<i32> = plans
            .iter()
            .filter(|p| {
                !p.is_obsolete() && p.instance().unwrap().is_bootstrap()
            })
            .map(|p| p.instance().unwrap().index())
            .collect();
        // The carrier keeps the flag even though a lower index exists.
        assert_eq!(bootstrap, vec![1]);
    }

    #[test]
    fn corrupted_multi_bootstrap_state_is_repaired() {
        let example = ExampleDeployment::new("simple");
        let mut a = example_record("web", 2, Some("z1"));
        a.bootstrap = true;
        let mut b = example_record("web", 5, Some("z1"));
        b.bootstrap = true;
        let plans =
            example.plan("web", &[Some("z1"), Some("z1")], &[a, b]);

        let carriers: Vec<i32> = plans
            .iter()
            .filter(|p| p.instance().unwrap().is_bootstrap())
            .map(|p| p.instance().unwrap().index())
            .collect();
        assert_eq!(carriers, vec![2]);
    }

    #[test]
    fn lowest_index_takes_bootstrap_when_no_carrier_exists() {
        let example = ExampleDeployment::new("simple");
        let plans =
            example.plan("web", &[Some("z1"), Some("z1")], &[]);
        let carriers: Vec<i32> = plans
            .iter()
            .filter(|p| p.instance().unwrap().is_bootstrap())
            .map(|p| p.instance().unwrap().index())
            .collect();
        assert_eq!(carriers, vec![0]);
    }

    #[test]
    fn ignored_record_blocks_scale_down() {
        let example = ExampleDeployment::new("simple");
        let mut ignored = example_record("web", 1, Some("z1"));
        ignored.ignore = true;
        let records = vec![example_record("web", 0, Some("z1")), ignored];
        let error = example
            .try_plan("web", &[Some("z1")], &records)
            .expect_err("scale-down over an ignored instance must fail");
        assert!(matches!(
            error,
            PlanningError::IgnoredInstanceChanged { .. }
        ));
    }

    #[test]
    fn ignored_record_blocks_state_change() {
        let example = ExampleDeployment::new("simple");
        let mut group = example.group("web");
        group.desired_state = InstanceState::Stopped;
        let example = example.with_group(group);
        let mut ignored = example_record("web", 0, Some("z1"));
        ignored.ignore = true;
        let error = example
            .try_plan("web", &[Some("z1")], &[ignored])
            .expect_err("state change of an ignored instance must fail");
        assert!(matches!(
            error,
            PlanningError::IgnoredInstanceChanged { .. }
        ));
    }

    #[test]
    fn ignored_record_blocks_group_deletion() {
        let example = ExampleDeployment::new("simple");
        let mut ignored = example_record("bar", 0, None);
        ignored.ignore = true;
        let groups = vec![example.group_arc("web")];
        let error = example
            .planner()
            .plan_obsolete_instance_groups(&groups, &[ignored])
            .expect_err("deleting a group with ignored instances must fail");
        match error {
            PlanningError::IgnoredInstancesDeletion { group } => {
                assert_eq!(group, "bar");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn obsolete_groups_become_obsolete_plans() {
        let example = ExampleDeployment::new("simple");
        let groups = vec![example.group_arc("web")];
        let records = vec![
            example_record("web", 0, None),
            example_record("retired", 0, None),
            example_record("retired", 1, None),
        ];
        let plans = example
            .planner()
            .plan_obsolete_instance_groups(&groups, &records)
            .expect("planning obsolete groups");
        assert_eq!(plans.len(), 2);
        assert!(plans.iter().all(|p| p.is_obsolete()));
    }

    #[test]
    fn vm_resources_resolution_skips_obsolete_plans() {
        let example = ExampleDeployment::new("simple");
        let mut group = example.group("web");
        group.vm_type = None;
        group.vm_resources = Some(director_types::VmResources {
            cpu: 2,
            ram_mb: 4096,
            ephemeral_disk_size_mb: 0,
        });
        let example = example.with_group(group);

        let resolver = CountingResolver::default();
        let mut cache = VmResourcesCache::new(&resolver);
        let records = vec![
            example_record("web", 0, Some("z1")),
            example_record("web", 1, Some("gone")),
        ];
        let plans = example.plan_with_cache(
            "web",
            &[Some("z1")],
            &records,
            &mut cache,
        );

        assert_eq!(plans.iter().filter(|p| p.is_obsolete()).count(), 1);
        // One desired plan in one az: exactly one resolution, and the
        // obsolete plan triggered none.
        assert_eq!(resolver.calls(), 1);
    }

    #[test]
    fn reconcile_network_plans_is_idempotent() {
        let example = ExampleDeployment::new("simple");
        let mut record = example_record("web", 0, Some("z1"));
        record.network_reservations.push(
            NetworkReservation::new_dynamic(&record.uuid, "stale-net"),
        );
        let mut plans = example.plan("web", &[Some("z1")], &[record]);

        example.planner().reconcile_network_plans(&mut plans);
        let first: Vec<_> = plans[0].network_plans().to_vec();
        example.planner().reconcile_network_plans(&mut plans);
        assert_eq!(plans[0].network_plans(), first.as_slice());

        let obsolete: Vec<_> = first
            .iter()
            .filter(|p| p.obsolete)
            .map(|p| p.reservation.network_name.clone())
            .collect();
        assert_eq!(obsolete, vec!["stale-net"]);
        assert!(first
            .iter()
            .any(|p| p.existing && p.reservation.network_name == "default"));
    }

    #[test]
    fn static_ips_are_assigned_in_index_order() {
        let example = ExampleDeployment::new("simple");
        let mut group = example.group("web");
        let ips: Vec<IpAddr> =
            vec!["10.0.0.5".parse().unwrap(), "10.0.0.6".parse().unwrap()];
        group.networks =
            vec![director_types::NetworkConfig::manual("default", ips)];
        let example = example.with_group(group);

        let plans =
            example.plan("web", &[Some("z1"), Some("z1")], &[]);
        let mut static_ips: Vec<(i32, IpAddr)> = plans
            .iter()
            .map(|p| {
                let reservation = &p.desired_network_reservations()[0];
                assert_eq!(reservation.kind, ReservationKind::Static);
                (p.instance().unwrap().index(), reservation.ip.unwrap())
            })
            .collect();
        static_ips.sort();
        assert_eq!(
            static_ips,
            vec![
                (0, "10.0.0.5".parse().unwrap()),
                (1, "10.0.0.6".parse().unwrap()),
            ]
        );
    }

    #[test]
    fn apply_network_plans_routes_through_the_provider() {
        let example = ExampleDeployment::new("simple");
        let mut record = example_record("web", 0, Some("z1"));
        record.network_reservations.push(
            NetworkReservation::new_dynamic(&record.uuid, "stale-net"),
        );
        let mut plans = example.plan(
            "web",
            &[Some("z1"), Some("z1")],
            &[record],
        );
        example.planner().reconcile_network_plans(&mut plans);

        let mut provider = RecordingIpProvider::default();
        example
            .planner()
            .apply_network_plans(&plans, &mut provider)
            .expect("applying network plans");
        // The surviving reservation is re-registered, the stale one
        // released, and the new instance's reservation requested.
        assert_eq!(provider.existing.len(), 1);
        assert_eq!(provider.released.len(), 1);
        assert_eq!(provider.reserved.len(), 1);
        assert_eq!(provider.released[0].network_name, "stale-net");
    }

    #[test]
    fn unreusable_vms_are_orphaned_best_effort() {
        let example = ExampleDeployment::new("simple");
        let mut record = example_record("web", 0, Some("z1"));
        // A leftover VM whose shape matches nothing desired.
        let mut leftover = record.vms[0].clone();
        leftover.id = uuid::Uuid::new_v4();
        leftover.cid = "vm-leftover".to_string();
        leftover.active = false;
        leftover.env = serde_json::json!({"weird": true});
        record.vms.push(leftover.clone());
        // And one that matches the desired shape and is kept.
        let mut reusable = record.vms[0].clone();
        reusable.id = uuid::Uuid::new_v4();
        reusable.cid = "vm-reusable".to_string();
        reusable.active = false;
        record.vms.push(reusable);

        let records = vec![record];
        let plans = example.plan("web", &[Some("z1")], &records);

        let agent = RecordingAgent::default();
        let orphaned =
            example.planner().orphan_unreusable_vms(&plans, &records, &agent);
        assert_eq!(orphaned, vec![leftover.id]);
        assert_eq!(agent.shutdowns(), vec!["vm-leftover".to_string()]);

        // A failing agent is logged and skipped, not fatal.
        let failing = RecordingAgent::failing();
        let orphaned =
            example.planner().orphan_unreusable_vms(&plans, &records, &failing);
        assert!(orphaned.is_empty());
    }
}
