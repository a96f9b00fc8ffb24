// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Instance plans: the unit of reconciliation output.
//!
//! An instance plan pairs an existing instance record (nullable) with a
//! desired instance (nullable) plus the network plans connecting them, and
//! exposes the change-detection predicates that decide whether the instance
//! must be recreated, updated in place, or left alone.
//!
//! Predicates are independent and composable. Each one logs a structured
//! debug line with `from`/`to` when it detects drift, to aid operator
//! diagnosis.

use crate::collaborators::DnsRecords;
use crate::instance::Instance;
use director_types::DesiredInstance;
use director_types::DiskSpec;
use director_types::ExistingInstanceRecord;
use director_types::InstanceGroupSpec;
use director_types::InstanceSpec;
use director_types::JobState;
use director_types::NetworkReservation;
use director_types::VmRecord;
use serde_json::Value;
use sha2::Digest;
use slog::debug;
use slog::Logger;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

/// One network's slice of an instance plan.
///
/// Exactly one holds: desired (a reservation still to be requested),
/// existing (a persisted reservation still needed, not re-requested), or
/// obsolete (a persisted reservation no longer needed, to be released).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPlan {
    pub reservation: NetworkReservation,
    pub existing: bool,
    pub obsolete: bool,
}

impl NetworkPlan {
    pub fn new_desired(reservation: NetworkReservation) -> Self {
        Self { reservation, existing: false, obsolete: false }
    }

    pub fn new_existing(reservation: NetworkReservation) -> Self {
        Self { reservation, existing: true, obsolete: false }
    }

    pub fn new_obsolete(reservation: NetworkReservation) -> Self {
        Self { reservation, existing: false, obsolete: true }
    }

    pub fn desired(&self) -> bool {
        !self.existing && !self.obsolete
    }
}

/// The kinds of drift an instance plan can report, aggregated by
/// [`InstancePlan::changes`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    strum::Display,
)]
#[strum(serialize_all = "snake_case")]
pub enum ChangeKind {
    Recreate,
    CloudProperties,
    Stemcell,
    Env,
    Networks,
    Packages,
    PersistentDisk,
    Configuration,
    Job,
    State,
    Dns,
    TrustedCerts,
}

/// Cross-cutting options shared by every plan of a run, derived once from the
/// `PlanningContext` by the plan factory.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub recreate_deployment: bool,
    pub recreate_persistent_disks: bool,
    pub skip_drain: bool,
    pub use_dns_addresses: bool,
    pub use_short_dns_addresses: bool,
    pub use_link_dns_addresses: bool,
    pub local_dns_enabled: bool,
    pub randomize_az_placement: bool,
    pub dns_domain: String,
    pub tags: BTreeMap<String, String>,
    /// Digest of the configured trusted-certs PEM bundle, if any.
    pub trusted_certs_digest: Option<String>,
}

/// Hex digest of a trusted-certs PEM bundle, as recorded on VM rows.
pub fn trusted_certs_digest(pem: &str) -> String {
    hex::encode(sha2::Sha256::digest(pem.as_bytes()))
}

#[derive(Debug)]
pub struct InstancePlan {
    desired_instance: Option<DesiredInstance>,
    existing_instance: Option<ExistingInstanceRecord>,
    instance: Option<Instance>,
    /// Reservations this plan wants, fixed once during planning (static
    /// addresses assigned up front, dynamic ones left to the IP provider).
    /// Network-plan reconciliation derives its flags purely from this set
    /// and the record's persisted reservations, which keeps it idempotent.
    desired_network_reservations: Vec<NetworkReservation>,
    network_plans: Vec<NetworkPlan>,
    options: PlanOptions,
    log: Logger,
}

impl InstancePlan {
    pub fn new(
        desired_instance: Option<DesiredInstance>,
        existing_instance: Option<ExistingInstanceRecord>,
        instance: Option<Instance>,
        options: PlanOptions,
        log: Logger,
    ) -> Self {
        Self {
            desired_instance,
            existing_instance,
            instance,
            desired_network_reservations: Vec::new(),
            network_plans: Vec::new(),
            options,
            log,
        }
    }

    /// Install the reservations this plan wants, seeding the network plans
    /// as desired (not yet requested).
    pub fn set_desired_network_reservations(
        &mut self,
        reservations: Vec<NetworkReservation>,
    ) {
        self.network_plans = reservations
            .iter()
            .cloned()
            .map(NetworkPlan::new_desired)
            .collect();
        self.desired_network_reservations = reservations;
    }

    pub fn desired_network_reservations(&self) -> &[NetworkReservation] {
        &self.desired_network_reservations
    }

    // Classification. Exactly one of these holds for any plan.

    pub fn is_new(&self) -> bool {
        self.existing_instance.is_none() && self.desired_instance.is_some()
    }

    pub fn is_existing(&self) -> bool {
        self.existing_instance.is_some() && self.desired_instance.is_some()
    }

    pub fn is_obsolete(&self) -> bool {
        self.desired_instance.is_none()
    }

    pub fn should_be_ignored(&self) -> bool {
        self.existing_instance.as_ref().map_or(false, |r| r.ignore)
    }

    pub fn desired_instance(&self) -> Option<&DesiredInstance> {
        self.desired_instance.as_ref()
    }

    pub fn existing_instance(&self) -> Option<&ExistingInstanceRecord> {
        self.existing_instance.as_ref()
    }

    pub fn instance(&self) -> Option<&Instance> {
        self.instance.as_ref()
    }

    pub fn instance_mut(&mut self) -> Option<&mut Instance> {
        self.instance.as_mut()
    }

    pub fn network_plans(&self) -> &[NetworkPlan] {
        &self.network_plans
    }

    pub fn set_network_plans(&mut self, plans: Vec<NetworkPlan>) {
        self.network_plans = plans;
    }

    pub fn options(&self) -> &PlanOptions {
        &self.options
    }

    pub fn desired_group(&self) -> Option<&InstanceGroupSpec> {
        self.desired_instance.as_ref().map(|d| d.instance_group.as_ref())
    }

    fn persisted_spec(&self) -> Option<&InstanceSpec> {
        self.existing_instance.as_ref().and_then(|r| r.spec.as_ref())
    }

    // Change-detection predicates.

    pub fn stemcell_changed(&self) -> bool {
        let Some(instance) = &self.instance else { return false };
        let Some(record) = &self.existing_instance else { return false };
        let persisted = record.spec.as_ref().and_then(|s| s.stemcell.as_ref());
        let desired = instance.stemcell();
        let changed = match (persisted, desired) {
            (Some(p), Some(d)) => p != d,
            (None, Some(_)) => true,
            _ => false,
        };
        if changed {
            debug!(
                self.log, "stemcell changed";
                "from" => ?persisted, "to" => ?desired,
            );
        }
        changed
    }

    pub fn env_changed(&self) -> bool {
        let (Some(instance), Some(spec)) =
            (&self.instance, self.persisted_spec())
        else {
            return false;
        };
        let changed = spec.env != *instance.env();
        if changed {
            debug!(
                self.log, "env changed";
                "from" => %spec.env, "to" => %instance.env(),
            );
        }
        changed
    }

    /// Compares merged {vm_type, az, vm_extensions} cloud properties against
    /// the persisted merged hash. The VM type *name* never participates:
    /// renaming a VM type with identical cloud properties is not drift.
    pub fn cloud_properties_changed(&self) -> bool {
        let (Some(instance), Some(spec)) =
            (&self.instance, self.persisted_spec())
        else {
            return false;
        };
        let desired = instance.merged_cloud_properties();
        let changed = spec.cloud_properties != desired;
        if changed {
            debug!(
                self.log, "cloud properties changed";
                "from" => %spec.cloud_properties, "to" => %desired,
            );
        }
        changed
    }

    pub fn needs_shutting_down(&self) -> bool {
        if self.is_obsolete() {
            return true;
        }
        // Recreation requested either deployment-wide or for this instance.
        let recreate_desired = self.instance.as_ref().map_or(false, |i| {
            i.state() == director_types::InstanceState::Recreate
        });
        self.options.recreate_deployment
            || recreate_desired
            || self.stemcell_changed()
            || self.env_changed()
            || self.cloud_properties_changed()
    }

    pub fn needs_recreate(&self) -> bool {
        if self.options.recreate_deployment {
            return true;
        }
        let Some(instance) = &self.instance else { return false };
        instance.state() == director_types::InstanceState::Recreate
            || instance.current_job_state() == Some(JobState::Unresponsive)
    }

    pub fn needs_to_fix(&self) -> bool {
        let Some(instance) = &self.instance else { return false };
        instance.current_job_state() == Some(JobState::Unresponsive)
    }

    /// True when the desired group state differs from the persisted record
    /// state (e.g. a started instance desired stopped).
    pub fn state_changed(&self) -> bool {
        let (Some(group), Some(record)) =
            (self.desired_group(), &self.existing_instance)
        else {
            return false;
        };
        let changed = group.desired_state != record.state;
        if changed {
            debug!(
                self.log, "state changed";
                "from" => %record.state, "to" => %group.desired_state,
            );
        }
        changed
    }

    /// Serialized network settings comparison, excluding the volatile
    /// `dns_record_name` key, plus any network plan that is obsolete or still
    /// to be requested. First-time deploys always report changed.
    pub fn networks_changed(&self) -> bool {
        let Some(record) = &self.existing_instance else {
            debug!(self.log, "networks changed"; "reason" => "first deploy");
            return true;
        };
        if self
            .network_plans
            .iter()
            .any(|plan| plan.obsolete || plan.desired())
        {
            debug!(
                self.log, "networks changed";
                "reason" => "network plans not settled",
            );
            return true;
        }
        let Some(instance) = &self.instance else { return false };
        let persisted = match &record.spec {
            Some(spec) => sanitized_network_settings(&spec.networks),
            None => return true,
        };
        let desired = sanitized_network_settings(instance.network_settings());
        let changed = persisted != desired;
        if changed {
            debug!(
                self.log, "networks changed";
                "from" => ?persisted, "to" => ?desired,
            );
        }
        changed
    }

    pub fn persistent_disk_changed(&self) -> bool {
        let active: Option<&DiskSpec> = self
            .existing_instance
            .as_ref()
            .and_then(|r| r.active_persistent_disk.as_ref());
        if self.is_obsolete() {
            return active.is_some();
        }
        let desired: Option<&DiskSpec> =
            self.desired_group().and_then(|g| g.persistent_disk.as_ref());
        if self.options.recreate_persistent_disks
            && (active.is_some() || desired.is_some())
        {
            debug!(
                self.log, "persistent disk changed";
                "reason" => "recreate_persistent_disks",
            );
            return true;
        }
        let changed = active != desired;
        if changed {
            debug!(
                self.log, "persistent disk changed";
                "from" => ?active, "to" => ?desired,
            );
        }
        changed
    }

    pub fn job_changed(&self) -> bool {
        let Some(instance) = &self.instance else { return false };
        if self.existing_instance.is_none() {
            return false;
        }
        let changed = match self.persisted_spec() {
            Some(spec) => spec.job_spec != *instance.job_spec(),
            None => true,
        };
        if changed {
            debug!(
                self.log, "job changed";
                "to" => %instance.job_spec(),
            );
        }
        changed
    }

    pub fn packages_changed(&self) -> bool {
        let Some(instance) = &self.instance else { return false };
        if self.existing_instance.is_none() {
            return false;
        }
        let changed = match self.persisted_spec() {
            Some(spec) => spec.packages != *instance.packages(),
            None => true,
        };
        if changed {
            debug!(
                self.log, "packages changed";
                "to" => ?instance.packages(),
            );
        }
        changed
    }

    pub fn configuration_changed(&self) -> bool {
        let Some(instance) = &self.instance else { return false };
        if self.existing_instance.is_none() {
            return false;
        }
        let changed = match self.persisted_spec() {
            Some(spec) => {
                spec.configuration_hash.as_deref()
                    != instance.configuration_hash()
            }
            None => true,
        };
        if changed {
            debug!(
                self.log, "configuration changed";
                "to" => instance.configuration_hash().unwrap_or("-"),
            );
        }
        changed
    }

    /// Compares the digest of the configured trusted certs against the value
    /// recorded on the active VM. No active VM means nothing to update.
    pub fn trusted_certs_changed(&self) -> bool {
        let Some(vm) =
            self.existing_instance.as_ref().and_then(|r| r.active_vm())
        else {
            return false;
        };
        let changed = vm.trusted_certs_digest != self.options.trusted_certs_digest;
        if changed {
            debug!(
                self.log, "trusted certs changed";
                "from" => vm.trusted_certs_digest.as_deref().unwrap_or("-"),
                "to" => self
                    .options
                    .trusted_certs_digest
                    .as_deref()
                    .unwrap_or("-"),
            );
        }
        changed
    }

    /// True when any expected DNS record (index-based and uuid-based, or
    /// local-DNS rows when that feature flag is on) is missing or stale for
    /// the reserved addresses.
    pub fn dns_changed(&self, dns: &dyn DnsRecords) -> bool {
        if self.is_obsolete() {
            return false;
        }
        let Some(instance) = &self.instance else { return false };
        let local_rows = if self.options.local_dns_enabled {
            Some(dns.local_rows_for(instance.uuid()))
        } else {
            None
        };
        let mut changed = false;
        for plan in &self.network_plans {
            if plan.obsolete {
                continue;
            }
            let Some(ip) = plan.reservation.ip else { continue };
            let names = [
                self.dns_record_name(
                    &instance.index().to_string(),
                    &plan.reservation.network_name,
                    instance,
                ),
                self.dns_record_name(
                    instance.uuid(),
                    &plan.reservation.network_name,
                    instance,
                ),
            ];
            for name in names {
                let found = match &local_rows {
                    Some(rows) => {
                        rows.iter().any(|(n, i)| *n == name && *i == ip)
                    }
                    None => dns.has_record(&name, ip),
                };
                if !found {
                    debug!(
                        self.log, "dns changed";
                        "missing" => &name, "ip" => %ip,
                    );
                    changed = true;
                }
            }
        }
        changed
    }

    fn dns_record_name(
        &self,
        prefix: &str,
        network_name: &str,
        instance: &Instance,
    ) -> String {
        [
            prefix,
            instance.job_name(),
            network_name,
            instance.deployment(),
            &self.options.dns_domain,
        ]
        .iter()
        .map(|label| canonical_dns_label(label))
        .collect::<Vec<_>>()
        .join(".")
    }

    /// Aggregates every applicable predicate into a set of change kinds;
    /// empty means the instance can be left alone.
    pub fn changes(&self, dns: &dyn DnsRecords) -> BTreeSet<ChangeKind> {
        let mut changes = BTreeSet::new();
        if self.needs_recreate() {
            changes.insert(ChangeKind::Recreate);
        }
        if self.cloud_properties_changed() {
            changes.insert(ChangeKind::CloudProperties);
        }
        if self.stemcell_changed() {
            changes.insert(ChangeKind::Stemcell);
        }
        if self.env_changed() {
            changes.insert(ChangeKind::Env);
        }
        if self.networks_changed() {
            changes.insert(ChangeKind::Networks);
        }
        if self.packages_changed() {
            changes.insert(ChangeKind::Packages);
        }
        if self.persistent_disk_changed() {
            changes.insert(ChangeKind::PersistentDisk);
        }
        if self.configuration_changed() {
            changes.insert(ChangeKind::Configuration);
        }
        if self.job_changed() {
            changes.insert(ChangeKind::Job);
        }
        if self.state_changed() {
            changes.insert(ChangeKind::State);
        }
        if self.dns_changed(dns) {
            changes.insert(ChangeKind::Dns);
        }
        if self.trusted_certs_changed() {
            changes.insert(ChangeKind::TrustedCerts);
        }
        changes
    }

    /// True when `vm` (typically an inactive row left over from a
    /// create-swap-delete update) already matches this plan's desired VM
    /// shape and can be reused instead of orphaned.
    pub fn vm_matches_plan(&self, vm: &VmRecord) -> bool {
        let Some(instance) = &self.instance else { return false };
        vm.stemcell.as_ref() == instance.stemcell()
            && vm.env == *instance.env()
            && vm.cloud_properties == instance.merged_cloud_properties()
    }
}

/// DNS labels are canonicalized the way record publication does it:
/// lowercased, underscores become hyphens.
fn canonical_dns_label(label: &str) -> String {
    label.to_lowercase().replace('_', "-")
}

fn sanitized_network_settings(
    settings: &BTreeMap<String, Value>,
) -> BTreeMap<String, Value> {
    settings
        .iter()
        .map(|(name, value)| {
            let mut value = value.clone();
            if let Value::Object(object) = &mut value {
                object.remove("dns_record_name");
            }
            (name.clone(), value)
        })
        .collect()
}
