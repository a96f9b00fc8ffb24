// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fatal configuration errors raised during planning.
//!
//! All of these surface before any VM mutation begins, so a deployment run
//! fails fast without touching infrastructure. Drift-detection outcomes are
//! not errors; collaborator failures propagate separately as `anyhow::Error`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanningError {
    #[error(
        "instance '{job_name}/{uuid}' is ignored and its state cannot \
         be changed"
    )]
    IgnoredInstanceChanged { job_name: String, uuid: String },

    #[error(
        "instance group '{group}' contains ignored instance(s) and cannot \
         be deleted"
    )]
    IgnoredInstancesDeletion { group: String },

    #[error(
        "instance group '{group}' migrates from '{old_name}', which is \
         still defined as a desired instance group"
    )]
    MigratedFromStillDesired { group: String, old_name: String },

    #[error(
        "instance group '{old_name}' is declared as migrated_from by both \
         '{group_a}' and '{group_b}'"
    )]
    AmbiguousMigration { old_name: String, group_a: String, group_b: String },

    #[error(
        "unable to determine availability zone for instance \
         '{old_name}/{uuid}': it has no persisted zone and instance group \
         '{group}' spans multiple zones"
    )]
    AmbiguousMigratedFromAz { group: String, old_name: String, uuid: String },

    #[error(
        "availability zone '{declared}' declared for migrated_from \
         '{old_name}' does not match persisted zone '{persisted}' of \
         instance '{uuid}'"
    )]
    MigratedFromAzMismatch {
        old_name: String,
        declared: String,
        persisted: String,
        uuid: String,
    },

    #[error(
        "no static IP left on network '{network}' for instance group \
         '{group}'"
    )]
    StaticIpsExhausted { group: String, network: String },

    #[error("instance repository failed")]
    Repository(#[source] anyhow::Error),

    #[error("IP provider failed for network '{network}'")]
    IpProvider {
        network: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("unable to resolve cloud properties for vm_resources")]
    VmResourcesResolution(#[source] anyhow::Error),
}
