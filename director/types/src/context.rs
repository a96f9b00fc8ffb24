// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Deployment-wide options threaded explicitly into the planner.
//!
//! There is deliberately no process-global configuration: everything the
//! planner and the change-detection predicates read about "this run" travels
//! in a `PlanningContext` value, which keeps the core testable.

use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;

/// Which jobs skip the drain script when their VM is recreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipDrain {
    Never,
    All,
    Jobs(Vec<String>),
}

impl SkipDrain {
    pub fn for_job(&self, job_name: &str) -> bool {
        match self {
            SkipDrain::Never => false,
            SkipDrain::All => true,
            SkipDrain::Jobs(jobs) => jobs.iter().any(|j| j == job_name),
        }
    }
}

/// Everything deployment-wide the planning core needs for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningContext {
    pub task_id: u64,
    pub username: String,
    /// Deployment-wide `--recreate`.
    pub recreate_deployment: bool,
    pub recreate_persistent_disks: bool,
    pub use_dns_addresses: bool,
    pub use_short_dns_addresses: bool,
    pub use_link_dns_addresses: bool,
    pub local_dns_enabled: bool,
    pub randomize_az_placement: bool,
    pub skip_drain: SkipDrain,
    pub tags: BTreeMap<String, String>,
    /// Trusted certs PEM bundle pushed to every VM, if configured.
    pub trusted_certs: Option<String>,
    pub dns_domain: String,
}

impl Default for PlanningContext {
    fn default() -> Self {
        Self {
            task_id: 0,
            username: "_director".to_string(),
            recreate_deployment: false,
            recreate_persistent_disks: false,
            use_dns_addresses: false,
            use_short_dns_addresses: false,
            use_link_dns_addresses: false,
            local_dns_enabled: false,
            randomize_az_placement: false,
            skip_drain: SkipDrain::Never,
            tags: BTreeMap::new(),
            trusted_certs: None,
            dns_domain: "bosh".to_string(),
        }
    }
}
