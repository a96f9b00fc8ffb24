// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Instance reconciliation and planning engine.
//!
//! Given the desired instances of an instance group and the persisted records
//! of prior deployments, the planner computes the minimal transition plan:
//! which instances are new, which are reused, which are obsolete, which must
//! be recreated or updated in place, and in what order.

pub mod collaborators;
pub mod errors;
pub mod example;
pub mod factory;
pub mod index_assigner;
pub mod instance;
pub mod migrator;
pub mod plan;
pub mod planner;
pub mod sorter;

pub use errors::PlanningError;
pub use factory::InstancePlanFactory;
pub use plan::InstancePlan;
pub use planner::InstancePlanner;
