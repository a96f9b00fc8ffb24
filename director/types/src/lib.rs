// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Data model shared by the instance planner and the update sequencer.
//!
//! These types are deliberately "slim": they carry exactly the fields the
//! planning core compares, and treat cloud properties, env, and network
//! settings as opaque JSON values compared structurally.

pub mod context;
pub mod descriptors;
pub mod instance;
pub mod network;
pub mod update;

pub use context::PlanningContext;
pub use context::SkipDrain;
pub use descriptors::AvailabilityZone;
pub use descriptors::DiskSpec;
pub use descriptors::NetworkConfig;
pub use descriptors::NetworkKind;
pub use descriptors::Stemcell;
pub use descriptors::VmExtension;
pub use descriptors::VmResources;
pub use descriptors::VmType;
pub use instance::AgentState;
pub use instance::DesiredInstance;
pub use instance::ExistingInstanceRecord;
pub use instance::InstanceGroupSpec;
pub use instance::InstanceSpec;
pub use instance::InstanceState;
pub use instance::JobState;
pub use instance::Lifecycle;
pub use instance::MigratedFrom;
pub use instance::VmRecord;
pub use network::NetworkReservation;
pub use network::ReservationKind;
pub use update::UpdateConfig;
