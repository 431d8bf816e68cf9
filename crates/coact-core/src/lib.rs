//! Accounting model for coact.
//!
//! Cluster capacities, allocation resolution, the resource-hour charge and
//! the record normalization rules shared by ingestion and admission control.

pub mod allocation;
pub mod charge;
pub mod metadata;
pub mod rules;
pub mod types;

pub use allocation::{AllocationIndex, AllocationKey, Overlap, ResolveError};
pub use charge::{ChargeInput, Resource, ResourceRequest, elapsed_seconds, resource_hours};
pub use metadata::{AllocatedResources, ClusterCapacity, ComputeAllocation, Metadata};
pub use rules::{FieldSet, RuleTable, RulesError};
pub use types::{ChargeRecord, HoldState, UsageSample};
