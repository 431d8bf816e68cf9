//! Cluster and allocation metadata shared by ingestion and admission control.

use crate::allocation::{AllocationIndex, AllocationKey, ResolveError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Per-node capacity of a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterCapacity {
    /// Cluster name; jobs name it as their partition
    pub name: String,
    pub node_cpu_count: u32,
    pub node_gpu_count: u32,
    pub node_memory_bytes: u64,
    pub node_gpu_memory_bytes: u64,
}

impl ClusterCapacity {
    /// Build a capacity from memory sizes given in GB.
    pub fn from_gb(
        name: impl Into<String>,
        node_cpu_count: u32,
        node_gpu_count: u32,
        node_memory_gb: f64,
        node_gpu_memory_gb: f64,
    ) -> Self {
        Self {
            name: name.into(),
            node_cpu_count,
            node_gpu_count,
            node_memory_bytes: (node_memory_gb * BYTES_PER_GB) as u64,
            node_gpu_memory_bytes: (node_gpu_memory_gb * BYTES_PER_GB) as u64,
        }
    }
}

/// Resources granted by an allocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocatedResources {
    pub cpus: f64,
    pub mem: f64,
    pub nodes: f64,
    pub gpus: f64,
}

/// A time-bounded grant of cluster capacity to a repo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeAllocation {
    pub id: String,
    pub facility: String,
    pub repo: String,
    pub cluster: String,
    /// Inclusive
    pub start: DateTime<Utc>,
    /// Exclusive
    pub end: DateTime<Utc>,
    pub percent_of_facility: f64,
    pub allocated: AllocatedResources,
}

impl ComputeAllocation {
    pub fn key(&self) -> AllocationKey {
        AllocationKey::new(&self.facility, &self.repo, &self.cluster)
    }
}

/// Read-only snapshot of cluster capacities and allocations for one run.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    clusters: HashMap<String, ClusterCapacity>,
    allocations: AllocationIndex,
}

impl Metadata {
    pub fn new(clusters: Vec<ClusterCapacity>, allocations: Vec<ComputeAllocation>) -> Self {
        let clusters = clusters
            .into_iter()
            .map(|c| (c.name.to_lowercase(), c))
            .collect();
        Self {
            clusters,
            allocations: AllocationIndex::build(allocations),
        }
    }

    /// Capacity of a cluster, looked up case-insensitively.
    pub fn capacity(&self, cluster: &str) -> Option<&ClusterCapacity> {
        self.clusters.get(&cluster.to_lowercase())
    }

    pub fn clusters(&self) -> impl Iterator<Item = &ClusterCapacity> {
        self.clusters.values()
    }

    pub fn allocations(&self) -> &AllocationIndex {
        &self.allocations
    }

    /// Allocation id to bill for a job of `facility:repo` on `cluster` starting at `at`.
    pub fn resolve_allocation(
        &self,
        facility: &str,
        repo: &str,
        cluster: &str,
        at: DateTime<Utc>,
    ) -> Result<&str, ResolveError> {
        self.allocations
            .resolve(&AllocationKey::new(facility, repo, cluster), at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn allocation(id: &str, start_month: u32, end_month: u32) -> ComputeAllocation {
        ComputeAllocation {
            id: id.to_string(),
            facility: "LCLS".to_string(),
            repo: "xpp".to_string(),
            cluster: "roma".to_string(),
            start: Utc.with_ymd_and_hms(2024, start_month, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, end_month, 1, 0, 0, 0).unwrap(),
            percent_of_facility: 50.0,
            allocated: AllocatedResources::default(),
        }
    }

    #[test]
    fn test_capacity_from_gb() {
        let cap = ClusterCapacity::from_gb("ampere", 128, 4, 1024.0, 40.0);
        assert_eq!(cap.node_memory_bytes, 1024 * 1024 * 1024 * 1024);
        assert_eq!(cap.node_gpu_memory_bytes, 40 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_capacity_lookup_ignores_case() {
        let metadata = Metadata::new(
            vec![ClusterCapacity::from_gb("Roma", 128, 0, 512.0, 0.0)],
            vec![],
        );
        assert_eq!(metadata.capacity("roma").unwrap().node_cpu_count, 128);
        assert_eq!(metadata.capacity("ROMA").unwrap().node_cpu_count, 128);
        assert!(metadata.capacity("milano").is_none());
    }

    #[test]
    fn test_resolve_allocation_through_metadata() {
        let metadata = Metadata::new(vec![], vec![allocation("a1", 1, 2)]);
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(
            metadata.resolve_allocation("lcls", "XPP", "Roma", at),
            Ok("a1")
        );
    }
}
