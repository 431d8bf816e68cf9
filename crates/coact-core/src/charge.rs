//! Resource-hour calculation.
//!
//! A job is charged for the fraction of each node it dominates: the largest
//! of its per-node cpu, gpu and memory requests relative to the node's
//! capacity. That fraction is converted into "node CPU count" hours so one
//! full-node hour costs the same number of units as the node has CPUs.

use crate::metadata::ClusterCapacity;
use chrono::{DateTime, Utc};
use coact_parsers::{QuantityError, parse_quantity};
use std::collections::BTreeMap;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Resource dimensions tracked for charging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Resource {
    Cpu,
    Mem,
    Gpu,
    GpuMem,
}

impl Resource {
    /// Classify a TRES key. Untracked keys (node, billing, energy, ...) are None.
    fn from_tres_key(key: &str) -> Option<Self> {
        let key = key.trim().to_lowercase();
        if key.contains("gpumem") {
            Some(Resource::GpuMem)
        } else if key.contains("gpu") {
            Some(Resource::Gpu)
        } else if key == "cpu" {
            Some(Resource::Cpu)
        } else if key == "mem" {
            Some(Resource::Mem)
        } else {
            None
        }
    }

    /// Per-node capacity of this dimension on a cluster.
    fn capacity(self, cluster: &ClusterCapacity) -> f64 {
        match self {
            Resource::Cpu => cluster.node_cpu_count as f64,
            Resource::Mem => cluster.node_memory_bytes as f64,
            Resource::Gpu => cluster.node_gpu_count as f64,
            Resource::GpuMem => cluster.node_gpu_memory_bytes as f64,
        }
    }
}

/// Parsed allocated TRES string: total quantities across all nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceRequest {
    quantities: BTreeMap<Resource, u64>,
}

impl ResourceRequest {
    /// Parse `cpu=64,mem=256G,gres/gpu=4`.
    ///
    /// Several keys mapping to the same dimension (`gres/gpu=4,gres/gpu:a100=4`)
    /// describe the same devices, so the largest quantity is kept.
    pub fn parse(tres: &str) -> Result<Self, QuantityError> {
        let mut quantities = BTreeMap::new();
        for token in tres.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let Some((key, value)) = token.split_once('=') else {
                tracing::debug!("Ignoring TRES token without value: {}", token);
                continue;
            };
            let Some(resource) = Resource::from_tres_key(key) else {
                continue;
            };
            let quantity = parse_quantity(value)?;
            quantities
                .entry(resource)
                .and_modify(|q: &mut u64| *q = (*q).max(quantity))
                .or_insert(quantity);
        }
        Ok(Self { quantities })
    }

    pub fn get(&self, resource: Resource) -> Option<u64> {
        self.quantities.get(&resource).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.quantities.is_empty()
    }

    /// Largest per-node fraction of any requested dimension.
    ///
    /// Dimensions the cluster has no capacity for are ignored.
    pub fn max_ratio(&self, alloc_nodes: u64, cluster: &ClusterCapacity) -> f64 {
        let nodes = alloc_nodes.max(1) as f64;
        self.quantities
            .iter()
            .filter_map(|(resource, quantity)| {
                let capacity = resource.capacity(cluster);
                (capacity > 0.0).then(|| *quantity as f64 / nodes / capacity)
            })
            .fold(0.0, f64::max)
    }
}

/// What a job used, as needed for charging.
#[derive(Debug, Clone)]
pub struct ChargeInput<'a> {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub alloc_nodes: u64,
    pub alloc_tres: &'a str,
}

/// Wall time in seconds, never less than one.
pub fn elapsed_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let secs = (end - start).num_milliseconds() as f64 / 1000.0;
    secs.max(1.0)
}

/// Resource-hours for a job on a cluster.
///
/// Returns 0.0 when the cluster is unknown; callers treat zero as "do not bill".
pub fn resource_hours(
    input: &ChargeInput<'_>,
    cluster: Option<&ClusterCapacity>,
) -> Result<f64, QuantityError> {
    let Some(cluster) = cluster else {
        return Ok(0.0);
    };

    let request = ResourceRequest::parse(input.alloc_tres)?;
    let nodes = input.alloc_nodes.max(1);
    let ratio = request.max_ratio(nodes, cluster);
    let elapsed = elapsed_seconds(input.start, input.end);

    Ok(elapsed * nodes as f64 * ratio * cluster.node_cpu_count as f64 / SECONDS_PER_HOUR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn roma() -> ClusterCapacity {
        ClusterCapacity::from_gb("roma", 64, 0, 512.0, 0.0)
    }

    fn ampere() -> ClusterCapacity {
        ClusterCapacity::from_gb("ampere", 128, 4, 1024.0, 40.0)
    }

    fn input(secs: i64, alloc_nodes: u64, alloc_tres: &str) -> ChargeInput<'_> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        ChargeInput {
            start,
            end: start + Duration::seconds(secs),
            alloc_nodes,
            alloc_tres,
        }
    }

    #[test]
    fn test_half_node_for_two_hours() {
        let hours = resource_hours(&input(7200, 2, "cpu=64"), Some(&roma())).unwrap();
        assert_eq!(hours, 128.0);
    }

    #[test]
    fn test_empty_tres_charges_nothing() {
        let hours = resource_hours(&input(3600, 1, ""), Some(&roma())).unwrap();
        assert_eq!(hours, 0.0);
    }

    #[test]
    fn test_unknown_cluster_charges_nothing() {
        let hours = resource_hours(&input(3600, 1, "cpu=64"), None).unwrap();
        assert_eq!(hours, 0.0);
    }

    #[test]
    fn test_memory_dominates() {
        // 8 cpus is 1/8 of the node but 256G is half of its memory.
        let hours = resource_hours(&input(3600, 1, "cpu=8,mem=256G"), Some(&roma())).unwrap();
        assert_eq!(hours, 32.0);
    }

    #[test]
    fn test_gpu_dominates_and_keys_normalize() {
        let tres = "cpu=16,mem=64G,gres/gpu=2,gres/gpu:a100=2,billing=16";
        let hours = resource_hours(&input(3600, 1, tres), Some(&ampere())).unwrap();
        // 2 of 4 gpus
        assert_eq!(hours, 64.0);
    }

    #[test]
    fn test_gpu_ignored_on_cpu_cluster() {
        let hours = resource_hours(&input(3600, 1, "cpu=32,gres/gpu=1"), Some(&roma())).unwrap();
        assert_eq!(hours, 32.0);
    }

    #[test]
    fn test_zero_and_negative_elapsed_clamp_to_one_second() {
        let hours = resource_hours(&input(0, 1, "cpu=64"), Some(&roma())).unwrap();
        assert_eq!(hours, 64.0 / 3600.0);

        let hours = resource_hours(&input(-30, 1, "cpu=64"), Some(&roma())).unwrap();
        assert_eq!(hours, 64.0 / 3600.0);
    }

    #[test]
    fn test_zero_nodes_counts_as_one() {
        let hours = resource_hours(&input(3600, 0, "cpu=32"), Some(&roma())).unwrap();
        assert_eq!(hours, 32.0);
    }

    #[test]
    fn test_bad_quantity_is_an_error() {
        let result = resource_hours(&input(3600, 1, "cpu=4,mem=12X"), Some(&roma()));
        assert!(matches!(result, Err(QuantityError::UnknownSuffix { .. })));
    }

    #[test]
    fn test_parse_request() {
        let request =
            ResourceRequest::parse("cpu=64, mem=1T ,node=2,gres/gpumem=80G,junk").unwrap();
        assert_eq!(request.get(Resource::Cpu), Some(64));
        assert_eq!(request.get(Resource::Mem), Some(1024u64.pow(4)));
        assert_eq!(request.get(Resource::GpuMem), Some(80 * 1024u64.pow(3)));
        assert_eq!(request.get(Resource::Gpu), None);
        assert!(ResourceRequest::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_hours_are_never_negative() {
        for tres in ["", "cpu=1", "mem=1K", "gres/gpu=8", "energy=5"] {
            for nodes in [0, 1, 3] {
                let hours = resource_hours(&input(-100, nodes, tres), Some(&ampere())).unwrap();
                assert!(hours >= 0.0, "{tres} on {nodes} nodes gave {hours}");
            }
        }
    }
}
