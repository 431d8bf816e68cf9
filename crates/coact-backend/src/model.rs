//! Response shapes of the backend's GraphQL schema.

use coact_core::{
    AllocatedResources, ClusterCapacity, ComputeAllocation, Metadata, UsageSample,
};
use coact_parsers::parse_timestamp;
use serde::Deserialize;
use std::collections::HashMap;
use std::ops::AddAssign;

pub(crate) const METADATA_QUERY: &str = r#"
query metadata {
    repos(filter: {}) {
        Id
        name
        facility
        currentComputeAllocations {
            Id
            clustername
            start
            end
            percentOfFacility
            allocated { cpus mem nodes gpus }
        }
    }
    clusters(filter: {}) {
        name
        nodecpucount
        nodegpucount
        nodememgb
        nodegpumemgb
    }
}
"#;

pub(crate) const IMPORT_JOBS_MUTATION: &str = r#"
mutation importJobs($jobs: [JobInput!]!) {
    importJobs(jobs: $jobs) {
        insertedCount
        upsertedCount
        modifiedCount
        deletedCount
    }
}
"#;

pub(crate) const USAGE_QUERY: &str = r#"
query facilityRecentComputeUsage($pastMinutes: [Int!]!) {
    facilityRecentComputeUsage(pastMinutes: $pastMinutes) {
        facility
        clustername
        pastMinutes
        percentUsed
    }
}
"#;

#[derive(Debug, Deserialize)]
pub(crate) struct MetadataData {
    #[serde(default)]
    repos: Vec<RepoNode>,
    #[serde(default)]
    clusters: Vec<ClusterNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepoNode {
    name: String,
    facility: String,
    #[serde(default)]
    current_compute_allocations: Option<Vec<AllocationNode>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllocationNode {
    #[serde(rename = "Id")]
    id: String,
    clustername: String,
    start: Option<String>,
    end: Option<String>,
    #[serde(default)]
    percent_of_facility: Option<f64>,
    #[serde(default)]
    allocated: Option<AllocatedNode>,
}

#[derive(Debug, Default, Deserialize)]
struct AllocatedNode {
    #[serde(default)]
    cpus: Option<f64>,
    #[serde(default)]
    mem: Option<f64>,
    #[serde(default)]
    nodes: Option<f64>,
    #[serde(default)]
    gpus: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ClusterNode {
    name: String,
    #[serde(default)]
    nodecpucount: Option<u32>,
    #[serde(default)]
    nodegpucount: Option<u32>,
    #[serde(default)]
    nodememgb: Option<f64>,
    #[serde(default)]
    nodegpumemgb: Option<f64>,
}

impl MetadataData {
    /// Build the run's metadata, skipping allocations without a usable interval.
    pub(crate) fn into_metadata(self) -> Metadata {
        let clusters = self
            .clusters
            .into_iter()
            .map(|c| {
                if c.nodecpucount.unwrap_or(0) == 0 {
                    tracing::warn!("Cluster {} reports no cpus per node", c.name);
                }
                ClusterCapacity::from_gb(
                    c.name,
                    c.nodecpucount.unwrap_or(0),
                    c.nodegpucount.unwrap_or(0),
                    c.nodememgb.unwrap_or(0.0),
                    c.nodegpumemgb.unwrap_or(0.0),
                )
            })
            .collect();

        let mut allocations = Vec::new();
        for repo in self.repos {
            for alloc in repo.current_compute_allocations.unwrap_or_default() {
                let start = alloc.start.as_deref().and_then(parse_timestamp);
                let end = alloc.end.as_deref().and_then(parse_timestamp);
                let (Some(start), Some(end)) = (start, end) else {
                    tracing::warn!(
                        "{}:{} at {} has no allocation interval (allocation {})",
                        repo.facility,
                        repo.name,
                        alloc.clustername,
                        alloc.id
                    );
                    continue;
                };
                let allocated = alloc.allocated.unwrap_or_default();
                allocations.push(ComputeAllocation {
                    id: alloc.id,
                    facility: repo.facility.clone(),
                    repo: repo.name.clone(),
                    cluster: alloc.clustername,
                    start,
                    end,
                    percent_of_facility: alloc.percent_of_facility.unwrap_or(0.0),
                    allocated: AllocatedResources {
                        cpus: allocated.cpus.unwrap_or(0.0),
                        mem: allocated.mem.unwrap_or(0.0),
                        nodes: allocated.nodes.unwrap_or(0.0),
                        gpus: allocated.gpus.unwrap_or(0.0),
                    },
                });
            }
        }

        Metadata::new(clusters, allocations)
    }
}

/// Counts returned by the import mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    #[serde(default)]
    pub inserted_count: u64,
    #[serde(default)]
    pub upserted_count: u64,
    #[serde(default)]
    pub modified_count: u64,
    #[serde(default)]
    pub deleted_count: u64,
}

impl AddAssign for ImportSummary {
    fn add_assign(&mut self, other: Self) {
        self.inserted_count += other.inserted_count;
        self.upserted_count += other.upserted_count;
        self.modified_count += other.modified_count;
        self.deleted_count += other.deleted_count;
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ImportData {
    pub import_jobs: ImportSummary,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UsageData {
    #[serde(default)]
    facility_recent_compute_usage: Vec<UsageRow>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageRow {
    facility: String,
    clustername: String,
    past_minutes: u32,
    percent_used: Option<f64>,
}

impl UsageData {
    /// Group rows into one sample per facility and cluster, in first-seen order.
    ///
    /// Windows the backend reported nothing for read as 0%.
    pub(crate) fn into_samples(self, windows: &[u32]) -> Vec<UsageSample> {
        let mut samples: Vec<UsageSample> = Vec::new();
        let mut index: HashMap<(String, String), usize> = HashMap::new();

        for row in self.facility_recent_compute_usage {
            let Some(slot) = windows.iter().position(|w| *w == row.past_minutes) else {
                tracing::debug!(
                    "Ignoring usage for unrequested window {} minutes",
                    row.past_minutes
                );
                continue;
            };
            let key = (row.facility.clone(), row.clustername.clone());
            let i = *index.entry(key).or_insert_with(|| {
                samples.push(UsageSample {
                    facility: row.facility.clone(),
                    cluster: row.clustername.clone(),
                    percents: vec![0.0; windows.len()],
                });
                samples.len() - 1
            });
            samples[i].percents[slot] = row.percent_used.unwrap_or(0.0);
        }

        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const METADATA: &str = r#"{
        "repos": [
            {
                "Id": "r1",
                "name": "XPP",
                "facility": "LCLS",
                "currentComputeAllocations": [
                    {
                        "Id": "alloc-jan",
                        "clustername": "roma",
                        "start": "2024-01-01T00:00:00Z",
                        "end": "2024-02-01T00:00:00Z",
                        "percentOfFacility": 25.0,
                        "allocated": { "cpus": 1280, "mem": 0, "nodes": 10, "gpus": 0 }
                    },
                    { "Id": "alloc-open", "clustername": "milano", "start": "2024-01-01T00:00:00Z" }
                ]
            },
            { "Id": "r2", "name": "default", "facility": "shared", "currentComputeAllocations": null }
        ],
        "clusters": [
            { "name": "roma", "nodecpucount": 128, "nodegpucount": 0, "nodememgb": 512, "nodegpumemgb": 0 },
            { "name": "ampere", "nodecpucount": 128, "nodegpucount": 4, "nodememgb": 1024, "nodegpumemgb": 40 }
        ]
    }"#;

    #[test]
    fn test_metadata_conversion() {
        let data: MetadataData = serde_json::from_str(METADATA).unwrap();
        let metadata = data.into_metadata();

        let ampere = metadata.capacity("ampere").unwrap();
        assert_eq!(ampere.node_gpu_count, 4);
        assert_eq!(ampere.node_memory_bytes, 1024 * 1024 * 1024 * 1024);

        let at = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert_eq!(
            metadata.resolve_allocation("lcls", "xpp", "roma", at),
            Ok("alloc-jan")
        );
        // Allocation without an end is skipped
        assert_eq!(metadata.allocations().len(), 1);
    }

    #[test]
    fn test_import_summary_accumulates() {
        let data: ImportData = serde_json::from_str(
            r#"{"importJobs": {"insertedCount": 3, "upsertedCount": 1, "modifiedCount": 0, "deletedCount": 0}}"#,
        )
        .unwrap();
        let mut total = ImportSummary::default();
        total += data.import_jobs;
        total += data.import_jobs;
        assert_eq!(total.inserted_count, 6);
        assert_eq!(total.upserted_count, 2);
    }

    #[test]
    fn test_usage_grouped_in_window_order() {
        let data: UsageData = serde_json::from_str(
            r#"{"facilityRecentComputeUsage": [
                {"facility": "lcls", "clustername": "roma", "pastMinutes": 60, "percentUsed": 80.0},
                {"facility": "lcls", "clustername": "roma", "pastMinutes": 15, "percentUsed": 120.0},
                {"facility": "rubin", "clustername": "milano", "pastMinutes": 15, "percentUsed": 10.0},
                {"facility": "rubin", "clustername": "milano", "pastMinutes": 5, "percentUsed": 99.0},
                {"facility": "rubin", "clustername": "milano", "pastMinutes": 60, "percentUsed": null}
            ]}"#,
        )
        .unwrap();

        let samples = data.into_samples(&[15, 60]);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].facility, "lcls");
        assert_eq!(samples[0].percents, vec![120.0, 80.0]);
        assert_eq!(samples[1].cluster, "milano");
        assert_eq!(samples[1].percents, vec![10.0, 0.0]);
    }
}
