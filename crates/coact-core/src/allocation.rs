//! Resolve which compute allocation a job is billed against.

use crate::metadata::ComputeAllocation;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// `(facility, repo, cluster)`, lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AllocationKey {
    pub facility: String,
    pub repo: String,
    pub cluster: String,
}

impl AllocationKey {
    pub fn new(facility: &str, repo: &str, cluster: &str) -> Self {
        Self {
            facility: facility.to_lowercase(),
            repo: repo.to_lowercase(),
            cluster: cluster.to_lowercase(),
        }
    }
}

impl fmt::Display for AllocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} at {}", self.facility, self.repo, self.cluster)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no allocations for {key}")]
    UnknownKey { key: AllocationKey },
    #[error("could not determine allocation for {key} at timestamp {at}")]
    NoInterval {
        key: AllocationKey,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
struct Interval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    id: String,
}

impl Interval {
    /// Half-open containment: `start <= at < end`.
    fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// Two allocations for the same key whose intervals intersect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlap {
    pub key: AllocationKey,
    pub first: String,
    pub second: String,
}

/// Allocation intervals grouped by key.
///
/// Intervals are kept newest-start first, so when allocations overlap the
/// most recently started one wins; equal starts fall back to id order.
#[derive(Debug, Clone, Default)]
pub struct AllocationIndex {
    by_key: HashMap<AllocationKey, Vec<Interval>>,
    overlaps: Vec<Overlap>,
}

impl AllocationIndex {
    pub fn build(allocations: impl IntoIterator<Item = ComputeAllocation>) -> Self {
        let mut by_key: HashMap<AllocationKey, Vec<Interval>> = HashMap::new();

        for alloc in allocations {
            let key = alloc.key();
            if alloc.end <= alloc.start {
                tracing::warn!(
                    "Ignoring allocation {} for {}: empty interval {} - {}",
                    alloc.id,
                    key,
                    alloc.start,
                    alloc.end
                );
                continue;
            }
            tracing::debug!(
                "Allocation {} for {}: {} - {}",
                alloc.id,
                key,
                alloc.start,
                alloc.end
            );
            by_key.entry(key).or_default().push(Interval {
                start: alloc.start,
                end: alloc.end,
                id: alloc.id,
            });
        }

        let mut overlaps = Vec::new();
        for (key, intervals) in by_key.iter_mut() {
            intervals.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
            overlaps.extend(find_overlaps(key, intervals));
            intervals.sort_by(|a, b| b.start.cmp(&a.start).then_with(|| a.id.cmp(&b.id)));
        }

        for overlap in &overlaps {
            tracing::warn!(
                "Allocations {} and {} for {} overlap; the later start wins",
                overlap.first,
                overlap.second,
                overlap.key
            );
        }

        Self { by_key, overlaps }
    }

    /// Overlapping allocation pairs found while building.
    pub fn overlaps(&self) -> &[Overlap] {
        &self.overlaps
    }

    pub fn len(&self) -> usize {
        self.by_key.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Allocation id whose interval contains `at` (start inclusive, end exclusive).
    pub fn resolve(&self, key: &AllocationKey, at: DateTime<Utc>) -> Result<&str, ResolveError> {
        let intervals = self
            .by_key
            .get(key)
            .ok_or_else(|| ResolveError::UnknownKey { key: key.clone() })?;

        intervals
            .iter()
            .find(|i| i.contains(at))
            .map(|i| i.id.as_str())
            .ok_or_else(|| ResolveError::NoInterval {
                key: key.clone(),
                at,
            })
    }
}

/// Overlapping pairs among intervals sorted by start.
fn find_overlaps(key: &AllocationKey, sorted: &[Interval]) -> Vec<Overlap> {
    let mut overlaps = Vec::new();
    for (i, a) in sorted.iter().enumerate() {
        for b in &sorted[i + 1..] {
            if b.start >= a.end {
                break;
            }
            overlaps.push(Overlap {
                key: key.clone(),
                first: a.id.clone(),
                second: b.id.clone(),
            });
        }
    }
    overlaps
}
