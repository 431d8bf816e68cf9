//! Turn accounting records into charge records.
//!
//! Each record either becomes a charge, is skipped for a reason, or fails
//! the run. [`run_ingest`] decides which skips are fatal.

use crate::emitter::{BatchEmitter, BatchSink, EmitError, EmitStats};
use coact_core::{
    ChargeInput, ChargeRecord, Metadata, ResolveError, RuleTable, elapsed_seconds, resource_hours,
};
use coact_parsers::QuantityError;
use coact_slurm::{
    DEFAULT_FACILITY, DEFAULT_REPO, JobAccountingRecord, LineSource, RecordReader, SacctError,
};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Sacct(#[from] SacctError),
    #[error("Job {job_id}: bad AllocTRES {tres:?}: {source}")]
    Quantity {
        job_id: String,
        tres: String,
        source: QuantityError,
    },
    #[error("Job {job_id}: {source}")]
    Unresolved {
        job_id: String,
        source: ResolveError,
    },
    #[error(transparent)]
    Emit(#[from] EmitError),
}

/// Why a record produced no charge.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Pending, or no start time
    NeverStarted,
    /// No end time yet
    Unfinished,
    /// Removed by a normalization rule
    Dropped,
    /// Partition is not a known cluster
    UnknownCluster(String),
    /// Nothing billable was requested
    ZeroUsage,
    Unresolved(ResolveError),
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::NeverStarted => "never started",
            SkipReason::Unfinished => "unfinished",
            SkipReason::Dropped => "dropped by rule",
            SkipReason::UnknownCluster(_) => "unknown cluster",
            SkipReason::ZeroUsage => "zero usage",
            SkipReason::Unresolved(_) => "no allocation",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnknownCluster(cluster) => write!(f, "unknown cluster {}", cluster),
            SkipReason::Unresolved(e) => write!(f, "{}", e),
            other => write!(f, "{}", other.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Charge(ChargeRecord),
    Skip(SkipReason),
}

/// Charge one record against the run's metadata.
///
/// Only a malformed TRES quantity is an error here; everything else that
/// prevents billing is a [`SkipReason`].
pub fn process_record(
    metadata: &Metadata,
    rules: &RuleTable,
    record: JobAccountingRecord,
) -> Result<Outcome, IngestError> {
    if record.never_started() {
        return Ok(Outcome::Skip(SkipReason::NeverStarted));
    }
    let (Some(start), Some(end)) = (record.start_time, record.end_time) else {
        return Ok(Outcome::Skip(SkipReason::Unfinished));
    };

    let Some(record) = rules.apply(record) else {
        return Ok(Outcome::Skip(SkipReason::Dropped));
    };

    let (facility, repo) = record.facility_repo().unwrap_or_else(|| {
        tracing::warn!(
            "Job {}: cannot split account {:?}, charging {}:{}",
            record.job_id,
            record.account,
            DEFAULT_FACILITY,
            DEFAULT_REPO
        );
        (DEFAULT_FACILITY, DEFAULT_REPO)
    });

    let Some(cluster) = metadata.capacity(&record.partition) else {
        return Ok(Outcome::Skip(SkipReason::UnknownCluster(
            record.partition.clone(),
        )));
    };

    let input = ChargeInput {
        start,
        end,
        alloc_nodes: record.alloc_nodes,
        alloc_tres: &record.alloc_tres,
    };
    let hours = resource_hours(&input, Some(cluster)).map_err(|source| IngestError::Quantity {
        job_id: record.job_id.clone(),
        tres: record.alloc_tres.clone(),
        source,
    })?;
    if hours <= 0.0 {
        return Ok(Outcome::Skip(SkipReason::ZeroUsage));
    }

    let allocation_id = match metadata.resolve_allocation(facility, repo, &record.partition, start)
    {
        Ok(id) => id.to_string(),
        Err(e) => return Ok(Outcome::Skip(SkipReason::Unresolved(e))),
    };

    Ok(Outcome::Charge(ChargeRecord {
        job_id: record.job_id,
        username: record.username,
        allocation_id,
        qos: record.qos,
        start_ts: start,
        end_ts: Some(end),
        resource_hours: hours,
    }))
}

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Abort on the first job that resolves to no allocation
    pub exit_on_error: bool,
}

/// Totals for one import run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestSummary {
    /// Records read from the source
    pub read: usize,
    /// Summed wall time of records that started and finished
    pub elapsed_seconds: f64,
    /// Lines dropped by the reader for missing columns
    pub short_lines: usize,
    pub skipped: BTreeMap<&'static str, usize>,
    pub emit: EmitStats,
}

impl IngestSummary {
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }

    pub fn log(&self) {
        tracing::info!(
            "Read {} jobs totalling {:.0} seconds; emitted {}, skipped {}, duplicates {}",
            self.read,
            self.elapsed_seconds,
            self.emit.emitted,
            self.skipped_total(),
            self.emit.duplicates
        );
        for (reason, count) in &self.skipped {
            tracing::info!("  {}: {}", reason, count);
        }
        if self.short_lines > 0 {
            tracing::warn!("{} short lines dropped", self.short_lines);
        }
    }
}

/// Read every record, charge it, and emit the charges.
///
/// The emitter is flushed before returning.
pub async fn run_ingest<S: LineSource, K: BatchSink>(
    reader: &mut RecordReader<S>,
    metadata: &Metadata,
    rules: &RuleTable,
    emitter: &mut BatchEmitter<K>,
    options: &IngestOptions,
) -> Result<IngestSummary, IngestError> {
    let mut summary = IngestSummary::default();

    while let Some(record) = reader.next_record().await? {
        summary.read += 1;
        if let (Some(start), Some(end)) = (record.start_time, record.end_time) {
            summary.elapsed_seconds += elapsed_seconds(start, end);
        }

        let job_id = record.job_id.clone();
        match process_record(metadata, rules, record)? {
            Outcome::Charge(charge) => {
                tracing::debug!(
                    "Job {} charged {:.3} hours to {}",
                    charge.job_id,
                    charge.resource_hours,
                    charge.allocation_id
                );
                emitter.push(charge).await?;
            }
            Outcome::Skip(SkipReason::Unresolved(source)) if options.exit_on_error => {
                return Err(IngestError::Unresolved { job_id, source });
            }
            Outcome::Skip(reason) => {
                match &reason {
                    SkipReason::NeverStarted | SkipReason::Unfinished | SkipReason::Dropped => {
                        tracing::debug!("Skipping job {}: {}", job_id, reason)
                    }
                    _ => tracing::warn!("Skipping job {}: {}", job_id, reason),
                }
                *summary.skipped.entry(reason.label()).or_default() += 1;
            }
        }
    }

    emitter.flush().await?;
    summary.short_lines = reader.short_lines();
    summary.emit = emitter.stats();
    Ok(summary)
}
