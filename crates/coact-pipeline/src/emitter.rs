//! Batched output of charge records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coact_backend::{Backend, BackendError, ImportSummary};
use coact_core::ChargeRecord;
use std::collections::HashSet;
use std::io::Write;
use std::time::Instant;
use thiserror::Error;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Error, Debug)]
pub enum EmitError {
    #[error("Failed to write batch: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode batch: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to upload batch: {0}")]
    Backend(#[from] BackendError),
}

/// Destination of flushed batches.
#[async_trait]
pub trait BatchSink: Send {
    async fn write_batch(&mut self, batch: &[ChargeRecord]) -> Result<(), EmitError>;
}

/// Writes each batch as a pretty-printed JSON array.
pub struct JsonSink<W> {
    writer: W,
}

impl<W: Write + Send> JsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: Write + Send> BatchSink for JsonSink<W> {
    async fn write_batch(&mut self, batch: &[ChargeRecord]) -> Result<(), EmitError> {
        serde_json::to_writer_pretty(&mut self.writer, batch)?;
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Sends each batch to the backend's import mutation.
pub struct UploadSink<'a> {
    backend: &'a dyn Backend,
    dry_run: bool,
    summary: ImportSummary,
}

impl<'a> UploadSink<'a> {
    pub fn new(backend: &'a dyn Backend, dry_run: bool) -> Self {
        Self {
            backend,
            dry_run,
            summary: ImportSummary::default(),
        }
    }

    /// Counts summed over all uploaded batches.
    pub fn summary(&self) -> ImportSummary {
        self.summary
    }
}

#[async_trait]
impl BatchSink for UploadSink<'_> {
    async fn write_batch(&mut self, batch: &[ChargeRecord]) -> Result<(), EmitError> {
        if self.dry_run {
            tracing::info!("Dry run: would upload {} jobs", batch.len());
            return Ok(());
        }
        let counts = self.backend.import_jobs(batch).await?;
        tracing::info!(
            "Imported {} jobs: {} inserted, {} upserted, {} modified, {} deleted",
            batch.len(),
            counts.inserted_count,
            counts.upserted_count,
            counts.modified_count,
            counts.deleted_count
        );
        self.summary += counts;
        Ok(())
    }
}

/// Counters kept by a [`BatchEmitter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitStats {
    pub emitted: usize,
    pub duplicates: usize,
    pub batches: usize,
}

/// Buffers charge records and hands them to a sink in batches.
///
/// A record whose `(jobId, startTs)` is already in the current buffer is
/// dropped. The seen set is cleared on every flush.
pub struct BatchEmitter<S> {
    sink: S,
    batch_size: usize,
    buffer: Vec<ChargeRecord>,
    seen: HashSet<(String, DateTime<Utc>)>,
    stats: EmitStats,
}

impl<S: BatchSink> BatchEmitter<S> {
    pub fn new(sink: S, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            sink,
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            seen: HashSet::new(),
            stats: EmitStats::default(),
        }
    }

    /// Buffer a record, flushing when the batch is full.
    ///
    /// Returns false if the record was a duplicate.
    pub async fn push(&mut self, record: ChargeRecord) -> Result<bool, EmitError> {
        if !self.seen.insert(record.dedup_key()) {
            tracing::debug!(
                "Skipping duplicate job {} started {}",
                record.job_id,
                record.start_ts
            );
            self.stats.duplicates += 1;
            return Ok(false);
        }
        self.buffer.push(record);
        if self.buffer.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(true)
    }

    /// Write out whatever is buffered.
    pub async fn flush(&mut self) -> Result<(), EmitError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let start = Instant::now();
        self.sink.write_batch(&self.buffer).await?;
        tracing::info!(
            "Flushed {} jobs in {:.3}s",
            self.buffer.len(),
            start.elapsed().as_secs_f64()
        );
        self.stats.emitted += self.buffer.len();
        self.stats.batches += 1;
        self.buffer.clear();
        self.seen.clear();
        Ok(())
    }

    pub fn stats(&self) -> EmitStats {
        self.stats
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Keeps every batch it is given.
    #[derive(Default)]
    struct Collect {
        batches: Vec<Vec<ChargeRecord>>,
    }

    #[async_trait]
    impl BatchSink for Collect {
        async fn write_batch(&mut self, batch: &[ChargeRecord]) -> Result<(), EmitError> {
            self.batches.push(batch.to_vec());
            Ok(())
        }
    }

    fn charge(job_id: &str, hour: u32) -> ChargeRecord {
        ChargeRecord {
            job_id: job_id.to_string(),
            username: "alice".to_string(),
            allocation_id: "a1".to_string(),
            qos: "normal".to_string(),
            start_ts: Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
            end_ts: Some(Utc.with_ymd_and_hms(2024, 1, 1, hour + 1, 0, 0).unwrap()),
            resource_hours: 1.5,
        }
    }

    #[tokio::test]
    async fn test_duplicates_collapse_within_batch() {
        let mut emitter = BatchEmitter::new(Collect::default(), 10);
        assert!(emitter.push(charge("12345", 0)).await.unwrap());
        assert!(!emitter.push(charge("12345", 0)).await.unwrap());
        // Same job id, different start: a requeued run
        assert!(emitter.push(charge("12345", 3)).await.unwrap());
        emitter.flush().await.unwrap();

        let sink = emitter.into_sink();
        assert_eq!(sink.batches.len(), 1);
        assert_eq!(sink.batches[0].len(), 2);
        assert_eq!(sink.batches[0][0].job_id, "12345");
    }

    #[tokio::test]
    async fn test_flush_on_batch_size() {
        let mut emitter = BatchEmitter::new(Collect::default(), 2);
        for (i, id) in ["1", "2", "3", "4", "5"].iter().enumerate() {
            emitter.push(charge(id, i as u32)).await.unwrap();
        }
        assert_eq!(emitter.pending(), 1);
        assert_eq!(emitter.sink().batches.len(), 2);

        emitter.flush().await.unwrap();
        let stats = emitter.stats();
        assert_eq!(stats.emitted, 5);
        assert_eq!(stats.batches, 3);
        assert_eq!(stats.duplicates, 0);

        let ids: Vec<String> = emitter
            .into_sink()
            .batches
            .into_iter()
            .flatten()
            .map(|r| r.job_id)
            .collect();
        assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);
    }

    #[tokio::test]
    async fn test_dedup_resets_after_flush() {
        let mut emitter = BatchEmitter::new(Collect::default(), 1);
        assert!(emitter.push(charge("7", 0)).await.unwrap());
        assert!(emitter.push(charge("7", 0)).await.unwrap());
        assert_eq!(emitter.stats().emitted, 2);
    }

    #[tokio::test]
    async fn test_empty_flush_writes_nothing() {
        let mut emitter = BatchEmitter::new(Collect::default(), 10);
        emitter.flush().await.unwrap();
        assert!(emitter.sink().batches.is_empty());
        assert_eq!(emitter.stats().batches, 0);
    }

    #[tokio::test]
    async fn test_upload_sink() {
        let backend = crate::testing::FakeBackend::default();
        let mut emitter = BatchEmitter::new(UploadSink::new(&backend, false), 2);
        for (i, id) in ["1", "2", "3"].iter().enumerate() {
            emitter.push(charge(id, i as u32)).await.unwrap();
        }
        emitter.flush().await.unwrap();

        assert_eq!(backend.imported(), vec![2, 1]);
        assert_eq!(emitter.sink().summary().inserted_count, 3);
    }

    #[tokio::test]
    async fn test_upload_failure_is_returned() {
        let backend = crate::testing::FakeBackend::default().failing_imports();
        let mut emitter = BatchEmitter::new(UploadSink::new(&backend, false), 10);
        emitter.push(charge("1", 0)).await.unwrap();

        let result = emitter.flush().await;
        assert!(matches!(
            result,
            Err(EmitError::Backend(BackendError::GraphQl { .. }))
        ));
        assert_eq!(backend.imported(), vec![1]);
        assert_eq!(emitter.stats().batches, 0);
        assert_eq!(emitter.pending(), 1);
    }

    #[tokio::test]
    async fn test_upload_dry_run_sends_nothing() {
        let backend = crate::testing::FakeBackend::default();
        let mut emitter = BatchEmitter::new(UploadSink::new(&backend, true), 10);
        emitter.push(charge("1", 0)).await.unwrap();
        emitter.flush().await.unwrap();

        assert!(backend.imported().is_empty());
        assert_eq!(emitter.stats().emitted, 1);
    }

    #[tokio::test]
    async fn test_json_sink_output() {
        let mut sink = JsonSink::new(Vec::new());
        sink.write_batch(&[charge("12345", 0)]).await.unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();

        assert!(text.starts_with("[\n"));
        assert!(text.contains("\"startTs\": \"2024-01-01T00:00:00.000Z\""));
        let parsed: Vec<ChargeRecord> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, vec![charge("12345", 0)]);
    }
}
