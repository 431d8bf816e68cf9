//! Ingestion and admission-control pipelines for coact.
//!
//! Ingestion reads sacct records, charges them against the run's metadata
//! and emits batches of charge records. Admission control compares recent
//! facility usage with scheduler hold state and toggles holds.

pub mod admission;
pub mod emitter;
pub mod ingest;

pub use admission::{
    AdmissionError, AdmissionOptions, AdmissionPlan, AdmissionReport, DEFAULT_THRESHOLD,
    DEFAULT_WINDOWS, Transition, desired_state, plan, run_admission,
};
pub use emitter::{
    BatchEmitter, BatchSink, DEFAULT_BATCH_SIZE, EmitError, EmitStats, JsonSink, UploadSink,
};
pub use ingest::{
    IngestError, IngestOptions, IngestSummary, Outcome, SkipReason, process_record, run_ingest,
};
