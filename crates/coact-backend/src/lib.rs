//! Accounting backend access for coact.
//!
//! The backend owns repos, allocations and cluster definitions, stores
//! imported jobs, and reports recent facility utilization. It is reached
//! over GraphQL; the [`Backend`] trait lets the pipeline run against fakes.

pub mod graphql;
pub mod model;

pub use graphql::{DEFAULT_URL, DEFAULT_USERNAME, GraphQlBackend, read_password_file};
pub use model::ImportSummary;

use async_trait::async_trait;
use coact_core::{ChargeRecord, Metadata, UsageSample};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to read password file {path}: {source}")]
    Credentials {
        path: String,
        source: std::io::Error,
    },
    #[error("{operation} failed: {message}")]
    GraphQl {
        operation: &'static str,
        message: String,
    },
    #[error("{0} returned no data")]
    MissingData(&'static str),
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Cluster capacities and current allocations, fetched once per run.
    async fn fetch_metadata(&self) -> Result<Metadata, BackendError>;

    /// Upsert one batch of charge records.
    async fn import_jobs(&self, jobs: &[ChargeRecord]) -> Result<ImportSummary, BackendError>;

    /// Percent utilization per facility and cluster, one reading per window
    /// (in minutes), in the order the windows were given.
    async fn facility_usage(&self, windows: &[u32]) -> Result<Vec<UsageSample>, BackendError>;
}
