//! GraphQL-over-HTTP backend client.

use crate::model::{
    IMPORT_JOBS_MUTATION, ImportData, ImportSummary, METADATA_QUERY, MetadataData, USAGE_QUERY,
    UsageData,
};
use crate::{Backend, BackendError};
use async_trait::async_trait;
use camino::Utf8Path;
use coact_core::{ChargeRecord, Metadata, UsageSample};
use graphql_client::{QueryBody, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};

pub const DEFAULT_URL: &str = "http://localhost:8000/graphql";
pub const DEFAULT_USERNAME: &str = "sdf-bot";

#[derive(Serialize)]
struct NoVariables {}

#[derive(Serialize)]
struct ImportVariables<'a> {
    jobs: &'a [ChargeRecord],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UsageVariables<'a> {
    past_minutes: &'a [u32],
}

/// Read a basic-auth password, dropping trailing whitespace.
pub fn read_password_file(path: &Utf8Path) -> Result<String, BackendError> {
    let text = std::fs::read_to_string(path).map_err(|source| BackendError::Credentials {
        path: path.to_string(),
        source,
    })?;
    Ok(text.trim_end().to_string())
}

pub struct GraphQlBackend {
    client: reqwest::Client,
    url: String,
    username: String,
    password: Option<String>,
}

impl GraphQlBackend {
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: Option<String>,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            username: username.into(),
            password,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn execute<V, D>(
        &self,
        operation_name: &'static str,
        query: &'static str,
        variables: V,
    ) -> Result<D, BackendError>
    where
        V: Serialize + Send,
        D: DeserializeOwned + Send,
    {
        let body = QueryBody {
            variables,
            query,
            operation_name,
        };

        let start = Instant::now();
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(password) = &self.password {
            request = request.basic_auth(&self.username, Some(password));
        }
        let response: Response<D> = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        tracing::debug!("{} took {:?}", operation_name, start.elapsed());
        into_data(operation_name, response)
    }
}

/// Unwrap a GraphQL response envelope, surfacing any reported errors.
fn into_data<D>(operation: &'static str, response: Response<D>) -> Result<D, BackendError> {
    if let Some(errors) = response.errors.filter(|e| !e.is_empty()) {
        let message = errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(BackendError::GraphQl { operation, message });
    }
    response.data.ok_or(BackendError::MissingData(operation))
}

#[async_trait]
impl Backend for GraphQlBackend {
    async fn fetch_metadata(&self) -> Result<Metadata, BackendError> {
        let data: MetadataData = self
            .execute("metadata", METADATA_QUERY, NoVariables {})
            .await?;
        let metadata = data.into_metadata();
        tracing::info!(
            "Loaded {} clusters and {} allocations",
            metadata.clusters().count(),
            metadata.allocations().len()
        );
        Ok(metadata)
    }

    async fn import_jobs(&self, jobs: &[ChargeRecord]) -> Result<ImportSummary, BackendError> {
        let data: ImportData = self
            .execute("importJobs", IMPORT_JOBS_MUTATION, ImportVariables { jobs })
            .await?;
        Ok(data.import_jobs)
    }

    async fn facility_usage(&self, windows: &[u32]) -> Result<Vec<UsageSample>, BackendError> {
        let data: UsageData = self
            .execute(
                "facilityRecentComputeUsage",
                USAGE_QUERY,
                UsageVariables {
                    past_minutes: windows,
                },
            )
            .await?;
        Ok(data.into_samples(windows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_password_file_is_trimmed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "s3cret  ").unwrap();
        let path = Utf8Path::from_path(file.path()).unwrap();
        assert_eq!(read_password_file(path).unwrap(), "s3cret");
    }

    #[test]
    fn test_missing_password_file() {
        let result = read_password_file(Utf8Path::new("/nonexistent/password"));
        assert!(matches!(result, Err(BackendError::Credentials { .. })));
    }

    #[test]
    fn test_request_body_shape() {
        let body = QueryBody {
            variables: UsageVariables {
                past_minutes: &[15, 60],
            },
            query: USAGE_QUERY,
            operation_name: "facilityRecentComputeUsage",
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["operationName"], "facilityRecentComputeUsage");
        assert_eq!(value["variables"]["pastMinutes"], serde_json::json!([15, 60]));
    }

    fn envelope(json: &str) -> Response<ImportData> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_envelope_errors() {
        let response = envelope(
            r#"{"data": null, "errors": [{"message": "bad allocation"}, {"message": "denied"}]}"#,
        );
        match into_data("importJobs", response) {
            Err(BackendError::GraphQl { operation, message }) => {
                assert_eq!(operation, "importJobs");
                assert_eq!(message, "bad allocation; denied");
            }
            other => panic!("expected GraphQl error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_envelope_missing_data() {
        let response = envelope(r#"{"data": null}"#);
        assert!(matches!(
            into_data("importJobs", response),
            Err(BackendError::MissingData("importJobs"))
        ));
    }

    #[test]
    fn test_envelope_data() {
        let response = envelope(
            r#"{"data": {"importJobs": {
                "insertedCount": 3, "upsertedCount": 1, "modifiedCount": 0, "deletedCount": 0
            }}}"#,
        );
        let data = into_data("importJobs", response).unwrap();
        assert_eq!(data.import_jobs.inserted_count, 3);
        assert_eq!(data.import_jobs.upserted_count, 1);
    }

    #[test]
    fn test_new_backend() {
        let backend = GraphQlBackend::new(DEFAULT_URL, DEFAULT_USERNAME, None).unwrap();
        assert_eq!(backend.url(), "http://localhost:8000/graphql");
    }
}
