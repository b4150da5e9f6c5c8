//! REST client for the knowledge-base ingestion API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use kbsync_types::{BackendSettings, DataSourceId, DataSourceRef, IngestionJob, JobId};

use crate::{BackendError, ErrorKind, IndexingBackend};

/// Header carrying the service's error code, e.g. `ConflictException:...`.
const ERROR_TYPE_HEADER: &str = "x-amzn-errortype";

/// Jobs fetched per list call.
const LIST_PAGE_SIZE: u32 = 10;

/// Configuration for the HTTP backend.
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Base URL, without trailing slash
    pub endpoint: String,

    /// Bearer token, if the service requires one
    pub api_token: Option<SecretString>,

    /// Per request timeout
    pub timeout: Duration,
}

impl HttpBackendConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_token: None,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn from_settings(settings: &BackendSettings) -> Self {
        Self {
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            api_token: settings.api_token.clone().map(SecretString::from),
            timeout: Duration::from_millis(settings.call_timeout_ms),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobBody {
    ingestion_job_id: String,
    data_source_id: String,
    status: String,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobEnvelope {
    ingestion_job: JobBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobListEnvelope {
    #[serde(default)]
    ingestion_job_summaries: Vec<JobBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default, rename = "__type")]
    error_type: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    active_ingestion_job_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListRequest {
    max_results: u32,
    sort_by: SortBy,
}

#[derive(Debug, Serialize)]
struct SortBy {
    attribute: &'static str,
    order: &'static str,
}

impl JobBody {
    fn into_job(self) -> Result<IngestionJob, BackendError> {
        let status = self
            .status
            .parse()
            .map_err(|e: String| BackendError::unknown(e))?;
        let mut job = IngestionJob::new(
            JobId::new(self.ingestion_job_id),
            DataSourceId::new(self.data_source_id),
            status,
        );
        if let Some(started_at) = self.started_at {
            job.started_at = started_at;
        }
        Ok(job)
    }
}

/// Classify a non-success response.
///
/// The error code (from the error-type header or the body's `__type`) wins
/// over the status code, so a 400 carrying `ConflictException` is still a
/// conflict.
pub fn classify_response(status: StatusCode, error_code: Option<&str>) -> ErrorKind {
    let code = error_code
        .map(|c| c.split(':').next().unwrap_or(c))
        .map(|c| c.rsplit('#').next().unwrap_or(c));

    match code {
        Some("ConflictException") => return ErrorKind::Conflict,
        Some("ThrottlingException") | Some("ServiceQuotaExceededException") => {
            return ErrorKind::Throttled
        }
        Some("ResourceNotFoundException") => return ErrorKind::NotFound,
        Some("ValidationException") | Some("AccessDeniedException") => {
            return ErrorKind::Rejected
        }
        Some("InternalServerException") => return ErrorKind::Transient,
        _ => {}
    }

    match status.as_u16() {
        409 => ErrorKind::Conflict,
        429 => ErrorKind::Throttled,
        404 => ErrorKind::NotFound,
        400 | 401 | 403 | 422 => ErrorKind::Rejected,
        500..=599 => ErrorKind::Transient,
        _ => ErrorKind::Unknown,
    }
}

fn error_code_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ERROR_TYPE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// HTTP implementation of [`IndexingBackend`].
pub struct HttpIndexingBackend {
    client: Client,
    config: HttpBackendConfig,
}

impl HttpIndexingBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::rejected(format!("invalid client config: {}", e)))?;

        Ok(Self { client, config })
    }

    fn jobs_url(&self, data_source: &DataSourceRef) -> String {
        format!(
            "{}/knowledgebases/{}/datasources/{}/ingestionjobs",
            self.config.endpoint, data_source.knowledge_base_id, data_source.data_source_id
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_token {
            Some(token) => request.header(
                "Authorization",
                format!("Bearer {}", token.expose_secret()),
            ),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let response = self
            .authorize(request)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    BackendError::transient(e.to_string())
                } else {
                    BackendError::unknown(e.to_string())
                }
            })?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let header_code = error_code_header(response.headers());
        let text = response.text().await.unwrap_or_default();
        let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();

        let code = header_code.or(body.error_type);
        let kind = classify_response(status, code.as_deref());
        let message = body
            .message
            .unwrap_or_else(|| format!("HTTP {}: {}", status, text));

        if kind == ErrorKind::Throttled {
            warn!(status = %status, "Indexing backend throttled request");
        }

        let mut err = BackendError::new(kind, message);
        if let Some(job_id) = body.active_ingestion_job_id {
            err = err.with_active_job(JobId::new(job_id));
        }
        Err(err)
    }

    async fn parse_job(response: Response) -> Result<IngestionJob, BackendError> {
        let envelope: JobEnvelope = response
            .json()
            .await
            .map_err(|e| BackendError::unknown(format!("malformed job response: {}", e)))?;
        envelope.ingestion_job.into_job()
    }
}

#[async_trait]
impl IndexingBackend for HttpIndexingBackend {
    async fn start_job(&self, data_source: &DataSourceRef) -> Result<IngestionJob, BackendError> {
        debug!(data_source = %data_source, "Starting ingestion job");
        let request = self
            .client
            .put(format!("{}/", self.jobs_url(data_source)))
            .body("{}");
        let response = self.send(request).await?;
        Self::parse_job(response).await
    }

    async fn get_job(
        &self,
        data_source: &DataSourceRef,
        job_id: &JobId,
    ) -> Result<IngestionJob, BackendError> {
        let request = self
            .client
            .get(format!("{}/{}", self.jobs_url(data_source), job_id));
        let response = self.send(request).await?;
        Self::parse_job(response).await
    }

    async fn list_jobs(
        &self,
        data_source: &DataSourceRef,
    ) -> Result<Vec<IngestionJob>, BackendError> {
        let body = ListRequest {
            max_results: LIST_PAGE_SIZE,
            sort_by: SortBy {
                attribute: "STARTED_AT",
                order: "DESCENDING",
            },
        };
        let request = self
            .client
            .post(format!("{}/", self.jobs_url(data_source)))
            .json(&body);
        let response = self.send(request).await?;

        let envelope: JobListEnvelope = response
            .json()
            .await
            .map_err(|e| BackendError::unknown(format!("malformed job list: {}", e)))?;

        envelope
            .ingestion_job_summaries
            .into_iter()
            .map(JobBody::into_job)
            .collect()
    }

    fn name(&self) -> &str {
        "http"
    }
}
