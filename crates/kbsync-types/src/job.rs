//! Ingestion job types.
//!
//! Jobs are owned by the indexing backend. The controller only ever holds a
//! cached last-seen copy, so nothing here is authoritative.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{DataSourceId, JobId};

/// Status of a backend ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestionJobStatus {
    Starting,
    InProgress,
    Complete,
    Failed,
}

impl IngestionJobStatus {
    /// Whether the job still occupies the data source's single job slot.
    pub fn is_active(&self) -> bool {
        matches!(self, IngestionJobStatus::Starting | IngestionJobStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionJobStatus::Starting => "STARTING",
            IngestionJobStatus::InProgress => "IN_PROGRESS",
            IngestionJobStatus::Complete => "COMPLETE",
            IngestionJobStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for IngestionJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IngestionJobStatus {
    type Err = String;

    /// Parse a backend status string.
    ///
    /// `STOPPING` still holds the job slot and reads as in progress;
    /// `STOPPED` never finished indexing and reads as failed.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STARTING" => Ok(IngestionJobStatus::Starting),
            "IN_PROGRESS" | "STOPPING" => Ok(IngestionJobStatus::InProgress),
            "COMPLETE" => Ok(IngestionJobStatus::Complete),
            "FAILED" | "STOPPED" => Ok(IngestionJobStatus::Failed),
            other => Err(format!("unknown ingestion job status: {}", other)),
        }
    }
}

/// Cached copy of a backend ingestion job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionJob {
    pub job_id: JobId,
    pub data_source_id: DataSourceId,
    pub status: IngestionJobStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
}

impl IngestionJob {
    pub fn new(job_id: JobId, data_source_id: DataSourceId, status: IngestionJobStatus) -> Self {
        Self {
            job_id,
            data_source_id,
            status,
            started_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}
