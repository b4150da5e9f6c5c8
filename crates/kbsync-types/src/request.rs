//! Sync requests and their outcomes.
//!
//! Every trigger source normalizes to a [`SyncRequest`]. The controller
//! answers each one with exactly one [`SyncOutcome`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{DataSourceId, JobId};

/// Why a sync was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncReason {
    /// Object created or updated in the data source's storage location.
    DataChange,
    /// Bulk content deployment into the data source finished.
    DeploymentComplete,
    /// Periodic safety-net tick; also drives retries.
    PeriodicTick,
    /// Synchronous immediate sync after initial deployment.
    ManualInvoke,
}

impl SyncReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncReason::DataChange => "data_change",
            SyncReason::DeploymentComplete => "deployment_complete",
            SyncReason::PeriodicTick => "periodic_tick",
            SyncReason::ManualInvoke => "manual_invoke",
        }
    }
}

impl fmt::Display for SyncReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to (re)index one data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub data_source_id: DataSourceId,
    pub reason: SyncReason,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub received_at: DateTime<Utc>,
}

impl SyncRequest {
    pub fn new(data_source_id: DataSourceId, reason: SyncReason) -> Self {
        Self {
            data_source_id,
            reason,
            received_at: Utc::now(),
        }
    }
}

/// Why a request did not start a job, without being a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SkipReason {
    /// A job is already active for the data source.
    AlreadyInProgress,
    /// Periodic retry is still inside the backoff window.
    BackoffPending { remaining_ticks: u32 },
    /// The last failure needs operator attention; ticks do not retry it.
    NotRetryable,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyInProgress => write!(f, "already in progress"),
            SkipReason::BackoffPending { remaining_ticks } => {
                write!(f, "backoff pending ({} ticks remaining)", remaining_ticks)
            }
            SkipReason::NotRetryable => write!(f, "last failure is not retryable"),
        }
    }
}

/// Failure classes surfaced by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncFailure {
    BackendThrottled,
    BackendTransient,
    BackendRejected,
    NotFound,
    UnknownFailure,
    /// The request named a data source missing from the catalog.
    UnknownDataSource,
}

impl SyncFailure {
    /// Whether the periodic ticker may retry this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncFailure::BackendThrottled | SyncFailure::BackendTransient | SyncFailure::UnknownFailure
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncFailure::BackendThrottled => "backend_throttled",
            SyncFailure::BackendTransient => "backend_transient",
            SyncFailure::BackendRejected => "backend_rejected",
            SyncFailure::NotFound => "not_found",
            SyncFailure::UnknownFailure => "unknown_failure",
            SyncFailure::UnknownDataSource => "unknown_data_source",
        }
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of handling one [`SyncRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum SyncOutcome {
    Started { job_id: JobId },
    Skipped { reason: SkipReason },
    Failed { failure: SyncFailure },
}

impl SyncOutcome {
    pub fn started(job_id: JobId) -> Self {
        SyncOutcome::Started { job_id }
    }

    pub fn skipped(reason: SkipReason) -> Self {
        SyncOutcome::Skipped { reason }
    }

    pub fn failed(failure: SyncFailure) -> Self {
        SyncOutcome::Failed { failure }
    }

    /// Started or skipped: the request was accepted by the controller.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, SyncOutcome::Failed { .. })
    }

    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            SyncOutcome::Started { job_id } => Some(job_id),
            _ => None,
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Started { job_id } => write!(f, "started ({})", job_id),
            SyncOutcome::Skipped { reason } => write!(f, "skipped: {}", reason),
            SyncOutcome::Failed { failure } => write!(f, "failed: {}", failure),
        }
    }
}
