//! Per data source sync state.
//!
//! A [`SyncState`] is mutated only by the controller worker that owns its data
//! source. Persisted as JSON, with timestamps in epoch milliseconds.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::KbSyncError;
use crate::ids::{DataSourceId, JobId, KnowledgeBaseId};
use crate::job::{IngestionJob, IngestionJobStatus};
use crate::request::SyncFailure;

/// Last status the controller observed for a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    #[default]
    Unknown,
    Starting,
    InProgress,
    Complete,
    Failed,
}

impl SyncStatus {
    /// Whether the cached state claims an active job.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncStatus::Starting | SyncStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Unknown => "UNKNOWN",
            SyncStatus::Starting => "STARTING",
            SyncStatus::InProgress => "IN_PROGRESS",
            SyncStatus::Complete => "COMPLETE",
            SyncStatus::Failed => "FAILED",
        }
    }
}

impl From<IngestionJobStatus> for SyncStatus {
    fn from(status: IngestionJobStatus) -> Self {
        match status {
            IngestionJobStatus::Starting => SyncStatus::Starting,
            IngestionJobStatus::InProgress => SyncStatus::InProgress,
            IngestionJobStatus::Complete => SyncStatus::Complete,
            IngestionJobStatus::Failed => SyncStatus::Failed,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controller bookkeeping for one data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub data_source_id: DataSourceId,
    pub knowledge_base_id: KnowledgeBaseId,

    /// Job most recently started or adopted for this data source
    #[serde(default)]
    pub last_job_id: Option<JobId>,

    #[serde(default)]
    pub last_status: SyncStatus,

    /// Last time a start was attempted, successful or not
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_attempt_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub consecutive_failures: u32,

    /// Periodic ticks observed since `last_attempt_at`
    #[serde(default)]
    pub ticks_since_attempt: u32,

    /// Classification of the most recent failed attempt
    #[serde(default)]
    pub last_failure: Option<SyncFailure>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl SyncState {
    /// Fresh state for a data source never seen before.
    pub fn new(data_source_id: DataSourceId, knowledge_base_id: KnowledgeBaseId) -> Self {
        Self {
            data_source_id,
            knowledge_base_id,
            last_job_id: None,
            last_status: SyncStatus::Unknown,
            last_attempt_at: None,
            consecutive_failures: 0,
            ticks_since_attempt: 0,
            last_failure: None,
            updated_at: Utc::now(),
        }
    }

    /// Whether the cached state claims an active job with a known id.
    pub fn active_job(&self) -> Option<&JobId> {
        if self.last_status.is_active() {
            self.last_job_id.as_ref()
        } else {
            None
        }
    }

    /// A start request succeeded.
    pub fn record_started(&mut self, job: &IngestionJob) {
        let now = Utc::now();
        self.last_job_id = Some(job.job_id.clone());
        self.last_status = SyncStatus::Starting;
        self.last_attempt_at = Some(now);
        self.consecutive_failures = 0;
        self.ticks_since_attempt = 0;
        self.last_failure = None;
        self.updated_at = now;
    }

    /// A start request failed.
    pub fn record_failure(&mut self, failure: SyncFailure) {
        let now = Utc::now();
        self.last_status = SyncStatus::Failed;
        self.last_attempt_at = Some(now);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.ticks_since_attempt = 0;
        self.last_failure = Some(failure);
        self.updated_at = now;
    }

    /// Refresh the cached copy of a job from the backend.
    ///
    /// A job that finished successfully clears any failure streak, since the
    /// data source is demonstrably healthy again.
    pub fn record_job(&mut self, job: &IngestionJob) {
        self.last_job_id = Some(job.job_id.clone());
        self.last_status = job.status.into();
        if job.status == IngestionJobStatus::Complete {
            self.consecutive_failures = 0;
            self.last_failure = None;
        }
        self.updated_at = Utc::now();
    }

    /// The cached job no longer exists on the backend.
    pub fn forget_job(&mut self) {
        self.last_status = SyncStatus::Unknown;
        self.updated_at = Utc::now();
    }

    /// Count one periodic tick toward the backoff window.
    pub fn record_tick(&mut self) {
        self.ticks_since_attempt = self.ticks_since_attempt.saturating_add(1);
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, KbSyncError> {
        serde_json::to_vec(self).map_err(KbSyncError::from)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KbSyncError> {
        serde_json::from_slice(bytes).map_err(KbSyncError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SyncState {
        SyncState::new(DataSourceId::from("ds-1"), KnowledgeBaseId::from("kb-1"))
    }

    fn job(status: IngestionJobStatus) -> IngestionJob {
        IngestionJob::new(JobId::from("j-1"), DataSourceId::from("ds-1"), status)
    }

    #[test]
    fn test_new_state_is_unknown() {
        let state = state();
        assert_eq!(state.last_status, SyncStatus::Unknown);
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.active_job().is_none());
    }

    #[test]
    fn test_failure_then_start_resets_streak() {
        let mut state = state();
        state.record_failure(SyncFailure::BackendThrottled);
        state.record_tick();
        state.record_failure(SyncFailure::BackendThrottled);
        assert_eq!(state.consecutive_failures, 2);
        assert_eq!(state.ticks_since_attempt, 0);
        assert_eq!(state.last_status, SyncStatus::Failed);

        state.record_started(&job(IngestionJobStatus::Starting));
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.last_failure.is_none());
        assert_eq!(state.active_job().map(|j| j.as_str()), Some("j-1"));
    }

    #[test]
    fn test_record_job_complete_clears_active() {
        let mut state = state();
        state.record_started(&job(IngestionJobStatus::Starting));
        state.record_job(&job(IngestionJobStatus::Complete));
        assert_eq!(state.last_status, SyncStatus::Complete);
        assert!(state.active_job().is_none());
    }

    #[test]
    fn test_forget_job() {
        let mut state = state();
        state.record_started(&job(IngestionJobStatus::Starting));
        state.forget_job();
        assert!(state.active_job().is_none());
        assert_eq!(state.last_job_id.as_ref().map(|j| j.as_str()), Some("j-1"));
    }

    #[test]
    fn test_state_json_format() {
        let mut state = state();
        state.record_failure(SyncFailure::NotFound);
        let json = String::from_utf8(state.to_bytes().unwrap()).unwrap();

        assert!(json.contains("\"data_source_id\":\"ds-1\""));
        assert!(json.contains("\"last_status\":\"FAILED\""));
        assert!(json.contains("\"last_failure\":\"not_found\""));
        assert!(json.contains("\"consecutive_failures\":1"));

        let decoded = SyncState::from_bytes(json.as_bytes()).unwrap();
        assert_eq!(decoded.consecutive_failures, 1);
        assert_eq!(
            decoded.last_attempt_at.map(|t| t.timestamp_millis()),
            state.last_attempt_at.map(|t| t.timestamp_millis())
        );
    }
}
