//! Backend error classification.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use kbsync_types::{JobId, SyncFailure};

/// Class of a backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Another job is already active for the data source
    Conflict,
    /// Request rate exceeded
    Throttled,
    /// Knowledge base, data source or job does not exist
    NotFound,
    /// Request refused as invalid or unauthorized
    Rejected,
    /// Network failure, timeout or server-side error
    Transient,
    Unknown,
}

impl ErrorKind {
    /// Map to the controller's failure taxonomy.
    ///
    /// Returns `None` for [`ErrorKind::Conflict`], which is not a failure
    /// once the active job has been confirmed.
    pub fn as_failure(&self) -> Option<SyncFailure> {
        match self {
            ErrorKind::Conflict => None,
            ErrorKind::Throttled => Some(SyncFailure::BackendThrottled),
            ErrorKind::NotFound => Some(SyncFailure::NotFound),
            ErrorKind::Rejected => Some(SyncFailure::BackendRejected),
            ErrorKind::Transient => Some(SyncFailure::BackendTransient),
            ErrorKind::Unknown => Some(SyncFailure::UnknownFailure),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Conflict => "conflict",
            ErrorKind::Throttled => "throttled",
            ErrorKind::NotFound => "not found",
            ErrorKind::Rejected => "rejected",
            ErrorKind::Transient => "transient",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A classified backend failure.
#[derive(Debug, Clone, Error)]
#[error("Backend {kind}: {message}")]
pub struct BackendError {
    pub kind: ErrorKind,
    pub message: String,
    /// Job the backend reported as blocking a start, if it said so
    pub active_job_id: Option<JobId>,
}

impl BackendError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            active_job_id: None,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Throttled, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Rejected, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// A call that did not answer within its deadline.
    pub fn timeout(limit: Duration) -> Self {
        Self::transient(format!("call timed out after {}ms", limit.as_millis()))
    }

    pub fn with_active_job(mut self, job_id: JobId) -> Self {
        self.active_job_id = Some(job_id);
        self
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == ErrorKind::Conflict
    }
}
