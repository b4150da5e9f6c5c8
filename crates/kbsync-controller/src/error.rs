//! Controller error types.

use std::time::Duration;

use thiserror::Error;

use kbsync_scheduler::SchedulerError;
use kbsync_storage::StorageError;
use kbsync_types::{KbSyncError, KnowledgeBaseId};

use crate::invoker::SyncSummary;

#[derive(Debug, Error)]
pub enum ControllerError {
    /// The controller has shut down and accepts no more requests
    #[error("Controller is closed")]
    Closed,

    #[error("Unknown knowledge base: {0}")]
    UnknownKnowledgeBase(KnowledgeBaseId),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The caller stopped waiting; queued requests still run
    #[error("Timed out after {0:?} waiting for acceptance")]
    AcceptTimeout(Duration),

    /// At least one data source failed to start syncing
    #[error("Sync failed for {failed} of {total} data sources", failed = .0.failed_count(), total = .0.entries.len())]
    SyncFailed(SyncSummary),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Types(#[from] KbSyncError),
}
