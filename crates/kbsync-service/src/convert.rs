//! Conversions between domain types and protobuf messages.

use tonic::Status;
use tracing::error;

use kbsync_controller::{ControllerError, SummaryEntry};
use kbsync_types::{KnowledgeBaseId, SyncOutcome, SyncState};

use crate::pb::{DataSourceStatus, OutcomeKind, SyncResult};

/// Map a controller error to the gRPC status a caller can act on.
pub fn controller_status(err: ControllerError) -> Status {
    match err {
        ControllerError::UnknownKnowledgeBase(kb) => {
            Status::not_found(format!("Unknown knowledge base: {}", kb))
        }
        ControllerError::InvalidRequest(msg) => Status::invalid_argument(msg),
        ControllerError::Closed => Status::unavailable("Controller is shutting down"),
        ControllerError::AcceptTimeout(limit) => {
            Status::deadline_exceeded(format!("No acceptance within {:?}", limit))
        }
        ControllerError::SyncFailed(summary) => Status::failed_precondition(format!(
            "Sync failed for {} of {} data sources",
            summary.failed_count(),
            summary.entries.len()
        )),
        other => {
            error!(error = %other, "Controller error");
            Status::internal(other.to_string())
        }
    }
}

/// Parse knowledge base ids from a request, rejecting blanks.
pub fn knowledge_base_ids(ids: &[String]) -> Result<Vec<KnowledgeBaseId>, Status> {
    if ids.is_empty() {
        return Err(Status::invalid_argument("knowledge_base_ids is required"));
    }
    ids.iter()
        .map(|id| {
            let id = id.trim();
            if id.is_empty() {
                Err(Status::invalid_argument("knowledge_base_ids must not be blank"))
            } else {
                Ok(KnowledgeBaseId::from(id))
            }
        })
        .collect()
}

pub fn sync_result(entry: &SummaryEntry) -> SyncResult {
    let (outcome, job_id, detail) = match &entry.outcome {
        SyncOutcome::Started { job_id } => (OutcomeKind::Started, Some(job_id.to_string()), None),
        SyncOutcome::Skipped { reason } => (OutcomeKind::Skipped, None, Some(reason.to_string())),
        SyncOutcome::Failed { failure } => (OutcomeKind::Failed, None, Some(failure.to_string())),
    };
    SyncResult {
        knowledge_base_id: entry.knowledge_base_id.to_string(),
        data_source_id: entry.data_source_id.to_string(),
        outcome: outcome.into(),
        job_id,
        detail,
    }
}

pub fn data_source_status(state: &SyncState) -> DataSourceStatus {
    DataSourceStatus {
        data_source_id: state.data_source_id.to_string(),
        knowledge_base_id: state.knowledge_base_id.to_string(),
        last_status: state.last_status.as_str().to_string(),
        last_job_id: state.last_job_id.as_ref().map(ToString::to_string),
        last_attempt_ms: state
            .last_attempt_at
            .map(|t| t.timestamp_millis())
            .unwrap_or(0),
        consecutive_failures: state.consecutive_failures,
        ticks_since_attempt: state.ticks_since_attempt,
        last_failure: state.last_failure.map(|f| f.as_str().to_string()),
        updated_ms: state.updated_at.timestamp_millis(),
    }
}
