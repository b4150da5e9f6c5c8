//! Immediate sync after initial content deployment.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use kbsync_types::{
    Catalog, DataSourceId, KnowledgeBaseId, SyncFailure, SyncOutcome, SyncReason, SyncRequest,
};

use crate::controller::ControllerHandle;
use crate::error::ControllerError;

/// Outcome of one data source in an immediate sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryEntry {
    pub knowledge_base_id: KnowledgeBaseId,
    pub data_source_id: DataSourceId,
    pub outcome: SyncOutcome,
}

/// Per data source outcomes of an immediate sync, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub entries: Vec<SummaryEntry>,
}

impl SyncSummary {
    pub fn started_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, SyncOutcome::Started { .. }))
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, SyncOutcome::Skipped { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.outcome.is_accepted()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed_count() == 0
    }
}

/// Synchronous one-shot sync of whole knowledge bases.
///
/// Waits for acceptance (started or already in progress), never for the
/// ingestion job itself. Calling it twice is harmless: the second call finds
/// the first call's jobs still active and reports them skipped.
#[derive(Clone)]
pub struct ImmediateSyncInvoker {
    catalog: Arc<Catalog>,
    controller: ControllerHandle,
    accept_timeout: Option<Duration>,
}

impl ImmediateSyncInvoker {
    pub fn new(
        catalog: Arc<Catalog>,
        controller: ControllerHandle,
        accept_timeout: Option<Duration>,
    ) -> Self {
        Self {
            catalog,
            controller,
            accept_timeout,
        }
    }

    /// Sync every data source of the given knowledge bases.
    ///
    /// # Errors
    ///
    /// - `UnknownKnowledgeBase` if any id is not in the catalog; nothing is
    ///   submitted in that case
    /// - `AcceptTimeout` if the configured wait elapses; submitted requests
    ///   still run
    /// - `SyncFailed` carrying the full summary if any data source failed
    pub async fn invoke(
        &self,
        knowledge_base_ids: &[KnowledgeBaseId],
    ) -> Result<SyncSummary, ControllerError> {
        if knowledge_base_ids.is_empty() {
            return Err(ControllerError::InvalidRequest(
                "no knowledge base ids given".to_string(),
            ));
        }

        let mut targets = Vec::new();
        let mut seen = BTreeSet::new();
        for kb in knowledge_base_ids {
            let sources = self
                .catalog
                .data_sources_of(kb)
                .ok_or_else(|| ControllerError::UnknownKnowledgeBase(kb.clone()))?;
            for ds in sources {
                if seen.insert(ds.id.clone()) {
                    targets.push((kb.clone(), ds.id.clone()));
                }
            }
        }

        let mut pending = Vec::with_capacity(targets.len());
        for (_, ds) in &targets {
            let request = SyncRequest::new(ds.clone(), SyncReason::ManualInvoke);
            pending.push(self.controller.submit_tracked(request)?);
        }

        let wait = join_all(pending);
        let results = match self.accept_timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| ControllerError::AcceptTimeout(limit))?,
            None => wait.await,
        };

        let entries = targets
            .into_iter()
            .zip(results)
            .map(|((kb, ds), result)| SummaryEntry {
                knowledge_base_id: kb,
                data_source_id: ds,
                // A dropped responder means the controller shut down mid-request.
                outcome: result
                    .unwrap_or_else(|_| SyncOutcome::failed(SyncFailure::BackendTransient)),
            })
            .collect();
        let summary = SyncSummary { entries };

        if summary.is_success() {
            info!(
                started = summary.started_count(),
                skipped = summary.skipped_count(),
                "Immediate sync accepted"
            );
            Ok(summary)
        } else {
            warn!(
                failed = summary.failed_count(),
                total = summary.entries.len(),
                "Immediate sync failed"
            );
            Err(ControllerError::SyncFailed(summary))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbsync_types::{JobId, SkipReason};

    fn entry(ds: &str, outcome: SyncOutcome) -> SummaryEntry {
        SummaryEntry {
            knowledge_base_id: KnowledgeBaseId::from("kb-1"),
            data_source_id: DataSourceId::from(ds),
            outcome,
        }
    }

    #[test]
    fn test_summary_counts() {
        let summary = SyncSummary {
            entries: vec![
                entry("ds-1", SyncOutcome::started(JobId::from("j-1"))),
                entry("ds-2", SyncOutcome::skipped(SkipReason::AlreadyInProgress)),
                entry("ds-3", SyncOutcome::failed(SyncFailure::BackendThrottled)),
            ],
        };
        assert_eq!(summary.started_count(), 1);
        assert_eq!(summary.skipped_count(), 1);
        assert_eq!(summary.failed_count(), 1);
        assert!(!summary.is_success());
    }

    #[test]
    fn test_summary_error_message() {
        let summary = SyncSummary {
            entries: vec![
                entry("ds-1", SyncOutcome::started(JobId::from("j-1"))),
                entry("ds-2", SyncOutcome::failed(SyncFailure::NotFound)),
            ],
        };
        let err = ControllerError::SyncFailed(summary);
        assert_eq!(err.to_string(), "Sync failed for 1 of 2 data sources");
    }
}
