//! Per-request sync decision.
//!
//! [`Reconciler::handle`] is the whole decision procedure for one request
//! against one data source's state. It is only ever called by the worker
//! that owns that data source, so the state it mutates is never shared.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use kbsync_backend::{BackendError, ErrorKind, IndexingBackend};
use kbsync_storage::SyncStateStore;
use kbsync_types::{
    DataSourceRef, IngestionJob, SkipReason, SyncFailure, SyncOutcome, SyncReason, SyncRequest,
    SyncState,
};

use crate::gate::{BackoffPolicy, GateDecision};

/// Result of asking the backend about the cached active job.
enum ActiveCheck {
    StillActive,
    Cleared,
    Unconfirmed(SyncFailure),
}

pub struct Reconciler {
    backend: Arc<dyn IndexingBackend>,
    store: Arc<dyn SyncStateStore>,
    policy: BackoffPolicy,
    call_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        backend: Arc<dyn IndexingBackend>,
        store: Arc<dyn SyncStateStore>,
        policy: BackoffPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            store,
            policy,
            call_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn SyncStateStore> {
        &self.store
    }

    /// Decide and act on one request, then write the state through.
    pub async fn handle(&self, state: &mut SyncState, request: &SyncRequest) -> SyncOutcome {
        let outcome = self.decide(state, request).await;
        if let Err(e) = self.store.save(state) {
            error!(data_source = %state.data_source_id, error = %e, "Failed to persist sync state");
        }
        outcome
    }

    async fn decide(&self, state: &mut SyncState, request: &SyncRequest) -> SyncOutcome {
        let target = DataSourceRef::new(
            state.knowledge_base_id.clone(),
            state.data_source_id.clone(),
        );

        if request.reason == SyncReason::PeriodicTick {
            state.record_tick();
        }

        match self.check_active(state, &target).await {
            ActiveCheck::StillActive => {
                debug!(
                    data_source = %target,
                    reason = %request.reason,
                    job_id = ?state.last_job_id,
                    "Job already in progress, request is redundant"
                );
                return SyncOutcome::skipped(SkipReason::AlreadyInProgress);
            }
            ActiveCheck::Unconfirmed(failure) => {
                warn!(data_source = %target, failure = %failure, "Could not confirm cached job state");
                return SyncOutcome::failed(failure);
            }
            ActiveCheck::Cleared => {}
        }

        if request.reason == SyncReason::PeriodicTick {
            if let GateDecision::Skip(reason) = self.policy.check(state) {
                debug!(
                    data_source = %target,
                    failures = state.consecutive_failures,
                    ticks = state.ticks_since_attempt,
                    skip = %reason,
                    "Tick gated"
                );
                return SyncOutcome::skipped(reason);
            }
        }

        self.start(state, &target, request.reason).await
    }

    /// Refresh a cached active job from the backend before trusting it.
    async fn check_active(&self, state: &mut SyncState, target: &DataSourceRef) -> ActiveCheck {
        let Some(job_id) = state.active_job().cloned() else {
            return ActiveCheck::Cleared;
        };

        match self.call(self.backend.get_job(target, &job_id)).await {
            Ok(job) => {
                state.record_job(&job);
                if job.is_active() {
                    ActiveCheck::StillActive
                } else {
                    debug!(data_source = %target, job_id = %job_id, status = %job.status, "Cached job finished");
                    ActiveCheck::Cleared
                }
            }
            Err(e) if e.kind == ErrorKind::NotFound => {
                debug!(data_source = %target, job_id = %job_id, "Cached job no longer exists");
                state.forget_job();
                ActiveCheck::Cleared
            }
            Err(e) => ActiveCheck::Unconfirmed(
                e.kind.as_failure().unwrap_or(SyncFailure::BackendTransient),
            ),
        }
    }

    async fn start(
        &self,
        state: &mut SyncState,
        target: &DataSourceRef,
        reason: SyncReason,
    ) -> SyncOutcome {
        match self.call(self.backend.start_job(target)).await {
            Ok(job) => {
                state.record_started(&job);
                info!(data_source = %target, job_id = %job.job_id, reason = %reason, "Ingestion job started");
                SyncOutcome::started(job.job_id)
            }
            Err(e) if e.is_conflict() => match self.confirm_conflict(target, &e).await {
                Some(job) => {
                    info!(
                        data_source = %target,
                        job_id = %job.job_id,
                        "Adopted ingestion job already running on the backend"
                    );
                    state.record_job(&job);
                    SyncOutcome::skipped(SkipReason::AlreadyInProgress)
                }
                None => {
                    warn!(data_source = %target, error = %e, "Backend conflict could not be confirmed");
                    self.fail(state, target, SyncFailure::BackendTransient, &e)
                }
            },
            Err(e) => {
                let failure = e.kind.as_failure().unwrap_or(SyncFailure::UnknownFailure);
                self.fail(state, target, failure, &e)
            }
        }
    }

    /// Find the job the backend says blocks a start.
    async fn confirm_conflict(
        &self,
        target: &DataSourceRef,
        conflict: &BackendError,
    ) -> Option<IngestionJob> {
        if let Some(job_id) = &conflict.active_job_id {
            if let Ok(job) = self.call(self.backend.get_job(target, job_id)).await {
                if job.is_active() {
                    return Some(job);
                }
            }
        }

        match self.call(self.backend.list_jobs(target)).await {
            Ok(jobs) => jobs.into_iter().find(IngestionJob::is_active),
            Err(e) => {
                debug!(data_source = %target, error = %e, "Listing jobs failed during conflict check");
                None
            }
        }
    }

    fn fail(
        &self,
        state: &mut SyncState,
        target: &DataSourceRef,
        failure: SyncFailure,
        cause: &BackendError,
    ) -> SyncOutcome {
        state.record_failure(failure);
        if failure.is_retryable() {
            warn!(
                data_source = %target,
                failure = %failure,
                failures = state.consecutive_failures,
                retry_after_ticks = self.policy.required_ticks(state.consecutive_failures),
                error = %cause,
                "Start ingestion failed"
            );
        } else {
            error!(
                data_source = %target,
                failure = %failure,
                error = %cause,
                "Start ingestion rejected, check knowledge base configuration"
            );
        }
        SyncOutcome::failed(failure)
    }

    async fn call<T, F>(&self, fut: F) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::timeout(self.call_timeout)),
        }
    }
}
