//! In-memory indexing backend.
//!
//! Enforces the same one-active-job-per-data-source rule as the real service
//! and lets tests script failures, latency and job completion.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use kbsync_types::{DataSourceId, DataSourceRef, IngestionJob, IngestionJobStatus, JobId};

use crate::{BackendError, IndexingBackend};

#[derive(Default)]
struct MockState {
    next_job: u64,
    jobs: HashMap<DataSourceId, Vec<IngestionJob>>,
    missing: HashSet<DataSourceId>,
    start_script: HashMap<DataSourceId, VecDeque<BackendError>>,
    get_script: HashMap<DataSourceId, VecDeque<BackendError>>,
    latency: HashMap<DataSourceId, Duration>,
    hide_conflict_job: bool,
    start_calls: HashMap<DataSourceId, usize>,
    get_calls: HashMap<DataSourceId, usize>,
    list_calls: HashMap<DataSourceId, usize>,
}

impl MockState {
    fn allocate_job(&mut self, data_source_id: &DataSourceId) -> IngestionJob {
        self.next_job += 1;
        let job = IngestionJob::new(
            JobId::new(format!("j-{}", self.next_job)),
            data_source_id.clone(),
            IngestionJobStatus::Starting,
        );
        self.jobs
            .entry(data_source_id.clone())
            .or_default()
            .push(job.clone());
        job
    }

    fn active_job(&self, data_source_id: &DataSourceId) -> Option<&IngestionJob> {
        self.jobs
            .get(data_source_id)
            .and_then(|jobs| jobs.iter().rev().find(|j| j.is_active()))
    }

    fn active_job_mut(&mut self, data_source_id: &DataSourceId) -> Option<&mut IngestionJob> {
        self.jobs
            .get_mut(data_source_id)
            .and_then(|jobs| jobs.iter_mut().rev().find(|j| j.is_active()))
    }
}

/// Mock backend for tests and `backend.kind = "mock"` dry runs.
#[derive(Default)]
pub struct MockIndexingBackend {
    state: Mutex<MockState>,
}

impl MockIndexingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue an error for the next start of `data_source_id`.
    pub fn fail_next_start(&self, data_source_id: &DataSourceId, error: BackendError) {
        self.lock()
            .start_script
            .entry(data_source_id.clone())
            .or_default()
            .push_back(error);
    }

    /// Queue an error for the next status lookup on `data_source_id`.
    pub fn fail_next_get(&self, data_source_id: &DataSourceId, error: BackendError) {
        self.lock()
            .get_script
            .entry(data_source_id.clone())
            .or_default()
            .push_back(error);
    }

    /// Delay every call for `data_source_id`.
    pub fn set_latency(&self, data_source_id: &DataSourceId, latency: Duration) {
        self.lock().latency.insert(data_source_id.clone(), latency);
    }

    /// Make every call for `data_source_id` answer NotFound.
    pub fn remove_data_source(&self, data_source_id: &DataSourceId) {
        self.lock().missing.insert(data_source_id.clone());
    }

    /// Omit the blocking job id from conflict errors.
    pub fn hide_conflict_job_id(&self, hide: bool) {
        self.lock().hide_conflict_job = hide;
    }

    /// Start a job as some other client would, bypassing the call counters.
    pub fn start_external_job(&self, data_source_id: &DataSourceId) -> IngestionJob {
        let mut state = self.lock();
        let job = state.allocate_job(data_source_id);
        if let Some(stored) = state.active_job_mut(data_source_id) {
            stored.status = IngestionJobStatus::InProgress;
        }
        IngestionJob {
            status: IngestionJobStatus::InProgress,
            ..job
        }
    }

    /// Finish the active job of `data_source_id` with `status`.
    pub fn finish_active_job(
        &self,
        data_source_id: &DataSourceId,
        status: IngestionJobStatus,
    ) -> Option<JobId> {
        let mut state = self.lock();
        let job = state.active_job_mut(data_source_id)?;
        job.status = status;
        Some(job.job_id.clone())
    }

    /// Finish the active job of `data_source_id` successfully.
    pub fn complete_active_job(&self, data_source_id: &DataSourceId) -> Option<JobId> {
        self.finish_active_job(data_source_id, IngestionJobStatus::Complete)
    }

    /// Drop a job from the backend's history.
    pub fn purge_job(&self, data_source_id: &DataSourceId, job_id: &JobId) {
        if let Some(jobs) = self.lock().jobs.get_mut(data_source_id) {
            jobs.retain(|j| &j.job_id != job_id);
        }
    }

    /// Every job ever created for `data_source_id`, oldest first.
    pub fn jobs(&self, data_source_id: &DataSourceId) -> Vec<IngestionJob> {
        self.lock()
            .jobs
            .get(data_source_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn active_job(&self, data_source_id: &DataSourceId) -> Option<IngestionJob> {
        self.lock().active_job(data_source_id).cloned()
    }

    pub fn start_calls(&self, data_source_id: &DataSourceId) -> usize {
        self.lock()
            .start_calls
            .get(data_source_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_start_calls(&self) -> usize {
        self.lock().start_calls.values().sum()
    }

    pub fn get_calls(&self, data_source_id: &DataSourceId) -> usize {
        self.lock().get_calls.get(data_source_id).copied().unwrap_or(0)
    }

    pub fn list_calls(&self, data_source_id: &DataSourceId) -> usize {
        self.lock().list_calls.get(data_source_id).copied().unwrap_or(0)
    }

    async fn simulate_latency(&self, data_source_id: &DataSourceId) {
        let latency = self.lock().latency.get(data_source_id).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl IndexingBackend for MockIndexingBackend {
    async fn start_job(&self, data_source: &DataSourceRef) -> Result<IngestionJob, BackendError> {
        let ds = &data_source.data_source_id;
        *self.lock().start_calls.entry(ds.clone()).or_default() += 1;
        self.simulate_latency(ds).await;

        let mut state = self.lock();
        if state.missing.contains(ds) {
            return Err(BackendError::not_found(format!("data source {} not found", ds)));
        }
        if let Some(err) = state.start_script.get_mut(ds).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        if let Some(active) = state.active_job(ds) {
            let err = BackendError::conflict(format!(
                "data source {} already has an ingestion job in progress",
                ds
            ));
            return Err(if state.hide_conflict_job {
                err
            } else {
                err.with_active_job(active.job_id.clone())
            });
        }

        let job = state.allocate_job(ds);
        debug!(data_source = %data_source, job_id = %job.job_id, "Mock job started");
        Ok(job)
    }

    async fn get_job(
        &self,
        data_source: &DataSourceRef,
        job_id: &JobId,
    ) -> Result<IngestionJob, BackendError> {
        let ds = &data_source.data_source_id;
        *self.lock().get_calls.entry(ds.clone()).or_default() += 1;
        self.simulate_latency(ds).await;

        let mut state = self.lock();
        if let Some(err) = state.get_script.get_mut(ds).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        if state.missing.contains(ds) {
            return Err(BackendError::not_found(format!("data source {} not found", ds)));
        }
        state
            .jobs
            .get(ds)
            .and_then(|jobs| jobs.iter().find(|j| &j.job_id == job_id))
            .cloned()
            .ok_or_else(|| BackendError::not_found(format!("job {} not found", job_id)))
    }

    async fn list_jobs(
        &self,
        data_source: &DataSourceRef,
    ) -> Result<Vec<IngestionJob>, BackendError> {
        let ds = &data_source.data_source_id;
        *self.lock().list_calls.entry(ds.clone()).or_default() += 1;
        self.simulate_latency(ds).await;

        let state = self.lock();
        if state.missing.contains(ds) {
            return Err(BackendError::not_found(format!("data source {} not found", ds)));
        }
        let mut jobs = state.jobs.get(ds).cloned().unwrap_or_default();
        jobs.reverse();
        Ok(jobs)
    }

    fn name(&self) -> &str {
        "mock"
    }
}
