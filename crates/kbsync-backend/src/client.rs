//! Backend trait.

use async_trait::async_trait;

use kbsync_types::{DataSourceRef, IngestionJob, JobId};

use crate::BackendError;

/// Operations the controller needs from the indexing backend.
///
/// Implementations must report a second concurrent start for the same data
/// source as [`ErrorKind::Conflict`](crate::ErrorKind::Conflict), never as a
/// generic failure.
#[async_trait]
pub trait IndexingBackend: Send + Sync {
    /// Start an ingestion job for the data source.
    async fn start_job(&self, data_source: &DataSourceRef) -> Result<IngestionJob, BackendError>;

    /// Fetch the current state of a job.
    async fn get_job(
        &self,
        data_source: &DataSourceRef,
        job_id: &JobId,
    ) -> Result<IngestionJob, BackendError>;

    /// List recent jobs of the data source, newest first.
    async fn list_jobs(&self, data_source: &DataSourceRef)
        -> Result<Vec<IngestionJob>, BackendError>;

    /// Short name for logs.
    fn name(&self) -> &str;
}
