//! Client for the kb-sync daemon's gRPC interface.

use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

use kbsync_service::pb::{
    kb_sync_service_client::KbSyncServiceClient, DataSourceStatus, GetSyncStatusRequest,
    GetTickerStatusRequest, NotifyDeploymentStatusRequest, NotifyObjectChangeRequest,
    PauseTickerRequest, ResumeTickerRequest, SyncResult, TickRequest, TickerStatusProto,
    TriggerImmediateSyncRequest,
};
use kbsync_types::{DeploymentStatusEvent, KnowledgeBaseId};

use crate::error::ClientError;

/// Default endpoint for the kb-sync daemon.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:50061";

/// Result of trigger_immediate_sync.
#[derive(Debug)]
pub struct ImmediateSyncResult {
    /// False if any data source failed to start syncing
    pub success: bool,
    pub results: Vec<SyncResult>,
}

/// Result of get_ticker_status.
#[derive(Debug)]
pub struct TickerStatusResult {
    pub scheduler_running: bool,
    pub tickers: Vec<TickerStatusProto>,
}

pub struct KbSyncClient {
    inner: KbSyncServiceClient<Channel>,
}

impl KbSyncClient {
    /// Connect to the daemon once.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidEndpoint` for a malformed URL and
    /// `ClientError::Connection` if the daemon is unreachable.
    pub async fn connect(endpoint: &str) -> Result<Self, ClientError> {
        info!("Connecting to kb-sync daemon at {}", endpoint);
        let channel = Self::endpoint(endpoint)?.connect().await?;
        Ok(Self {
            inner: KbSyncServiceClient::new(channel),
        })
    }

    /// Connect, retrying with exponential backoff until `max_elapsed`.
    ///
    /// Useful right after spawning the daemon, before it has bound its port.
    pub async fn connect_with_retry(
        endpoint: &str,
        max_elapsed: Duration,
    ) -> Result<Self, ClientError> {
        let target = Self::endpoint(endpoint)?;
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
            max_elapsed_time: Some(max_elapsed),
            ..Default::default()
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            match target.connect().await {
                Ok(channel) => {
                    debug!(attempts, "Connected to kb-sync daemon");
                    return Ok(Self {
                        inner: KbSyncServiceClient::new(channel),
                    });
                }
                Err(e) => match backoff.next_backoff() {
                    Some(delay) => {
                        debug!(
                            error = %e,
                            retry_in_ms = delay.as_millis(),
                            "Daemon not reachable yet"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        warn!(error = %e, attempts, "Giving up connecting to daemon");
                        return Err(ClientError::Connection(e));
                    }
                },
            }
        }
    }

    pub async fn connect_default() -> Result<Self, ClientError> {
        Self::connect(DEFAULT_ENDPOINT).await
    }

    fn endpoint(endpoint: &str) -> Result<Endpoint, ClientError> {
        Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| ClientError::InvalidEndpoint(format!("{}: {}", endpoint, e)))
    }

    /// Report an object change. Returns the data source it was routed to.
    pub async fn notify_object_change(
        &mut self,
        bucket: &str,
        key: Option<&str>,
    ) -> Result<Option<String>, ClientError> {
        debug!(bucket, "NotifyObjectChange request");
        let request = tonic::Request::new(NotifyObjectChangeRequest {
            bucket: bucket.to_string(),
            key: key.map(str::to_string),
        });
        let resp = self.inner.notify_object_change(request).await?.into_inner();
        Ok(resp.data_source_id.filter(|_| resp.routed))
    }

    /// Report a deployment status change. Returns the data source synced, if
    /// the event passed the filter and was not a repeat delivery.
    pub async fn notify_deployment_status(
        &mut self,
        event: &DeploymentStatusEvent,
    ) -> Result<Option<String>, ClientError> {
        debug!(resource = %event.logical_resource_id, "NotifyDeploymentStatus request");
        let request = tonic::Request::new(NotifyDeploymentStatusRequest {
            resource_type: event.resource_type.clone(),
            resource_status: event.resource_status.clone(),
            logical_resource_id: event.logical_resource_id.clone(),
            event_id: event.event_id.clone(),
        });
        let resp = self.inner.notify_deployment_status(request).await?.into_inner();
        Ok(resp.data_source_id.filter(|_| resp.emitted))
    }

    /// Tick the given knowledge bases. Returns the number of requests queued.
    pub async fn tick(&mut self, knowledge_base_ids: &[KnowledgeBaseId]) -> Result<u32, ClientError> {
        let request = tonic::Request::new(TickRequest {
            knowledge_base_ids: ids(knowledge_base_ids),
        });
        let resp = self.inner.tick(request).await?.into_inner();
        Ok(resp.requests_emitted)
    }

    /// A returned `Ok` can still carry failed data sources; check
    /// [`ImmediateSyncResult::success`].
    pub async fn trigger_immediate_sync(
        &mut self,
        knowledge_base_ids: &[KnowledgeBaseId],
    ) -> Result<ImmediateSyncResult, ClientError> {
        debug!(count = knowledge_base_ids.len(), "TriggerImmediateSync request");
        let request = tonic::Request::new(TriggerImmediateSyncRequest {
            knowledge_base_ids: ids(knowledge_base_ids),
        });
        let resp = self.inner.trigger_immediate_sync(request).await?.into_inner();
        Ok(ImmediateSyncResult {
            success: resp.success,
            results: resp.results,
        })
    }

    pub async fn get_sync_status(
        &mut self,
        knowledge_base_id: Option<&str>,
    ) -> Result<Vec<DataSourceStatus>, ClientError> {
        let request = tonic::Request::new(GetSyncStatusRequest {
            knowledge_base_id: knowledge_base_id.map(str::to_string),
        });
        let resp = self.inner.get_sync_status(request).await?.into_inner();
        Ok(resp.data_sources)
    }

    pub async fn get_ticker_status(&mut self) -> Result<TickerStatusResult, ClientError> {
        let request = tonic::Request::new(GetTickerStatusRequest {});
        let resp = self.inner.get_ticker_status(request).await?.into_inner();
        Ok(TickerStatusResult {
            scheduler_running: resp.scheduler_running,
            tickers: resp.tickers,
        })
    }

    pub async fn pause_ticker(&mut self, name: &str) -> Result<(), ClientError> {
        let request = tonic::Request::new(PauseTickerRequest {
            ticker_name: name.to_string(),
        });
        let resp = self.inner.pause_ticker(request).await?.into_inner();
        rejected_unless(resp.success, resp.error)
    }

    pub async fn resume_ticker(&mut self, name: &str) -> Result<(), ClientError> {
        let request = tonic::Request::new(ResumeTickerRequest {
            ticker_name: name.to_string(),
        });
        let resp = self.inner.resume_ticker(request).await?.into_inner();
        rejected_unless(resp.success, resp.error)
    }
}

fn ids(knowledge_base_ids: &[KnowledgeBaseId]) -> Vec<String> {
    knowledge_base_ids.iter().map(ToString::to_string).collect()
}

fn rejected_unless(success: bool, error: Option<String>) -> Result<(), ClientError> {
    if success {
        Ok(())
    } else {
        Err(ClientError::Rejected(
            error.unwrap_or_else(|| "unknown error".to_string()),
        ))
    }
}
