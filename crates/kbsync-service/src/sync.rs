//! KbSyncService RPC implementation.
//!
//! Inbound notifications are routed through the trigger adapters and queued
//! on the controller; only TriggerImmediateSync waits for outcomes.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{debug, info};

use kbsync_controller::{
    sync_status, ChangeListener, ControllerError, DeploymentListener, ImmediateSyncInvoker,
    PeriodicTicker, SyncController,
};
use kbsync_scheduler::SchedulerService;
use kbsync_storage::SyncStateStore;
use kbsync_types::{
    Catalog, DeploymentStatusEvent, KnowledgeBaseId, ObjectChangeEvent, ScheduleEvent,
};

use crate::convert::{controller_status, data_source_status, knowledge_base_ids, sync_result};
use crate::pb::{
    kb_sync_service_server::KbSyncService, GetSyncStatusRequest, GetSyncStatusResponse,
    GetTickerStatusRequest, GetTickerStatusResponse, NotifyDeploymentStatusRequest,
    NotifyDeploymentStatusResponse, NotifyObjectChangeRequest, NotifyObjectChangeResponse,
    PauseTickerRequest, PauseTickerResponse, ResumeTickerRequest, ResumeTickerResponse,
    TickRequest, TickResponse, TriggerImmediateSyncRequest, TriggerImmediateSyncResponse,
};
use crate::scheduler_service::SchedulerGrpcService;

pub struct KbSyncServiceImpl {
    catalog: Arc<Catalog>,
    store: Arc<dyn SyncStateStore>,
    changes: ChangeListener,
    deployments: DeploymentListener,
    ticker: PeriodicTicker,
    invoker: ImmediateSyncInvoker,
    scheduler_service: Option<SchedulerGrpcService>,
}

impl KbSyncServiceImpl {
    /// Create a service over a running controller.
    ///
    /// `resource_type` is the deployment resource type whose completions
    /// trigger a sync.
    pub fn new(controller: &SyncController, resource_type: &str) -> Self {
        let catalog = controller.catalog();
        let store = controller.store();
        let handle = controller.handle();
        Self {
            changes: ChangeListener::new(catalog.clone(), handle.clone()),
            deployments: DeploymentListener::new(
                catalog.clone(),
                store.clone(),
                handle.clone(),
                resource_type,
            ),
            ticker: PeriodicTicker::new(catalog.clone(), handle.clone()),
            invoker: ImmediateSyncInvoker::new(
                catalog.clone(),
                handle,
                controller.config().accept_timeout,
            ),
            catalog,
            store,
            scheduler_service: None,
        }
    }

    /// Create a service whose ticker RPCs control `scheduler`.
    pub fn with_scheduler(
        controller: &SyncController,
        resource_type: &str,
        scheduler: Arc<SchedulerService>,
    ) -> Self {
        Self {
            scheduler_service: Some(SchedulerGrpcService::new(scheduler)),
            ..Self::new(controller, resource_type)
        }
    }

    fn scheduler(&self) -> Result<&SchedulerGrpcService, Status> {
        self.scheduler_service
            .as_ref()
            .ok_or_else(|| Status::unavailable("Scheduler not enabled"))
    }
}

#[tonic::async_trait]
impl KbSyncService for KbSyncServiceImpl {
    async fn notify_object_change(
        &self,
        request: Request<NotifyObjectChangeRequest>,
    ) -> Result<Response<NotifyObjectChangeResponse>, Status> {
        let req = request.into_inner();
        if req.bucket.is_empty() {
            return Err(Status::invalid_argument("bucket is required"));
        }

        let event = ObjectChangeEvent {
            bucket: req.bucket,
            key: req.key,
        };
        let routed = self
            .changes
            .on_object_change(&event)
            .map_err(controller_status)?;

        Ok(Response::new(NotifyObjectChangeResponse {
            routed: routed.is_some(),
            data_source_id: routed.map(|ds| ds.to_string()),
        }))
    }

    async fn notify_deployment_status(
        &self,
        request: Request<NotifyDeploymentStatusRequest>,
    ) -> Result<Response<NotifyDeploymentStatusResponse>, Status> {
        let req = request.into_inner();
        if req.logical_resource_id.is_empty() {
            return Err(Status::invalid_argument("logical_resource_id is required"));
        }
        if req.event_id.is_empty() {
            return Err(Status::invalid_argument("event_id is required"));
        }

        let event = DeploymentStatusEvent {
            resource_type: req.resource_type,
            resource_status: req.resource_status,
            logical_resource_id: req.logical_resource_id,
            event_id: req.event_id,
        };
        let emitted = self
            .deployments
            .on_deployment_status(&event)
            .map_err(controller_status)?;

        Ok(Response::new(NotifyDeploymentStatusResponse {
            emitted: emitted.is_some(),
            data_source_id: emitted.map(|ds| ds.to_string()),
        }))
    }

    async fn tick(&self, request: Request<TickRequest>) -> Result<Response<TickResponse>, Status> {
        let event = ScheduleEvent {
            knowledge_base_ids: knowledge_base_ids(&request.get_ref().knowledge_base_ids)?,
        };
        let emitted = self.ticker.on_schedule(&event).map_err(controller_status)?;
        debug!(requests = emitted, "Tick received");

        Ok(Response::new(TickResponse {
            requests_emitted: emitted as u32,
        }))
    }

    /// Waits for every data source to be accepted. Per data source failures
    /// are reported in the response rather than as an error status.
    async fn trigger_immediate_sync(
        &self,
        request: Request<TriggerImmediateSyncRequest>,
    ) -> Result<Response<TriggerImmediateSyncResponse>, Status> {
        let ids = knowledge_base_ids(&request.get_ref().knowledge_base_ids)?;

        let summary = match self.invoker.invoke(&ids).await {
            Ok(summary) => summary,
            Err(ControllerError::SyncFailed(summary)) => summary,
            Err(e) => return Err(controller_status(e)),
        };
        info!(
            knowledge_bases = ids.len(),
            started = summary.started_count(),
            failed = summary.failed_count(),
            "Immediate sync handled"
        );

        Ok(Response::new(TriggerImmediateSyncResponse {
            success: summary.is_success(),
            results: summary.entries.iter().map(sync_result).collect(),
        }))
    }

    async fn get_sync_status(
        &self,
        request: Request<GetSyncStatusRequest>,
    ) -> Result<Response<GetSyncStatusResponse>, Status> {
        let filter = request
            .into_inner()
            .knowledge_base_id
            .filter(|id| !id.is_empty())
            .map(KnowledgeBaseId::from);
        if let Some(kb) = &filter {
            if self.catalog.knowledge_base(kb).is_none() {
                return Err(Status::not_found(format!("Unknown knowledge base: {}", kb)));
            }
        }

        let states =
            sync_status(&self.catalog, self.store.as_ref()).map_err(controller_status)?;
        let data_sources = states
            .iter()
            .filter(|s| filter.as_ref().map_or(true, |kb| &s.knowledge_base_id == kb))
            .map(data_source_status)
            .collect();

        Ok(Response::new(GetSyncStatusResponse { data_sources }))
    }

    async fn get_ticker_status(
        &self,
        request: Request<GetTickerStatusRequest>,
    ) -> Result<Response<GetTickerStatusResponse>, Status> {
        self.scheduler()?.get_ticker_status(request).await
    }

    async fn pause_ticker(
        &self,
        request: Request<PauseTickerRequest>,
    ) -> Result<Response<PauseTickerResponse>, Status> {
        self.scheduler()?.pause_ticker(request).await
    }

    async fn resume_ticker(
        &self,
        request: Request<ResumeTickerRequest>,
    ) -> Result<Response<ResumeTickerResponse>, Status> {
        self.scheduler()?.resume_ticker(request).await
    }
}
