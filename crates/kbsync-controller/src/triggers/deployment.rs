//! Deployment completion notifications.
//!
//! A finished bulk deployment must be followed by exactly one sync of the
//! data source it filled. [`DeploymentCompleted`] is the only way to build a
//! `DeploymentComplete` request, and it can only be obtained from an event
//! that passed the filter and was not seen before.

use std::sync::Arc;

use tracing::{debug, info, warn};

use kbsync_storage::{DeploymentKey, DeploymentRecord, SyncStateStore};
use kbsync_types::{
    Catalog, DataSourceId, DeploymentStatusEvent, SyncReason, SyncRequest,
};

use crate::controller::ControllerHandle;
use crate::error::ControllerError;

/// Proof that a deployment into a data source finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentCompleted {
    data_source_id: DataSourceId,
    logical_resource_id: String,
    event_id: String,
}

impl DeploymentCompleted {
    pub fn data_source_id(&self) -> &DataSourceId {
        &self.data_source_id
    }

    pub fn logical_resource_id(&self) -> &str {
        &self.logical_resource_id
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// Ledger key of this deployment.
    pub fn key(&self) -> DeploymentKey {
        DeploymentKey::new(self.logical_resource_id.clone(), self.event_id.clone())
    }

    /// The sync that follows this deployment.
    pub fn into_request(self) -> SyncRequest {
        SyncRequest::new(self.data_source_id, SyncReason::DeploymentComplete)
    }
}

/// Filters deployment status events and emits one request per deployment.
#[derive(Clone)]
pub struct DeploymentListener {
    catalog: Arc<Catalog>,
    store: Arc<dyn SyncStateStore>,
    controller: ControllerHandle,
    resource_type: String,
}

impl DeploymentListener {
    pub fn new(
        catalog: Arc<Catalog>,
        store: Arc<dyn SyncStateStore>,
        controller: ControllerHandle,
        resource_type: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            store,
            controller,
            resource_type: resource_type.into(),
        }
    }

    /// Check the filter without touching the ledger.
    fn matching(&self, event: &DeploymentStatusEvent) -> Option<DataSourceId> {
        if event.resource_type != self.resource_type {
            debug!(resource_type = %event.resource_type, "Ignoring non-deployment resource");
            return None;
        }
        if !event.is_complete() {
            debug!(
                resource = %event.logical_resource_id,
                status = %event.resource_status,
                "Deployment not complete yet"
            );
            return None;
        }
        match self.catalog.data_source_for_deployment(&event.logical_resource_id) {
            Some(ds) => Some(ds.id.clone()),
            None => {
                debug!(resource = %event.logical_resource_id, "Deployment not mapped to a data source");
                None
            }
        }
    }

    /// Filter the event and claim it in the deployment ledger.
    ///
    /// Returns `None` for filtered events and for repeated deliveries of a
    /// deployment already claimed. A claim whose request is never handled
    /// must be given back with [`release`](Self::release).
    pub fn route(
        &self,
        event: &DeploymentStatusEvent,
    ) -> Result<Option<DeploymentCompleted>, ControllerError> {
        let Some(completed) = self.pending(event)? else {
            return Ok(None);
        };
        if !self.claim(&completed)? {
            debug!(
                resource = %event.logical_resource_id,
                event_id = %event.event_id,
                "Duplicate deployment delivery dropped"
            );
            return Ok(None);
        }
        Ok(Some(completed))
    }

    /// Filter the event and check the ledger without claiming it.
    ///
    /// Callers that use this claim with [`claim`](Self::claim) once the
    /// request was handled.
    pub fn pending(
        &self,
        event: &DeploymentStatusEvent,
    ) -> Result<Option<DeploymentCompleted>, ControllerError> {
        let Some(data_source_id) = self.matching(event) else {
            return Ok(None);
        };
        let completed = DeploymentCompleted {
            data_source_id,
            logical_resource_id: event.logical_resource_id.clone(),
            event_id: event.event_id.clone(),
        };
        if self.store.has_deployment(&completed.key())? {
            debug!(
                resource = %event.logical_resource_id,
                event_id = %event.event_id,
                "Deployment already synced"
            );
            return Ok(None);
        }

        info!(
            data_source = %completed.data_source_id,
            resource = %event.logical_resource_id,
            status = %event.resource_status,
            "Deployment completed"
        );
        Ok(Some(completed))
    }

    /// Record the deployment in the ledger. Returns `false` if another
    /// delivery claimed it first.
    pub fn claim(&self, completed: &DeploymentCompleted) -> Result<bool, ControllerError> {
        let record = DeploymentRecord::new(
            completed.logical_resource_id.clone(),
            completed.event_id.clone(),
            completed.data_source_id.clone(),
        );
        Ok(self.store.record_deployment(&record)?)
    }

    /// Give back a claim so the next delivery of the deployment syncs.
    pub fn release(&self, completed: &DeploymentCompleted) -> Result<(), ControllerError> {
        self.store.release_deployment(&completed.key())?;
        Ok(())
    }

    /// Route and enqueue. Returns the data source synced, if any.
    ///
    /// The claim is released when the controller refuses the request.
    pub fn on_deployment_status(
        &self,
        event: &DeploymentStatusEvent,
    ) -> Result<Option<DataSourceId>, ControllerError> {
        let Some(completed) = self.route(event)? else {
            return Ok(None);
        };
        let ds = completed.data_source_id().clone();
        if let Err(e) = self.controller.submit(completed.clone().into_request()) {
            warn!(data_source = %ds, error = %e, "Deployment sync not queued, releasing claim");
            self.release(&completed)?;
            return Err(e);
        }
        Ok(Some(ds))
    }
}
