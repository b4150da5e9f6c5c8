//! Object change notifications.

use std::sync::Arc;

use tracing::debug;

use kbsync_types::{Catalog, DataSourceId, ObjectChangeEvent, SyncReason, SyncRequest};

use crate::controller::ControllerHandle;
use crate::error::ControllerError;

/// Maps bucket notifications to `DataChange` requests.
#[derive(Clone)]
pub struct ChangeListener {
    catalog: Arc<Catalog>,
    controller: ControllerHandle,
}

impl ChangeListener {
    pub fn new(catalog: Arc<Catalog>, controller: ControllerHandle) -> Self {
        Self {
            catalog,
            controller,
        }
    }

    /// Request for the data source fed by the event's bucket, if any.
    pub fn route(&self, event: &ObjectChangeEvent) -> Option<SyncRequest> {
        match self.catalog.data_source_for_bucket(&event.bucket) {
            Some(ds) => Some(SyncRequest::new(ds.id.clone(), SyncReason::DataChange)),
            None => {
                debug!(bucket = %event.bucket, key = ?event.key, "Change in unmapped bucket ignored");
                None
            }
        }
    }

    /// Enqueue a `DataChange` request. Returns `None` when the bucket is
    /// not routed to any data source.
    pub fn on_object_change(
        &self,
        event: &ObjectChangeEvent,
    ) -> Result<Option<DataSourceId>, ControllerError> {
        let Some(request) = self.route(event) else {
            return Ok(None);
        };
        let ds = request.data_source_id.clone();
        self.controller.submit(request)?;
        Ok(Some(ds))
    }
}
