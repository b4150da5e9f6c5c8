//! Single-event mode.
//!
//! Runs one inbound event through a freshly started controller and waits for
//! every resulting request to be accepted. Used when the controller runs as a
//! short-lived invocation per event instead of a daemon; the durable store
//! carries state and the deployment ledger between invocations.
//!
//! A deployment is recorded in the ledger only after its request was
//! handled. An invocation that dies in between leaves no marker, and the
//! redelivered event syncs again.

use futures::future::join_all;
use tracing::debug;

use kbsync_controller::{
    ChangeListener, ControllerError, DeploymentListener, ImmediateSyncInvoker, PeriodicTicker,
    SummaryEntry, SyncController, SyncSummary,
};
use kbsync_types::{InboundEvent, SyncRequest};

/// Route `event`, handle every request it produces, and collect outcomes.
///
/// A filtered event yields an empty summary. Per data source failures are
/// reported in the summary, not as an error.
pub async fn process_event(
    event: &InboundEvent,
    controller: &SyncController,
    resource_type: &str,
) -> Result<SyncSummary, ControllerError> {
    let catalog = controller.catalog();
    let handle = controller.handle();
    let mut deployment = None;

    let requests: Vec<SyncRequest> = match event {
        InboundEvent::ObjectChange(change) => ChangeListener::new(catalog.clone(), handle.clone())
            .route(change)
            .into_iter()
            .collect(),
        InboundEvent::DeploymentStatus(status) => {
            let listener = DeploymentListener::new(
                catalog.clone(),
                controller.store(),
                handle.clone(),
                resource_type,
            );
            match listener.pending(status)? {
                Some(completed) => {
                    let request = completed.clone().into_request();
                    deployment = Some((listener, completed));
                    vec![request]
                }
                None => Vec::new(),
            }
        }
        InboundEvent::Schedule(schedule) => {
            let ticker = PeriodicTicker::new(catalog.clone(), handle.clone());
            let mut requests = Vec::new();
            for kb in &schedule.knowledge_base_ids {
                requests.extend(ticker.requests_for(kb)?);
            }
            requests
        }
        InboundEvent::ImmediateSync { knowledge_base_ids } => {
            let invoker =
                ImmediateSyncInvoker::new(catalog, handle, controller.config().accept_timeout);
            return match invoker.invoke(knowledge_base_ids).await {
                Ok(summary) | Err(ControllerError::SyncFailed(summary)) => Ok(summary),
                Err(e) => Err(e),
            };
        }
    };

    let outcomes = join_all(requests.iter().map(|r| handle.handle(r.clone()))).await;

    let mut entries = Vec::with_capacity(requests.len());
    for (request, outcome) in requests.into_iter().zip(outcomes) {
        let data_source = catalog.data_source(&request.data_source_id).ok_or_else(|| {
            ControllerError::InvalidRequest(format!(
                "data source {} not in catalog",
                request.data_source_id
            ))
        })?;
        entries.push(SummaryEntry {
            knowledge_base_id: data_source.knowledge_base_id.clone(),
            data_source_id: request.data_source_id,
            outcome: outcome?,
        });
    }

    if let Some((listener, completed)) = deployment {
        if !listener.claim(&completed)? {
            debug!(event_id = %completed.event_id(), "Deployment claimed by a concurrent delivery");
        }
    }
    Ok(SyncSummary { entries })
}
