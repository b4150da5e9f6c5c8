//! Intake queue, dispatcher and per data source workers.
//!
//! Every request enters one unbounded intake queue. The dispatcher routes it
//! to the worker owning its data source, spawning the worker on first use.
//! Workers process their own queue strictly in order, so decisions for one
//! data source are serialized while different data sources proceed in
//! parallel. The dispatcher never waits on a worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use ulid::Ulid;

use kbsync_backend::IndexingBackend;
use kbsync_storage::SyncStateStore;
use kbsync_types::{
    Catalog, DataSource, DataSourceId, Settings, SyncFailure, SyncOutcome, SyncRequest, SyncState,
};

use crate::error::ControllerError;
use crate::gate::BackoffPolicy;
use crate::reconcile::Reconciler;

/// Controller tuning, usually taken from [`Settings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub max_backoff_ticks: u32,
    /// Deadline for each individual backend call
    pub call_timeout: Duration,
    /// How long an immediate sync waits for acceptance; `None` waits forever
    pub accept_timeout: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for ControllerConfig {
    fn from(settings: &Settings) -> Self {
        let accept = settings.controller.accept_timeout_secs;
        Self {
            max_backoff_ticks: settings.controller.max_backoff_ticks,
            call_timeout: Duration::from_millis(settings.backend.call_timeout_ms),
            accept_timeout: (accept > 0).then(|| Duration::from_secs(accept)),
        }
    }
}

struct Envelope {
    id: Ulid,
    request: SyncRequest,
    respond_to: Option<oneshot::Sender<SyncOutcome>>,
}

impl Envelope {
    fn respond(self, outcome: SyncOutcome) {
        if let Some(tx) = self.respond_to {
            // Receiver gone means the caller abandoned the wait.
            let _ = tx.send(outcome);
        }
    }
}

/// Cloneable entry point to a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    intake: mpsc::UnboundedSender<Envelope>,
}

impl ControllerHandle {
    /// Enqueue a request without waiting for its outcome.
    pub fn submit(&self, request: SyncRequest) -> Result<(), ControllerError> {
        self.enqueue(request, None)
    }

    /// Enqueue a request and get a receiver for its outcome.
    pub fn submit_tracked(
        &self,
        request: SyncRequest,
    ) -> Result<oneshot::Receiver<SyncOutcome>, ControllerError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(request, Some(tx))?;
        Ok(rx)
    }

    /// Enqueue a request and wait until the controller has decided it.
    pub async fn handle(&self, request: SyncRequest) -> Result<SyncOutcome, ControllerError> {
        let rx = self.submit_tracked(request)?;
        rx.await.map_err(|_| ControllerError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.intake.is_closed()
    }

    fn enqueue(
        &self,
        request: SyncRequest,
        respond_to: Option<oneshot::Sender<SyncOutcome>>,
    ) -> Result<(), ControllerError> {
        let envelope = Envelope {
            id: Ulid::new(),
            request,
            respond_to,
        };
        debug!(
            request_id = %envelope.id,
            data_source = %envelope.request.data_source_id,
            reason = %envelope.request.reason,
            "Request enqueued"
        );
        self.intake
            .send(envelope)
            .map_err(|_| ControllerError::Closed)
    }
}

/// Owns the dispatcher task and its workers.
pub struct SyncController {
    handle: ControllerHandle,
    catalog: Arc<Catalog>,
    store: Arc<dyn SyncStateStore>,
    config: ControllerConfig,
    shutdown: CancellationToken,
    dispatcher: tokio::task::JoinHandle<()>,
}

impl SyncController {
    /// Spawn the dispatcher on the current tokio runtime.
    pub fn start(
        config: ControllerConfig,
        catalog: Arc<Catalog>,
        backend: Arc<dyn IndexingBackend>,
        store: Arc<dyn SyncStateStore>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let reconciler = Arc::new(Reconciler::new(
            backend.clone(),
            store.clone(),
            BackoffPolicy::new(config.max_backoff_ticks),
            config.call_timeout,
        ));

        let dispatcher = Dispatcher {
            catalog: catalog.clone(),
            reconciler,
            workers: HashMap::new(),
            tasks: JoinSet::new(),
        };
        let task = tokio::spawn(dispatcher.run(rx, shutdown.clone()));

        info!(
            knowledge_bases = catalog.knowledge_base_count(),
            data_sources = catalog.data_source_count(),
            backend = backend.name(),
            store = store.name(),
            "Sync controller started"
        );

        Self {
            handle: ControllerHandle { intake: tx },
            catalog,
            store,
            config,
            shutdown,
            dispatcher: task,
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        self.handle.clone()
    }

    pub fn catalog(&self) -> Arc<Catalog> {
        self.catalog.clone()
    }

    pub fn store(&self) -> Arc<dyn SyncStateStore> {
        self.store.clone()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Stop accepting requests, finish everything already queued, and join
    /// all tasks.
    pub async fn shutdown(self) {
        info!("Sync controller shutting down");
        self.shutdown.cancel();
        drop(self.handle);
        if let Err(e) = self.dispatcher.await {
            error!(error = %e, "Dispatcher task failed");
        }
        info!("Sync controller stopped");
    }
}

/// Last known state of every catalog data source.
///
/// Data sources the controller has never touched are reported as fresh
/// `UNKNOWN` states.
pub fn sync_status(
    catalog: &Catalog,
    store: &dyn SyncStateStore,
) -> Result<Vec<SyncState>, ControllerError> {
    let mut stored: HashMap<DataSourceId, SyncState> = store
        .load_all()?
        .into_iter()
        .map(|s| (s.data_source_id.clone(), s))
        .collect();

    Ok(catalog
        .data_sources()
        .map(|ds| {
            stored
                .remove(&ds.id)
                .unwrap_or_else(|| SyncState::new(ds.id.clone(), ds.knowledge_base_id.clone()))
        })
        .collect())
}

struct Dispatcher {
    catalog: Arc<Catalog>,
    reconciler: Arc<Reconciler>,
    workers: HashMap<DataSourceId, mpsc::UnboundedSender<Envelope>>,
    tasks: JoinSet<()>,
}

impl Dispatcher {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Envelope>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(envelope) => self.dispatch(envelope),
                    None => break,
                },
                _ = shutdown.cancelled() => {
                    rx.close();
                    while let Some(envelope) = rx.recv().await {
                        self.dispatch(envelope);
                    }
                    break;
                }
            }
            while let Some(joined) = self.tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "Sync worker panicked");
                }
            }
        }

        // Closing worker queues lets each worker drain and exit.
        self.workers.clear();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Sync worker panicked");
            }
        }
        debug!("Dispatcher drained");
    }

    fn dispatch(&mut self, envelope: Envelope) {
        let ds_id = envelope.request.data_source_id.clone();

        if let Some(worker) = self.workers.get(&ds_id) {
            match worker.send(envelope) {
                Ok(()) => return,
                Err(mpsc::error::SendError(envelope)) => {
                    warn!(data_source = %ds_id, "Worker exited, respawning");
                    self.workers.remove(&ds_id);
                    self.spawn_and_send(envelope);
                    return;
                }
            }
        }
        self.spawn_and_send(envelope);
    }

    fn spawn_and_send(&mut self, envelope: Envelope) {
        let ds_id = envelope.request.data_source_id.clone();
        let Some(data_source) = self.catalog.data_source(&ds_id).cloned() else {
            warn!(
                request_id = %envelope.id,
                data_source = %ds_id,
                reason = %envelope.request.reason,
                "Request for unknown data source"
            );
            envelope.respond(SyncOutcome::failed(SyncFailure::UnknownDataSource));
            return;
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            data_source,
            reconciler: self.reconciler.clone(),
        };
        let span = tracing::info_span!("sync_worker", data_source = %ds_id);
        self.tasks.spawn(worker.run(rx).instrument(span));

        // The receiver is alive: the worker was spawned just above.
        let _ = tx.send(envelope);
        self.workers.insert(ds_id, tx);
    }
}

struct Worker {
    data_source: DataSource,
    reconciler: Arc<Reconciler>,
}

impl Worker {
    fn initial_state(&self) -> SyncState {
        match self.reconciler.store().load(&self.data_source.id) {
            Ok(Some(state)) => state,
            Ok(None) => SyncState::new(
                self.data_source.id.clone(),
                self.data_source.knowledge_base_id.clone(),
            ),
            Err(e) => {
                error!(error = %e, "Failed to load sync state, starting fresh");
                SyncState::new(
                    self.data_source.id.clone(),
                    self.data_source.knowledge_base_id.clone(),
                )
            }
        }
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<Envelope>) {
        let mut state = self.initial_state();
        debug!(status = %state.last_status, failures = state.consecutive_failures, "Worker started");

        while let Some(envelope) = rx.recv().await {
            let outcome = self.reconciler.handle(&mut state, &envelope.request).await;
            debug!(
                request_id = %envelope.id,
                reason = %envelope.request.reason,
                outcome = %outcome,
                "Request handled"
            );
            envelope.respond(outcome);
        }
    }
}
