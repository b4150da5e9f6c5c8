//! Shared fixtures for controller integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use kbsync_backend::MockIndexingBackend;
use kbsync_controller::{ControllerConfig, ControllerHandle, SyncController};
use kbsync_storage::{MemoryStateStore, SyncStateStore};
use kbsync_types::{
    Catalog, DataSourceId, DataSourceSettings, KnowledgeBaseId, KnowledgeBaseSettings,
    SyncOutcome, SyncReason, SyncRequest, SyncState,
};

/// kb-1 = {ds-1, ds-2}, kb-2 = {ds-3}.
pub fn catalog() -> Arc<Catalog> {
    let source = |id: &str, n: u32| DataSourceSettings {
        id: id.to_string(),
        bucket: Some(format!("bucket-{}", n)),
        deployment_resource: Some(format!("Deployment{}", n)),
    };
    let kbs = vec![
        KnowledgeBaseSettings {
            id: "kb-1".to_string(),
            check_interval_hours: 24,
            schedule: None,
            jitter_secs: 0,
            data_sources: vec![source("ds-1", 1), source("ds-2", 2)],
        },
        KnowledgeBaseSettings {
            id: "kb-2".to_string(),
            check_interval_hours: 6,
            schedule: None,
            jitter_secs: 0,
            data_sources: vec![source("ds-3", 3)],
        },
    ];
    Arc::new(Catalog::from_knowledge_bases(&kbs).expect("valid test catalog"))
}

pub fn ds(id: &str) -> DataSourceId {
    DataSourceId::from(id)
}

pub fn kb(id: &str) -> KnowledgeBaseId {
    KnowledgeBaseId::from(id)
}

pub fn config() -> ControllerConfig {
    ControllerConfig {
        max_backoff_ticks: 16,
        call_timeout: Duration::from_secs(5),
        accept_timeout: None,
    }
}

/// A running controller over the mock backend and an in-memory store.
pub struct Harness {
    pub backend: Arc<MockIndexingBackend>,
    pub store: Arc<dyn SyncStateStore>,
    pub catalog: Arc<Catalog>,
    pub controller: SyncController,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(config())
    }

    pub fn with_config(config: ControllerConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStateStore::new()))
    }

    pub fn with_store(config: ControllerConfig, store: Arc<dyn SyncStateStore>) -> Self {
        let backend = Arc::new(MockIndexingBackend::new());
        let catalog = catalog();
        let controller =
            SyncController::start(config, catalog.clone(), backend.clone(), store.clone());
        Self {
            backend,
            store,
            catalog,
            controller,
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        self.controller.handle()
    }

    pub async fn request(&self, data_source: &str, reason: SyncReason) -> SyncOutcome {
        self.handle()
            .handle(SyncRequest::new(ds(data_source), reason))
            .await
            .expect("controller running")
    }

    pub fn state(&self, data_source: &str) -> Option<SyncState> {
        self.store.load(&ds(data_source)).expect("store readable")
    }

    /// Seed stored state before the data source's worker first loads it.
    pub fn seed(&self, state: &SyncState) {
        self.store.save(state).expect("store writable");
    }
}
