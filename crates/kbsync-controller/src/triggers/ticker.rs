//! Periodic safety-net ticks.

use std::sync::Arc;

use tracing::{debug, info};

use kbsync_scheduler::{JitterConfig, SchedulerService, TickSchedule};
use kbsync_types::{Catalog, KnowledgeBaseId, ScheduleEvent, SyncReason, SyncRequest};

use crate::controller::ControllerHandle;
use crate::error::ControllerError;

/// Fans a tick for a knowledge base out to all of its data sources.
#[derive(Clone)]
pub struct PeriodicTicker {
    catalog: Arc<Catalog>,
    controller: ControllerHandle,
}

impl PeriodicTicker {
    pub fn new(catalog: Arc<Catalog>, controller: ControllerHandle) -> Self {
        Self {
            catalog,
            controller,
        }
    }

    /// One `PeriodicTick` request per data source of `kb`.
    pub fn requests_for(&self, kb: &KnowledgeBaseId) -> Result<Vec<SyncRequest>, ControllerError> {
        let sources = self
            .catalog
            .data_sources_of(kb)
            .ok_or_else(|| ControllerError::UnknownKnowledgeBase(kb.clone()))?;
        Ok(sources
            .into_iter()
            .map(|ds| SyncRequest::new(ds.id.clone(), SyncReason::PeriodicTick))
            .collect())
    }

    /// Enqueue one tick for `kb`. Returns the number of requests emitted.
    pub fn fan_out(&self, kb: &KnowledgeBaseId) -> Result<usize, ControllerError> {
        let requests = self.requests_for(kb)?;
        let count = requests.len();
        for request in requests {
            self.controller.submit(request)?;
        }
        debug!(knowledge_base = %kb, requests = count, "Tick fanned out");
        Ok(count)
    }

    /// Handle an inbound schedule event.
    ///
    /// All ids are resolved before anything is enqueued, so an unknown id
    /// emits nothing.
    pub fn on_schedule(&self, event: &ScheduleEvent) -> Result<usize, ControllerError> {
        let mut requests = Vec::new();
        for kb in &event.knowledge_base_ids {
            requests.extend(self.requests_for(kb)?);
        }
        let count = requests.len();
        for request in requests {
            self.controller.submit(request)?;
        }
        Ok(count)
    }

    /// Register one scheduled ticker per knowledge base, named by its id.
    pub async fn register(&self, scheduler: &SchedulerService) -> Result<usize, ControllerError> {
        let mut registered = 0;
        for kb in self.catalog.knowledge_bases() {
            let schedule = TickSchedule::from_parts(kb.check_interval_hours, kb.schedule.as_deref());
            let ticker = self.clone();
            let kb_id = kb.id.clone();

            scheduler
                .register_ticker(
                    kb.id.as_str(),
                    schedule,
                    None,
                    JitterConfig::new(kb.jitter_secs),
                    move |_token| {
                        let result = ticker.fan_out(&kb_id).map_err(|e| e.to_string());
                        async move { result }
                    },
                )
                .await?;
            registered += 1;
        }
        info!(tickers = registered, "Periodic tickers registered");
        Ok(registered)
    }
}
