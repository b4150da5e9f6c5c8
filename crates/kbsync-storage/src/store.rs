//! The store trait.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kbsync_types::{DataSourceId, SyncState};

use crate::error::StorageError;
use crate::keys::DeploymentKey;

/// A deployment completion the controller has already turned into a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub logical_resource_id: String,
    pub event_id: String,
    pub data_source_id: DataSourceId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub recorded_at: DateTime<Utc>,
}

impl DeploymentRecord {
    pub fn new(
        logical_resource_id: impl Into<String>,
        event_id: impl Into<String>,
        data_source_id: DataSourceId,
    ) -> Self {
        Self {
            logical_resource_id: logical_resource_id.into(),
            event_id: event_id.into(),
            data_source_id,
            recorded_at: Utc::now(),
        }
    }

    pub fn key(&self) -> DeploymentKey {
        DeploymentKey::new(self.logical_resource_id.clone(), self.event_id.clone())
    }
}

/// Counts reported by `status` commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub sync_states: u64,
    pub deployments: u64,
}

/// Persistence for [`SyncState`] and the deployment ledger.
///
/// Each data source's state is written only by the controller worker that
/// owns it, so implementations need no compare-and-swap on state. The
/// deployment ledger is shared and must make `record_deployment` atomic.
pub trait SyncStateStore: Send + Sync {
    fn load(&self, data_source_id: &DataSourceId) -> Result<Option<SyncState>, StorageError>;

    fn save(&self, state: &SyncState) -> Result<(), StorageError>;

    /// Every stored state, ordered by data source id.
    fn load_all(&self) -> Result<Vec<SyncState>, StorageError>;

    /// Record a deployment marker.
    ///
    /// Returns `false` when the marker was already present.
    fn record_deployment(&self, record: &DeploymentRecord) -> Result<bool, StorageError>;

    /// Whether a deployment marker is present.
    fn has_deployment(&self, key: &DeploymentKey) -> Result<bool, StorageError>;

    /// Drop a marker whose request never reached the controller, so a
    /// redelivery of the same deployment is synced.
    fn release_deployment(&self, key: &DeploymentKey) -> Result<(), StorageError>;

    /// Delete markers recorded before `cutoff`. Returns how many were removed.
    fn prune_deployments(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError>;

    fn stats(&self) -> Result<StoreStats, StorageError>;

    /// Short name for logs.
    fn name(&self) -> &str;
}
