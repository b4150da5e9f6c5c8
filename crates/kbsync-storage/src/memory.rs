//! Process-local store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};

use kbsync_types::{DataSourceId, SyncState};

use crate::error::StorageError;
use crate::keys::DeploymentKey;
use crate::store::{DeploymentRecord, StoreStats, SyncStateStore};

/// In-memory [`SyncStateStore`]. State is lost when the process exits.
#[derive(Default)]
pub struct MemoryStateStore {
    states: RwLock<BTreeMap<DataSourceId, SyncState>>,
    deployments: Mutex<HashMap<DeploymentKey, DeploymentRecord>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SyncStateStore for MemoryStateStore {
    fn load(&self, data_source_id: &DataSourceId) -> Result<Option<SyncState>, StorageError> {
        let states = self.states.read().map_err(|_| StorageError::Poisoned)?;
        Ok(states.get(data_source_id).cloned())
    }

    fn save(&self, state: &SyncState) -> Result<(), StorageError> {
        let mut states = self.states.write().map_err(|_| StorageError::Poisoned)?;
        states.insert(state.data_source_id.clone(), state.clone());
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<SyncState>, StorageError> {
        let states = self.states.read().map_err(|_| StorageError::Poisoned)?;
        Ok(states.values().cloned().collect())
    }

    fn record_deployment(&self, record: &DeploymentRecord) -> Result<bool, StorageError> {
        let mut deployments = self.deployments.lock().map_err(|_| StorageError::Poisoned)?;
        let key = record.key();
        if deployments.contains_key(&key) {
            return Ok(false);
        }
        deployments.insert(key, record.clone());
        Ok(true)
    }

    fn has_deployment(&self, key: &DeploymentKey) -> Result<bool, StorageError> {
        let deployments = self.deployments.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(deployments.contains_key(key))
    }

    fn release_deployment(&self, key: &DeploymentKey) -> Result<(), StorageError> {
        let mut deployments = self.deployments.lock().map_err(|_| StorageError::Poisoned)?;
        deployments.remove(key);
        Ok(())
    }

    fn prune_deployments(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut deployments = self.deployments.lock().map_err(|_| StorageError::Poisoned)?;
        let before = deployments.len();
        deployments.retain(|_, record| record.recorded_at >= cutoff);
        Ok(before - deployments.len())
    }

    fn stats(&self) -> Result<StoreStats, StorageError> {
        let states = self.states.read().map_err(|_| StorageError::Poisoned)?;
        let deployments = self.deployments.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(StoreStats {
            sync_states: states.len() as u64,
            deployments: deployments.len() as u64,
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}
