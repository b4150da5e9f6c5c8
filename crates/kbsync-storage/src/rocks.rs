//! RocksDB-backed store.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, WriteBatch, DB};
use tracing::{debug, info};

use kbsync_types::{DataSourceId, SyncState};

use crate::column_families::{build_cf_descriptors, CF_DEPLOYMENTS, CF_SYNC_STATE};
use crate::error::StorageError;
use crate::keys::{DeploymentKey, StateKey};
use crate::store::{DeploymentRecord, StoreStats, SyncStateStore};

/// Durable [`SyncStateStore`] for controllers that run as short-lived
/// invocations.
pub struct RocksStateStore {
    db: DB,
    /// Serializes check-then-put on the deployment ledger
    ledger_lock: Mutex<()>,
}

impl RocksStateStore {
    /// Open the store at the given path, creating it if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening sync state store at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(2);

        let db = DB::open_cf_descriptors(&db_opts, path, build_cf_descriptors())?;

        Ok(Self {
            db,
            ledger_lock: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    /// Flush memtables to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for name in [CF_SYNC_STATE, CF_DEPLOYMENTS] {
            self.db.flush_cf(self.cf(name)?)?;
        }
        Ok(())
    }

    /// Stored deployment markers, in key order.
    pub fn deployments(&self) -> Result<Vec<DeploymentRecord>, StorageError> {
        let cf = self.cf(CF_DEPLOYMENTS)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    fn count_cf_entries(&self, cf: &ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }
}

impl SyncStateStore for RocksStateStore {
    fn load(&self, data_source_id: &DataSourceId) -> Result<Option<SyncState>, StorageError> {
        let cf = self.cf(CF_SYNC_STATE)?;
        let key = StateKey::new(data_source_id.clone());
        match self.db.get_cf(cf, key.to_bytes())? {
            Some(bytes) => Ok(Some(SyncState::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save(&self, state: &SyncState) -> Result<(), StorageError> {
        let cf = self.cf(CF_SYNC_STATE)?;
        let key = StateKey::new(state.data_source_id.clone());
        self.db.put_cf(cf, key.to_bytes(), state.to_bytes()?)?;
        debug!(data_source = %state.data_source_id, status = %state.last_status, "Saved sync state");
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<SyncState>, StorageError> {
        let cf = self.cf(CF_SYNC_STATE)?;
        let mut states = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(b"ds:", Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(b"ds:") {
                break;
            }
            StateKey::from_bytes(&key)?;
            states.push(SyncState::from_bytes(&value)?);
        }
        Ok(states)
    }

    fn record_deployment(&self, record: &DeploymentRecord) -> Result<bool, StorageError> {
        let cf = self.cf(CF_DEPLOYMENTS)?;
        let key = record.key().to_bytes();

        let _guard = self.ledger_lock.lock().map_err(|_| StorageError::Poisoned)?;
        if self.db.get_cf(cf, &key)?.is_some() {
            debug!(
                resource = %record.logical_resource_id,
                event_id = %record.event_id,
                "Deployment marker already present"
            );
            return Ok(false);
        }
        self.db.put_cf(cf, &key, serde_json::to_vec(record)?)?;
        Ok(true)
    }

    fn has_deployment(&self, key: &DeploymentKey) -> Result<bool, StorageError> {
        let cf = self.cf(CF_DEPLOYMENTS)?;
        Ok(self.db.get_cf(cf, key.to_bytes())?.is_some())
    }

    fn release_deployment(&self, key: &DeploymentKey) -> Result<(), StorageError> {
        let cf = self.cf(CF_DEPLOYMENTS)?;
        let _guard = self.ledger_lock.lock().map_err(|_| StorageError::Poisoned)?;
        self.db.delete_cf(cf, key.to_bytes())?;
        debug!(
            resource = %key.logical_resource_id,
            event_id = %key.event_id,
            "Deployment marker released"
        );
        Ok(())
    }

    fn prune_deployments(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let cf = self.cf(CF_DEPLOYMENTS)?;
        let _guard = self.ledger_lock.lock().map_err(|_| StorageError::Poisoned)?;

        let mut batch = WriteBatch::default();
        let mut removed = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let record: DeploymentRecord = serde_json::from_slice(&value)?;
            if record.recorded_at < cutoff {
                batch.delete_cf(cf, key);
                removed += 1;
            }
        }
        if removed > 0 {
            self.db.write(batch)?;
            info!(removed, "Pruned deployment markers");
        }
        Ok(removed)
    }

    fn stats(&self) -> Result<StoreStats, StorageError> {
        Ok(StoreStats {
            sync_states: self.count_cf_entries(self.cf(CF_SYNC_STATE)?)?,
            deployments: self.count_cf_entries(self.cf(CF_DEPLOYMENTS)?)?,
        })
    }

    fn name(&self) -> &str {
        "rocksdb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_families::ALL_CF_NAMES;
    use kbsync_types::{IngestionJob, IngestionJobStatus, JobId, KnowledgeBaseId};
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStateStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksStateStore::open(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    fn state(ds: &str) -> SyncState {
        SyncState::new(DataSourceId::from(ds), KnowledgeBaseId::from("kb-1"))
    }

    #[test]
    fn test_open_creates_column_families() {
        let (store, _temp) = create_test_store();
        for cf_name in ALL_CF_NAMES {
            assert!(
                store.db.cf_handle(cf_name).is_some(),
                "CF {} should exist",
                cf_name
            );
        }
    }

    #[test]
    fn test_save_and_load_state() {
        let (store, _temp) = create_test_store();
        let mut s = state("ds-1");
        s.record_started(&IngestionJob::new(
            JobId::from("j-1"),
            DataSourceId::from("ds-1"),
            IngestionJobStatus::Starting,
        ));
        store.save(&s).unwrap();

        let loaded = store.load(&DataSourceId::from("ds-1")).unwrap().unwrap();
        assert_eq!(loaded.last_job_id, Some(JobId::from("j-1")));
        assert!(store.load(&DataSourceId::from("ds-2")).unwrap().is_none());
    }

    #[test]
    fn test_load_all_in_id_order() {
        let (store, _temp) = create_test_store();
        store.save(&state("ds-b")).unwrap();
        store.save(&state("ds-a")).unwrap();

        let ids: Vec<_> = store
            .load_all()
            .unwrap()
            .into_iter()
            .map(|s| s.data_source_id.into_inner())
            .collect();
        assert_eq!(ids, vec!["ds-a", "ds-b"]);
    }

    #[test]
    fn test_state_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = RocksStateStore::open(temp_dir.path()).unwrap();
            let mut s = state("ds-1");
            s.record_failure(kbsync_types::SyncFailure::BackendTransient);
            store.save(&s).unwrap();
            let record = DeploymentRecord::new("Deploy", "evt-1", DataSourceId::from("ds-1"));
            assert!(store.record_deployment(&record).unwrap());
            store.flush().unwrap();
        }

        let store = RocksStateStore::open(temp_dir.path()).unwrap();
        let loaded = store.load(&DataSourceId::from("ds-1")).unwrap().unwrap();
        assert_eq!(loaded.consecutive_failures, 1);

        let record = DeploymentRecord::new("Deploy", "evt-1", DataSourceId::from("ds-1"));
        assert!(!store.record_deployment(&record).unwrap());
        assert_eq!(store.deployments().unwrap().len(), 1);
        assert_eq!(
            store.stats().unwrap(),
            StoreStats {
                sync_states: 1,
                deployments: 1
            }
        );
    }

    #[test]
    fn test_release_and_prune_deployments() {
        let (store, _temp) = create_test_store();
        let mut old = DeploymentRecord::new("Deploy", "evt-1", DataSourceId::from("ds-1"));
        old.recorded_at = Utc::now() - chrono::Duration::days(40);
        let fresh = DeploymentRecord::new("Deploy", "evt-2", DataSourceId::from("ds-1"));
        assert!(store.record_deployment(&old).unwrap());
        assert!(store.record_deployment(&fresh).unwrap());

        store.release_deployment(&fresh.key()).unwrap();
        assert!(!store.has_deployment(&fresh.key()).unwrap());
        assert!(store.record_deployment(&fresh).unwrap());

        let removed = store
            .prune_deployments(Utc::now() - chrono::Duration::days(30))
            .unwrap();
        assert_eq!(removed, 1);
        assert!(!store.has_deployment(&old.key()).unwrap());
        assert!(store.has_deployment(&fresh.key()).unwrap());
    }
}
