//! Knowledge base / data source topology.
//!
//! The catalog is built once from [`Settings`] and never changes while the
//! controller runs. It answers the routing questions every trigger adapter
//! asks: which knowledge base owns a data source, which data source a bucket
//! or deployment resource feeds, and which data sources a knowledge base has.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::{KnowledgeBaseSettings, Settings};
use crate::error::KbSyncError;
use crate::ids::{DataSourceId, KnowledgeBaseId};

/// A (knowledge base, data source) pair, as the backend addresses it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataSourceRef {
    pub knowledge_base_id: KnowledgeBaseId,
    pub data_source_id: DataSourceId,
}

impl DataSourceRef {
    pub fn new(
        knowledge_base_id: impl Into<KnowledgeBaseId>,
        data_source_id: impl Into<DataSourceId>,
    ) -> Self {
        Self {
            knowledge_base_id: knowledge_base_id.into(),
            data_source_id: data_source_id.into(),
        }
    }
}

impl std::fmt::Display for DataSourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.knowledge_base_id, self.data_source_id)
    }
}

/// One content origin feeding one knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: DataSourceId,
    pub knowledge_base_id: KnowledgeBaseId,
    pub bucket: Option<String>,
    pub deployment_resource: Option<String>,
}

impl DataSource {
    pub fn to_ref(&self) -> DataSourceRef {
        DataSourceRef {
            knowledge_base_id: self.knowledge_base_id.clone(),
            data_source_id: self.id.clone(),
        }
    }
}

/// A vector knowledge base and its schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub id: KnowledgeBaseId,
    pub data_sources: BTreeSet<DataSourceId>,
    pub check_interval_hours: u32,
    pub schedule: Option<String>,
    pub jitter_secs: u64,
}

/// Read-only lookup tables over all configured knowledge bases.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    knowledge_bases: BTreeMap<KnowledgeBaseId, KnowledgeBase>,
    data_sources: BTreeMap<DataSourceId, DataSource>,
    by_bucket: HashMap<String, DataSourceId>,
    by_deployment: HashMap<String, DataSourceId>,
}

impl Catalog {
    /// Build the catalog from configured knowledge bases.
    ///
    /// # Errors
    ///
    /// Returns `KbSyncError::InvalidCatalog` when a data source appears under
    /// two knowledge bases, or a bucket or deployment resource maps to two
    /// data sources.
    pub fn from_settings(settings: &Settings) -> Result<Self, KbSyncError> {
        Self::from_knowledge_bases(&settings.knowledge_bases)
    }

    pub fn from_knowledge_bases(kbs: &[KnowledgeBaseSettings]) -> Result<Self, KbSyncError> {
        let mut catalog = Catalog::default();

        for kb in kbs {
            let kb_id = KnowledgeBaseId::new(kb.id.clone());
            if catalog.knowledge_bases.contains_key(&kb_id) {
                return Err(KbSyncError::InvalidCatalog(format!(
                    "knowledge base {} declared twice",
                    kb_id
                )));
            }

            let mut members = BTreeSet::new();
            for ds in &kb.data_sources {
                let ds_id = DataSourceId::new(ds.id.clone());
                if let Some(existing) = catalog.data_sources.get(&ds_id) {
                    return Err(KbSyncError::InvalidCatalog(format!(
                        "data source {} belongs to both {} and {}",
                        ds_id, existing.knowledge_base_id, kb_id
                    )));
                }

                if let Some(bucket) = &ds.bucket {
                    if let Some(other) = catalog.by_bucket.insert(bucket.clone(), ds_id.clone()) {
                        return Err(KbSyncError::InvalidCatalog(format!(
                            "bucket {} mapped to both {} and {}",
                            bucket, other, ds_id
                        )));
                    }
                }
                if let Some(resource) = &ds.deployment_resource {
                    if let Some(other) =
                        catalog.by_deployment.insert(resource.clone(), ds_id.clone())
                    {
                        return Err(KbSyncError::InvalidCatalog(format!(
                            "deployment resource {} mapped to both {} and {}",
                            resource, other, ds_id
                        )));
                    }
                }

                members.insert(ds_id.clone());
                catalog.data_sources.insert(
                    ds_id.clone(),
                    DataSource {
                        id: ds_id,
                        knowledge_base_id: kb_id.clone(),
                        bucket: ds.bucket.clone(),
                        deployment_resource: ds.deployment_resource.clone(),
                    },
                );
            }

            catalog.knowledge_bases.insert(
                kb_id.clone(),
                KnowledgeBase {
                    id: kb_id,
                    data_sources: members,
                    check_interval_hours: kb.check_interval_hours,
                    schedule: kb.schedule.clone(),
                    jitter_secs: kb.jitter_secs,
                },
            );
        }

        Ok(catalog)
    }

    pub fn knowledge_base(&self, id: &KnowledgeBaseId) -> Option<&KnowledgeBase> {
        self.knowledge_bases.get(id)
    }

    pub fn knowledge_bases(&self) -> impl Iterator<Item = &KnowledgeBase> {
        self.knowledge_bases.values()
    }

    pub fn data_source(&self, id: &DataSourceId) -> Option<&DataSource> {
        self.data_sources.get(id)
    }

    pub fn data_sources(&self) -> impl Iterator<Item = &DataSource> {
        self.data_sources.values()
    }

    /// Data sources of a knowledge base, in id order.
    pub fn data_sources_of(&self, kb: &KnowledgeBaseId) -> Option<Vec<&DataSource>> {
        self.knowledge_bases.get(kb).map(|kb| {
            kb.data_sources
                .iter()
                .filter_map(|id| self.data_sources.get(id))
                .collect()
        })
    }

    pub fn data_source_for_bucket(&self, bucket: &str) -> Option<&DataSource> {
        self.by_bucket
            .get(bucket)
            .and_then(|id| self.data_sources.get(id))
    }

    pub fn data_source_for_deployment(&self, logical_resource_id: &str) -> Option<&DataSource> {
        self.by_deployment
            .get(logical_resource_id)
            .and_then(|id| self.data_sources.get(id))
    }

    pub fn knowledge_base_count(&self) -> usize {
        self.knowledge_bases.len()
    }

    pub fn data_source_count(&self) -> usize {
        self.data_sources.len()
    }
}
