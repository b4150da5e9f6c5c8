//! Key encoding and decoding for storage layer.
//!
//! Key formats:
//! - sync state: `ds:{data_source_id}`
//! - deployment marker: `dep:{logical_resource_id}:{event_id}`
//!
//! Logical resource ids never contain `:`, so everything after the second
//! separator belongs to the event id (which often embeds a timestamp).

use kbsync_types::DataSourceId;

use crate::error::StorageError;

const STATE_PREFIX: &str = "ds:";
const DEPLOYMENT_PREFIX: &str = "dep:";

/// Key for a data source's sync state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateKey {
    pub data_source_id: DataSourceId,
}

impl StateKey {
    pub fn new(data_source_id: DataSourceId) -> Self {
        Self { data_source_id }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{}{}", STATE_PREFIX, self.data_source_id).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        let id = s
            .strip_prefix(STATE_PREFIX)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| StorageError::Key(format!("Invalid state key: {}", s)))?;
        Ok(Self::new(DataSourceId::from(id)))
    }
}

/// Key for a deployment completion marker
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeploymentKey {
    pub logical_resource_id: String,
    pub event_id: String,
}

impl DeploymentKey {
    pub fn new(logical_resource_id: impl Into<String>, event_id: impl Into<String>) -> Self {
        Self {
            logical_resource_id: logical_resource_id.into(),
            event_id: event_id.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "{}{}:{}",
            DEPLOYMENT_PREFIX, self.logical_resource_id, self.event_id
        )
        .into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        let rest = s
            .strip_prefix(DEPLOYMENT_PREFIX)
            .ok_or_else(|| StorageError::Key(format!("Invalid deployment key: {}", s)))?;
        let (logical, event) = rest
            .split_once(':')
            .ok_or_else(|| StorageError::Key(format!("Invalid deployment key: {}", s)))?;
        Ok(Self::new(logical, event))
    }
}
