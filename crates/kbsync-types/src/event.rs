//! Inbound events delivered to the controller from outside.
//!
//! These are the raw shapes at the system boundary: storage notifications,
//! deployment status changes, schedule ticks and immediate sync calls. Mapping
//! them to data sources happens in the trigger adapters.

use serde::{Deserialize, Serialize};

use crate::ids::KnowledgeBaseId;

/// Deployment statuses that mean the content is fully in place.
pub const DEPLOYMENT_COMPLETE_STATUSES: &[&str] = &["CREATE_COMPLETE", "UPDATE_COMPLETE"];

/// Object created or updated in a storage bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectChangeEvent {
    pub bucket: String,
    /// Object key, informational only
    #[serde(default)]
    pub key: Option<String>,
}

impl ObjectChangeEvent {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: None,
        }
    }
}

/// Resource status change reported by the deployment system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStatusEvent {
    pub resource_type: String,
    pub resource_status: String,
    pub logical_resource_id: String,
    /// Unique per delivery of a deployment, used to emit at most once
    pub event_id: String,
}

impl DeploymentStatusEvent {
    /// Whether the status says the deployment finished.
    pub fn is_complete(&self) -> bool {
        DEPLOYMENT_COMPLETE_STATUSES.contains(&self.resource_status.as_str())
    }
}

/// Scheduled tick for a set of knowledge bases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEvent {
    pub knowledge_base_ids: Vec<KnowledgeBaseId>,
}

/// Any event the controller accepts from the outside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    ObjectChange(ObjectChangeEvent),
    DeploymentStatus(DeploymentStatusEvent),
    Schedule(ScheduleEvent),
    ImmediateSync { knowledge_base_ids: Vec<KnowledgeBaseId> },
}
