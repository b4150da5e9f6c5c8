//! # kbsync-types
//!
//! Shared domain types for the knowledge-base sync controller.
//!
//! This crate defines the data structures every other crate speaks:
//! - Identifiers: knowledge base, data source and ingestion job ids
//! - Catalog: the read-only knowledge base / data source topology
//! - Jobs: cached copies of backend ingestion jobs
//! - Sync state: per data source bookkeeping owned by the controller
//! - Requests and outcomes flowing through the intake queue
//! - Inbound events from storage notifications, deployments and schedules
//! - Settings: layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use kbsync_types::{DataSourceId, SyncReason, SyncRequest};
//!
//! let request = SyncRequest::new(DataSourceId::from("ds-1"), SyncReason::DataChange);
//! assert_eq!(request.data_source_id.as_str(), "ds-1");
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod job;
pub mod request;
pub mod state;

pub use catalog::{Catalog, DataSource, DataSourceRef, KnowledgeBase};
pub use config::{
    BackendKind, BackendSettings, ControllerSettings, DataSourceSettings, DeploymentSettings,
    KnowledgeBaseSettings, SchedulerSettings, Settings, StateBackend, StateSettings,
};
pub use error::KbSyncError;
pub use event::{
    DeploymentStatusEvent, InboundEvent, ObjectChangeEvent, ScheduleEvent, DEPLOYMENT_COMPLETE_STATUSES,
};
pub use ids::{DataSourceId, JobId, KnowledgeBaseId};
pub use job::{IngestionJob, IngestionJobStatus};
pub use request::{SkipReason, SyncFailure, SyncOutcome, SyncReason, SyncRequest};
pub use state::{SyncState, SyncStatus};
