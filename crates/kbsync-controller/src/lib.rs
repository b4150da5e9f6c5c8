//! Knowledge-base ingestion sync controller.
//!
//! Reconciles racing sync triggers against an indexing backend that allows a
//! single active ingestion job per data source:
//!
//! - [`SyncController`]: intake queue, per data source workers, shutdown
//! - [`Reconciler`]: the per-request decision (refresh, gate, start, classify)
//! - [`BackoffPolicy`]: tick-counted retry backoff
//! - [`triggers`]: change, deployment and periodic trigger adapters
//! - [`ImmediateSyncInvoker`]: blocking one-shot sync of whole knowledge bases
//!
//! # Example
//!
//! ```ignore
//! let controller = SyncController::start(config, catalog, backend, store);
//! let outcome = controller
//!     .handle()
//!     .handle(SyncRequest::new("ds-1".into(), SyncReason::DataChange))
//!     .await?;
//! controller.shutdown().await;
//! ```

pub mod controller;
pub mod error;
pub mod gate;
pub mod invoker;
pub mod reconcile;
pub mod triggers;

pub use controller::{sync_status, ControllerConfig, ControllerHandle, SyncController};
pub use error::ControllerError;
pub use gate::{BackoffPolicy, GateDecision};
pub use invoker::{ImmediateSyncInvoker, SummaryEntry, SyncSummary};
pub use reconcile::Reconciler;
pub use triggers::{ChangeListener, DeploymentCompleted, DeploymentListener, PeriodicTicker};
