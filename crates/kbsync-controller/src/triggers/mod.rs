//! Trigger adapters.
//!
//! Each adapter turns one kind of outside signal into [`SyncRequest`]s:
//!
//! - [`ChangeListener`]: object created/updated in a data source's bucket
//! - [`DeploymentListener`]: bulk content deployment finished
//! - [`PeriodicTicker`]: per knowledge base safety-net tick
//!
//! `route*` methods only map events to requests; `on_*` methods also enqueue
//! them without waiting.
//!
//! [`SyncRequest`]: kbsync_types::SyncRequest

mod change;
mod deployment;
mod ticker;

pub use change::ChangeListener;
pub use deployment::{DeploymentCompleted, DeploymentListener};
pub use ticker::PeriodicTicker;
