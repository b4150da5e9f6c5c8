//! Sync state storage for the kb-sync controller.
//!
//! Provides:
//! - [`SyncStateStore`]: the controller's only persistence seam
//! - [`MemoryStateStore`]: process-local store for long-lived daemons
//! - [`RocksStateStore`]: RocksDB store for short-lived invocations, with
//!   column families for sync state and the deployment ledger

pub mod column_families;
pub mod error;
pub mod keys;
pub mod memory;
pub mod rocks;
pub mod store;

pub use error::StorageError;
pub use keys::{DeploymentKey, StateKey};
pub use memory::MemoryStateStore;
pub use rocks::RocksStateStore;
pub use store::{DeploymentRecord, StoreStats, SyncStateStore};
