//! Column family definitions for RocksDB.
//!
//! - sync_state: one SyncState per data source, overwritten in place
//! - deployments: append-only ledger of handled deployment completions

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for per data source sync state
pub const CF_SYNC_STATE: &str = "sync_state";

/// Column family name for deployment completion markers
pub const CF_DEPLOYMENTS: &str = "deployments";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_SYNC_STATE, CF_DEPLOYMENTS];

/// Ledger entries are written once and never updated
fn deployments_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_SYNC_STATE, Options::default()),
        ColumnFamilyDescriptor::new(CF_DEPLOYMENTS, deployments_options()),
    ]
}
