//! Client library for the kb-sync daemon.
//!
//! # Example
//!
//! ```rust,no_run
//! use kbsync_client::KbSyncClient;
//! use kbsync_types::KnowledgeBaseId;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = KbSyncClient::connect("http://127.0.0.1:50061").await?;
//!
//!     let result = client
//!         .trigger_immediate_sync(&[KnowledgeBaseId::from("kb-1")])
//!         .await?;
//!     for r in &result.results {
//!         println!("{} -> {:?}", r.data_source_id, r.detail);
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;

pub use client::{ImmediateSyncResult, KbSyncClient, TickerStatusResult, DEFAULT_ENDPOINT};
pub use error::ClientError;

pub use kbsync_service::pb::{DataSourceStatus, OutcomeKind, SyncResult, TickerStatusProto};
