//! Indexing backend adapters.
//!
//! The backend owns ingestion jobs and allows one active job per data
//! source. This crate is a pure adapter over it:
//!
//! - [`IndexingBackend`]: async trait with start / get / list operations
//! - [`BackendError`] and [`ErrorKind`]: classified failures, with conflicts
//!   kept distinct from every other kind
//! - [`HttpIndexingBackend`]: REST client over the knowledge-base service
//! - [`MockIndexingBackend`]: in-memory backend for tests and dry runs
//!
//! No retry or dedup logic lives here; that is the controller's job.

mod client;
mod error;
mod http;
mod mock;

pub use client::IndexingBackend;
pub use error::{BackendError, ErrorKind};
pub use http::{classify_response, HttpBackendConfig, HttpIndexingBackend};
pub use mock::MockIndexingBackend;
