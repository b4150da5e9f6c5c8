//! Error types for the kb-sync system.

use thiserror::Error;

/// Unified error type for configuration and domain-level failures.
#[derive(Debug, Error)]
pub enum KbSyncError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Catalog is inconsistent (duplicate ids, dangling references)
    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<config::ConfigError> for KbSyncError {
    fn from(err: config::ConfigError) -> Self {
        KbSyncError::Config(err.to_string())
    }
}
