//! Error types for the kb-sync client.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// Failed to connect to the daemon
    #[error("Connection failed: {0}")]
    Connection(#[from] tonic::transport::Error),

    #[error("RPC failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The daemon answered but refused the operation
    #[error("Rejected: {0}")]
    Rejected(String),
}
