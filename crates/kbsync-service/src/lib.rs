//! gRPC service for the knowledge-base sync controller.
//!
//! Provides:
//! - Trigger RPCs: NotifyObjectChange, NotifyDeploymentStatus, Tick
//! - TriggerImmediateSync for the post-deployment one-shot sync
//! - GetSyncStatus over the persisted sync state
//! - Ticker RPCs for scheduler status and control
//! - Health check and reflection endpoints

pub mod convert;
pub mod scheduler_service;
pub mod server;
pub mod sync;

pub mod pb {
    tonic::include_proto!("kbsync");

    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("kbsync_descriptor");
}

pub use scheduler_service::SchedulerGrpcService;
pub use server::{run_server, run_server_with_scheduler, run_server_with_shutdown};
pub use sync::KbSyncServiceImpl;
