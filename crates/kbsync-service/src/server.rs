//! gRPC server setup with health check and reflection.

use std::net::SocketAddr;
use std::sync::Arc;

use tonic::transport::Server;
use tonic_health::server::health_reporter;
use tonic_reflection::server::Builder as ReflectionBuilder;
use tracing::{info, warn};

use kbsync_scheduler::SchedulerService;

use crate::pb::{kb_sync_service_server::KbSyncServiceServer, FILE_DESCRIPTOR_SET};
use crate::sync::KbSyncServiceImpl;

/// Run the gRPC server until the process exits.
pub async fn run_server(
    addr: SocketAddr,
    service: KbSyncServiceImpl,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    run_server_with_shutdown(addr, service, std::future::pending()).await
}

/// Run the gRPC server with graceful shutdown support.
///
/// Serves the KbSyncService plus health and reflection until
/// `shutdown_signal` resolves.
pub async fn run_server_with_shutdown<F>(
    addr: SocketAddr,
    service: KbSyncServiceImpl,
    shutdown_signal: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    info!("Starting gRPC server on {}", addr);

    let (mut health_reporter, health_service) = health_reporter();
    health_reporter
        .set_serving::<KbSyncServiceServer<KbSyncServiceImpl>>()
        .await;

    let reflection_service = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    info!("gRPC server ready on {}", addr);

    Server::builder()
        .add_service(health_service)
        .add_service(reflection_service)
        .add_service(KbSyncServiceServer::new(service))
        .serve_with_shutdown(addr, shutdown_signal)
        .await?;

    info!("gRPC server shutdown complete");
    Ok(())
}

/// Run the gRPC server with the tick scheduler.
///
/// Starts `scheduler` before serving and shuts it down once the server has
/// stopped, so no tick fires against a stopping controller.
pub async fn run_server_with_scheduler<F>(
    addr: SocketAddr,
    service: KbSyncServiceImpl,
    scheduler: Arc<SchedulerService>,
    shutdown_signal: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    scheduler.start().await?;
    info!(
        tickers = scheduler.registry().ticker_count(),
        "Scheduler started"
    );

    let served = run_server_with_shutdown(addr, service, shutdown_signal).await;

    info!("Stopping scheduler");
    if let Err(e) = scheduler.shutdown().await {
        warn!(error = %e, "Scheduler shutdown failed");
    }
    served
}
