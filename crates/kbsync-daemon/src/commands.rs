//! Command implementations for the kb-sync daemon.
//!
//! Handles:
//! - start: load config, open the state store, register tickers, serve gRPC
//! - stop / status: signal or inspect the running daemon via its PID file
//! - config: print the effective configuration
//! - trigger, sync-status, ticker: talk to a running daemon
//! - handle-event: process one event file in-process and exit

use std::fs;
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use tokio::signal;
use tracing::{info, warn};

use kbsync_backend::{HttpBackendConfig, HttpIndexingBackend, IndexingBackend, MockIndexingBackend};
use kbsync_client::{KbSyncClient, OutcomeKind};
use kbsync_controller::{ControllerConfig, PeriodicTicker, SyncController};
use kbsync_scheduler::{SchedulerConfig, SchedulerService};
use kbsync_service::{run_server_with_scheduler, KbSyncServiceImpl};
use kbsync_storage::{MemoryStateStore, RocksStateStore, SyncStateStore};
use kbsync_types::{
    BackendKind, Catalog, DeploymentSettings, InboundEvent, KnowledgeBaseId, Settings,
    StateBackend, StateSettings,
};

use crate::cli::TickerCommands;
use crate::event::process_event;

/// Get the PID file path
fn pid_file_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| {
            #[cfg(unix)]
            {
                dirs.runtime_dir()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| dirs.cache_dir().to_path_buf())
            }
            #[cfg(not(unix))]
            {
                dirs.cache_dir().to_path_buf()
            }
        })
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("kb-sync")
        .join("daemon.pid")
}

fn write_pid_file() -> Result<()> {
    let pid_path = pid_file_path();
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&pid_path, std::process::id().to_string())?;
    info!("Wrote PID file: {:?}", pid_path);
    Ok(())
}

fn remove_pid_file() {
    let pid_path = pid_file_path();
    if pid_path.exists() {
        if let Err(e) = fs::remove_file(&pid_path) {
            warn!("Failed to remove PID file: {}", e);
        } else {
            info!("Removed PID file");
        }
    }
}

fn read_pid_file() -> Option<u32> {
    fs::read_to_string(pid_file_path())
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    // Signal 0 only checks that the process exists
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    true
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `level`. Logs go to stderr so command output on
/// stdout stays machine readable.
fn init_logging(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

fn load_settings(config_path: Option<&str>, log_level: Option<&str>) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(level) = log_level {
        settings.log_level = level.to_string();
    }
    Ok(settings)
}

/// Open the configured sync state store.
pub fn open_store(state: &StateSettings) -> Result<Arc<dyn SyncStateStore>> {
    match state.backend {
        StateBackend::Memory => Ok(Arc::new(MemoryStateStore::new())),
        StateBackend::Rocksdb => {
            let path = state.expanded_path();
            info!("Opening sync state at {:?}", path);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).context("Failed to create state directory")?;
            }
            let store = RocksStateStore::open(&path).context("Failed to open state store")?;
            Ok(Arc::new(store))
        }
    }
}

/// Drop deployment ledger markers past the retention window.
///
/// A retention of 0 days keeps every marker.
pub fn prune_deployments(
    store: &dyn SyncStateStore,
    settings: &DeploymentSettings,
) -> Result<usize> {
    if settings.retention_days == 0 {
        return Ok(0);
    }
    let cutoff = Utc::now() - Duration::days(i64::from(settings.retention_days));
    let removed = store
        .prune_deployments(cutoff)
        .context("Failed to prune deployment ledger")?;
    if removed > 0 {
        info!(removed, retention_days = settings.retention_days, "Pruned deployment ledger");
    }
    Ok(removed)
}

/// Build the configured indexing backend client.
pub fn build_backend(settings: &Settings) -> Result<Arc<dyn IndexingBackend>> {
    match settings.backend.kind {
        BackendKind::Http => {
            let config = HttpBackendConfig::from_settings(&settings.backend);
            let backend =
                HttpIndexingBackend::new(config).context("Failed to build indexing backend")?;
            Ok(Arc::new(backend))
        }
        BackendKind::Mock => {
            warn!("Using the mock indexing backend, no real ingestion jobs will run");
            Ok(Arc::new(MockIndexingBackend::new()))
        }
    }
}

/// Start the controller over the configured catalog, backend and store.
pub fn start_controller(settings: &Settings) -> Result<SyncController> {
    let catalog = Catalog::from_settings(settings).context("Invalid knowledge base catalog")?;
    let backend = build_backend(settings)?;
    let store = open_store(&settings.state)?;
    prune_deployments(store.as_ref(), &settings.deployments)?;
    Ok(SyncController::start(
        ControllerConfig::from(settings),
        Arc::new(catalog),
        backend,
        store,
    ))
}

/// Resolves on Ctrl+C or SIGTERM.
///
/// A handler that cannot be installed is logged and never fires.
fn shutdown_signal() -> impl Future<Output = ()> + Send + 'static {
    async {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, shutting down...");
            }
            _ = terminate => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }
}

/// Start the sync daemon.
///
/// 1. Load configuration (defaults -> file -> env -> CLI)
/// 2. Open the state store and start the controller
/// 3. Register one periodic ticker per knowledge base
/// 4. Serve gRPC until SIGINT/SIGTERM, then drain the controller
pub async fn start_daemon(
    config_path: Option<&str>,
    foreground: bool,
    port_override: Option<u16>,
    state_path_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<()> {
    let mut settings = load_settings(config_path, log_level_override)?;
    if let Some(port) = port_override {
        settings.grpc_port = port;
    }
    if let Some(path) = state_path_override {
        settings.state.path = path.to_string();
        settings.state.backend = StateBackend::Rocksdb;
    }

    init_logging(&settings.log_level)?;

    info!("kb-sync daemon starting...");
    info!("  gRPC address: {}", settings.grpc_addr());
    info!("  State backend: {:?}", settings.state.backend);
    info!("  Indexing backend: {}", settings.backend.endpoint);
    info!("  Knowledge bases: {}", settings.knowledge_bases.len());

    if !foreground {
        warn!("Background mode not implemented, running in foreground");
        warn!("Use a process manager (systemd, launchd) for background operation");
    }

    let addr: SocketAddr = settings
        .grpc_addr()
        .parse()
        .context("Invalid gRPC address")?;

    let controller = start_controller(&settings)?;

    let scheduler = Arc::new(
        SchedulerService::new(SchedulerConfig::from(&settings.scheduler))
            .await
            .context("Failed to create scheduler")?,
    );
    PeriodicTicker::new(controller.catalog(), controller.handle())
        .register(&scheduler)
        .await
        .context("Failed to register periodic tickers")?;

    let service = KbSyncServiceImpl::with_scheduler(
        &controller,
        &settings.deployments.resource_type,
        scheduler.clone(),
    );

    write_pid_file()?;

    let result = run_server_with_scheduler(addr, service, scheduler, shutdown_signal()).await;

    remove_pid_file();
    controller.shutdown().await;

    result.map_err(|e| anyhow::anyhow!("Server error: {}", e))
}

/// Stop the running daemon by sending SIGTERM.
pub fn stop_daemon() -> Result<()> {
    let pid = read_pid_file().context("No PID file found - daemon may not be running")?;

    if !is_process_running(pid) {
        remove_pid_file();
        anyhow::bail!("Daemon not running (stale PID file removed)");
    }

    #[cfg(unix)]
    {
        unsafe {
            if libc::kill(pid as i32, libc::SIGTERM) != 0 {
                anyhow::bail!("Failed to send SIGTERM to daemon");
            }
        }
        println!("Sent SIGTERM to daemon (PID {})", pid);
    }

    #[cfg(not(unix))]
    {
        anyhow::bail!("Stop command not implemented on this platform");
    }

    Ok(())
}

pub fn show_status() -> Result<()> {
    let pid_path = pid_file_path();

    match read_pid_file() {
        Some(pid) if is_process_running(pid) => {
            println!("kb-sync daemon is running (PID {})", pid);
            println!("PID file: {:?}", pid_path);
        }
        Some(pid) => {
            println!(
                "kb-sync daemon is NOT running (stale PID {} in {:?})",
                pid, pid_path
            );
        }
        None => {
            println!("kb-sync daemon is NOT running (no PID file)");
        }
    }
    Ok(())
}

/// Render settings as TOML with secrets redacted.
pub fn render_config(settings: &Settings) -> Result<String> {
    let mut shown = settings.clone();
    if shown.backend.api_token.is_some() {
        shown.backend.api_token = Some("<redacted>".to_string());
    }
    toml::to_string_pretty(&shown).context("Failed to render configuration")
}

pub fn show_config(config_path: Option<&str>) -> Result<()> {
    let settings = load_settings(config_path, None)?;
    print!("{}", render_config(&settings)?);
    Ok(())
}

pub async fn handle_trigger(endpoint: &str, knowledge_base_ids: &[String]) -> Result<()> {
    let ids: Vec<KnowledgeBaseId> = knowledge_base_ids
        .iter()
        .map(|id| KnowledgeBaseId::from(id.as_str()))
        .collect();

    let mut client = KbSyncClient::connect(endpoint).await?;
    let result = client.trigger_immediate_sync(&ids).await?;

    for r in &result.results {
        let outcome = match r.outcome() {
            OutcomeKind::Started => "started",
            OutcomeKind::Skipped => "skipped",
            OutcomeKind::Failed => "FAILED",
            OutcomeKind::Unspecified => "unknown",
        };
        println!(
            "{}/{}: {}{}{}",
            r.knowledge_base_id,
            r.data_source_id,
            outcome,
            r.job_id.as_deref().map(|j| format!(" job={}", j)).unwrap_or_default(),
            r.detail.as_deref().map(|d| format!(" ({})", d)).unwrap_or_default(),
        );
    }

    if !result.success {
        anyhow::bail!("Immediate sync failed");
    }
    Ok(())
}

pub async fn handle_sync_status(endpoint: &str, knowledge_base_id: Option<&str>) -> Result<()> {
    let mut client = KbSyncClient::connect(endpoint).await?;
    let statuses = client.get_sync_status(knowledge_base_id).await?;

    if statuses.is_empty() {
        println!("No data sources configured");
        return Ok(());
    }

    println!(
        "{:<20} {:<20} {:<12} {:<28} {:>8}",
        "KNOWLEDGE BASE", "DATA SOURCE", "STATUS", "LAST JOB", "FAILURES"
    );
    for s in statuses {
        println!(
            "{:<20} {:<20} {:<12} {:<28} {:>8}",
            s.knowledge_base_id,
            s.data_source_id,
            s.last_status,
            s.last_job_id.as_deref().unwrap_or("-"),
            s.consecutive_failures,
        );
        if let Some(failure) = &s.last_failure {
            println!("    last failure: {}", failure);
        }
    }
    Ok(())
}

pub async fn handle_ticker(endpoint: &str, command: TickerCommands) -> Result<()> {
    let mut client = KbSyncClient::connect(endpoint).await?;

    match command {
        TickerCommands::Status => {
            let status = client.get_ticker_status().await?;
            println!(
                "Scheduler: {}",
                if status.scheduler_running {
                    "running"
                } else {
                    "stopped"
                }
            );
            for t in status.tickers {
                println!(
                    "{:<20} {:<24} ticks={:<6} emitted={:<6} errors={:<4}{}",
                    t.name,
                    t.schedule,
                    t.tick_count,
                    t.requests_emitted,
                    t.error_count,
                    if t.is_paused { " [paused]" } else { "" },
                );
                if let Some(err) = t.last_error {
                    println!("    last error: {}", err);
                }
            }
        }
        TickerCommands::Pause { knowledge_base_id } => {
            client.pause_ticker(&knowledge_base_id).await?;
            println!("Paused ticker {}", knowledge_base_id);
        }
        TickerCommands::Resume { knowledge_base_id } => {
            client.resume_ticker(&knowledge_base_id).await?;
            println!("Resumed ticker {}", knowledge_base_id);
        }
    }
    Ok(())
}

/// Parse an inbound event file.
pub fn read_event(path: &str) -> Result<InboundEvent> {
    let expanded = shellexpand::full(path)
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| path.to_string());
    let raw = fs::read_to_string(Path::new(&expanded))
        .with_context(|| format!("Failed to read event file {}", expanded))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid event in {}", expanded))
}

/// Process one event without a daemon and print the summary as JSON.
///
/// Each call is an independent invocation, so deployment deduplication and
/// tick backoff only carry over with the rocksdb state backend.
pub async fn handle_event(
    config_path: Option<&str>,
    log_level: Option<&str>,
    file: &str,
) -> Result<()> {
    let settings = load_settings(config_path, log_level)?;
    init_logging(&settings.log_level)?;

    let event = read_event(file)?;
    if settings.state.backend == StateBackend::Memory {
        warn!("State backend is memory, backoff and deployment history will not persist");
    }

    let controller = start_controller(&settings)?;
    let result = process_event(&event, &controller, &settings.deployments.resource_type).await;
    controller.shutdown().await;

    let summary = result?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if !summary.is_success() {
        anyhow::bail!(
            "Sync failed for {} of {} data sources",
            summary.failed_count(),
            summary.entries.len()
        );
    }
    Ok(())
}
