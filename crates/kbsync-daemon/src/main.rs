//! kb-sync daemon
//!
//! Keeps knowledge-base ingestion in step with its content sources.
//!
//! # Usage
//!
//! ```bash
//! kbsync-daemon start [--foreground] [--port PORT] [--state-path PATH]
//! kbsync-daemon stop
//! kbsync-daemon status
//! kbsync-daemon trigger KB_ID...
//! kbsync-daemon sync-status [--kb KB_ID]
//! kbsync-daemon ticker status|pause KB_ID|resume KB_ID
//! kbsync-daemon handle-event FILE
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/kb-sync/config.toml)
//! 3. Environment variables (KBSYNC_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use kbsync_daemon::{
    handle_event, handle_sync_status, handle_ticker, handle_trigger, show_config, show_status,
    start_daemon, stop_daemon, Cli, Commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            foreground,
            port,
            state_path,
        } => {
            start_daemon(
                cli.config.as_deref(),
                foreground,
                port,
                state_path.as_deref(),
                cli.log_level.as_deref(),
            )
            .await?;
        }
        Commands::Stop => {
            stop_daemon()?;
        }
        Commands::Status => {
            show_status()?;
        }
        Commands::Config => {
            show_config(cli.config.as_deref())?;
        }
        Commands::Trigger {
            knowledge_base_ids,
            endpoint,
        } => {
            handle_trigger(&endpoint, &knowledge_base_ids).await?;
        }
        Commands::SyncStatus { kb, endpoint } => {
            handle_sync_status(&endpoint, kb.as_deref()).await?;
        }
        Commands::Ticker { endpoint, command } => {
            handle_ticker(&endpoint, command).await?;
        }
        Commands::HandleEvent { file } => {
            handle_event(cli.config.as_deref(), cli.log_level.as_deref(), &file).await?;
        }
    }

    Ok(())
}
