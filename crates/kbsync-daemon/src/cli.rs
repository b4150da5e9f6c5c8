//! CLI argument parsing for the kb-sync daemon.
//!
//! CLI flags override every other configuration source.

use clap::{Parser, Subcommand};

use kbsync_client::DEFAULT_ENDPOINT;

/// Knowledge-base ingestion sync daemon
///
/// Turns storage changes, deployments and periodic ticks into at most one
/// running ingestion job per data source.
#[derive(Parser, Debug)]
#[command(name = "kbsync-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/kb-sync/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the sync daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,

        /// Override gRPC port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override sync state path (implies the rocksdb state backend)
        #[arg(long)]
        state_path: Option<String>,
    },

    /// Stop the running daemon
    Stop,

    /// Show daemon status
    Status,

    /// Print the effective configuration as TOML
    Config,

    /// Sync every data source of the given knowledge bases now
    Trigger {
        /// Knowledge base ids
        #[arg(required = true)]
        knowledge_base_ids: Vec<String>,

        #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
        endpoint: String,
    },

    /// Show the last known sync state of each data source
    SyncStatus {
        /// Only show this knowledge base
        #[arg(long)]
        kb: Option<String>,

        #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
        endpoint: String,
    },

    /// Periodic ticker management
    Ticker {
        #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
        endpoint: String,

        #[command(subcommand)]
        command: TickerCommands,
    },

    /// Process one inbound event JSON file without a running daemon
    HandleEvent {
        /// Path to the event file
        file: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum TickerCommands {
    /// Show ticker status
    Status,

    /// Pause the ticker of a knowledge base
    Pause {
        /// Knowledge base id (tickers are named after it)
        knowledge_base_id: String,
    },

    /// Resume a paused ticker
    Resume { knowledge_base_id: String },
}
