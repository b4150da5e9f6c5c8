//! kb-sync daemon library exports.
//!
//! - `cli`: command-line argument parsing with clap
//! - `commands`: command implementations
//! - `event`: single-event processing for per-invocation deployments

pub mod cli;
pub mod commands;
pub mod event;

pub use cli::{Cli, Commands, TickerCommands};
pub use commands::{
    build_backend, handle_event, handle_sync_status, handle_ticker, handle_trigger, open_store,
    prune_deployments, read_event, render_config, show_config, show_status, start_controller,
    start_daemon, stop_daemon,
};
pub use event::process_event;
