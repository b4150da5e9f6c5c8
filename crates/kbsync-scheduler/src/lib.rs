//! Periodic tick scheduling for the kb-sync controller.
//!
//! Wraps `tokio-cron-scheduler` with:
//!
//! - Fixed-interval and timezone-aware cron tickers
//! - Pause / resume per ticker
//! - Tick status observability via [`TickerRegistry`]
//! - Optional jitter so tickers sharing an interval do not fire together
//! - Graceful shutdown via `CancellationToken`
//!
//! # Example
//!
//! ```ignore
//! use kbsync_scheduler::{JitterConfig, SchedulerConfig, SchedulerService, TickSchedule};
//!
//! let scheduler = SchedulerService::new(SchedulerConfig::default()).await?;
//! scheduler
//!     .register_ticker(
//!         "kb-1",
//!         TickSchedule::every_hours(24),
//!         None,
//!         JitterConfig::new(30),
//!         |_token| async { Ok(2) },
//!     )
//!     .await?;
//! scheduler.start().await?;
//! ```

mod config;
mod error;
mod jitter;
mod registry;
mod schedule;
mod scheduler;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use jitter::{with_jitter, JitterConfig};
pub use registry::{TickResult, TickerRegistry, TickerStatus};
pub use schedule::TickSchedule;
pub use scheduler::{validate_cron_expression, SchedulerService};
