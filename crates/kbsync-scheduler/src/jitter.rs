//! Jitter for tickers that share an interval.
//!
//! N knowledge bases on the same 24h interval would otherwise hit the
//! backend in the same second.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Configuration for tick jitter.
///
/// # Example
///
/// ```
/// use kbsync_scheduler::JitterConfig;
///
/// let config = JitterConfig::new(30);
/// let delay = config.generate_jitter();
/// assert!(delay <= std::time::Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JitterConfig {
    /// Maximum jitter in seconds (0 = no jitter).
    pub max_jitter_secs: u64,
}

impl JitterConfig {
    pub fn new(max_jitter_secs: u64) -> Self {
        Self { max_jitter_secs }
    }

    pub fn none() -> Self {
        Self { max_jitter_secs: 0 }
    }

    /// Random duration in `[0, max_jitter_secs)`, or zero when disabled.
    pub fn generate_jitter(&self) -> Duration {
        if self.max_jitter_secs == 0 {
            return Duration::ZERO;
        }
        let jitter_ms = rand::rng().random_range(0..self.max_jitter_secs * 1000);
        Duration::from_millis(jitter_ms)
    }

    pub fn is_enabled(&self) -> bool {
        self.max_jitter_secs > 0
    }
}

/// Run `job_fn` after a random delay of up to `config.max_jitter_secs`.
pub async fn with_jitter<F, T>(config: JitterConfig, job_fn: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let jitter = config.generate_jitter();
    if !jitter.is_zero() {
        tracing::debug!(jitter_ms = jitter.as_millis(), "Applying jitter delay");
        tokio::time::sleep(jitter).await;
    }
    job_fn.await
}
