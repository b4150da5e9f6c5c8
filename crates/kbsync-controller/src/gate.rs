//! Tick-counted retry backoff.
//!
//! Only periodic ticks are gated. A data source with `n` consecutive failed
//! starts becomes eligible again once it has seen `min(2^n, max_backoff_ticks)`
//! ticks since its last attempt.

use kbsync_types::{SkipReason, SyncState};

/// Decision of the backoff gate for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Eligible,
    Skip(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    max_backoff_ticks: u32,
}

impl BackoffPolicy {
    pub fn new(max_backoff_ticks: u32) -> Self {
        Self {
            max_backoff_ticks: max_backoff_ticks.max(1),
        }
    }

    pub fn max_backoff_ticks(&self) -> u32 {
        self.max_backoff_ticks
    }

    /// Ticks that must elapse after `failures` consecutive failures.
    pub fn required_ticks(&self, failures: u32) -> u32 {
        if failures == 0 {
            return 0;
        }
        let exp = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        exp.min(self.max_backoff_ticks)
    }

    /// Gate a periodic tick against the cached state.
    ///
    /// `state.ticks_since_attempt` must already include the current tick.
    pub fn check(&self, state: &SyncState) -> GateDecision {
        if state.consecutive_failures == 0 {
            return GateDecision::Eligible;
        }
        if let Some(failure) = state.last_failure {
            if !failure.is_retryable() {
                return GateDecision::Skip(SkipReason::NotRetryable);
            }
        }

        let required = self.required_ticks(state.consecutive_failures);
        if state.ticks_since_attempt >= required {
            GateDecision::Eligible
        } else {
            GateDecision::Skip(SkipReason::BackoffPending {
                remaining_ticks: required - state.ticks_since_attempt,
            })
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(16)
    }
}
