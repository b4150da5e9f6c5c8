//! Ticker registry for tracking tick history and pause state.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TickResult {
    /// Tick fanned out this many sync requests
    Emitted(usize),
    /// Tick body reported an error
    Failed(String),
    /// Tick did not run (paused)
    Skipped(String),
}

/// Status of a registered ticker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerStatus {
    pub name: String,
    /// Human readable schedule, e.g. "every 24h"
    pub schedule: String,
    pub last_tick: Option<DateTime<Utc>>,
    pub last_result: Option<TickResult>,
    pub tick_count: u64,
    /// Sync requests emitted over the ticker's lifetime
    pub requests_emitted: u64,
    pub error_count: u64,
    pub is_running: bool,
    pub is_paused: bool,
}

impl TickerStatus {
    pub fn new(name: String, schedule: String) -> Self {
        Self {
            name,
            schedule,
            last_tick: None,
            last_result: None,
            tick_count: 0,
            requests_emitted: 0,
            error_count: 0,
            is_running: false,
            is_paused: false,
        }
    }
}

/// Thread-safe record of every ticker's status.
///
/// # Example
///
/// ```
/// use kbsync_scheduler::{TickResult, TickerRegistry};
///
/// let registry = TickerRegistry::new();
/// registry.register("kb-1", "every 24h");
///
/// registry.record_start("kb-1");
/// assert!(registry.is_running("kb-1"));
///
/// registry.record_complete("kb-1", TickResult::Emitted(2));
/// assert_eq!(registry.get_status("kb-1").unwrap().requests_emitted, 2);
/// ```
#[derive(Default)]
pub struct TickerRegistry {
    tickers: RwLock<BTreeMap<String, TickerStatus>>,
}

impl TickerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, TickerStatus>> {
        self.tickers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, TickerStatus>> {
        self.tickers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a ticker, replacing any previous entry with the same name.
    pub fn register(&self, name: &str, schedule: &str) {
        self.write().insert(
            name.to_string(),
            TickerStatus::new(name.to_string(), schedule.to_string()),
        );
    }

    /// Returns `false` if the ticker is not registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.write().remove(name).is_some()
    }

    pub fn record_start(&self, name: &str) {
        if let Some(status) = self.write().get_mut(name) {
            status.is_running = true;
        }
    }

    pub fn record_complete(&self, name: &str, result: TickResult) {
        if let Some(status) = self.write().get_mut(name) {
            status.is_running = false;
            status.last_tick = Some(Utc::now());
            status.tick_count += 1;
            match &result {
                TickResult::Emitted(n) => status.requests_emitted += *n as u64,
                TickResult::Failed(_) => status.error_count += 1,
                TickResult::Skipped(_) => {}
            }
            status.last_result = Some(result);
        }
    }

    /// Returns `false` if the ticker is not registered.
    pub fn set_paused(&self, name: &str, paused: bool) -> bool {
        match self.write().get_mut(name) {
            Some(status) => {
                status.is_paused = paused;
                true
            }
            None => false,
        }
    }

    pub fn get_status(&self, name: &str) -> Option<TickerStatus> {
        self.read().get(name).cloned()
    }

    /// Every ticker, ordered by name.
    pub fn get_all_status(&self) -> Vec<TickerStatus> {
        self.read().values().cloned().collect()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.read().get(name).map(|s| s.is_running).unwrap_or(false)
    }

    pub fn is_paused(&self, name: &str) -> bool {
        self.read().get(name).map(|s| s.is_paused).unwrap_or(false)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub fn ticker_count(&self) -> usize {
        self.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_get() {
        let registry = TickerRegistry::new();
        registry.register("kb-1", "every 24h");

        let status = registry.get_status("kb-1").unwrap();
        assert_eq!(status.schedule, "every 24h");
        assert_eq!(status.tick_count, 0);
        assert!(!status.is_paused);
        assert!(registry.get_status("kb-2").is_none());
    }

    #[test]
    fn test_record_results() {
        let registry = TickerRegistry::new();
        registry.register("kb-1", "every 24h");

        registry.record_start("kb-1");
        registry.record_complete("kb-1", TickResult::Emitted(3));
        registry.record_complete("kb-1", TickResult::Failed("queue closed".into()));
        registry.record_complete("kb-1", TickResult::Skipped("paused".into()));

        let status = registry.get_status("kb-1").unwrap();
        assert!(!status.is_running);
        assert_eq!(status.tick_count, 3);
        assert_eq!(status.requests_emitted, 3);
        assert_eq!(status.error_count, 1);
        assert_eq!(status.last_result, Some(TickResult::Skipped("paused".into())));
        assert!(status.last_tick.is_some());
    }

    #[test]
    fn test_pause_unknown_ticker() {
        let registry = TickerRegistry::new();
        assert!(!registry.set_paused("nope", true));
        assert!(!registry.is_paused("nope"));
    }

    #[test]
    fn test_unregister() {
        let registry = TickerRegistry::new();
        registry.register("kb-1", "every 24h");

        assert!(registry.unregister("kb-1"));
        assert!(!registry.is_registered("kb-1"));
        assert!(!registry.unregister("kb-1"));
    }

    #[test]
    fn test_all_status_sorted() {
        let registry = TickerRegistry::new();
        registry.register("kb-b", "every 1h");
        registry.register("kb-a", "every 1h");
        let names: Vec<_> = registry.get_all_status().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["kb-a", "kb-b"]);
        assert_eq!(registry.ticker_count(), 2);
    }
}
