//! Scheduler service wrapper around tokio-cron-scheduler.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono_tz::Tz;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::jitter::{with_jitter, JitterConfig};
use crate::registry::{TickResult, TickerRegistry};
use crate::{SchedulerConfig, SchedulerError, TickSchedule};

type TickFn = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<usize, String>> + Send + Sync>;

struct Ticker {
    job_id: Uuid,
    tick: TickFn,
}

/// Validate a 6-field cron expression (sec min hour day-of-month month day-of-week).
///
/// # Example
///
/// ```
/// use kbsync_scheduler::validate_cron_expression;
///
/// assert!(validate_cron_expression("0 0 * * * *").is_ok());
/// assert!(validate_cron_expression("invalid").is_err());
/// ```
pub fn validate_cron_expression(expr: &str) -> Result<(), SchedulerError> {
    match Job::new_async(expr, |_uuid, _lock| Box::pin(async {})) {
        Ok(_) => Ok(()),
        Err(e) => Err(SchedulerError::InvalidCron(format!("'{}': {}", expr, e))),
    }
}

/// Run one tick, honoring pause state and recording the result.
async fn run_tick(
    name: &str,
    registry: &TickerRegistry,
    tick: &TickFn,
    token: CancellationToken,
) -> TickResult {
    if token.is_cancelled() {
        return TickResult::Skipped("scheduler shutting down".to_string());
    }
    if registry.is_paused(name) {
        debug!(ticker = %name, "Ticker paused, skipping tick");
        let result = TickResult::Skipped("paused".to_string());
        registry.record_complete(name, result.clone());
        return result;
    }

    registry.record_start(name);
    let start = Instant::now();
    let result = match tick(token).await {
        Ok(emitted) => TickResult::Emitted(emitted),
        Err(e) => {
            warn!(ticker = %name, error = %e, "Tick failed");
            TickResult::Failed(e)
        }
    };
    info!(
        ticker = %name,
        duration_ms = start.elapsed().as_millis(),
        result = ?result,
        "Tick completed"
    );
    registry.record_complete(name, result.clone());
    result
}

/// Body handed to tokio-cron-scheduler for one ticker.
fn scheduled_body(
    name: String,
    registry: Arc<TickerRegistry>,
    tick: TickFn,
    jitter: JitterConfig,
    token: CancellationToken,
) -> impl FnMut(Uuid, JobScheduler) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static
{
    move |_uuid, _lock| {
        let name = name.clone();
        let registry = registry.clone();
        let tick = tick.clone();
        let token = token.clone();
        Box::pin(async move {
            with_jitter(jitter, run_tick(&name, &registry, &tick, token)).await;
        })
    }
}

/// Owns the tokio-cron-scheduler instance and every registered ticker.
pub struct SchedulerService {
    scheduler: JobScheduler,
    config: SchedulerConfig,
    registry: Arc<TickerRegistry>,
    tickers: RwLock<HashMap<String, Ticker>>,
    shutdown_token: CancellationToken,
    is_running: AtomicBool,
}

impl SchedulerService {
    /// Create a scheduler service. Call `start()` to begin ticking.
    pub async fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.parse_timezone()?;

        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            config,
            registry: Arc::new(TickerRegistry::new()),
            tickers: RwLock::new(HashMap::new()),
            shutdown_token: CancellationToken::new(),
            is_running: AtomicBool::new(false),
        })
    }

    /// # Errors
    ///
    /// Returns `SchedulerError::AlreadyRunning` if the scheduler is already started.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }

        self.scheduler.start().await?;
        info!(tickers = self.registry.ticker_count(), "Scheduler started");

        Ok(())
    }

    /// Stop ticking.
    ///
    /// Cancels the shutdown token, waits up to `shutdown_timeout_secs` for
    /// in-flight ticks, then stops the underlying scheduler.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::NotRunning` if the scheduler is not started.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(SchedulerError::NotRunning);
        }

        info!("Initiating scheduler shutdown");
        self.shutdown_token.cancel();

        let deadline = Instant::now() + Duration::from_secs(self.config.shutdown_timeout_secs);
        while self.registry.get_all_status().iter().any(|s| s.is_running) {
            if Instant::now() >= deadline {
                warn!("Shutdown timeout reached with ticks still running");
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let mut scheduler = self.scheduler.clone();
        if let Err(e) = scheduler.shutdown().await {
            warn!("Error during scheduler shutdown: {}", e);
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!("Scheduler shutdown complete");

        Ok(())
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> Arc<TickerRegistry> {
        self.registry.clone()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Register a ticker.
    ///
    /// `tick_fn` returns the number of requests it emitted, or an error
    /// message. Cron tickers use `timezone`, falling back to the configured
    /// default; interval tickers ignore it.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid schedule or timezone, or when a ticker
    /// with the same name already exists.
    pub async fn register_ticker<F, Fut>(
        &self,
        name: &str,
        schedule: TickSchedule,
        timezone: Option<&str>,
        jitter: JitterConfig,
        tick_fn: F,
    ) -> Result<Uuid, SchedulerError>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<usize, String>> + Send + 'static,
    {
        schedule.validate()?;
        let tz: Tz = match timezone {
            Some(tz_str) => Self::parse_timezone(tz_str)?,
            None => self.config.parse_timezone()?,
        };
        if self.registry.is_registered(name) {
            return Err(SchedulerError::Scheduler(format!(
                "ticker {} already registered",
                name
            )));
        }

        let tick: TickFn = Arc::new(move |token| tick_fn(token).boxed());
        let body = || {
            scheduled_body(
                name.to_string(),
                self.registry.clone(),
                tick.clone(),
                jitter,
                self.shutdown_token.clone(),
            )
        };

        let job = match &schedule {
            TickSchedule::Interval(every) => Job::new_repeated_async(*every, body())?,
            TickSchedule::Cron(expr) => Job::new_async_tz(expr.as_str(), tz, body())
                .map_err(|e| SchedulerError::InvalidCron(e.to_string()))?,
        };

        let job_id = self.scheduler.add(job).await?;
        self.registry.register(name, &schedule.to_string());
        self.tickers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Ticker { job_id, tick });

        info!(
            ticker = %name,
            uuid = %job_id,
            schedule = %schedule,
            timezone = %tz.name(),
            jitter_secs = jitter.max_jitter_secs,
            "Ticker registered"
        );
        Ok(job_id)
    }

    /// Run a ticker's body now, outside its schedule and without jitter.
    pub async fn run_now(&self, name: &str) -> Result<TickResult, SchedulerError> {
        let tick = self
            .tickers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|t| t.tick.clone())
            .ok_or_else(|| SchedulerError::TickerNotFound(name.to_string()))?;

        Ok(run_tick(name, &self.registry, &tick, self.shutdown_token.clone()).await)
    }

    /// Remove a ticker from the schedule and the registry.
    pub async fn remove_ticker(&self, name: &str) -> Result<(), SchedulerError> {
        let ticker = self
            .tickers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .ok_or_else(|| SchedulerError::TickerNotFound(name.to_string()))?;
        self.scheduler.remove(&ticker.job_id).await?;
        self.registry.unregister(name);
        info!(ticker = %name, uuid = %ticker.job_id, "Ticker removed");
        Ok(())
    }

    /// Paused tickers record a skipped tick instead of running.
    pub fn pause_ticker(&self, name: &str) -> Result<(), SchedulerError> {
        if !self.registry.set_paused(name, true) {
            return Err(SchedulerError::TickerNotFound(name.to_string()));
        }
        info!(ticker = %name, "Ticker paused");
        Ok(())
    }

    pub fn resume_ticker(&self, name: &str) -> Result<(), SchedulerError> {
        if !self.registry.set_paused(name, false) {
            return Err(SchedulerError::TickerNotFound(name.to_string()));
        }
        info!(ticker = %name, "Ticker resumed");
        Ok(())
    }

    pub fn parse_timezone(tz_str: &str) -> Result<Tz, SchedulerError> {
        tz_str
            .parse()
            .map_err(|_| SchedulerError::InvalidTimezone(tz_str.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn test_config() -> SchedulerConfig {
        SchedulerConfig {
            shutdown_timeout_secs: 1,
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scheduler_start_stop() {
        let scheduler = SchedulerService::new(test_config()).await.unwrap();
        assert!(!scheduler.is_running());

        scheduler.start().await.unwrap();
        assert!(scheduler.is_running());
        assert!(matches!(
            scheduler.start().await,
            Err(SchedulerError::AlreadyRunning)
        ));

        let token = scheduler.shutdown_token();
        scheduler.shutdown().await.unwrap();
        assert!(!scheduler.is_running());
        assert!(token.is_cancelled());
        assert!(matches!(
            scheduler.shutdown().await,
            Err(SchedulerError::NotRunning)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_timezone_config() {
        let config = SchedulerConfig {
            default_timezone: "Invalid/Zone".to_string(),
            ..Default::default()
        };
        let result = SchedulerService::new(config).await;
        assert!(matches!(result, Err(SchedulerError::InvalidTimezone(_))));
    }

    #[test]
    fn test_validate_cron_expression() {
        assert!(validate_cron_expression("0 0 * * * *").is_ok());
        assert!(validate_cron_expression("0 30 4 * * *").is_ok());
        assert!(validate_cron_expression("invalid").is_err());
        assert!(validate_cron_expression("* * *").is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_now_records_emitted() {
        let scheduler = SchedulerService::new(test_config()).await.unwrap();
        scheduler
            .register_ticker(
                "kb-1",
                TickSchedule::every_hours(24),
                None,
                JitterConfig::none(),
                |_token| async { Ok(2) },
            )
            .await
            .unwrap();

        let result = scheduler.run_now("kb-1").await.unwrap();
        assert_eq!(result, TickResult::Emitted(2));

        let status = scheduler.registry().get_status("kb-1").unwrap();
        assert_eq!(status.schedule, "every 24h");
        assert_eq!(status.tick_count, 1);
        assert_eq!(status.requests_emitted, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_paused_ticker_skips() {
        let scheduler = SchedulerService::new(test_config()).await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        scheduler
            .register_ticker(
                "kb-1",
                TickSchedule::every_hours(1),
                None,
                JitterConfig::none(),
                move |_token| {
                    let c = c.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Ok(1)
                    }
                },
            )
            .await
            .unwrap();

        scheduler.pause_ticker("kb-1").unwrap();
        let result = scheduler.run_now("kb-1").await.unwrap();
        assert!(matches!(result, TickResult::Skipped(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        scheduler.resume_ticker("kb-1").unwrap();
        scheduler.run_now("kb-1").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_ticker() {
        let scheduler = SchedulerService::new(test_config()).await.unwrap();
        assert!(matches!(
            scheduler.pause_ticker("nope"),
            Err(SchedulerError::TickerNotFound(_))
        ));
        assert!(matches!(
            scheduler.run_now("nope").await,
            Err(SchedulerError::TickerNotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_removed_ticker_can_be_registered_again() {
        let scheduler = SchedulerService::new(test_config()).await.unwrap();
        scheduler
            .register_ticker(
                "kb-1",
                TickSchedule::every_hours(24),
                None,
                JitterConfig::none(),
                |_token| async { Ok(1) },
            )
            .await
            .unwrap();

        scheduler.remove_ticker("kb-1").await.unwrap();
        assert!(scheduler.registry().get_status("kb-1").is_none());
        assert!(matches!(
            scheduler.run_now("kb-1").await,
            Err(SchedulerError::TickerNotFound(_))
        ));
        assert!(matches!(
            scheduler.remove_ticker("kb-1").await,
            Err(SchedulerError::TickerNotFound(_))
        ));

        scheduler
            .register_ticker(
                "kb-1",
                TickSchedule::every_hours(1),
                None,
                JitterConfig::none(),
                |_token| async { Ok(3) },
            )
            .await
            .unwrap();
        assert_eq!(scheduler.run_now("kb-1").await.unwrap(), TickResult::Emitted(3));
        assert_eq!(scheduler.registry().get_status("kb-1").unwrap().schedule, "every 1h");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_duplicate_and_invalid_registrations() {
        let scheduler = SchedulerService::new(test_config()).await.unwrap();
        scheduler
            .register_ticker(
                "kb-1",
                TickSchedule::Cron("0 0 3 * * *".to_string()),
                Some("Europe/Berlin"),
                JitterConfig::new(10),
                |_token| async { Ok(0) },
            )
            .await
            .unwrap();

        let dup = scheduler
            .register_ticker(
                "kb-1",
                TickSchedule::every_hours(1),
                None,
                JitterConfig::none(),
                |_token| async { Ok(0) },
            )
            .await;
        assert!(dup.is_err());

        let bad_cron = scheduler
            .register_ticker(
                "kb-2",
                TickSchedule::Cron("nope".to_string()),
                None,
                JitterConfig::none(),
                |_token| async { Ok(0) },
            )
            .await;
        assert!(matches!(bad_cron, Err(SchedulerError::InvalidCron(_))));

        let bad_tz = scheduler
            .register_ticker(
                "kb-3",
                TickSchedule::Cron("0 0 3 * * *".to_string()),
                Some("Mars/Olympus"),
                JitterConfig::none(),
                |_token| async { Ok(0) },
            )
            .await;
        assert!(matches!(bad_tz, Err(SchedulerError::InvalidTimezone(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_interval_ticker_fires() {
        let scheduler = SchedulerService::new(test_config()).await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        scheduler
            .register_ticker(
                "fast",
                TickSchedule::Interval(Duration::from_secs(1)),
                None,
                JitterConfig::none(),
                move |_token| {
                    let c = c.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Ok(1)
                    }
                },
            )
            .await
            .unwrap();

        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.shutdown().await.unwrap();

        assert!(calls.load(Ordering::SeqCst) >= 1);
        let status = scheduler.registry().get_status("fast").unwrap();
        assert!(status.tick_count >= 1);
    }
}
