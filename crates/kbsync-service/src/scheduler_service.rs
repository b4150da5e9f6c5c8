//! Ticker status and control RPCs.
//!
//! - GetTickerStatus: scheduler running state and every ticker's history
//! - PauseTicker: a paused ticker records skipped ticks instead of fanning out
//! - ResumeTicker: undo a pause

use std::sync::Arc;

use tonic::{Request, Response, Status};

use kbsync_scheduler::{SchedulerService, TickResult, TickerRegistry};

use crate::pb::{
    GetTickerStatusRequest, GetTickerStatusResponse, PauseTickerRequest, PauseTickerResponse,
    ResumeTickerRequest, ResumeTickerResponse, TickResultStatus, TickerStatusProto,
};

/// Convert a tick result to the proto enum and its message.
fn tick_result_to_proto(result: &TickResult) -> (TickResultStatus, Option<String>) {
    match result {
        TickResult::Emitted(_) => (TickResultStatus::Emitted, None),
        TickResult::Failed(msg) => (TickResultStatus::Failed, Some(msg.clone())),
        TickResult::Skipped(msg) => (TickResultStatus::Skipped, Some(msg.clone())),
    }
}

/// gRPC handlers over a shared [`SchedulerService`].
pub struct SchedulerGrpcService {
    scheduler: Arc<SchedulerService>,
}

impl SchedulerGrpcService {
    pub fn new(scheduler: Arc<SchedulerService>) -> Self {
        Self { scheduler }
    }

    pub fn registry(&self) -> Arc<TickerRegistry> {
        self.scheduler.registry()
    }

    pub async fn get_ticker_status(
        &self,
        _request: Request<GetTickerStatusRequest>,
    ) -> Result<Response<GetTickerStatusResponse>, Status> {
        let tickers = self
            .scheduler
            .registry()
            .get_all_status()
            .into_iter()
            .map(|s| {
                let (result_status, error) = s
                    .last_result
                    .as_ref()
                    .map(tick_result_to_proto)
                    .unwrap_or((TickResultStatus::Unspecified, None));

                TickerStatusProto {
                    name: s.name,
                    schedule: s.schedule,
                    last_tick_ms: s.last_tick.map(|t| t.timestamp_millis()).unwrap_or(0),
                    last_result: result_status.into(),
                    last_error: error,
                    tick_count: s.tick_count,
                    requests_emitted: s.requests_emitted,
                    error_count: s.error_count,
                    is_running: s.is_running,
                    is_paused: s.is_paused,
                }
            })
            .collect();

        Ok(Response::new(GetTickerStatusResponse {
            scheduler_running: self.scheduler.is_running(),
            tickers,
        }))
    }

    pub async fn pause_ticker(
        &self,
        request: Request<PauseTickerRequest>,
    ) -> Result<Response<PauseTickerResponse>, Status> {
        let name = &request.get_ref().ticker_name;

        match self.scheduler.pause_ticker(name) {
            Ok(()) => Ok(Response::new(PauseTickerResponse {
                success: true,
                error: None,
            })),
            Err(e) => Ok(Response::new(PauseTickerResponse {
                success: false,
                error: Some(e.to_string()),
            })),
        }
    }

    pub async fn resume_ticker(
        &self,
        request: Request<ResumeTickerRequest>,
    ) -> Result<Response<ResumeTickerResponse>, Status> {
        let name = &request.get_ref().ticker_name;

        match self.scheduler.resume_ticker(name) {
            Ok(()) => Ok(Response::new(ResumeTickerResponse {
                success: true,
                error: None,
            })),
            Err(e) => Ok(Response::new(ResumeTickerResponse {
                success: false,
                error: Some(e.to_string()),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbsync_scheduler::{JitterConfig, SchedulerConfig, TickSchedule};

    async fn scheduler_with_ticker(name: &str) -> Arc<SchedulerService> {
        let scheduler = SchedulerService::new(SchedulerConfig::default()).await.unwrap();
        scheduler
            .register_ticker(
                name,
                TickSchedule::every_hours(24),
                None,
                JitterConfig::none(),
                |_token| async { Ok(2) },
            )
            .await
            .unwrap();
        Arc::new(scheduler)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_get_ticker_status_empty() {
        let scheduler = Arc::new(SchedulerService::new(SchedulerConfig::default()).await.unwrap());
        let service = SchedulerGrpcService::new(scheduler);

        let resp = service
            .get_ticker_status(Request::new(GetTickerStatusRequest {}))
            .await
            .unwrap()
            .into_inner();

        assert!(!resp.scheduler_running);
        assert!(resp.tickers.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_get_ticker_status_after_tick() {
        let scheduler = scheduler_with_ticker("kb-1").await;
        scheduler.run_now("kb-1").await.unwrap();
        let service = SchedulerGrpcService::new(scheduler);

        let resp = service
            .get_ticker_status(Request::new(GetTickerStatusRequest {}))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(resp.tickers.len(), 1);
        let ticker = &resp.tickers[0];
        assert_eq!(ticker.name, "kb-1");
        assert_eq!(ticker.schedule, "every 24h");
        assert_eq!(ticker.last_result, TickResultStatus::Emitted as i32);
        assert_eq!(ticker.requests_emitted, 2);
        assert!(ticker.last_tick_ms > 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pause_and_resume_ticker() {
        let scheduler = scheduler_with_ticker("kb-1").await;
        let service = SchedulerGrpcService::new(scheduler.clone());

        let resp = service
            .pause_ticker(Request::new(PauseTickerRequest {
                ticker_name: "kb-1".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(resp.success);
        assert!(scheduler.registry().is_paused("kb-1"));

        let resp = service
            .resume_ticker(Request::new(ResumeTickerRequest {
                ticker_name: "kb-1".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(resp.success);
        assert!(resp.error.is_none());
        assert!(!scheduler.registry().is_paused("kb-1"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pause_unknown_ticker() {
        let scheduler = scheduler_with_ticker("kb-1").await;
        let service = SchedulerGrpcService::new(scheduler);

        let resp = service
            .pause_ticker(Request::new(PauseTickerRequest {
                ticker_name: "kb-404".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(!resp.success);
        assert!(resp.error.is_some());
    }

    #[test]
    fn test_tick_result_to_proto() {
        let (status, error) = tick_result_to_proto(&TickResult::Emitted(3));
        assert_eq!(status, TickResultStatus::Emitted);
        assert!(error.is_none());

        let (status, error) = tick_result_to_proto(&TickResult::Failed("closed".to_string()));
        assert_eq!(status, TickResultStatus::Failed);
        assert_eq!(error, Some("closed".to_string()));
    }
}
