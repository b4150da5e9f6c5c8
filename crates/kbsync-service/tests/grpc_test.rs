//! End-to-end tests over a real gRPC connection.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tonic::transport::Channel;
use tonic_health::pb::{health_client::HealthClient, HealthCheckRequest};

use kbsync_backend::{BackendError, MockIndexingBackend};
use kbsync_controller::{ControllerConfig, PeriodicTicker, SyncController};
use kbsync_scheduler::{SchedulerConfig, SchedulerService};
use kbsync_service::pb::{
    kb_sync_service_client::KbSyncServiceClient, GetSyncStatusRequest, GetTickerStatusRequest,
    NotifyObjectChangeRequest, OutcomeKind, PauseTickerRequest, TriggerImmediateSyncRequest,
};
use kbsync_service::{run_server_with_scheduler, KbSyncServiceImpl};
use kbsync_storage::MemoryStateStore;
use kbsync_types::{Catalog, DataSourceId, DataSourceSettings, KnowledgeBaseSettings};

struct TestServer {
    addr: SocketAddr,
    backend: Arc<MockIndexingBackend>,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<()>,
    controller: SyncController,
}

impl TestServer {
    async fn start() -> Self {
        let kbs = vec![KnowledgeBaseSettings {
            id: "kb-1".to_string(),
            check_interval_hours: 24,
            schedule: None,
            jitter_secs: 0,
            data_sources: vec![
                DataSourceSettings {
                    id: "ds-1".to_string(),
                    bucket: Some("bucket-1".to_string()),
                    deployment_resource: None,
                },
                DataSourceSettings {
                    id: "ds-2".to_string(),
                    bucket: Some("bucket-2".to_string()),
                    deployment_resource: None,
                },
            ],
        }];
        let catalog = Arc::new(Catalog::from_knowledge_bases(&kbs).unwrap());
        let backend = Arc::new(MockIndexingBackend::new());
        let controller = SyncController::start(
            ControllerConfig::default(),
            catalog.clone(),
            backend.clone(),
            Arc::new(MemoryStateStore::new()),
        );

        let scheduler = Arc::new(SchedulerService::new(SchedulerConfig::default()).await.unwrap());
        PeriodicTicker::new(catalog, controller.handle())
            .register(&scheduler)
            .await
            .unwrap();
        let service = KbSyncServiceImpl::with_scheduler(
            &controller,
            "AWS::S3::BucketDeployment",
            scheduler.clone(),
        );

        let addr = free_addr();
        let (tx, rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            run_server_with_scheduler(addr, service, scheduler, async {
                rx.await.ok();
            })
            .await
            .unwrap();
        });

        Self {
            addr,
            backend,
            shutdown: tx,
            server,
            controller,
        }
    }

    async fn channel(&self) -> Channel {
        let endpoint = format!("http://{}", self.addr);
        for _ in 0..50 {
            if let Ok(channel) = Channel::from_shared(endpoint.clone()).unwrap().connect().await {
                return channel;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("server did not come up on {}", endpoint);
    }

    async fn stop(self) {
        self.shutdown.send(()).ok();
        tokio::time::timeout(Duration::from_secs(5), self.server)
            .await
            .expect("server stops")
            .unwrap();
        self.controller.shutdown().await;
    }
}

fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_health_reports_serving() {
    let server = TestServer::start().await;
    let mut health = HealthClient::new(server.channel().await);

    let resp = health
        .check(HealthCheckRequest {
            service: "kbsync.KbSyncService".to_string(),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(resp.status, 1, "SERVING");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_immediate_sync_over_grpc() {
    let server = TestServer::start().await;
    let mut client = KbSyncServiceClient::new(server.channel().await);

    let first = client
        .trigger_immediate_sync(TriggerImmediateSyncRequest {
            knowledge_base_ids: vec!["kb-1".to_string()],
        })
        .await
        .unwrap()
        .into_inner();
    assert!(first.success);
    assert!(first
        .results
        .iter()
        .all(|r| r.outcome == OutcomeKind::Started as i32));

    let second = client
        .trigger_immediate_sync(TriggerImmediateSyncRequest {
            knowledge_base_ids: vec!["kb-1".to_string()],
        })
        .await
        .unwrap()
        .into_inner();
    assert!(second.success);
    assert!(second
        .results
        .iter()
        .all(|r| r.outcome == OutcomeKind::Skipped as i32));
    assert_eq!(server.backend.total_start_calls(), 2);

    let err = client
        .trigger_immediate_sync(TriggerImmediateSyncRequest {
            knowledge_base_ids: vec!["kb-unknown".to_string()],
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::NotFound);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_partial_failure_is_ok_status_with_success_false() {
    let server = TestServer::start().await;
    server
        .backend
        .fail_next_start(&DataSourceId::from("ds-1"), BackendError::throttled("slow down"));
    let mut client = KbSyncServiceClient::new(server.channel().await);

    let resp = client
        .trigger_immediate_sync(TriggerImmediateSyncRequest {
            knowledge_base_ids: vec!["kb-1".to_string()],
        })
        .await
        .expect("partial failure keeps an OK status")
        .into_inner();
    assert!(!resp.success);
    let failed: Vec<_> = resp
        .results
        .iter()
        .filter(|r| r.outcome == OutcomeKind::Failed as i32)
        .map(|r| r.data_source_id.as_str())
        .collect();
    assert_eq!(failed, vec!["ds-1"]);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_change_notification_then_status() {
    let server = TestServer::start().await;
    let mut client = KbSyncServiceClient::new(server.channel().await);

    let resp = client
        .notify_object_change(NotifyObjectChangeRequest {
            bucket: "bucket-2".to_string(),
            key: None,
        })
        .await
        .unwrap()
        .into_inner();
    assert!(resp.routed);

    let mut started = false;
    for _ in 0..50 {
        let status = client
            .get_sync_status(GetSyncStatusRequest {
                knowledge_base_id: None,
            })
            .await
            .unwrap()
            .into_inner();
        let ds2 = status
            .data_sources
            .iter()
            .find(|s| s.data_source_id == "ds-2")
            .unwrap();
        if ds2.last_status == "STARTING" {
            started = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(started, "ds-2 should reach STARTING");
    assert_eq!(server.backend.start_calls(&"ds-1".into()), 0);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ticker_control_over_grpc() {
    let server = TestServer::start().await;
    let mut client = KbSyncServiceClient::new(server.channel().await);

    let status = client
        .get_ticker_status(GetTickerStatusRequest {})
        .await
        .unwrap()
        .into_inner();
    assert!(status.scheduler_running);
    assert_eq!(status.tickers.len(), 1);
    assert_eq!(status.tickers[0].name, "kb-1");

    let paused = client
        .pause_ticker(PauseTickerRequest {
            ticker_name: "kb-1".to_string(),
        })
        .await
        .unwrap()
        .into_inner();
    assert!(paused.success);

    let status = client
        .get_ticker_status(GetTickerStatusRequest {})
        .await
        .unwrap()
        .into_inner();
    assert!(status.tickers[0].is_paused);

    server.stop().await;
}
