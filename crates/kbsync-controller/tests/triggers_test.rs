//! Trigger adapter tests: routing, filtering and deployment exactly-once.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use common::{ds, kb, Harness};
use kbsync_controller::{ChangeListener, ControllerError, DeploymentListener, PeriodicTicker};
use kbsync_scheduler::{SchedulerConfig, SchedulerService, TickResult};
use kbsync_storage::{RocksStateStore, SyncStateStore};
use kbsync_types::{
    DeploymentStatusEvent, ObjectChangeEvent, ScheduleEvent, SkipReason, SyncOutcome, SyncReason,
};

const RESOURCE_TYPE: &str = "AWS::S3::BucketDeployment";

fn deployment(resource: &str, status: &str, event_id: &str) -> DeploymentStatusEvent {
    DeploymentStatusEvent {
        resource_type: RESOURCE_TYPE.to_string(),
        resource_status: status.to_string(),
        logical_resource_id: resource.to_string(),
        event_id: event_id.to_string(),
    }
}

/// Wait until every request already queued for `data_source` has run.
async fn settle(h: &Harness, data_source: &str) -> SyncOutcome {
    h.request(data_source, SyncReason::ManualInvoke).await
}

#[tokio::test]
async fn test_object_change_routes_to_bucket_data_source() {
    let h = Harness::new();
    let listener = ChangeListener::new(h.catalog.clone(), h.handle());

    let routed = listener
        .on_object_change(&ObjectChangeEvent::new("bucket-2"))
        .unwrap();
    assert_eq!(routed, Some(ds("ds-2")));

    assert_eq!(
        settle(&h, "ds-2").await,
        SyncOutcome::skipped(SkipReason::AlreadyInProgress)
    );
    assert_eq!(h.backend.start_calls(&ds("ds-2")), 1);
}

#[tokio::test]
async fn test_object_change_in_unknown_bucket_ignored() {
    let h = Harness::new();
    let listener = ChangeListener::new(h.catalog.clone(), h.handle());

    let event = ObjectChangeEvent {
        bucket: "someone-elses-bucket".to_string(),
        key: Some("docs/readme.md".to_string()),
    };
    assert_eq!(listener.route(&event), None);
    assert_eq!(listener.on_object_change(&event).unwrap(), None);
    assert!(h.store.load_all().unwrap().is_empty());
    assert_eq!(h.backend.total_start_calls(), 0);
}

#[tokio::test]
async fn test_deployment_filter() {
    let h = Harness::new();
    let listener =
        DeploymentListener::new(h.catalog.clone(), h.store.clone(), h.handle(), RESOURCE_TYPE);

    let mut wrong_type = deployment("Deployment1", "CREATE_COMPLETE", "e-1");
    wrong_type.resource_type = "AWS::Lambda::Function".to_string();
    let cases = [
        ("wrong resource type", wrong_type),
        (
            "still in progress",
            deployment("Deployment1", "CREATE_IN_PROGRESS", "e-2"),
        ),
        ("failed", deployment("Deployment1", "CREATE_FAILED", "e-3")),
        (
            "unmapped resource",
            deployment("OtherDeployment", "CREATE_COMPLETE", "e-4"),
        ),
    ];
    for (label, event) in &cases {
        assert_eq!(listener.route(event).unwrap(), None, "{} must be filtered", label);
    }
    assert_eq!(h.store.stats().unwrap().deployments, 0, "Filtered events are not recorded");

    let completed = listener
        .route(&deployment("Deployment1", "UPDATE_COMPLETE", "e-5"))
        .unwrap()
        .expect("complete deployment passes");
    assert_eq!(completed.data_source_id(), &ds("ds-1"));
    assert_eq!(completed.logical_resource_id(), "Deployment1");
    assert_eq!(completed.event_id(), "e-5");

    let request = completed.into_request();
    assert_eq!(request.reason, SyncReason::DeploymentComplete);
}

#[tokio::test]
async fn test_deployment_redelivery_syncs_once() {
    let h = Harness::new();
    let listener =
        DeploymentListener::new(h.catalog.clone(), h.store.clone(), h.handle(), RESOURCE_TYPE);
    let event = deployment("Deployment1", "CREATE_COMPLETE", "e-1");

    assert_eq!(listener.on_deployment_status(&event).unwrap(), Some(ds("ds-1")));
    for _ in 0..3 {
        assert_eq!(listener.on_deployment_status(&event).unwrap(), None);
    }

    settle(&h, "ds-1").await;
    assert_eq!(h.backend.start_calls(&ds("ds-1")), 1);

    // A new deployment of the same resource is a new event.
    h.backend.complete_active_job(&ds("ds-1"));
    let next = deployment("Deployment1", "UPDATE_COMPLETE", "e-2");
    assert_eq!(listener.on_deployment_status(&next).unwrap(), Some(ds("ds-1")));
    settle(&h, "ds-1").await;
    assert_eq!(h.backend.start_calls(&ds("ds-1")), 2);
}

#[tokio::test]
async fn test_refused_deployment_is_released() {
    let h = Harness::new();
    let listener =
        DeploymentListener::new(h.catalog.clone(), h.store.clone(), h.handle(), RESOURCE_TYPE);
    let event = deployment("Deployment1", "CREATE_COMPLETE", "e-1");
    h.controller.shutdown().await;

    let err = listener.on_deployment_status(&event).unwrap_err();
    assert!(matches!(err, ControllerError::Closed));

    let restarted = Harness::with_store(common::config(), h.store.clone());
    let listener = DeploymentListener::new(
        restarted.catalog.clone(),
        restarted.store.clone(),
        restarted.handle(),
        RESOURCE_TYPE,
    );
    assert_eq!(listener.on_deployment_status(&event).unwrap(), Some(ds("ds-1")));
    settle(&restarted, "ds-1").await;
    assert_eq!(restarted.backend.start_calls(&ds("ds-1")), 1);
}

#[tokio::test]
async fn test_pending_deployment_is_not_claimed() {
    let h = Harness::new();
    let listener =
        DeploymentListener::new(h.catalog.clone(), h.store.clone(), h.handle(), RESOURCE_TYPE);
    let event = deployment("Deployment1", "CREATE_COMPLETE", "e-1");

    let completed = listener.pending(&event).unwrap().unwrap();
    assert!(listener.pending(&event).unwrap().is_some());
    assert!(listener.claim(&completed).unwrap());
    assert_eq!(listener.pending(&event).unwrap(), None);
    assert!(!listener.claim(&completed).unwrap());
}

#[tokio::test]
async fn test_deployment_ledger_survives_restart() {
    let dir = TempDir::new().unwrap();
    let event = deployment("Deployment3", "CREATE_COMPLETE", "stack-1:e-9");

    {
        let store: Arc<dyn SyncStateStore> = Arc::new(RocksStateStore::open(dir.path()).unwrap());
        let h = Harness::with_store(common::config(), store);
        let listener =
            DeploymentListener::new(h.catalog.clone(), h.store.clone(), h.handle(), RESOURCE_TYPE);
        assert!(listener.route(&event).unwrap().is_some());
        h.controller.shutdown().await;
    }

    let store: Arc<dyn SyncStateStore> = Arc::new(RocksStateStore::open(dir.path()).unwrap());
    let h = Harness::with_store(common::config(), store);
    let listener =
        DeploymentListener::new(h.catalog.clone(), h.store.clone(), h.handle(), RESOURCE_TYPE);
    assert_eq!(listener.route(&event).unwrap(), None, "Redelivery after restart is dropped");
}

#[tokio::test]
async fn test_tick_fans_out_to_every_data_source() {
    let h = Harness::new();
    let ticker = PeriodicTicker::new(h.catalog.clone(), h.handle());

    assert_eq!(ticker.fan_out(&kb("kb-1")).unwrap(), 2);
    settle(&h, "ds-1").await;
    settle(&h, "ds-2").await;

    assert_eq!(h.backend.start_calls(&ds("ds-1")), 1);
    assert_eq!(h.backend.start_calls(&ds("ds-2")), 1);
    assert_eq!(h.backend.start_calls(&ds("ds-3")), 0);
}

#[tokio::test]
async fn test_schedule_event_with_unknown_kb_emits_nothing() {
    let h = Harness::new();
    let ticker = PeriodicTicker::new(h.catalog.clone(), h.handle());

    let event = ScheduleEvent {
        knowledge_base_ids: vec![kb("kb-1"), kb("kb-missing")],
    };
    let err = ticker.on_schedule(&event).unwrap_err();
    assert!(matches!(err, ControllerError::UnknownKnowledgeBase(ref id) if id == &kb("kb-missing")));

    settle(&h, "ds-1").await;
    assert_eq!(
        h.backend.start_calls(&ds("ds-1")),
        1,
        "Only the settle request may start"
    );

    let event = ScheduleEvent {
        knowledge_base_ids: vec![kb("kb-1"), kb("kb-2")],
    };
    assert_eq!(ticker.on_schedule(&event).unwrap(), 3);
}

#[tokio::test]
async fn test_scheduled_tickers_registered_per_knowledge_base() {
    let h = Harness::new();
    let scheduler = SchedulerService::new(SchedulerConfig::default()).await.unwrap();
    let ticker = PeriodicTicker::new(h.catalog.clone(), h.handle());

    assert_eq!(ticker.register(&scheduler).await.unwrap(), 2);
    let registry = scheduler.registry();
    assert!(registry.is_registered("kb-1"));
    assert_eq!(registry.get_status("kb-2").unwrap().schedule, "every 6h");

    assert_eq!(scheduler.run_now("kb-1").await.unwrap(), TickResult::Emitted(2));
    settle(&h, "ds-1").await;
    assert_eq!(h.backend.start_calls(&ds("ds-1")), 1);

    scheduler.pause_ticker("kb-2").unwrap();
    assert!(matches!(
        scheduler.run_now("kb-2").await.unwrap(),
        TickResult::Skipped(_)
    ));
    assert_eq!(h.backend.start_calls(&ds("ds-3")), 0);

    let status = registry.get_status("kb-1").unwrap();
    assert_eq!(status.tick_count, 1);
    assert_eq!(status.requests_emitted, 2);
}
