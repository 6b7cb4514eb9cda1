//! Queue lifecycle integration tests.
//!
//! Drives the manager through a realistic job lifecycle against the
//! in-memory backend, with a dashboard observer on the event bus.

use std::sync::Arc;

use chrono::Duration;
use inference_router::{
    EventBus, InMemoryJobBackend, JobStatus, QueueManager, RouterEvent, SharedJobBackend,
};

fn manager_with_events() -> (
    Arc<InMemoryJobBackend>,
    Arc<QueueManager>,
    tokio::sync::broadcast::Receiver<RouterEvent>,
) {
    let backend = Arc::new(InMemoryJobBackend::new());
    let bus = EventBus::new().shared();
    let rx = bus.subscribe();
    let manager = Arc::new(QueueManager::new(backend.clone() as SharedJobBackend).with_events(bus));
    (backend, manager, rx)
}

#[tokio::test]
async fn full_job_lifecycle() {
    let (backend, manager, _rx) = manager_with_events();

    let job = backend.enqueue("translate", serde_json::json!({ "task_id": "t-1" }));
    assert!(manager.check_duplicate_job("t-1").await.unwrap());

    backend.set_status(&job.id, JobStatus::Active);
    // In-flight: removal refused, the job survives.
    assert!(!manager.remove_job(&job.id).await.unwrap());

    backend.fail(&job.id, "upstream timeout");
    let failed = manager.jobs(JobStatus::Failed, 10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].failure_reason.as_deref(), Some("upstream timeout"));

    // Retry puts it back in the waiting set.
    assert!(manager.retry_job(&job.id).await.unwrap());
    let stats = manager.queue_stats().await.unwrap();
    assert_eq!(stats.waiting, 1);
    assert_eq!(stats.failed, 0);

    // Completed work is removable and cleanable.
    backend.set_status(&job.id, JobStatus::Active);
    backend.set_status(&job.id, JobStatus::Completed);
    assert_eq!(manager.clean_old_jobs(Some(Duration::zero())).await.unwrap(), 1);
    assert_eq!(manager.queue_stats().await.unwrap().completed, 0);
}

#[tokio::test]
async fn observers_see_lifecycle_events() {
    let (backend, manager, mut rx) = manager_with_events();

    manager.pause_queue().await.unwrap();
    let event = rx.recv().await.unwrap();
    assert_eq!(event.event_type(), "queue_paused");

    manager.resume_queue().await.unwrap();
    let event = rx.recv().await.unwrap();
    assert_eq!(event.event_type(), "queue_resumed");

    let job = backend.enqueue("j", serde_json::Value::Null);
    backend.fail(&job.id, "boom");
    manager.retry_job(&job.id).await.unwrap();
    let event = rx.recv().await.unwrap();
    match event {
        RouterEvent::JobRetried { job_id, .. } => assert_eq!(job_id, job.id),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn racing_admins_cannot_double_remove() {
    let (backend, manager, _rx) = manager_with_events();
    let job = backend.enqueue("j", serde_json::Value::Null);
    backend.set_status(&job.id, JobStatus::Active);
    backend.set_status(&job.id, JobStatus::Completed);

    let m1 = Arc::clone(&manager);
    let m2 = Arc::clone(&manager);
    let id1 = job.id.clone();
    let id2 = job.id.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { m1.remove_job(&id1).await.unwrap() }),
        tokio::spawn(async move { m2.remove_job(&id2).await.unwrap() }),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    // Exactly one admin wins; the other sees an ordinary false.
    assert!(a ^ b);
}

#[tokio::test]
async fn retry_all_failed_reports_aggregate_count() {
    let (backend, manager, _rx) = manager_with_events();
    for i in 0..3 {
        let job = backend.enqueue(format!("j{i}"), serde_json::Value::Null);
        backend.fail(&job.id, "boom");
    }

    assert_eq!(manager.retry_all_failed(10).await.unwrap(), 3);
    let stats = manager.queue_stats().await.unwrap();
    assert_eq!(stats.waiting, 3);
    assert_eq!(stats.failed, 0);

    // Nothing left to retry.
    assert_eq!(manager.retry_all_failed(10).await.unwrap(), 0);
}

#[tokio::test]
async fn paused_queue_is_reported_unhealthy() {
    let (_backend, manager, _rx) = manager_with_events();
    manager.pause_queue().await.unwrap();

    let health = manager.health_status().await.unwrap();
    assert!(!health.healthy);
    assert_eq!(health.issues, vec!["queue is paused".to_string()]);
}
