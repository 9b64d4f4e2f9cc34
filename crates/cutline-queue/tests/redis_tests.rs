//! Redis adapter integration tests.
//!
//! Each test writes under its own key prefix so runs do not interfere.

use std::sync::Arc;
use std::time::Duration;

use cutline_models::{ArtifactRef, JobStatus, RenderJob, TimelineDocument};
use cutline_queue::{
    AdmissionConfig, AdmissionStore, JobQueue, JobStore, RedisAdmissionStore, RedisHandle,
    RedisJobQueue, RedisJobStore, StoreConfig,
};

fn handle() -> RedisHandle {
    dotenvy::dotenv().ok();
    let config = StoreConfig {
        key_prefix: format!("cutline-test-{}", uuid::Uuid::new_v4()),
        ..StoreConfig::from_env()
    };
    RedisHandle::new(&config).expect("Failed to create Redis client")
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_connection() {
    handle().ping().await.expect("Failed to ping Redis");
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_concurrent_acquire_is_capped() {
    let store = Arc::new(RedisAdmissionStore::new(
        handle(),
        AdmissionConfig {
            max_slots: 2,
            lease_ttl: Duration::from_secs(30),
        },
    ));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.acquire().await.expect("acquire") })
        })
        .collect();

    let mut granted = Vec::new();
    for h in handles {
        if let Some(token) = h.await.expect("join") {
            granted.push(token);
        }
    }
    assert_eq!(granted.len(), 2);
    assert_eq!(store.count().await.unwrap(), 2);

    for token in &granted {
        store.release(token).await.unwrap();
    }
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_lease_expires_without_renewal() {
    let store = RedisAdmissionStore::new(
        handle(),
        AdmissionConfig {
            max_slots: 1,
            lease_ttl: Duration::from_millis(300),
        },
    );

    let stale = store.acquire().await.unwrap().expect("first lease");
    assert!(store.acquire().await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(store.acquire().await.unwrap().is_some());
    assert!(!store.renew(&stale).await.unwrap());
    assert!(!store.is_live(stale.as_str()).await.unwrap());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_queue_order_and_position() {
    let queue = RedisJobQueue::new(handle());
    let a = RenderJob::new(TimelineDocument::empty(1.0)).id;
    let b = RenderJob::new(TimelineDocument::empty(1.0)).id;

    queue.push_back(&a).await.unwrap();
    queue.push_back(&b).await.unwrap();
    assert_eq!(queue.position(&b).await.unwrap(), Some(1));

    let head = queue.pop_front().await.unwrap().unwrap();
    assert_eq!(head, a);
    queue.push_front(&head).await.unwrap();
    assert_eq!(queue.position(&a).await.unwrap(), Some(0));

    assert!(queue.remove(&a).await.unwrap());
    assert_eq!(queue.len().await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_job_store_transitions() {
    let store = RedisJobStore::new(handle(), Duration::from_secs(60));
    let job = RenderJob::new(TimelineDocument::empty(2.0));
    store.insert(&job).await.unwrap();

    let started = store.mark_processing(&job.id, "lease-1").await.unwrap();
    assert_eq!(started.status, JobStatus::Processing);
    assert_eq!(store.list_processing().await.unwrap().len(), 1);

    assert!(store.update_progress(&job.id, 50).await.unwrap());
    assert!(!store.update_progress(&job.id, 40).await.unwrap());

    let done = store
        .complete(&job.id, &ArtifactRef::new("renders/x/output.mp4"))
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress, 100);
    assert!(store.list_processing().await.unwrap().is_empty());

    let err = store.fail(&job.id, "late failure").await.unwrap_err();
    assert!(err.is_conflict());

    assert!(store.annotate(&job.id, "source cleanup failed").await.unwrap());
    let stored = store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.error.as_deref(), Some("source cleanup failed"));
}
