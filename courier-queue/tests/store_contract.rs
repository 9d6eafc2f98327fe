//! Behaviour every queue store must share.
//!
//! Each scenario runs against the in-memory store. The Redis variants are
//! ignored by default; point `COURIER_TEST_REDIS` at a disposable server
//! (`host:port`) and run with `--include-ignored`, as CI does.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{collections::HashSet, sync::Arc, time::Duration};

use courier_common::config::ConnectionConfig;
use courier_queue::{
    JobId, MailPayload, MemoryQueueStore, QueueConfig, QueueError, QueueStore, RedisQueueStore,
};
use pretty_assertions::assert_eq;

fn payload(to: &str) -> MailPayload {
    MailPayload::new(to).with_subject("Hi").with_content("Hello")
}

fn memory() -> Arc<dyn QueueStore> {
    Arc::new(MemoryQueueStore::new())
}

async fn redis() -> Arc<dyn QueueStore> {
    redis_with_lease(QueueConfig::default().lease_secs).await
}

async fn redis_with_lease(lease_secs: u64) -> Arc<dyn QueueStore> {
    let target = std::env::var("COURIER_TEST_REDIS").unwrap_or_else(|_| "127.0.0.1:6379".into());
    let (host, port) = target.split_once(':').unwrap_or((target.as_str(), "6379"));
    let connection = ConnectionConfig::new(host, port.parse().unwrap(), None, 15, 5).unwrap();
    let config = QueueConfig {
        prefix: format!("courier-test:{}:", JobId::generate()),
        lease_secs,
        ..QueueConfig::default()
    };
    let store = RedisQueueStore::new(&connection, config).unwrap();
    store.ping().await.expect("test server should be reachable");
    Arc::new(store)
}

async fn concurrent_reserve_hands_out_each_job_once(store: Arc<dyn QueueStore>) {
    for i in 0..20 {
        store
            .enqueue("emails", payload(&format!("user{i}@example.com")))
            .await
            .unwrap();
    }

    let mut workers = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        workers.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(job) = store.reserve("emails").await.unwrap() {
                seen.push(job.id);
            }
            seen
        }));
    }

    let mut all = Vec::new();
    for worker in workers {
        all.extend(worker.await.unwrap());
    }
    let unique: HashSet<JobId> = all.iter().copied().collect();
    assert_eq!(all.len(), 20);
    assert_eq!(unique.len(), 20);
}

async fn release_hides_job_until_delay_passes(store: Arc<dyn QueueStore>) {
    let id = store.enqueue("emails", payload("a@example.com")).await.unwrap();
    let job = store.reserve("emails").await.unwrap().unwrap();
    assert_eq!(job.id, id);

    store.release(&id, Duration::from_millis(300)).await.unwrap();
    assert!(store.reserve("emails").await.unwrap().is_none());
    assert_eq!(store.stats("emails").await.unwrap().delayed, 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let job = store.reserve("emails").await.unwrap().unwrap();
    assert_eq!(job.id, id);
    assert_eq!(job.attempts, 2);
}

async fn expired_lease_is_handed_out_again(store: Arc<dyn QueueStore>) {
    let id = store.enqueue("emails", payload("a@example.com")).await.unwrap();
    assert_eq!(store.reserve("emails").await.unwrap().unwrap().attempts, 1);
    assert!(store.reserve("emails").await.unwrap().is_none());
    assert_eq!(store.stats("emails").await.unwrap().reserved, 1);

    tokio::time::sleep(store.lease() + Duration::from_millis(200)).await;
    let job = store.reserve("emails").await.unwrap().unwrap();
    assert_eq!(job.id, id);
    assert_eq!(job.attempts, 2);
    assert_eq!(store.stats("emails").await.unwrap().reserved, 1);

    store.acknowledge(&id).await.unwrap();
    assert!(store.reserve("emails").await.unwrap().is_none());
}

async fn fail_retry_all_and_purge(store: Arc<dyn QueueStore>) {
    let first = store.enqueue("emails", payload("a@example.com")).await.unwrap();
    let second = store.enqueue("digests", payload("b@example.com")).await.unwrap();
    store.enqueue("emails", payload("c@example.com")).await.unwrap();

    store.reserve("emails").await.unwrap();
    store.fail(&first, "Connection refused").await.unwrap();
    store.reserve("digests").await.unwrap();
    store.fail(&second, "Mailbox full").await.unwrap();

    let failed = store.list_failed().await.unwrap();
    assert_eq!(failed.len(), 2);
    let record = failed.iter().find(|r| r.id() == first).unwrap();
    assert_eq!(record.exception, "Connection refused");
    assert_eq!(record.job.attempts, 1);
    assert!(!record.will_retry);
    assert_eq!(store.list("emails").await.unwrap().len(), 1);

    assert_eq!(store.retry_all().await.unwrap(), 2);
    assert!(store.list_failed().await.unwrap().is_empty());
    let emails = store.list("emails").await.unwrap();
    assert_eq!(emails.len(), 2);
    let retried = emails.iter().find(|job| job.id == first).unwrap();
    assert_eq!(retried.attempts, 0);
    assert_eq!(retried.reserved_at, None);

    store.reserve("digests").await.unwrap();
    store.fail(&second, "Mailbox full").await.unwrap();

    assert_eq!(store.purge(None).await.unwrap(), 3);
    assert!(store.list("emails").await.unwrap().is_empty());
    assert!(store.list("digests").await.unwrap().is_empty());
    assert!(store.list_failed().await.unwrap().is_empty());
}

async fn single_retry_and_missing_ids(store: Arc<dyn QueueStore>) {
    let id = store.enqueue("emails", payload("a@example.com")).await.unwrap();
    store.reserve("emails").await.unwrap();
    store.fail(&id, "boom").await.unwrap();

    assert!(matches!(
        store.fail(&id, "boom again").await,
        Err(QueueError::JobNotFound(_))
    ));
    assert!(store.retry(&id).await.unwrap());
    assert!(!store.retry(&id).await.unwrap());
    assert!(!store.retry(&JobId::generate()).await.unwrap());

    let job = store.reserve("emails").await.unwrap().unwrap();
    assert_eq!(job.id, id);
    assert_eq!(job.attempts, 1);
    store.acknowledge(&id).await.unwrap();
    store.acknowledge(&id).await.unwrap();
    assert!(store.list("emails").await.unwrap().is_empty());
}

async fn purge_one_queue_keeps_others(store: Arc<dyn QueueStore>) {
    store.enqueue("emails", payload("a@example.com")).await.unwrap();
    let failed = store.enqueue("emails", payload("b@example.com")).await.unwrap();
    store.enqueue("digests", payload("c@example.com")).await.unwrap();
    store.reserve("emails").await.unwrap();
    store.reserve("emails").await.unwrap();
    store.fail(&failed, "boom").await.unwrap();

    assert_eq!(store.purge(Some("emails")).await.unwrap(), 2);
    assert_eq!(store.queues().await.unwrap(), vec!["digests".to_string()]);
    assert_eq!(store.list("digests").await.unwrap().len(), 1);
    assert!(store.list_failed().await.unwrap().is_empty());
    assert_eq!(store.flush_failed().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_concurrent_reserve_hands_out_each_job_once() {
    concurrent_reserve_hands_out_each_job_once(memory()).await;
}

#[tokio::test]
async fn test_memory_release_hides_job_until_delay_passes() {
    release_hides_job_until_delay_passes(memory()).await;
}

#[tokio::test]
async fn test_memory_expired_lease_is_handed_out_again() {
    let store = MemoryQueueStore::with_lease(Duration::from_secs(1));
    expired_lease_is_handed_out_again(Arc::new(store)).await;
}

#[tokio::test]
async fn test_memory_fail_retry_all_and_purge() {
    fail_retry_all_and_purge(memory()).await;
}

#[tokio::test]
async fn test_memory_single_retry_and_missing_ids() {
    single_retry_and_missing_ids(memory()).await;
}

#[tokio::test]
async fn test_memory_purge_one_queue_keeps_others() {
    purge_one_queue_keeps_others(memory()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires a Redis server (COURIER_TEST_REDIS)"]
async fn test_redis_concurrent_reserve_hands_out_each_job_once() {
    concurrent_reserve_hands_out_each_job_once(redis().await).await;
}

#[tokio::test]
#[ignore = "requires a Redis server (COURIER_TEST_REDIS)"]
async fn test_redis_release_hides_job_until_delay_passes() {
    release_hides_job_until_delay_passes(redis().await).await;
}

#[tokio::test]
#[ignore = "requires a Redis server (COURIER_TEST_REDIS)"]
async fn test_redis_expired_lease_is_handed_out_again() {
    expired_lease_is_handed_out_again(redis_with_lease(1).await).await;
}

#[tokio::test]
#[ignore = "requires a Redis server (COURIER_TEST_REDIS)"]
async fn test_redis_fail_retry_all_and_purge() {
    fail_retry_all_and_purge(redis().await).await;
}

#[tokio::test]
#[ignore = "requires a Redis server (COURIER_TEST_REDIS)"]
async fn test_redis_single_retry_and_missing_ids() {
    single_retry_and_missing_ids(redis().await).await;
}

#[tokio::test]
#[ignore = "requires a Redis server (COURIER_TEST_REDIS)"]
async fn test_redis_purge_one_queue_keeps_others() {
    purge_one_queue_keeps_others(redis().await).await;
}
