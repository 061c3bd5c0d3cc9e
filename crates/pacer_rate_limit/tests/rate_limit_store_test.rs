//! Tests for loading, updating and persisting tracked rate-limit state.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use pacer_error::{PacerResult, StorageError, StorageErrorKind};
use pacer_rate_limit::{
    AllRateLimits, MAX_WINDOW_MS, ManualClock, RateLimitHeaders, RateLimitReason,
    RateLimitResource, RateLimitStore, STATE_KEY,
};
use pacer_storage::{KeyValueStore, MemoryStore};
use std::sync::Arc;
use tempfile::TempDir;

fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

async fn open(backend: &MemoryStore, clock: &ManualClock) -> RateLimitStore {
    RateLimitStore::open(Arc::new(backend.clone()), Arc::new(clock.clone())).await
}

fn reset_after(secs: f64) -> RateLimitHeaders {
    RateLimitHeaders {
        reset_after: Some(secs),
        ..Default::default()
    }
}

#[derive(Debug)]
struct BrokenBackend;

#[async_trait]
impl KeyValueStore for BrokenBackend {
    async fn get(&self, _key: &str) -> PacerResult<Option<Vec<u8>>> {
        Err(StorageError::new(StorageErrorKind::Read("disk on fire".into())).into())
    }

    async fn put(&self, _key: &str, _value: &[u8]) -> PacerResult<()> {
        Err(StorageError::new(StorageErrorKind::Write("disk on fire".into())).into())
    }

    async fn delete(&self, _key: &str) -> PacerResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_load_without_persisted_state_is_unconstrained() {
    let store = open(&MemoryStore::new(), &ManualClock::new(start())).await;

    assert!(store.snapshot().await.is_unconstrained());
    assert!(*store.check(&RateLimitResource::paced(), 1).await.allowed());
}

#[tokio::test]
async fn test_load_corrupt_blob_falls_back_to_default() {
    let backend = MemoryStore::new();
    backend.put(STATE_KEY, b"{not json").await.unwrap();

    let store = open(&backend, &ManualClock::new(start())).await;

    assert_eq!(store.snapshot().await, AllRateLimits::default());
}

#[tokio::test]
async fn test_load_from_failing_backend_falls_back_to_default() {
    let store = RateLimitStore::open(
        Arc::new(BrokenBackend),
        Arc::new(ManualClock::new(start())),
    )
    .await;

    assert!(store.snapshot().await.is_unconstrained());
    // Writes still surface the failure
    assert!(store.save().await.is_err());
}

#[tokio::test]
async fn test_throttle_survives_restart() {
    let backend = MemoryStore::new();
    let clock = ManualClock::new(start());
    let store = open(&backend, &clock).await;

    store
        .record_throttle(&RateLimitResource::paced(), &reset_after(30.0), false)
        .await
        .unwrap();

    let restarted = open(&backend, &clock).await;
    let check = restarted.check(&RateLimitResource::paced(), 1).await;
    assert!(!check.allowed());
    assert_eq!(*check.wait_ms(), 30_100);
}

#[tokio::test]
async fn test_expired_state_purged_on_load() {
    let backend = MemoryStore::new();
    let clock = ManualClock::new(start());
    let store = open(&backend, &clock).await;
    store
        .record_throttle(&RateLimitResource::paced(), &reset_after(10.0), false)
        .await
        .unwrap();

    clock.advance(TimeDelta::seconds(10));
    let restarted = open(&backend, &clock).await;

    assert!(restarted.snapshot().await.is_unconstrained());
}

#[tokio::test]
async fn test_filesystem_backend_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let clock = ManualClock::new(start());
    let backend = pacer_storage::FileSystemStore::new(temp_dir.path()).unwrap();
    let store = RateLimitStore::open(Arc::new(backend), Arc::new(clock.clone())).await;

    store
        .record_throttle(&RateLimitResource::bucketed("files"), &reset_after(5.0), true)
        .await
        .unwrap();
    assert!(temp_dir.path().join(format!("{STATE_KEY}.json")).exists());

    let reopened = RateLimitStore::open(
        Arc::new(pacer_storage::FileSystemStore::new(temp_dir.path()).unwrap()),
        Arc::new(clock),
    )
    .await;
    let check = reopened.check(&RateLimitResource::bucketed("collections"), 1).await;
    assert!(!check.allowed());
    assert_eq!(*check.reason(), RateLimitReason::Global);
}

#[tokio::test]
async fn test_global_throttle_blocks_every_route() {
    let store = open(&MemoryStore::new(), &ManualClock::new(start())).await;

    store
        .record_throttle(&RateLimitResource::bucketed("files"), &reset_after(2.0), true)
        .await
        .unwrap();

    for route in ["files", "collections"] {
        let check = store.check(&RateLimitResource::bucketed(route), 1).await;
        assert!(!check.allowed());
        assert_eq!(*check.reason(), RateLimitReason::Global);
        assert_eq!(*check.wait_ms(), 2_100);
    }
    // Other providers are untouched
    assert!(*store.check(&RateLimitResource::paced(), 1).await.allowed());
}

#[tokio::test]
async fn test_learned_bucket_gates_next_call_on_route() {
    let store = open(&MemoryStore::new(), &ManualClock::new(start())).await;
    let headers = RateLimitHeaders {
        limit: Some(5),
        remaining: Some(0),
        reset_after: Some(3.0),
        bucket: Some("abcd1234".to_string()),
        ..Default::default()
    };

    store
        .record_success(&RateLimitResource::bucketed("files"), &headers)
        .await
        .unwrap();

    let files = store.check(&RateLimitResource::bucketed("files"), 1).await;
    assert!(!files.allowed());
    assert_eq!(*files.reason(), RateLimitReason::Bucket);
    assert_eq!(files.bucket().as_deref(), Some("abcd1234"));

    let collections = store.check(&RateLimitResource::bucketed("collections"), 1).await;
    assert!(*collections.allowed());
}

#[tokio::test]
async fn test_success_without_headers_decrements() {
    let store = open(&MemoryStore::new(), &ManualClock::new(start())).await;
    let fresh = RateLimitHeaders {
        limit: Some(60),
        remaining: Some(2),
        reset_after: Some(30.0),
        ..Default::default()
    };
    store
        .record_success(&RateLimitResource::paced(), &fresh)
        .await
        .unwrap();

    store
        .record_success(&RateLimitResource::paced(), &RateLimitHeaders::default())
        .await
        .unwrap();
    let entry = store.snapshot().await.paced().clone().unwrap();
    assert_eq!(*entry.remaining(), 1);
    assert_eq!(*entry.limit(), 60);

    store
        .record_success(&RateLimitResource::paced(), &RateLimitHeaders::default())
        .await
        .unwrap();
    let check = store.check(&RateLimitResource::paced(), 1).await;
    assert!(!check.allowed());
}

#[tokio::test]
async fn test_reset_clears_persisted_state() {
    let backend = MemoryStore::new();
    let clock = ManualClock::new(start());
    let store = open(&backend, &clock).await;
    store
        .record_throttle(&RateLimitResource::paced(), &reset_after(30.0), false)
        .await
        .unwrap();

    store.reset().await.unwrap();

    assert!(store.snapshot().await.is_unconstrained());
    assert_eq!(backend.get(STATE_KEY).await.unwrap(), None);
    assert!(open(&backend, &clock).await.snapshot().await.is_unconstrained());
}

#[tokio::test]
async fn test_throttle_without_hints_uses_full_window() {
    let clock = ManualClock::new(start());
    let store = open(&MemoryStore::new(), &clock).await;

    store
        .record_throttle(&RateLimitResource::paced(), &RateLimitHeaders::default(), false)
        .await
        .unwrap();

    let entry = store.snapshot().await.paced().clone().unwrap();
    assert_eq!(*entry.reset_at(), start() + TimeDelta::seconds(60));
    assert_eq!(*entry.remaining(), 0);
    assert_eq!(*entry.limit(), 0);
}

#[tokio::test]
async fn test_huge_reset_after_is_capped() {
    let clock = ManualClock::new(start());
    let store = open(&MemoryStore::new(), &clock).await;

    for secs in [1e13, 1e17] {
        store
            .record_throttle(&RateLimitResource::paced(), &reset_after(secs), false)
            .await
            .unwrap();

        let entry = store.snapshot().await.paced().clone().unwrap();
        assert_eq!(
            *entry.reset_at(),
            start() + TimeDelta::milliseconds(MAX_WINDOW_MS as i64)
        );
    }

    let check = store.check(&RateLimitResource::paced(), 1).await;
    assert!(!check.allowed());
    assert!(*check.wait_ms() <= MAX_WINDOW_MS + 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_successes_never_lose_decrements() {
    let store = open(&MemoryStore::new(), &ManualClock::new(start())).await;
    let fresh = RateLimitHeaders {
        limit: Some(100),
        remaining: Some(50),
        reset_after: Some(30.0),
        ..Default::default()
    };
    store
        .record_success(&RateLimitResource::paced(), &fresh)
        .await
        .unwrap();

    let uploads: Vec<_> = (0..20)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .record_success(&RateLimitResource::paced(), &RateLimitHeaders::default())
                    .await
            })
        })
        .collect();
    for upload in uploads {
        upload.await.unwrap().unwrap();
    }

    let entry = store.snapshot().await.paced().clone().unwrap();
    assert_eq!(*entry.remaining(), 30);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checks_and_throttles_stay_consistent() {
    let backend = MemoryStore::new();
    let clock = ManualClock::new(start());
    let store = open(&backend, &clock).await;

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let route = if i % 2 == 0 { "files" } else { "collections" };
                let resource = RateLimitResource::bucketed(route);
                if i % 3 == 0 {
                    store.check(&resource, 1).await;
                    Ok(())
                } else {
                    let headers = RateLimitHeaders {
                        limit: Some(5),
                        reset_after: Some(30.0),
                        bucket: Some(format!("{route}-bucket")),
                        ..Default::default()
                    };
                    store.record_throttle(&resource, &headers, false).await
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.bucketed().buckets().len(), 2);
    for route in ["files", "collections"] {
        let check = store.check(&RateLimitResource::bucketed(route), 1).await;
        assert!(!check.allowed(), "{route} should be throttled");
        assert_eq!(check.bucket().as_deref(), Some(format!("{route}-bucket").as_str()));
    }

    // The last write persisted under the lock matches memory.
    let reopened = open(&backend, &clock).await;
    assert_eq!(reopened.snapshot().await, snapshot);
}
