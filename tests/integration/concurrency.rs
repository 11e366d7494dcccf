//! Many callers, one cache

use async_trait::async_trait;
use grab::cache::{CacheState, CacheStore};
use grab::checksum::Digest;
use grab::coordinate::{Coordinate, CoordinateKey};
use grab::fetch::{ArtifactFetcher, FetchedArtifact};
use grab::lock::LockManager;
use grab::{ArtifactOrigin, GrabResult, ResolveOptions, Resolver};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Barrier;

/// Serves `bytes:<coordinate>` after an optional delay, counting calls per key
#[derive(Default)]
struct CountingFetcher {
    delay: Duration,
    barrier: Option<Arc<Barrier>>,
    panic: bool,
    calls: AtomicUsize,
    per_key: Mutex<HashMap<CoordinateKey, usize>>,
}

impl CountingFetcher {
    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Default::default()
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn calls_for(&self, key: &CoordinateKey) -> usize {
        self.per_key
            .lock()
            .unwrap()
            .get(key)
            .copied()
            .unwrap_or_default()
    }
}

fn content_for(key: &CoordinateKey) -> Vec<u8> {
    format!("bytes:{}", key).into_bytes()
}

#[async_trait]
impl ArtifactFetcher for CountingFetcher {
    async fn fetch(&self, key: &CoordinateKey) -> GrabResult<FetchedArtifact> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.per_key.lock().unwrap().entry(key.clone()).or_default() += 1;

        if self.panic {
            panic!("fetcher crashed while holding the lock");
        }
        if let Some(ref barrier) = self.barrier {
            barrier.wait().await;
        }
        tokio::time::sleep(self.delay).await;

        let bytes = content_for(key);
        let digest = Digest::sha256(&bytes);
        Ok(FetchedArtifact::new(bytes).with_digest(digest))
    }

    fn name(&self) -> &str {
        "counting"
    }
}

async fn shared_store() -> (CacheStore, TempDir) {
    let temp = TempDir::new().unwrap();
    let store = CacheStore::open(temp.path().join("grapes")).await.unwrap();
    (store, temp)
}

fn resolver_for(store: &CacheStore, fetcher: Arc<CountingFetcher>) -> Arc<Resolver> {
    let locks = LockManager::with_lock_dir(store.locks_dir());
    Arc::new(Resolver::new(store.clone(), locks, fetcher))
}

fn widget(version: &str) -> Coordinate {
    Coordinate::new("com.example", "widget", version)
}

fn staging_files(store: &CacheStore) -> usize {
    std::fs::read_dir(store.staging_dir()).unwrap().count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn same_coordinate_fetched_once() {
    let (store, _temp) = shared_store().await;
    let fetcher = CountingFetcher::with_delay(Duration::from_millis(300));
    let resolver = resolver_for(&store, fetcher.clone());

    let tasks: Vec<_> = (0..100)
        .map(|_| {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move {
                resolver
                    .resolve(&widget("1.0"), &ResolveOptions::default())
                    .await
            })
        })
        .collect();

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap().unwrap());
    }

    assert_eq!(fetcher.calls(), 1);

    let key = CoordinateKey::canonicalize(&widget("1.0")).unwrap();
    let expected = Digest::sha256(&content_for(&key));
    let downloaded = handles
        .iter()
        .filter(|h| h.origin == ArtifactOrigin::Downloaded)
        .count();
    assert_eq!(downloaded, 1);

    for handle in &handles {
        assert_eq!(handle.digest, expected);
        assert_eq!(handle.path, handles[0].path);
        assert_eq!(std::fs::read(&handle.path).unwrap(), content_for(&key));
    }
    assert_eq!(resolver.locks().active_keys(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn distinct_coordinates_fetch_in_parallel() {
    let (store, _temp) = shared_store().await;
    // Every distinct key's fetch must be in flight at once to pass the barrier
    let fetcher = Arc::new(CountingFetcher {
        barrier: Some(Arc::new(Barrier::new(10))),
        delay: Duration::from_millis(50),
        ..Default::default()
    });
    let resolver = resolver_for(&store, fetcher.clone());

    let tasks: Vec<_> = (0..10)
        .flat_map(|minor| (0..10).map(move |_| format!("1.{}", minor)))
        .map(|version| {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move {
                resolver
                    .resolve(&widget(&version), &ResolveOptions::default())
                    .await
            })
        })
        .collect();

    let all = async {
        for task in tasks {
            task.await.unwrap().unwrap();
        }
    };
    tokio::time::timeout(Duration::from_secs(20), all)
        .await
        .expect("distinct keys blocked each other");

    assert_eq!(fetcher.calls(), 10);
    for minor in 0..10 {
        let key = CoordinateKey::canonicalize(&widget(&format!("1.{}", minor))).unwrap();
        assert_eq!(fetcher.calls_for(&key), 1);
    }

    let entries = store.list().await.unwrap();
    assert_eq!(entries.len(), 10);
    assert!(entries.iter().all(|e| e.state == CacheState::Complete));
}

#[tokio::test]
async fn cached_coordinate_never_fetches() {
    let (store, _temp) = shared_store().await;
    let fetcher = CountingFetcher::with_delay(Duration::ZERO);
    let resolver = resolver_for(&store, fetcher.clone());
    let options = ResolveOptions::default();

    let first = resolver.resolve(&widget("1.0"), &options).await.unwrap();
    for _ in 0..5 {
        let again = resolver.resolve(&widget("1.0"), &options).await.unwrap();
        assert_eq!(again.origin, ArtifactOrigin::Cached);
        assert_eq!(again.path, first.path);
        assert_eq!(again.digest, first.digest);
    }
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn independent_resolvers_share_one_download() {
    let (store, _temp) = shared_store().await;
    let fetcher = CountingFetcher::with_delay(Duration::from_millis(200));

    // Separate lock registries meet only at the lock files, as separate processes do
    let resolvers = [
        resolver_for(&store, fetcher.clone()),
        resolver_for(&store, fetcher.clone()),
    ];

    let tasks: Vec<_> = (0..40)
        .map(|i| {
            let resolver = Arc::clone(&resolvers[i % 2]);
            tokio::spawn(async move {
                resolver
                    .resolve(&widget("1.0"), &ResolveOptions::default())
                    .await
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_resolution_leaves_key_absent() {
    let (store, _temp) = shared_store().await;
    let slow = CountingFetcher::with_delay(Duration::from_secs(30));
    let resolver = resolver_for(&store, slow.clone());

    let cancelled = tokio::time::timeout(
        Duration::from_millis(200),
        resolver.resolve(&widget("1.0"), &ResolveOptions::default()),
    )
    .await;
    assert!(cancelled.is_err());
    assert_eq!(slow.calls(), 1);

    let key = CoordinateKey::canonicalize(&widget("1.0")).unwrap();
    assert_eq!(store.lookup(&key).await.unwrap().state, CacheState::Absent);
    assert_eq!(staging_files(&store), 0);
    assert_eq!(resolver.locks().active_keys(), 0);

    // The lock was released, so a fresh attempt succeeds without waiting
    let fast = CountingFetcher::with_delay(Duration::ZERO);
    let retry = Resolver::new(store.clone(), resolver.locks().clone(), fast.clone());
    let handle = retry
        .resolve(
            &widget("1.0"),
            &ResolveOptions::default().with_lock_timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap();
    assert_eq!(handle.origin, ArtifactOrigin::Downloaded);
    assert_eq!(fast.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crashed_holder_releases_lock() {
    let (store, _temp) = shared_store().await;
    let crashing = Arc::new(CountingFetcher {
        panic: true,
        ..Default::default()
    });
    let resolver = resolver_for(&store, crashing);

    let crashed = {
        let resolver = Arc::clone(&resolver);
        tokio::spawn(async move {
            resolver
                .resolve(&widget("1.0"), &ResolveOptions::default())
                .await
        })
        .await
    };
    assert!(crashed.unwrap_err().is_panic());

    let key = CoordinateKey::canonicalize(&widget("1.0")).unwrap();
    assert_eq!(store.lookup(&key).await.unwrap().state, CacheState::Absent);
    assert_eq!(staging_files(&store), 0);

    let healthy = CountingFetcher::with_delay(Duration::ZERO);
    let retry = Resolver::new(store.clone(), resolver.locks().clone(), healthy);
    retry
        .resolve(
            &widget("1.0"),
            &ResolveOptions::default().with_lock_timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_see_partial_artifacts() {
    let (store, _temp) = shared_store().await;
    let fetcher = CountingFetcher::with_delay(Duration::from_millis(100));
    let resolver = resolver_for(&store, fetcher);
    let key = CoordinateKey::canonicalize(&widget("1.0")).unwrap();
    let expected = content_for(&key);

    let writer = {
        let resolver = Arc::clone(&resolver);
        tokio::spawn(async move {
            resolver
                .resolve(&widget("1.0"), &ResolveOptions::default())
                .await
        })
    };

    // Poll the canonical path without taking the lock
    let path = store.artifact_path(&key);
    while !writer.is_finished() {
        if let Ok(bytes) = std::fs::read(&path) {
            assert_eq!(bytes, expected);
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    writer.await.unwrap().unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), expected);
}

#[tokio::test]
async fn resolve_all_mixes_hits_and_misses() {
    let (store, _temp) = shared_store().await;
    let fetcher = CountingFetcher::with_delay(Duration::ZERO);
    let resolver = resolver_for(&store, fetcher.clone());
    let options = ResolveOptions::default();

    resolver.resolve(&widget("1.0"), &options).await.unwrap();

    let coordinates = vec![widget("1.0"), widget("2.0"), widget("1.0"), widget("3.0")];
    let handles = resolver.resolve_all(&coordinates, &options).await.unwrap();

    assert_eq!(handles.len(), 4);
    assert_eq!(handles[0].origin, ArtifactOrigin::Cached);
    assert_eq!(handles[0].path, handles[2].path);
    assert_eq!(fetcher.calls(), 3);
}
