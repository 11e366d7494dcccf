//! Artifact resolution
//!
//! [`Resolver::resolve`] turns a coordinate into a verified local file:
//!
//! ```text
//! canonicalize -> lock -> lookup -> [miss] fetch -> verify -> publish -> unlock
//! ```
//!
//! The per-key lock is held across the whole miss path, including the fetch.
//! Callers racing on one coordinate therefore queue behind a single download
//! and find a cache hit once they get the lock. Distinct coordinates never
//! share a lock and resolve in parallel.

use crate::audit::{
    AuditLog, EVENT_CACHED, EVENT_DOWNLOADED, EVENT_INTEGRITY_FAILED, EVENT_INVALIDATED,
};
use crate::cache::{CacheEntry, CacheStore};
use crate::checksum::{ChecksumVerifier, Digest};
use crate::config::{Config, ConfigManager};
use crate::coordinate::{Coordinate, CoordinateKey};
use crate::error::{GrabError, GrabResult};
use crate::fetch::{ArtifactFetcher, FileRepositoryFetcher};
use crate::lock::LockManager;
use futures_util::future::join_all;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Per-call resolution options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Fetch on a cache miss; otherwise a miss is `NotFound`
    pub auto_download: bool,
    /// Accept fetched bytes without checking the published checksum
    pub disable_checksums: bool,
    /// Re-hash cached artifacts before handing them out
    pub verify_on_hit: bool,
    /// Maximum wait for a coordinate's lock (`None` waits indefinitely)
    pub lock_timeout: Option<Duration>,
    /// Refetches allowed after a checksum mismatch or a transient fetch failure
    pub integrity_retries: u32,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            auto_download: true,
            disable_checksums: false,
            verify_on_hit: false,
            lock_timeout: None,
            integrity_retries: 1,
        }
    }
}

impl ResolveOptions {
    /// Never fetch; resolve from the cache only
    pub fn offline(mut self) -> Self {
        self.auto_download = false;
        self
    }

    pub fn without_checksums(mut self) -> Self {
        self.disable_checksums = true;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }
}

impl From<&Config> for ResolveOptions {
    fn from(config: &Config) -> Self {
        let secs = config.resolve.lock_timeout_secs;
        Self {
            auto_download: config.resolve.auto_download,
            disable_checksums: config.resolve.disable_checksums,
            verify_on_hit: config.cache.verify_on_hit,
            lock_timeout: (secs > 0).then(|| Duration::from_secs(secs)),
            integrity_retries: config.resolve.integrity_retries,
        }
    }
}

/// Where a resolved artifact came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactOrigin {
    Cached,
    Downloaded,
}

impl fmt::Display for ArtifactOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cached => write!(f, "cached"),
            Self::Downloaded => write!(f, "downloaded"),
        }
    }
}

/// A fully written, published artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactHandle {
    pub key: CoordinateKey,
    pub path: PathBuf,
    pub digest: Digest,
    pub size_bytes: u64,
    pub origin: ArtifactOrigin,
}

/// Resolves coordinates against a shared cache
pub struct Resolver {
    store: CacheStore,
    locks: LockManager,
    fetcher: Arc<dyn ArtifactFetcher>,
    audit: Option<Arc<AuditLog>>,
    report_downloads: bool,
}

impl Resolver {
    pub fn new(store: CacheStore, locks: LockManager, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        Self {
            store,
            locks,
            fetcher,
            audit: None,
            report_downloads: false,
        }
    }

    /// Record resolution events in a download log
    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Log every download at info level
    pub fn with_report_downloads(mut self, report: bool) -> Self {
        self.report_downloads = report;
        self
    }

    /// Build a resolver for the configured cache root and repository
    pub async fn from_config(config: &Config) -> GrabResult<Self> {
        let store = CacheStore::open(ConfigManager::cache_root(config)).await?;

        let locks = if config.cache.cross_process_lock {
            LockManager::with_lock_dir(store.locks_dir())
        } else {
            LockManager::in_process()
        };
        let locks =
            locks.with_poll_interval(Duration::from_millis(config.resolve.lock_poll_ms.max(1)));

        let fetcher = Arc::new(FileRepositoryFetcher::new(config.repository.path.clone()));
        debug!(
            "Resolver using cache {} and repository {}",
            store.root().display(),
            config.repository.path.display()
        );

        Ok(Self::new(store, locks, fetcher)
            .with_audit(Arc::new(AuditLog::new(config)))
            .with_report_downloads(config.general.report_downloads))
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Resolve a coordinate to a local artifact
    pub async fn resolve(
        &self,
        coordinate: &Coordinate,
        options: &ResolveOptions,
    ) -> GrabResult<ArtifactHandle> {
        let key = CoordinateKey::canonicalize(coordinate)?;
        self.resolve_key(&key, options).await
    }

    /// Resolve an already canonical key
    pub async fn resolve_key(
        &self,
        key: &CoordinateKey,
        options: &ResolveOptions,
    ) -> GrabResult<ArtifactHandle> {
        let mut lock = self.locks.acquire_timeout(key, options.lock_timeout).await?;
        let result = self.resolve_locked(key, options).await;
        self.locks.release(&mut lock);
        result
    }

    /// Resolve several coordinates concurrently
    ///
    /// Every resolution runs to completion; the first error in input order is returned.
    pub async fn resolve_all(
        &self,
        coordinates: &[Coordinate],
        options: &ResolveOptions,
    ) -> GrabResult<Vec<ArtifactHandle>> {
        join_all(coordinates.iter().map(|c| self.resolve(c, options)))
            .await
            .into_iter()
            .collect()
    }

    /// Delete a cached artifact under its lock. Returns whether anything was removed.
    pub async fn invalidate(&self, key: &CoordinateKey) -> GrabResult<bool> {
        let mut lock = self.locks.acquire(key).await?;
        let result = self.store.invalidate(key).await;
        self.locks.release(&mut lock);

        let removed = result?;
        if removed {
            self.record(EVENT_INVALIDATED, serde_json::json!({ "coordinate": key }))
                .await;
        }
        Ok(removed)
    }

    /// Invalidate every cached artifact, returning how many were removed
    pub async fn clear(&self) -> GrabResult<usize> {
        let mut removed = 0;
        for entry in self.store.list().await? {
            if self.invalidate(&entry.key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn resolve_locked(
        &self,
        key: &CoordinateKey,
        options: &ResolveOptions,
    ) -> GrabResult<ArtifactHandle> {
        let entry = self.store.lookup(key).await?;

        if entry.is_complete() {
            if let Some(handle) = self.use_cached(entry, options).await? {
                return Ok(handle);
            }
        }

        if !options.auto_download {
            return Err(GrabError::not_found(
                key,
                "not in the cache and downloads are disabled",
            ));
        }

        self.download(key, options).await
    }

    /// Hand out a cache hit, or `None` if it failed re-verification and was dropped
    async fn use_cached(
        &self,
        entry: CacheEntry,
        options: &ResolveOptions,
    ) -> GrabResult<Option<ArtifactHandle>> {
        let size_bytes = entry.size_bytes.unwrap_or_default();

        let digest = match entry.digest {
            Some(ref recorded) => {
                if options.verify_on_hit
                    && !options.disable_checksums
                    && !self.store.verify_entry(&entry).await?
                {
                    warn!("Cached {} no longer matches {}, refetching", entry.key, recorded);
                    self.record(
                        EVENT_INTEGRITY_FAILED,
                        serde_json::json!({
                            "coordinate": entry.key,
                            "expected": recorded.to_string(),
                            "source": "cache",
                        }),
                    )
                    .await;
                    self.store.invalidate(&entry.key).await?;
                    return Ok(None);
                }
                recorded.clone()
            }
            None => {
                // Artifact placed without metadata; adopt it as is
                if options.verify_on_hit {
                    warn!(
                        "No recorded digest for {}, trusting {} as found",
                        entry.key,
                        entry.path.display()
                    );
                }
                let digest = self.store.digest_artifact(&entry.path).await?;
                self.store.record_digest(&entry.key, &digest, size_bytes).await?;
                debug!("Recorded digest {} for {}", digest, entry.key);
                digest
            }
        };

        debug!("Cache hit for {} at {}", entry.key, entry.path.display());
        self.record(
            EVENT_CACHED,
            serde_json::json!({
                "coordinate": entry.key,
                "path": entry.path,
            }),
        )
        .await;

        Ok(Some(ArtifactHandle {
            key: entry.key,
            path: entry.path,
            digest,
            size_bytes,
            origin: ArtifactOrigin::Cached,
        }))
    }

    async fn download(
        &self,
        key: &CoordinateKey,
        options: &ResolveOptions,
    ) -> GrabResult<ArtifactHandle> {
        let verifier = ChecksumVerifier::new(!options.disable_checksums);
        let mut attempt = 0;

        loop {
            match self.download_once(key, &verifier).await {
                Err(e) if attempt < options.integrity_retries && should_refetch(&e) => {
                    attempt += 1;
                    warn!(
                        "{}; refetching (attempt {} of {})",
                        e,
                        attempt + 1,
                        options.integrity_retries + 1
                    );
                }
                result => return result,
            }
        }
    }

    async fn download_once(
        &self,
        key: &CoordinateKey,
        verifier: &ChecksumVerifier,
    ) -> GrabResult<ArtifactHandle> {
        let started = Instant::now();

        // Dropping the staging artifact on any early return removes its file
        let mut staging = self.store.begin_staging(key).await?;
        debug!("{} is {} via {}", key, staging.entry().state, self.fetcher.name());
        let fetched = self.fetcher.fetch(key).await?;

        match fetched.expected_digest {
            Some(ref expected) if !verifier.verify(&fetched.bytes, expected) => {
                let actual = expected.algorithm.digest(&fetched.bytes);
                self.store.abort(staging).await?;
                self.record(
                    EVENT_INTEGRITY_FAILED,
                    serde_json::json!({
                        "coordinate": key,
                        "expected": expected.to_string(),
                        "actual": actual.to_string(),
                        "source": self.fetcher.name(),
                    }),
                )
                .await;
                return Err(GrabError::Integrity {
                    coordinate: key.to_string(),
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
            Some(_) => {}
            None if verifier.is_enabled() => {
                debug!("No published checksum for {}, accepting fetched bytes", key);
            }
            None => {}
        }

        staging.write_all(&fetched.bytes).await?;
        let digest = Digest::sha256(&fetched.bytes);
        let entry = self.store.publish(staging, &digest).await?;
        let size_bytes = entry.size_bytes.unwrap_or_default();
        let elapsed = started.elapsed();

        if self.report_downloads {
            info!(
                "Downloaded {} ({} bytes) from {} in {:.2?}",
                key,
                size_bytes,
                self.fetcher.name(),
                elapsed
            );
        } else {
            debug!("Downloaded {} ({} bytes) in {:.2?}", key, size_bytes, elapsed);
        }

        self.record(
            EVENT_DOWNLOADED,
            serde_json::json!({
                "coordinate": key,
                "path": entry.path,
                "digest": digest.to_string(),
                "size_bytes": size_bytes,
                "source": self.fetcher.name(),
                "elapsed_ms": elapsed.as_millis() as u64,
            }),
        )
        .await;

        Ok(ArtifactHandle {
            key: entry.key,
            path: entry.path,
            digest,
            size_bytes,
            origin: ArtifactOrigin::Downloaded,
        })
    }

    async fn record(&self, event: &str, data: serde_json::Value) {
        if let Some(ref audit) = self.audit {
            audit.log(event, &data).await;
        }
    }
}

/// Whether a failed download is worth another fetch
fn should_refetch(error: &GrabError) -> bool {
    matches!(error, GrabError::Integrity { .. }) || error.is_retryable()
}
