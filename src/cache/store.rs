//! On-disk artifact cache
//!
//! Layout under the cache root:
//!
//! ```text
//! {group}/{module}/{ext}s/{module}-{version}[@{classifier}].{ext}
//! {group}/{module}/{ext}s/{module}-{version}[@{classifier}].{ext}.meta.json
//! .staging/{file}.{uuid}.part
//! .locks/{hash}.lock
//! ```
//!
//! Bytes are always written to `.staging` first and renamed into place. The
//! staging directory lives under the root so the rename never crosses a
//! filesystem boundary. Lookups only ever look at canonical paths, so a
//! half-written staging file is invisible to them.

use crate::cache::entry::{ArtifactMetadata, CacheEntry};
use crate::checksum::{ChecksumAlgorithm, ChecksumVerifier, Digest};
use crate::coordinate::CoordinateKey;
use crate::error::{GrabError, GrabResult};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

const STAGING_DIR: &str = ".staging";
const LOCKS_DIR: &str = ".locks";
const STAGING_SUFFIX: &str = "part";
const METADATA_SUFFIX: &str = ".meta.json";

/// A private, uniquely named file that bytes are written to before publish
///
/// Dropping an uncommitted staging artifact deletes the file, so an abandoned
/// or cancelled resolution never leaves staging debris behind.
#[derive(Debug)]
pub struct StagingArtifact {
    key: CoordinateKey,
    path: PathBuf,
    committed: bool,
}

impl StagingArtifact {
    pub fn key(&self) -> &CoordinateKey {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The in-progress entry this staging file represents
    pub fn entry(&self) -> CacheEntry {
        CacheEntry::staging(self.key.clone(), self.path.clone())
    }

    /// Write the full content and flush it to disk
    pub async fn write_all(&mut self, bytes: &[u8]) -> GrabResult<()> {
        let mut file = fs::File::create(&self.path).await.map_err(|e| {
            GrabError::io(format!("creating staging file {}", self.path.display()), e)
        })?;
        file.write_all(bytes).await.map_err(|e| {
            GrabError::io(format!("writing staging file {}", self.path.display()), e)
        })?;
        file.sync_all().await.map_err(|e| {
            GrabError::io(format!("flushing staging file {}", self.path.display()), e)
        })?;
        Ok(())
    }
}

impl Drop for StagingArtifact {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove staging file {}: {}", self.path.display(), e);
                }
            }
        }
    }
}

/// Handle to the shared cache directory
///
/// All writes to canonical artifact paths go through [`CacheStore::publish`].
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Create a store handle without touching the filesystem
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a store handle, making sure the root and its private directories exist
    pub async fn open(root: impl Into<PathBuf>) -> GrabResult<Self> {
        let store = Self::new(root);
        for dir in [store.root.clone(), store.staging_dir(), store.locks_dir()] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| GrabError::io(format!("creating directory {}", dir.display()), e))?;
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join(LOCKS_DIR)
    }

    /// Canonical path of a key's artifact
    pub fn artifact_path(&self, key: &CoordinateKey) -> PathBuf {
        self.root.join(key.cache_path())
    }

    fn metadata_path(&self, key: &CoordinateKey) -> PathBuf {
        let mut name = self.artifact_path(key).into_os_string();
        name.push(METADATA_SUFFIX);
        PathBuf::from(name)
    }

    /// Look up a key. Returns an `Absent` or `Complete` entry; staging files are never visible.
    pub async fn lookup(&self, key: &CoordinateKey) -> GrabResult<CacheEntry> {
        let path = self.artifact_path(key);

        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {
                let metadata = self.read_metadata(key).await?;
                Ok(CacheEntry::complete(key.clone(), path, meta.len(), metadata))
            }
            Ok(_) => Err(GrabError::io(
                format!("inspecting {}", path.display()),
                io::Error::other("canonical path is not a regular file"),
            )),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Ok(CacheEntry::absent(key.clone(), path))
            }
            Err(e) => Err(GrabError::io(format!("inspecting {}", path.display()), e)),
        }
    }

    /// Allocate a private staging file for a key
    pub async fn begin_staging(&self, key: &CoordinateKey) -> GrabResult<StagingArtifact> {
        self.staging_file(key, &key.cache_file_name()).await
    }

    async fn staging_file(&self, key: &CoordinateKey, name: &str) -> GrabResult<StagingArtifact> {
        let dir = self.staging_dir();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| GrabError::io(format!("creating staging directory {}", dir.display()), e))?;

        let path = dir.join(format!("{}.{}.{}", name, Uuid::new_v4(), STAGING_SUFFIX));
        debug!("Staging {} at {}", key, path.display());

        Ok(StagingArtifact {
            key: key.clone(),
            path,
            committed: false,
        })
    }

    /// Atomically move a fully written staging file to its canonical path
    ///
    /// Metadata is renamed into place first, then the artifact. A crash between
    /// the two leaves only metadata behind, which lookups ignore.
    pub async fn publish(
        &self,
        mut staging: StagingArtifact,
        digest: &Digest,
    ) -> GrabResult<CacheEntry> {
        let key = staging.key.clone();
        let final_path = self.artifact_path(&key);

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| GrabError::io(format!("creating directory {}", parent.display()), e))?;
        }

        let size = fs::metadata(&staging.path)
            .await
            .map_err(|e| GrabError::io(format!("inspecting {}", staging.path.display()), e))?
            .len();

        let metadata = ArtifactMetadata::new(key.clone(), digest.clone(), size);
        self.write_metadata(&metadata).await?;

        fs::rename(&staging.path, &final_path).await.map_err(|e| {
            GrabError::io(
                format!(
                    "moving artifact into place ({} -> {})",
                    staging.path.display(),
                    final_path.display()
                ),
                e,
            )
        })?;
        staging.committed = true;

        if let Some(parent) = final_path.parent() {
            sync_dir(parent);
        }

        debug!("Published {} ({} bytes) to {}", key, size, final_path.display());
        Ok(CacheEntry::complete(key, final_path, size, Some(metadata)))
    }

    /// Discard a staging file, leaving the canonical state untouched
    pub async fn abort(&self, mut staging: StagingArtifact) -> GrabResult<()> {
        staging.committed = true;
        match fs::remove_file(&staging.path).await {
            Ok(()) => {
                debug!("Aborted staging for {}", staging.key);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GrabError::io(
                format!("removing staging file {}", staging.path.display()),
                e,
            )),
        }
    }

    /// Delete a key's artifact and metadata. Returns whether an artifact was removed.
    ///
    /// Callers must hold the key's lock.
    pub async fn invalidate(&self, key: &CoordinateKey) -> GrabResult<bool> {
        let path = self.artifact_path(key);
        let removed = remove_if_exists(&path).await?;
        remove_if_exists(&self.metadata_path(key)).await?;
        if removed {
            debug!("Invalidated {}", key);
        }
        Ok(removed)
    }

    /// Record metadata for an artifact that has none (e.g. placed by hand)
    pub async fn record_digest(
        &self,
        key: &CoordinateKey,
        digest: &Digest,
        size_bytes: u64,
    ) -> GrabResult<()> {
        let metadata = ArtifactMetadata::new(key.clone(), digest.clone(), size_bytes);
        self.write_metadata(&metadata).await
    }

    /// SHA-256 of the artifact currently at `path`
    pub async fn digest_artifact(&self, path: &Path) -> GrabResult<Digest> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || ChecksumAlgorithm::Sha256.digest_file(&path))
            .await
            .map_err(|e| GrabError::Internal(format!("digest task failed: {}", e)))?
    }

    /// Whether a complete entry's bytes still match its recorded digest
    pub async fn verify_entry(&self, entry: &CacheEntry) -> GrabResult<bool> {
        let Some(recorded) = entry.digest.clone() else {
            return Ok(false);
        };
        let path = entry.path.clone();
        let verifier = ChecksumVerifier::default();
        tokio::task::spawn_blocking(move || verifier.verify_file(&path, &recorded))
            .await
            .map_err(|e| GrabError::Internal(format!("digest task failed: {}", e)))?
    }

    /// All complete entries with readable metadata, sorted by coordinate
    pub async fn list(&self) -> GrabResult<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut reader = match fs::read_dir(&dir).await {
                Ok(reader) => reader,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(GrabError::io(format!("reading directory {}", dir.display()), e))
                }
            };

            while let Some(item) = reader
                .next_entry()
                .await
                .map_err(|e| GrabError::io(format!("reading directory {}", dir.display()), e))?
            {
                let name = item.file_name();
                let name = name.to_string_lossy();
                if name.starts_with('.') {
                    continue;
                }

                let path = item.path();
                let file_type = item
                    .file_type()
                    .await
                    .map_err(|e| GrabError::io(format!("inspecting {}", path.display()), e))?;

                if file_type.is_dir() {
                    pending.push(path);
                } else if name.ends_with(METADATA_SUFFIX) {
                    if let Some(entry) = self.entry_from_metadata(&path).await? {
                        entries.push(entry);
                    }
                }
            }
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Remove staging files older than `max_age`, returning the removed paths
    ///
    /// Staging files have unique names, so anything this old belongs to a
    /// resolution that crashed before it could clean up.
    pub async fn clean_staging(&self, max_age: Duration) -> GrabResult<Vec<PathBuf>> {
        let dir = self.staging_dir();
        let mut removed = Vec::new();

        let mut reader = match fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(removed),
            Err(e) => return Err(GrabError::io(format!("reading directory {}", dir.display()), e)),
        };

        let now = SystemTime::now();
        while let Some(item) = reader
            .next_entry()
            .await
            .map_err(|e| GrabError::io(format!("reading directory {}", dir.display()), e))?
        {
            let path = item.path();
            let modified = match item.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            let age = now.duration_since(modified).unwrap_or_default();
            if age >= max_age && remove_if_exists(&path).await? {
                debug!("Removed stale staging file {}", path.display());
                removed.push(path);
            }
        }

        Ok(removed)
    }

    async fn entry_from_metadata(&self, metadata_path: &Path) -> GrabResult<Option<CacheEntry>> {
        let Some(metadata) = read_metadata_file(metadata_path).await else {
            return Ok(None);
        };

        // Metadata must sit where its own key says it should
        if self.metadata_path(&metadata.key) != metadata_path {
            warn!("Ignoring misplaced metadata {}", metadata_path.display());
            return Ok(None);
        }

        let entry = self.lookup(&metadata.key).await?;
        Ok(entry.is_complete().then_some(entry))
    }

    /// Metadata recorded for `key`, if any
    ///
    /// Metadata naming another coordinate means the file belongs to someone
    /// else. That is a conflict, never something to adopt.
    async fn read_metadata(&self, key: &CoordinateKey) -> GrabResult<Option<ArtifactMetadata>> {
        let path = self.metadata_path(key);
        let Some(metadata) = read_metadata_file(&path).await else {
            return Ok(None);
        };
        if &metadata.key != key {
            return Err(GrabError::CacheConflict {
                coordinate: key.to_string(),
                recorded: metadata.key.to_string(),
                path,
            });
        }
        Ok(Some(metadata))
    }

    async fn write_metadata(&self, metadata: &ArtifactMetadata) -> GrabResult<()> {
        let content = serde_json::to_vec_pretty(metadata)?;
        let final_path = self.metadata_path(&metadata.key);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| GrabError::io(format!("creating directory {}", parent.display()), e))?;
        }

        let mut staging = self.staging_file(&metadata.key, "meta").await?;
        staging.write_all(&content).await?;

        fs::rename(&staging.path, &final_path).await.map_err(|e| {
            GrabError::io(format!("writing metadata {}", final_path.display()), e)
        })?;
        staging.committed = true;
        Ok(())
    }
}

async fn read_metadata_file(path: &Path) -> Option<ArtifactMetadata> {
    let content = match fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Failed to read metadata {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_slice(&content) {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            warn!("Corrupt metadata {}: {}", path.display(), e);
            None
        }
    }
}

async fn remove_if_exists(path: &Path) -> GrabResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(GrabError::io(format!("removing {}", path.display()), e)),
    }
}

/// Best-effort fsync of a directory so a rename survives power loss
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Ok(handle) = std::fs::File::open(dir) {
            let _ = handle.sync_all();
        }
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}
