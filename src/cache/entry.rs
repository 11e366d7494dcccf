//! Cache entry state
//!
//! Tracks the lifecycle of a single artifact in the cache
//! (absent, staging, complete) and the metadata recorded alongside it.

use crate::checksum::Digest;
use crate::coordinate::CoordinateKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// State of a cache entry
///
/// Moves forward only: `Absent -> Staging -> Complete`. The single backward
/// transition is explicit invalidation, which deletes the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    /// Nothing at the canonical path
    Absent,
    /// Bytes are being written to a private staging file
    ///
    /// Only a [`StagingArtifact`](crate::cache::StagingArtifact) reports this.
    /// Lookups see the canonical path, which stays `Absent` until publish.
    Staging,
    /// Verified artifact published at the canonical path
    Complete,
}

impl CacheState {
    /// Whether the artifact can be handed to callers
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Staging => write!(f, "staging"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Metadata persisted next to every published artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Coordinate the artifact was published for
    pub key: CoordinateKey,
    /// SHA-256 of the artifact bytes
    pub digest: Digest,
    /// Artifact size in bytes
    pub size_bytes: u64,
    /// When the artifact was published
    pub created_at: DateTime<Utc>,
}

impl ArtifactMetadata {
    pub fn new(key: CoordinateKey, digest: Digest, size_bytes: u64) -> Self {
        Self {
            key,
            digest,
            size_bytes,
            created_at: Utc::now(),
        }
    }
}

/// A cache lookup result
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The coordinate
    pub key: CoordinateKey,
    /// Canonical artifact path (may not exist when absent)
    pub path: PathBuf,
    /// Current state
    pub state: CacheState,
    /// Size in bytes (if present)
    pub size_bytes: Option<u64>,
    /// Recorded digest (if metadata is readable)
    pub digest: Option<Digest>,
    /// When the artifact was published (if known)
    pub created_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Entry for a key with nothing cached
    pub fn absent(key: CoordinateKey, path: PathBuf) -> Self {
        Self {
            key,
            path,
            state: CacheState::Absent,
            size_bytes: None,
            digest: None,
            created_at: None,
        }
    }

    /// Entry for a download still being written at `staging_path`
    pub fn staging(key: CoordinateKey, staging_path: PathBuf) -> Self {
        Self {
            key,
            path: staging_path,
            state: CacheState::Staging,
            size_bytes: None,
            digest: None,
            created_at: None,
        }
    }

    /// Entry for a published artifact
    pub fn complete(
        key: CoordinateKey,
        path: PathBuf,
        size_bytes: u64,
        metadata: Option<ArtifactMetadata>,
    ) -> Self {
        let (digest, created_at) = match metadata {
            Some(m) => (Some(m.digest), Some(m.created_at)),
            None => (None, None),
        };
        Self {
            key,
            path,
            state: CacheState::Complete,
            size_bytes: Some(size_bytes),
            digest,
            created_at,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_usable()
    }

    /// Check if this entry was published more than the given number of days ago
    pub fn is_older_than_days(&self, days: u32) -> bool {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        self.created_at.is_some_and(|created| created < cutoff)
    }
}
