//! Configuration schema for grab
//!
//! Configuration is stored at `~/.config/grab/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Artifact cache settings
    pub cache: CacheConfig,

    /// Resolution defaults
    pub resolve: ResolveConfig,

    /// Artifact source settings
    pub repository: RepositoryConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Log every download at info level
    pub report_downloads: bool,

    /// Append resolution events to the download log
    pub audit_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            report_downloads: false,
            audit_log: true,
        }
    }
}

/// Artifact cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root (defaults to the platform cache directory)
    pub root: Option<PathBuf>,

    /// Re-check digests of cached artifacts on every hit
    pub verify_on_hit: bool,

    /// Coordinate with other processes through lock files
    pub cross_process_lock: bool,

    /// Staging files older than this are treated as crash leftovers
    pub staging_max_age_hours: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: None,
            verify_on_hit: false,
            cross_process_lock: true,
            staging_max_age_hours: 24,
        }
    }
}

/// Resolution defaults, overridable per call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveConfig {
    /// Fetch artifacts missing from the cache
    pub auto_download: bool,

    /// Accept downloads without checking published checksums
    pub disable_checksums: bool,

    /// Give up waiting for a coordinate's lock after N seconds (0 = wait forever)
    pub lock_timeout_secs: u64,

    /// Refetches allowed after a checksum mismatch
    pub integrity_retries: u32,

    /// Milliseconds between attempts on a lock file held by another process
    pub lock_poll_ms: u64,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            auto_download: true,
            disable_checksums: false,
            lock_timeout_secs: 0,
            integrity_retries: 1,
            lock_poll_ms: 25,
        }
    }
}

/// Artifact source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Maven-layout directory to fetch from
    pub path: PathBuf,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            path: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".m2")
                .join("repository"),
        }
    }
}
