//! Download report log
//!
//! Writes JSON lines to `~/.local/state/grab/downloads.log`, one per
//! resolution event (`artifact.downloaded`, `artifact.cached`,
//! `artifact.integrity_failed`, `artifact.invalidated`).

use crate::config::{schema::Config, ConfigManager};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

pub const EVENT_DOWNLOADED: &str = "artifact.downloaded";
pub const EVENT_CACHED: &str = "artifact.cached";
pub const EVENT_INTEGRITY_FAILED: &str = "artifact.integrity_failed";
pub const EVENT_INVALIDATED: &str = "artifact.invalidated";

/// File-based event log that appends JSON lines
#[derive(Debug)]
pub struct AuditLog {
    enabled: bool,
    path: PathBuf,
    write: Mutex<()>,
}

impl AuditLog {
    /// Create a new event log from config
    pub fn new(config: &Config) -> Self {
        Self::with_path(ConfigManager::audit_log_path(), config.general.audit_log)
    }

    /// Create an event log writing to a specific file
    pub fn with_path(path: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            enabled,
            path: path.into(),
            write: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Log an event as a JSON line
    ///
    /// Silently drops events on IO failure. Reporting never fails a resolution.
    pub async fn log(&self, event: &str, data: &serde_json::Value) {
        if !self.enabled {
            return;
        }

        let entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": event,
            "data": data,
        });

        let mut line = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize download event: {}", e);
                return;
            }
        };
        line.push('\n');

        // Concurrent resolutions share one file; keep each line whole
        let _guard = self.write.lock().await;
        if let Err(e) = self.append(&line).await {
            warn!("Failed to write download log: {}", e);
        }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
