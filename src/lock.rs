//! Per-coordinate locking
//!
//! Two layers guard each [`CoordinateKey`]:
//!
//! 1. An in-process async mutex, one per key, kept in a registry that drops
//!    slots nobody is using.
//! 2. An exclusive advisory lock (`flock`/`LockFileEx`) on a lock file under
//!    the cache's `.locks/` directory. The OS drops it when the descriptor is
//!    closed, including when the owning process dies.
//!
//! Distinct keys never share a slot or a lock file, so they never contend.
//! Lock files are never deleted: removing one while another process holds it
//! would let a third process lock a fresh inode and break exclusion.

use crate::coordinate::CoordinateKey;
use crate::error::{GrabError, GrabResult};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Default interval between attempts on a contended lock file
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

type Slot = Arc<AsyncMutex<()>>;

#[derive(Debug)]
struct LockRegistry {
    slots: Mutex<HashMap<CoordinateKey, Slot>>,
    lock_dir: Option<PathBuf>,
    poll_interval: Duration,
}

impl LockRegistry {
    fn lease(self: &Arc<Self>, key: &CoordinateKey) -> SlotLease {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots.entry(key.clone()).or_default().clone();
        SlotLease {
            registry: Arc::clone(self),
            key: key.clone(),
            slot: Some(slot),
        }
    }
}

/// A reference to a key's slot that prunes the registry when dropped
///
/// Leases are only created and dropped under the registry mutex, so the last
/// one out reliably sees the slot referenced by nothing but the registry.
#[derive(Debug)]
struct SlotLease {
    registry: Arc<LockRegistry>,
    key: CoordinateKey,
    slot: Option<Slot>,
}

impl SlotLease {
    fn slot(&self) -> Slot {
        match self.slot {
            Some(ref slot) => Arc::clone(slot),
            None => Arc::default(),
        }
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        let mut slots = self
            .registry
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = self.slot.take() {
            let unused = slots
                .get(&self.key)
                .is_some_and(|existing| Arc::ptr_eq(existing, &slot) && Arc::strong_count(&slot) == 2);
            if unused {
                slots.remove(&self.key);
            }
        }
    }
}

/// Who holds a lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOwner {
    pub pid: u32,
    pub thread: String,
}

impl LockOwner {
    fn current() -> Self {
        let thread = std::thread::current();
        Self {
            pid: std::process::id(),
            thread: thread
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{:?}", thread.id())),
        }
    }
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {} ({})", self.pid, self.thread)
    }
}

/// Exclusive ownership of one coordinate
///
/// Released on [`LockHandle::release`] or when dropped, whichever comes first.
#[derive(Debug)]
pub struct LockHandle {
    key: CoordinateKey,
    owner: LockOwner,
    acquired_at: DateTime<Utc>,
    file: Option<File>,
    guard: Option<OwnedMutexGuard<()>>,
    lease: Option<SlotLease>,
}

impl LockHandle {
    pub fn key(&self) -> &CoordinateKey {
        &self.key
    }

    pub fn owner(&self) -> &LockOwner {
        &self.owner
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Whether the handle spans processes (holds a lock file)
    pub fn is_cross_process(&self) -> bool {
        self.file.is_some()
    }

    pub fn is_released(&self) -> bool {
        self.guard.is_none()
    }

    /// Release both lock layers. Calling this more than once is a no-op.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                // Closing the descriptor below releases it regardless
                warn!("Failed to unlock lock file for {}: {}", self.key, e);
            }
        }
        let held = self.guard.take().is_some();
        self.lease.take();
        if held {
            debug!("Released lock on {}", self.key);
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Hands out per-coordinate locks
///
/// Cloning shares the same registry. Two managers created separately only
/// exclude each other through their lock directory, exactly like two
/// processes do.
#[derive(Debug, Clone)]
pub struct LockManager {
    registry: Arc<LockRegistry>,
}

impl LockManager {
    /// In-process locking only
    pub fn in_process() -> Self {
        Self::build(None, DEFAULT_POLL_INTERVAL)
    }

    /// In-process plus cross-process locking through files in `lock_dir`
    pub fn with_lock_dir(lock_dir: impl Into<PathBuf>) -> Self {
        Self::build(Some(lock_dir.into()), DEFAULT_POLL_INTERVAL)
    }

    /// Change how often a contended lock file is retried
    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        let lock_dir = self.registry.lock_dir.clone();
        Self::build(lock_dir, poll_interval)
    }

    fn build(lock_dir: Option<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            registry: Arc::new(LockRegistry {
                slots: Mutex::new(HashMap::new()),
                lock_dir,
                poll_interval,
            }),
        }
    }

    pub fn lock_dir(&self) -> Option<&Path> {
        self.registry.lock_dir.as_deref()
    }

    /// Number of keys currently held or waited on in this process
    pub fn active_keys(&self) -> usize {
        self.registry
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Wait until `key` is free, then take it
    pub async fn acquire(&self, key: &CoordinateKey) -> GrabResult<LockHandle> {
        let lease = self.registry.lease(key);
        let guard = lease.slot().lock_owned().await;

        let mut handle = LockHandle {
            key: key.clone(),
            owner: LockOwner::current(),
            acquired_at: Utc::now(),
            file: None,
            guard: Some(guard),
            lease: Some(lease),
        };

        // Holding the in-process slot first means at most one task per
        // process polls a given lock file.
        if let Some(ref dir) = self.registry.lock_dir {
            let file = self.lock_file(dir, key).await?;
            record_owner(&file, &handle.owner);
            handle.file = Some(file);
        }

        handle.acquired_at = Utc::now();
        debug!("Acquired lock on {} for {}", key, handle.owner);
        Ok(handle)
    }

    /// Like [`acquire`](Self::acquire), failing with `LockTimeout` after `timeout`
    ///
    /// `None` waits indefinitely. A timed-out attempt holds nothing.
    pub async fn acquire_timeout(
        &self,
        key: &CoordinateKey,
        timeout: Option<Duration>,
    ) -> GrabResult<LockHandle> {
        match timeout {
            None => self.acquire(key).await,
            Some(limit) => tokio::time::timeout(limit, self.acquire(key))
                .await
                .map_err(|_| GrabError::LockTimeout {
                    coordinate: key.to_string(),
                    waited: limit,
                })?,
        }
    }

    /// Release a handle. Idempotent.
    pub fn release(&self, handle: &mut LockHandle) {
        handle.release();
    }

    async fn lock_file(&self, dir: &Path, key: &CoordinateKey) -> GrabResult<File> {
        let path = dir.join(key.lock_file_name());
        let file = open_lock_file(&path)?;
        let contended = fs2::lock_contended_error().raw_os_error();

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(file),
                Err(e) if e.raw_os_error() == contended || e.kind() == std::io::ErrorKind::WouldBlock => {
                    tokio::time::sleep(self.registry.poll_interval).await;
                }
                Err(e) => {
                    return Err(GrabError::io(format!("locking {}", path.display()), e));
                }
            }
        }
    }
}

fn open_lock_file(path: &Path) -> GrabResult<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| GrabError::io(format!("creating lock directory {}", parent.display()), e))?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| GrabError::io(format!("opening lock file {}", path.display()), e))
}

/// Write the holder into the lock file. Informational only; liveness comes from the OS lock.
fn record_owner(file: &File, owner: &LockOwner) {
    let mut writer = file;
    let result = file
        .set_len(0)
        .and_then(|_| writeln!(writer, "{} {}", owner, Utc::now().to_rfc3339()));
    if let Err(e) = result {
        debug!("Could not record lock owner: {}", e);
    }
}
