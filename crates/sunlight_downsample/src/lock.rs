//! Single-run coordination.
//!
//! Two overlapping runs would plan the same window and race on the upsert.
//! A run therefore holds an exclusive `fs2` lock on `<warehouse>.run.lock`
//! for its whole duration, plus a JSON sidecar naming the holder so a
//! blocked run can say who it is waiting on.
//!
//! Note: std::fs::File::lock() requires Rust 1.89+, so we use fs2 instead.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Another run holds {}{}", .path.display(), holder_suffix(.holder))]
    Locked {
        path: PathBuf,
        holder: Option<LockHolder>,
    },

    #[error("Failed to create lock file: {0}")]
    CreateFailed(#[source] io::Error),

    #[error("Failed to acquire lock: {0}")]
    AcquireFailed(#[source] io::Error),
}

fn holder_suffix(holder: &Option<LockHolder>) -> String {
    match holder {
        Some(h) => format!(" (pid {}, started {})", h.pid, h.started_at.to_rfc3339()),
        None => String::new(),
    }
}

/// Contents of the sidecar written next to a held lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub exe: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Holds the run lock until dropped.
pub struct RunLock {
    _file: File,
    lock_path: PathBuf,
    sidecar_path: Option<PathBuf>,
}

impl RunLock {
    /// Try to take the run lock for `warehouse_path` without blocking.
    pub fn try_acquire(warehouse_path: &Path) -> Result<Self, LockError> {
        let lock_path = run_lock_path(warehouse_path);
        debug!("Attempting to acquire run lock: {}", lock_path.display());

        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(LockError::CreateFailed)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(LockError::CreateFailed)?;

        // Fully qualified: newer std has an inherent File::try_lock with a
        // different error type.
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                info!("Acquired run lock: {}", lock_path.display());
                let sidecar_path = write_sidecar(&lock_path);
                Ok(Self {
                    _file: file,
                    lock_path,
                    sidecar_path,
                })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(LockError::Locked {
                holder: read_holder(&lock_path),
                path: lock_path,
            }),
            Err(e) => Err(LockError::AcquireFailed(e)),
        }
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        debug!("Releasing run lock: {}", self.lock_path.display());
        if let Some(path) = &self.sidecar_path {
            if let Err(e) = fs::remove_file(path) {
                debug!("Failed to remove lock sidecar {}: {}", path.display(), e);
            }
        }
        // Closing the file releases the flock.
    }
}

impl std::fmt::Debug for RunLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLock")
            .field("lock_path", &self.lock_path)
            .finish()
    }
}

/// `/data/sunlight.duckdb` → `/data/sunlight.duckdb.run.lock`
pub fn run_lock_path(warehouse_path: &Path) -> PathBuf {
    let mut name = warehouse_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "warehouse".into());
    name.push(".run.lock");
    warehouse_path.with_file_name(name)
}

fn sidecar_path_for(lock_path: &Path) -> PathBuf {
    let mut name = lock_path.as_os_str().to_os_string();
    name.push(".json");
    PathBuf::from(name)
}

fn write_sidecar(lock_path: &Path) -> Option<PathBuf> {
    let holder = LockHolder {
        pid: std::process::id(),
        exe: std::env::current_exe().ok().map(|p| p.display().to_string()),
        started_at: Utc::now(),
    };
    let sidecar_path = sidecar_path_for(lock_path);
    match serde_json::to_vec_pretty(&holder)
        .map_err(io::Error::other)
        .and_then(|payload| fs::write(&sidecar_path, payload))
    {
        Ok(()) => Some(sidecar_path),
        Err(e) => {
            warn!(
                "Failed to write lock sidecar {}: {}",
                sidecar_path.display(),
                e
            );
            None
        }
    }
}

/// Best effort: the holder may not have written its sidecar yet.
pub fn read_holder(lock_path: &Path) -> Option<LockHolder> {
    let payload = fs::read(sidecar_path_for(lock_path)).ok()?;
    serde_json::from_slice(&payload).ok()
}
