//! Container status and its on-disk checkpoint.
//!
//! The status is the only mutable part of a container entity. Every update
//! is written to `<container root>/status` before it becomes visible, so a
//! restarted shim can recover the last known state.
//!
//! ## Atomic Writes
//!
//! Checkpoints are written to a uniquely named temp file and renamed over
//! the target; a crash never leaves a truncated status file.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Exit code recorded for a container whose state could not be recovered.
pub const UNKNOWN_EXIT_CODE: i32 = 255;

// =============================================================================
// Container State
// =============================================================================

/// Lifecycle phase derived from a [`Status`].
///
/// ```text
///   Created ──▶ Running ──▶ Exited
///
///   Unknown   (recovered without a readable checkpoint)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Exited,
    Unknown,
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Exited => write!(f, "exited"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// Mutable container status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// PID of the container's main task (0 until started).
    pub pid: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: i32,
    /// Short machine-readable reason for the current state.
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    /// Set while the main task is being started.
    #[serde(default)]
    pub starting: bool,
    /// Set while the container is being removed.
    #[serde(default)]
    pub removing: bool,
    /// Set when the state could not be recovered.
    #[serde(default)]
    pub unknown: bool,
}

impl Status {
    /// Status of a freshly created container.
    pub fn created() -> Self {
        Self {
            pid: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            exit_code: 0,
            reason: String::new(),
            message: String::new(),
            starting: false,
            removing: false,
            unknown: false,
        }
    }

    /// Status of a container whose checkpoint was lost or unreadable.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            exit_code: UNKNOWN_EXIT_CODE,
            reason: "Unknown".to_string(),
            message: message.into(),
            unknown: true,
            ..Self::created()
        }
    }

    /// Derives the lifecycle phase from the timestamps.
    pub fn state(&self) -> ContainerState {
        if self.unknown {
            return ContainerState::Unknown;
        }
        match (self.started_at, self.finished_at) {
            (_, Some(_)) => ContainerState::Exited,
            (Some(_), None) => ContainerState::Running,
            (None, None) => ContainerState::Created,
        }
    }
}

// =============================================================================
// Status Storage
// =============================================================================

/// Status guarded by a lock and mirrored to a checkpoint file.
#[derive(Debug)]
pub struct StatusStorage {
    path: PathBuf,
    status: RwLock<Status>,
}

impl StatusStorage {
    /// Writes the initial checkpoint to `path` and returns the storage.
    pub fn create(path: impl Into<PathBuf>, status: Status) -> Result<Self> {
        let path = path.into();
        write_checkpoint(&path, &status)?;
        Ok(Self {
            path,
            status: RwLock::new(status),
        })
    }

    /// Loads a checkpoint written by [`create`](Self::create) or
    /// [`update`](Self::update).
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = fs::read(&path)?;
        let status: Status = serde_json::from_slice(&data)?;
        Ok(Self {
            path,
            status: RwLock::new(status),
        })
    }

    /// Returns a copy of the current status.
    pub fn get(&self) -> Result<Status> {
        self.status
            .read()
            .map(|s| s.clone())
            .map_err(|_| Error::Internal("status lock poisoned".to_string()))
    }

    /// Applies `f` to a copy of the status, checkpoints it, then publishes it.
    ///
    /// If `f` or the checkpoint fails, the in-memory status is unchanged.
    pub fn update<F>(&self, f: F) -> Result<Status>
    where
        F: FnOnce(&mut Status) -> Result<()>,
    {
        let mut guard = self
            .status
            .write()
            .map_err(|_| Error::Internal("status lock poisoned".to_string()))?;
        let mut next = guard.clone();
        f(&mut next)?;
        write_checkpoint(&self.path, &next)?;
        *guard = next.clone();
        Ok(next)
    }

    /// Removes the checkpoint file. Missing files are ignored.
    pub fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_checkpoint(path: &Path, status: &Status) -> Result<()> {
    let data = serde_json::to_vec(status)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::now_v7()));
    fs::write(&temp_path, &data)?;
    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::from(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_state_derivation() {
        let mut status = Status::created();
        assert_eq!(status.state(), ContainerState::Created);
        status.started_at = Some(Utc::now());
        assert_eq!(status.state(), ContainerState::Running);
        status.finished_at = Some(Utc::now());
        assert_eq!(status.state(), ContainerState::Exited);

        let status = Status::unknown("checkpoint missing");
        assert_eq!(status.state(), ContainerState::Unknown);
        assert_eq!(status.exit_code, UNKNOWN_EXIT_CODE);
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status");
        let storage = StatusStorage::create(&path, Status::created()).unwrap();

        storage
            .update(|s| {
                s.pid = 42;
                s.started_at = Some(Utc::now());
                Ok(())
            })
            .unwrap();

        let loaded = StatusStorage::load(&path).unwrap();
        assert_eq!(loaded.get().unwrap().pid, 42);
        assert_eq!(loaded.get().unwrap().state(), ContainerState::Running);
    }

    #[test]
    fn test_failed_update_leaves_status_unchanged() {
        let dir = TempDir::new().unwrap();
        let storage = StatusStorage::create(dir.path().join("status"), Status::created()).unwrap();

        let result = storage.update(|s| {
            s.pid = 7;
            Err(Error::Internal("boom".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(storage.get().unwrap().pid, 0);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status");
        let storage = StatusStorage::create(&path, Status::created()).unwrap();
        storage.delete().unwrap();
        assert!(!path.exists());
        storage.delete().unwrap();
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let storage = StatusStorage::create(dir.path().join("status"), Status::created()).unwrap();
        storage.update(|s| {
            s.exit_code = 1;
            Ok(())
        })
        .unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
