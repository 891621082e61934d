//! Host OS access used by the spec compiler.
//!
//! Compilation is pure apart from a handful of host lookups. They sit
//! behind [`HostOs`] so tests can describe an arbitrary mount table and
//! device set without root.

use super::devices::{self, HostDevice};
use super::mounts::{self, MountInfo};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Default location of the mount table.
pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// Default device directory.
pub const DEV_DIR: &str = "/dev";

/// Host lookups performed while compiling a spec.
pub trait HostOs: Send + Sync {
    /// Creates `path` as a directory (with parents) if it does not exist.
    fn ensure_dir(&self, path: &Path) -> Result<()>;

    /// Resolves every symlink in `path`.
    fn resolve_symlinks(&self, path: &Path) -> Result<PathBuf>;

    /// Returns the mount containing `path`.
    fn lookup_mount(&self, path: &Path) -> Result<MountInfo>;

    /// Inspects the device node at `path`.
    fn device(&self, path: &Path, permissions: &str) -> Result<HostDevice>;

    /// Enumerates every device node on the host.
    fn host_devices(&self) -> Result<Vec<HostDevice>>;
}

/// [`HostOs`] backed by the real filesystem.
#[derive(Debug, Clone)]
pub struct RealHost {
    mountinfo_path: PathBuf,
    dev_dir: PathBuf,
}

impl Default for RealHost {
    fn default() -> Self {
        Self::new()
    }
}

impl RealHost {
    pub fn new() -> Self {
        Self::with_paths(MOUNTINFO_PATH, DEV_DIR)
    }

    /// Uses an alternative mount table and device directory.
    pub fn with_paths(mountinfo_path: impl Into<PathBuf>, dev_dir: impl Into<PathBuf>) -> Self {
        Self {
            mountinfo_path: mountinfo_path.into(),
            dev_dir: dev_dir.into(),
        }
    }
}

impl HostOs for RealHost {
    fn ensure_dir(&self, path: &Path) -> Result<()> {
        match std::fs::metadata(path) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Creating missing bind source");
                std::fs::create_dir_all(path)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn resolve_symlinks(&self, path: &Path) -> Result<PathBuf> {
        Ok(std::fs::canonicalize(path)?)
    }

    fn lookup_mount(&self, path: &Path) -> Result<MountInfo> {
        let table = std::fs::read_to_string(&self.mountinfo_path)?;
        let entries = mounts::parse_mountinfo(&table)?;
        mounts::find_mount(&entries, path).cloned().ok_or_else(|| {
            Error::NotFound(format!("mount containing {}", path.display()))
        })
    }

    fn device(&self, path: &Path, permissions: &str) -> Result<HostDevice> {
        devices::device_from_path(path, permissions)
    }

    fn host_devices(&self) -> Result<Vec<HostDevice>> {
        devices::host_devices(&self.dev_dir)
    }
}
