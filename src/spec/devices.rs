//! Host device inspection.

use crate::error::{Error, Result};
use super::types::{OciDevice, OciDeviceCgroup};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

/// Directories under `/dev` never mapped into privileged containers.
const SKIPPED_DEV_DIRS: &[&str] = &["pts", "shm", "fd", "mqueue", ".lxc", ".lxd-mounts", ".udev"];

/// Kind of device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Char,
    Block,
    Fifo,
}

impl DeviceType {
    /// OCI type letter.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Char => "c",
            Self::Block => "b",
            Self::Fifo => "p",
        }
    }
}

/// A device node found on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDevice {
    pub path: PathBuf,
    pub dev_type: DeviceType,
    pub major: i64,
    pub minor: i64,
    pub file_mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Cgroup access string (`rwm` subset).
    pub permissions: String,
}

impl HostDevice {
    /// Device node entry placed at `container_path`.
    pub fn to_oci(&self, container_path: &str) -> OciDevice {
        OciDevice {
            path: container_path.to_string(),
            dev_type: self.dev_type.as_str().to_string(),
            major: self.major,
            minor: self.minor,
            file_mode: Some(self.file_mode),
            uid: Some(self.uid),
            gid: Some(self.gid),
        }
    }

    /// Cgroup rule allowing this device with its permissions.
    pub fn to_cgroup_rule(&self) -> OciDeviceCgroup {
        OciDeviceCgroup {
            allow: true,
            dev_type: Some(self.dev_type.as_str().to_string()),
            major: Some(self.major),
            minor: Some(self.minor),
            access: Some(self.permissions.clone()),
        }
    }
}

/// Inspects the device node at `path` (symlinks are not followed).
pub fn device_from_path(path: &Path, permissions: &str) -> Result<HostDevice> {
    let metadata = std::fs::symlink_metadata(path)?;
    let file_type = metadata.file_type();
    let dev_type = if file_type.is_char_device() {
        DeviceType::Char
    } else if file_type.is_block_device() {
        DeviceType::Block
    } else if file_type.is_fifo() {
        DeviceType::Fifo
    } else {
        return Err(Error::InvalidDevice {
            path: path.to_path_buf(),
            reason: "not a device node".to_string(),
        });
    };

    let rdev = metadata.rdev();
    Ok(HostDevice {
        path: path.to_path_buf(),
        dev_type,
        major: nix::sys::stat::major(rdev) as i64,
        minor: nix::sys::stat::minor(rdev) as i64,
        file_mode: metadata.mode() & 0o7777,
        uid: metadata.uid(),
        gid: metadata.gid(),
        permissions: permissions.to_string(),
    })
}

/// Walks `dev_dir` and returns every device node with `rwm` permissions.
///
/// Entries that are not devices, and the `0:0` placeholder, are skipped.
pub fn host_devices(dev_dir: &Path) -> Result<Vec<HostDevice>> {
    let mut found = Vec::new();
    walk(dev_dir, &mut found)?;
    found.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(found)
}

fn walk(dir: &Path, found: &mut Vec<HostDevice>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            let skipped = entry
                .file_name()
                .to_str()
                .is_some_and(|name| SKIPPED_DEV_DIRS.contains(&name));
            if !skipped {
                walk(&path, found)?;
            }
            continue;
        }
        if path == Path::new("/dev/console") {
            continue;
        }

        match device_from_path(&path, "rwm") {
            Ok(device) if device.major == 0 && device.minor == 0 => {}
            Ok(device) => found.push(device),
            Err(Error::InvalidDevice { .. }) => {}
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_regular_file_is_not_a_device() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        let err = device_from_path(&file, "rwm").unwrap_err();
        assert!(matches!(err, Error::InvalidDevice { .. }));
    }

    #[test]
    fn test_fifo_is_a_device_node() {
        let dir = TempDir::new().unwrap();
        let fifo = dir.path().join("pipe");
        nix::unistd::mkfifo(&fifo, nix::sys::stat::Mode::from_bits_truncate(0o600)).unwrap();
        let device = device_from_path(&fifo, "rw").unwrap();
        assert_eq!(device.dev_type, DeviceType::Fifo);
        assert_eq!(device.permissions, "rw");
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_dev_null() {
        let device = device_from_path(Path::new("/dev/null"), "rwm").unwrap();
        assert_eq!(device.dev_type, DeviceType::Char);
        assert_eq!((device.major, device.minor), (1, 3));

        let oci = device.to_oci("/dev/null");
        assert_eq!(oci.dev_type, "c");
        let rule = device.to_cgroup_rule();
        assert!(rule.allow);
        assert_eq!(rule.access.as_deref(), Some("rwm"));
    }

    #[test]
    fn test_host_devices_skips_regular_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("file"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("pts")).unwrap();
        assert!(host_devices(dir.path()).unwrap().is_empty());
    }
}
