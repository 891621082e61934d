//! Bind mount propagation and the host mount table.
//!
//! | Requested           | Mount option | Host source must be | Root propagation          |
//! |---------------------|--------------|---------------------|---------------------------|
//! | `Private`           | `rprivate`   | anything            | unchanged                 |
//! | `HostToContainer`   | `rslave`     | shared or slave     | `rslave` unless stronger  |
//! | `Bidirectional`     | `rshared`    | shared              | `rshared`                 |
//! | `Unknown`           | `rprivate`   | anything            | unchanged (warning)       |

use crate::error::{Error, Result};
use crate::manifest::MountPropagation;
use std::path::{Path, PathBuf};

/// Root propagation values that already satisfy host-to-container mounts.
const SLAVE_COMPATIBLE_ROOTS: &[&str] = &["rshared", "rslave"];

// =============================================================================
// Propagation Behavior Table
// =============================================================================

/// What the host source of a propagating mount must be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRequirement {
    Shared,
    SharedOrSlave,
}

impl PeerRequirement {
    fn describe(self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::SharedOrSlave => "shared or slave",
        }
    }

    fn satisfied_by(self, info: &MountInfo) -> bool {
        match self {
            Self::Shared => info.is_shared(),
            Self::SharedOrSlave => info.is_shared() || info.is_slave(),
        }
    }
}

/// How the container root propagation changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootPropagation {
    Unchanged,
    /// Force this value.
    Force(&'static str),
    /// Set this value unless the root is already at least as permissive.
    AtLeast(&'static str),
}

/// Behavior of one propagation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropagationBehavior {
    pub option: &'static str,
    pub requires: Option<PeerRequirement>,
    pub root: RootPropagation,
}

impl MountPropagation {
    /// Looks up the behavior row for this mode.
    pub fn behavior(self) -> PropagationBehavior {
        match self {
            Self::Private | Self::Unknown => PropagationBehavior {
                option: "rprivate",
                requires: None,
                root: RootPropagation::Unchanged,
            },
            Self::HostToContainer => PropagationBehavior {
                option: "rslave",
                requires: Some(PeerRequirement::SharedOrSlave),
                root: RootPropagation::AtLeast("rslave"),
            },
            Self::Bidirectional => PropagationBehavior {
                option: "rshared",
                requires: Some(PeerRequirement::Shared),
                root: RootPropagation::Force("rshared"),
            },
        }
    }
}

impl RootPropagation {
    /// Applies the change to the current root propagation value.
    pub fn apply(self, current: &mut Option<String>) {
        match self {
            Self::Unchanged => {}
            Self::Force(value) => *current = Some(value.to_string()),
            Self::AtLeast(value) => {
                let satisfied = current
                    .as_deref()
                    .is_some_and(|c| SLAVE_COMPATIBLE_ROOTS.contains(&c));
                if !satisfied {
                    *current = Some(value.to_string());
                }
            }
        }
    }
}

/// Checks `source` (already symlink-resolved) against `requirement`.
pub fn check_peer(source: &Path, info: &MountInfo, requirement: PeerRequirement) -> Result<()> {
    if requirement.satisfied_by(info) {
        return Ok(());
    }
    Err(Error::InvalidMountPropagation {
        path: source.to_path_buf(),
        mountpoint: info.mountpoint.clone(),
        expected: requirement.describe(),
    })
}

// =============================================================================
// Mount Table
// =============================================================================

/// One row of `/proc/self/mountinfo`, reduced to what propagation needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub mountpoint: PathBuf,
    /// Space-separated optional fields (`shared:N`, `master:N`, ...).
    pub optional: String,
}

impl MountInfo {
    pub fn new(mountpoint: impl Into<PathBuf>, optional: impl Into<String>) -> Self {
        Self {
            mountpoint: mountpoint.into(),
            optional: optional.into(),
        }
    }

    pub fn is_shared(&self) -> bool {
        self.optional
            .split_whitespace()
            .any(|tag| tag.starts_with("shared:"))
    }

    pub fn is_slave(&self) -> bool {
        self.optional
            .split_whitespace()
            .any(|tag| tag.starts_with("master:"))
    }
}

/// Parses the mountinfo format.
///
/// ```text
/// 36 35 98:0 /mnt1 /mnt2 rw,noatime master:1 - ext3 /dev/root rw,errors=continue
/// (0)(1)(2)   (3)   (4)      (5)      (6..)  sep (fs) (source)  (super options)
/// ```
pub fn parse_mountinfo(table: &str) -> Result<Vec<MountInfo>> {
    let mut entries = Vec::new();
    for (lineno, line) in table.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        // The six mandatory fields precede the optional ones and the separator.
        let Some(separator) = fields.iter().position(|f| *f == "-").filter(|&s| s >= 6) else {
            return Err(Error::Serialization(format!(
                "malformed mountinfo line {}: {line:?}",
                lineno + 1
            )));
        };
        entries.push(MountInfo {
            mountpoint: PathBuf::from(unescape(fields[4])),
            optional: fields[6..separator].join(" "),
        });
    }
    Ok(entries)
}

/// Finds the mount with the longest mountpoint containing `path`.
pub fn find_mount<'a>(entries: &'a [MountInfo], path: &Path) -> Option<&'a MountInfo> {
    entries
        .iter()
        .filter(|m| path.starts_with(&m.mountpoint))
        .max_by_key(|m| m.mountpoint.as_os_str().len())
}

/// Decodes the `\NNN` octal escapes mountinfo uses for whitespace.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 4])
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 8).ok());
            if let Some(value) = decoded {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
