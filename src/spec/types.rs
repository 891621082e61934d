//! OCI runtime spec types.
//!
//! Only the subset of the runtime spec the compiler emits. Field names
//! serialize to the upstream `config.json` spelling so the result can be
//! handed to any OCI runtime unchanged.
//!
//! Ref: https://github.com/opencontainers/runtime-spec/blob/main/config.md

use crate::constants::{
    DEFAULT_CWD, DEFAULT_MASKED_PATHS, DEFAULT_READONLY_PATHS, DEV_SHM, OCI_RUNTIME_SPEC_VERSION,
    RELATIVE_ROOTFS_PATH,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

// =============================================================================
// Namespaces
// =============================================================================

/// Linux namespace kinds used by the shim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceType {
    Pid,
    Network,
    Ipc,
    Uts,
    Mount,
    User,
    Cgroup,
}

impl NamespaceType {
    /// Entry name under `/proc/<pid>/ns/`.
    pub fn proc_name(self) -> &'static str {
        match self {
            Self::Pid => "pid",
            Self::Network => "net",
            Self::Ipc => "ipc",
            Self::Uts => "uts",
            Self::Mount => "mnt",
            Self::User => "user",
            Self::Cgroup => "cgroup",
        }
    }
}

// =============================================================================
// OCI Spec
// =============================================================================

/// OCI runtime spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciSpec {
    pub oci_version: String,
    pub root: OciRoot,
    pub process: OciProcess,
    pub mounts: Vec<OciMount>,
    pub linux: OciLinux,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

impl Default for OciSpec {
    /// The base every container spec starts from: isolated namespaces,
    /// standard pseudo-filesystems, deny-all device cgroup, masked and
    /// read-only kernel paths, no capabilities.
    fn default() -> Self {
        Self {
            oci_version: OCI_RUNTIME_SPEC_VERSION.to_string(),
            root: OciRoot {
                path: RELATIVE_ROOTFS_PATH.to_string(),
                readonly: false,
            },
            process: OciProcess {
                cwd: DEFAULT_CWD.to_string(),
                ..OciProcess::default()
            },
            mounts: default_mounts(),
            linux: OciLinux {
                namespaces: [
                    NamespaceType::Pid,
                    NamespaceType::Ipc,
                    NamespaceType::Uts,
                    NamespaceType::Mount,
                    NamespaceType::Network,
                ]
                .into_iter()
                .map(|ns_type| OciNamespace { ns_type, path: None })
                .collect(),
                resources: OciResources {
                    devices: vec![OciDeviceCgroup::deny_all()],
                    ..OciResources::default()
                },
                masked_paths: DEFAULT_MASKED_PATHS.iter().map(|p| p.to_string()).collect(),
                readonly_paths: DEFAULT_READONLY_PATHS.iter().map(|p| p.to_string()).collect(),
                ..OciLinux::default()
            },
            annotations: HashMap::new(),
        }
    }
}

impl OciSpec {
    /// Sets `KEY=value`, replacing an existing entry for `KEY` in place.
    pub fn set_env(&mut self, key: &str, value: &str) {
        let entry = format!("{key}={value}");
        let prefix = format!("{key}=");
        match self
            .process
            .env
            .iter_mut()
            .find(|e| e.starts_with(&prefix) || e.as_str() == key)
        {
            Some(existing) => *existing = entry,
            None => self.process.env.push(entry),
        }
    }

    /// Returns the value of `key` in the process environment.
    pub fn env(&self, key: &str) -> Option<&str> {
        self.process
            .env
            .iter()
            .find_map(|e| e.split_once('=').filter(|(k, _)| *k == key).map(|(_, v)| v))
    }

    /// Joins or replaces the namespace of `ns_type` with `path`.
    pub fn set_namespace(&mut self, ns_type: NamespaceType, path: Option<String>) {
        match self
            .linux
            .namespaces
            .iter_mut()
            .find(|ns| ns.ns_type == ns_type)
        {
            Some(ns) => ns.path = path,
            None => self.linux.namespaces.push(OciNamespace { ns_type, path }),
        }
    }

    /// Drops the namespace of `ns_type`, sharing the host's.
    pub fn remove_namespace(&mut self, ns_type: NamespaceType) {
        self.linux.namespaces.retain(|ns| ns.ns_type != ns_type);
    }

    pub fn namespace(&self, ns_type: NamespaceType) -> Option<&OciNamespace> {
        self.linux.namespaces.iter().find(|ns| ns.ns_type == ns_type)
    }

    /// Finds the mount at `destination`.
    pub fn mount(&self, destination: &str) -> Option<&OciMount> {
        self.mounts.iter().find(|m| m.destination == destination)
    }
}

/// Standard pseudo-filesystems mounted into every container.
pub fn default_mounts() -> Vec<OciMount> {
    fn mount(destination: &str, mount_type: &str, source: &str, options: &[&str]) -> OciMount {
        OciMount {
            destination: destination.to_string(),
            mount_type: mount_type.to_string(),
            source: source.to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }

    vec![
        mount("/proc", "proc", "proc", &["nosuid", "noexec", "nodev"]),
        mount("/dev", "tmpfs", "tmpfs", &["nosuid", "strictatime", "mode=755", "size=65536k"]),
        mount(
            "/dev/pts",
            "devpts",
            "devpts",
            &["nosuid", "noexec", "newinstance", "ptmxmode=0666", "mode=0620", "gid=5"],
        ),
        mount(DEV_SHM, "tmpfs", "shm", &["nosuid", "noexec", "nodev", "mode=1777", "size=65536k"]),
        mount("/dev/mqueue", "mqueue", "mqueue", &["nosuid", "noexec", "nodev"]),
        mount("/sys", "sysfs", "sysfs", &["nosuid", "noexec", "nodev", "ro"]),
        mount("/sys/fs/cgroup", "cgroup", "cgroup", &["nosuid", "noexec", "nodev", "relatime", "ro"]),
    ]
}

/// OCI root filesystem config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciRoot {
    pub path: String,
    pub readonly: bool,
}

/// OCI process config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciProcess {
    pub terminal: bool,
    pub user: OciUser,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: String,
    pub capabilities: OciCapabilities,
    pub no_new_privileges: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apparmor_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selinux_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oom_score_adj: Option<i64>,
}

/// OCI user config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciUser {
    pub uid: u32,
    pub gid: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_gids: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Process capability sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciCapabilities {
    pub bounding: BTreeSet<String>,
    pub effective: BTreeSet<String>,
    pub inheritable: BTreeSet<String>,
    pub permitted: BTreeSet<String>,
}

impl OciCapabilities {
    fn sets_mut(&mut self) -> [&mut BTreeSet<String>; 4] {
        [
            &mut self.bounding,
            &mut self.effective,
            &mut self.inheritable,
            &mut self.permitted,
        ]
    }

    /// Adds a capability to every set.
    pub fn insert(&mut self, cap: &str) {
        for set in self.sets_mut() {
            set.insert(cap.to_string());
        }
    }

    /// Removes a capability from every set.
    pub fn remove(&mut self, cap: &str) {
        for set in self.sets_mut() {
            set.remove(cap);
        }
    }

    /// Empties every set.
    pub fn clear(&mut self) {
        for set in self.sets_mut() {
            set.clear();
        }
    }

    /// Returns true if `cap` is in every set.
    pub fn contains(&self, cap: &str) -> bool {
        self.bounding.contains(cap)
            && self.effective.contains(cap)
            && self.inheritable.contains(cap)
            && self.permitted.contains(cap)
    }
}

/// OCI mount config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciMount {
    pub destination: String,
    #[serde(rename = "type")]
    pub mount_type: String,
    pub source: String,
    #[serde(default)]
    pub options: Vec<String>,
}

impl OciMount {
    /// Returns true if the mount carries the `ro` option.
    pub fn is_readonly(&self) -> bool {
        self.options.iter().any(|o| o == "ro")
    }

    /// Removes the `ro` option.
    pub fn clear_readonly(&mut self) {
        self.options.retain(|o| o != "ro");
    }
}

/// OCI Linux-specific config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciLinux {
    pub namespaces: Vec<OciNamespace>,
    pub resources: OciResources,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cgroups_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<OciDevice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seccomp: Option<SeccompProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rootfs_propagation: Option<String>,
    #[serde(default)]
    pub masked_paths: Vec<String>,
    #[serde(default)]
    pub readonly_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_label: Option<String>,
}

/// OCI namespace config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciNamespace {
    #[serde(rename = "type")]
    pub ns_type: NamespaceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// OCI resource limits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OciResources {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<OciDeviceCgroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<OciMemory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<OciCpu>,
}

/// OCI memory limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciMemory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

/// OCI CPU limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciCpu {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shares: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mems: Option<String>,
}

/// A device node created in the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciDevice {
    pub path: String,
    /// `c`, `b` or `p`.
    #[serde(rename = "type")]
    pub dev_type: String,
    pub major: i64,
    pub minor: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_mode: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
}

/// A device cgroup rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciDeviceCgroup {
    pub allow: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub dev_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minor: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
}

impl OciDeviceCgroup {
    pub fn deny_all() -> Self {
        Self {
            allow: false,
            dev_type: None,
            major: None,
            minor: None,
            access: Some("rwm".to_string()),
        }
    }

    pub fn allow_all() -> Self {
        Self {
            allow: true,
            ..Self::deny_all()
        }
    }
}

/// Seccomp profile selection.
///
/// The profile bodies are owned by the engine; the OCI spec only names them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "camelCase")]
pub enum SeccompProfile {
    /// The engine's built-in default profile.
    RuntimeDefault,
    /// A profile installed on the node.
    Localhost(String),
}
