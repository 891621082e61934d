//! Declarative container and sandbox configuration.
//!
//! These are the high-level inputs accepted by the container service. They
//! mirror the kubelet's container and pod-sandbox configs closely enough to
//! be produced from a pod manifest, and every optional field defaults so
//! partial documents deserialize.
//!
//! # Formats
//!
//! - **YAML**: parsed via `serde_yaml`
//! - **JSON**: also accepted (YAML is a superset of JSON)

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum size of a config document in bytes (1 MiB).
pub const MAX_CONFIG_SIZE: usize = 1024 * 1024;

// =============================================================================
// Container Config
// =============================================================================

/// Configuration for one workload container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Container name, unique within the sandbox.
    pub name: String,
    /// Restart attempt counter.
    pub attempt: u32,
    /// Image reference or image ID.
    pub image: String,
    /// Explicit command. `None` falls back to the image entrypoint;
    /// `Some(vec![])` suppresses it.
    pub command: Option<Vec<String>>,
    /// Explicit arguments.
    pub args: Vec<String>,
    /// Working directory override.
    pub working_dir: String,
    /// Environment, applied in order.
    pub envs: Vec<KeyValue>,
    /// Caller-declared mounts.
    pub mounts: Vec<Mount>,
    /// Host devices to expose.
    pub devices: Vec<Device>,
    /// Labels stored alongside the container.
    pub labels: HashMap<String, String>,
    /// Free-form annotations.
    pub annotations: HashMap<String, String>,
    /// Log path relative to the sandbox log directory.
    pub log_path: String,
    /// Keep stdin open.
    pub stdin: bool,
    /// Close stdin after the first attach detaches.
    pub stdin_once: bool,
    /// Allocate a terminal.
    pub tty: bool,
    /// Linux-specific settings.
    pub linux: LinuxContainerConfig,
}

impl ContainerConfig {
    /// Parses a container config from YAML (or JSON) bytes.
    pub fn from_yaml(yaml: &[u8]) -> Result<Self> {
        if yaml.len() > MAX_CONFIG_SIZE {
            return Err(Error::InvalidConfig(format!(
                "container config size {} exceeds limit of {}",
                yaml.len(),
                MAX_CONFIG_SIZE
            )));
        }
        let config: Self =
            serde_yaml::from_slice(yaml).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if config.name.is_empty() {
            return Err(Error::InvalidConfig("container name must not be empty".to_string()));
        }
        Ok(config)
    }

    /// Returns the effective security context.
    pub fn security_context(&self) -> &SecurityContext {
        &self.linux.security_context
    }
}

/// A single environment entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Mount propagation requested for a bind mount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountPropagation {
    /// No propagation in either direction.
    #[default]
    Private,
    /// Host mounts propagate into the container.
    HostToContainer,
    /// Mounts propagate both ways.
    Bidirectional,
    /// Anything this build does not recognise.
    #[serde(other)]
    Unknown,
}

/// A caller-declared bind mount.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mount {
    /// Destination inside the container.
    pub container_path: String,
    /// Source on the host.
    pub host_path: String,
    pub readonly: bool,
    /// Relabel the source for SELinux.
    pub selinux_relabel: bool,
    pub propagation: MountPropagation,
}

impl Mount {
    /// Creates a read-write private bind mount.
    pub fn bind(host_path: impl Into<String>, container_path: impl Into<String>) -> Self {
        Self {
            container_path: container_path.into(),
            host_path: host_path.into(),
            ..Self::default()
        }
    }
}

/// A host device exposed to the container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Device {
    pub container_path: String,
    pub host_path: String,
    /// Cgroup permissions, a combination of `r`, `w` and `m`.
    pub permissions: String,
}

/// Linux-specific container settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinuxContainerConfig {
    pub resources: Option<LinuxResources>,
    pub security_context: SecurityContext,
}

/// Resource limits copied into the execution spec when set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinuxResources {
    pub cpu_period: i64,
    pub cpu_quota: i64,
    pub cpu_shares: i64,
    pub memory_limit_in_bytes: i64,
    pub oom_score_adj: i64,
    pub cpuset_cpus: String,
    pub cpuset_mems: String,
}

/// Capability adjustments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capability {
    pub add_capabilities: Vec<String>,
    pub drop_capabilities: Vec<String>,
}

/// Namespaces shared with the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceOption {
    pub host_network: bool,
    pub host_pid: bool,
    pub host_ipc: bool,
}

/// SELinux label components.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelinuxOption {
    pub user: String,
    pub role: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub level: String,
}

impl SelinuxOption {
    /// Formats the label as `user:role:type:level`, or `None` if unset.
    pub fn label(&self) -> Option<String> {
        if self.user.is_empty()
            && self.role.is_empty()
            && self.type_.is_empty()
            && self.level.is_empty()
        {
            return None;
        }
        Some(format!(
            "{}:{}:{}:{}",
            self.user, self.role, self.type_, self.level
        ))
    }
}

/// Container security settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityContext {
    pub capabilities: Option<Capability>,
    pub privileged: bool,
    pub namespace_options: NamespaceOption,
    pub selinux_options: Option<SelinuxOption>,
    pub run_as_user: Option<i64>,
    pub run_as_username: String,
    pub readonly_rootfs: bool,
    pub supplemental_groups: Vec<i64>,
    /// AppArmor profile name (kubelet convention).
    pub apparmor_profile: String,
    /// Seccomp profile name (kubelet convention).
    pub seccomp_profile_path: String,
    pub no_new_privs: bool,
}

// =============================================================================
// Sandbox Config
// =============================================================================

/// Configuration of the pod sandbox hosting containers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub name: String,
    pub uid: String,
    pub namespace: String,
    pub attempt: u32,
    /// Directory container log paths are relative to.
    pub log_directory: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub linux: LinuxSandboxConfig,
}

impl SandboxConfig {
    /// Parses a sandbox config from YAML (or JSON) bytes.
    pub fn from_yaml(yaml: &[u8]) -> Result<Self> {
        if yaml.len() > MAX_CONFIG_SIZE {
            return Err(Error::InvalidConfig(format!(
                "sandbox config size {} exceeds limit of {}",
                yaml.len(),
                MAX_CONFIG_SIZE
            )));
        }
        let config: Self =
            serde_yaml::from_slice(yaml).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if config.name.is_empty() {
            return Err(Error::InvalidConfig("sandbox name must not be empty".to_string()));
        }
        Ok(config)
    }

    /// Namespace options of the sandbox.
    pub fn namespace_options(&self) -> NamespaceOption {
        self.linux.security_context.namespace_options
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinuxSandboxConfig {
    /// Parent cgroup for every container in the sandbox.
    pub cgroup_parent: String,
    pub security_context: SandboxSecurityContext,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSecurityContext {
    pub namespace_options: NamespaceOption,
    pub privileged: bool,
    pub selinux_options: Option<SelinuxOption>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_config_from_yaml() {
        let yaml = br#"
name: web
image: nginx:latest
args: ["-g", "daemon off;"]
envs:
  - key: A
    value: "1"
mounts:
  - container_path: /data
    host_path: /srv/data
    propagation: bidirectional
linux:
  security_context:
    privileged: true
"#;
        let config = ContainerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.name, "web");
        assert!(config.command.is_none());
        assert_eq!(config.envs, vec![KeyValue::new("A", "1")]);
        assert_eq!(config.mounts[0].propagation, MountPropagation::Bidirectional);
        assert!(config.security_context().privileged);
    }

    #[test]
    fn test_unknown_propagation_deserializes() {
        let mount: Mount =
            serde_yaml::from_str("container_path: /x\nhost_path: /y\npropagation: sideways\n")
                .unwrap();
        assert_eq!(mount.propagation, MountPropagation::Unknown);
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(ContainerConfig::from_yaml(b"image: busybox\n").is_err());
        assert!(SandboxConfig::from_yaml(b"uid: abc\n").is_err());
    }

    #[test]
    fn test_selinux_label() {
        assert_eq!(SelinuxOption::default().label(), None);
        let opt = SelinuxOption {
            user: "system_u".to_string(),
            role: "system_r".to_string(),
            type_: "container_t".to_string(),
            level: "s0".to_string(),
        };
        assert_eq!(opt.label().as_deref(), Some("system_u:system_r:container_t:s0"));
    }
}
