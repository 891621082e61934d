//! Shim configuration.
//!
//! Loaded from YAML (the same `serde_yaml` path the pod manifests use) or
//! built in code from [`ShimConfig::default`]. Every field has a default so
//! a partial document is valid:
//!
//! ```yaml
//! root_dir: /var/lib/magikcri
//! snapshotter: overlayfs
//! systemd_cgroup: false
//! seccomp_enabled: true
//! apparmor_enabled: false
//! runtime:
//!   name: io.containerd.runtime.v1.linux
//!   engine: ""
//!   root: ""
//! stream:
//!   address: ""
//!   port: "10010"
//! ```

use crate::constants::{
    STREAM_PROTOCOL_V1, STREAM_PROTOCOL_V2, STREAM_PROTOCOL_V3, STREAM_PROTOCOL_V4,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

/// Returns the platform-appropriate base directory for shim state.
///
/// - Linux: `/var/lib/magikcri`
/// - Elsewhere: `~/.magikcri` (user-writable)
pub fn default_root_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/lib/magikcri")
    }

    #[cfg(not(target_os = "linux"))]
    {
        dirs::home_dir()
            .map(|h| h.join(".magikcri"))
            .unwrap_or_else(|| PathBuf::from(".magikcri"))
    }
}

/// Top-level shim configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShimConfig {
    /// Root directory for per-container and per-sandbox state.
    pub root_dir: PathBuf,
    /// Snapshotter handed to the engine when creating containers.
    pub snapshotter: String,
    /// Low-level runtime selection passed through to the engine.
    pub runtime: RuntimeConfig,
    /// Use systemd-style cgroup paths.
    pub systemd_cgroup: bool,
    /// Seccomp support on this node.
    pub seccomp_enabled: bool,
    /// AppArmor support on this node.
    pub apparmor_enabled: bool,
    /// Streaming server settings.
    pub stream: StreamConfig,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            snapshotter: "overlayfs".to_string(),
            runtime: RuntimeConfig::default(),
            systemd_cgroup: false,
            seccomp_enabled: cfg!(target_os = "linux"),
            apparmor_enabled: false,
            stream: StreamConfig::default(),
        }
    }
}

/// Engine runtime options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime type name understood by the engine.
    pub name: String,
    /// Runtime binary (empty = engine default).
    pub engine: String,
    /// Runtime state root (empty = engine default).
    pub root: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            name: "io.containerd.runtime.v1.linux".to_string(),
            engine: String::new(),
            root: String::new(),
        }
    }
}

/// Streaming server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Bind address (empty = every interface).
    pub address: String,
    /// Bind port.
    pub port: String,
    /// Supported remote-command protocols, most preferred first.
    pub protocols: Vec<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: "10010".to_string(),
            protocols: vec![
                STREAM_PROTOCOL_V4.to_string(),
                STREAM_PROTOCOL_V3.to_string(),
                STREAM_PROTOCOL_V2.to_string(),
                STREAM_PROTOCOL_V1.to_string(),
            ],
        }
    }
}

impl StreamConfig {
    /// Socket address the stream server listens on.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let port: u16 = self.port.parse().map_err(|_| {
            Error::InvalidConfig(format!("invalid stream port {:?}", self.port))
        })?;
        let ip: IpAddr = if self.address.is_empty() {
            Ipv4Addr::UNSPECIFIED.into()
        } else {
            self.address.parse().map_err(|_| {
                Error::InvalidConfig(format!("invalid stream address {:?}", self.address))
            })?
        };
        Ok(SocketAddr::new(ip, port))
    }
}

impl ShimConfig {
    /// Parses a YAML document and validates it.
    pub fn from_yaml(yaml: &[u8]) -> Result<Self> {
        let config: Self =
            serde_yaml::from_slice(yaml).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a YAML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_yaml(&data)
    }

    /// Returns a config rooted at `root_dir` with all other defaults.
    pub fn with_root_dir(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    /// Checks invariants not expressible in the type.
    pub fn validate(&self) -> Result<()> {
        if self.root_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("root_dir must not be empty".to_string()));
        }
        if self.stream.protocols.is_empty() {
            return Err(Error::InvalidConfig(
                "stream.protocols must list at least one protocol".to_string(),
            ));
        }
        for protocol in &self.stream.protocols {
            if crate::streaming::ProtocolVersion::from_name(protocol).is_none() {
                return Err(Error::InvalidConfig(format!(
                    "unknown stream protocol {protocol:?}"
                )));
            }
        }
        self.stream.bind_addr()?;
        Ok(())
    }

    /// Root directory for a container.
    pub fn container_root_dir(&self, id: &str) -> PathBuf {
        self.root_dir.join(crate::constants::CONTAINERS_DIR).join(id)
    }

    /// Root directory for a sandbox.
    pub fn sandbox_root_dir(&self, id: &str) -> PathBuf {
        self.root_dir.join(crate::constants::SANDBOXES_DIR).join(id)
    }
}
