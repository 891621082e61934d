//! # Runtime Shim Constants
//!
//! Well-known names, on-disk layout, profile conventions and protocol
//! identifiers for the shim. These constants are the **single source of
//! truth** for values shared between the spec compiler, the container
//! service and the streaming layer.
//!
//! ## Cross-References
//!
//! - [`crate::spec`]: capability list, profile names, default mounts
//! - [`crate::server`]: root directory layout, implicit mount paths
//! - [`crate::streaming`]: protocol identifiers and stream headers

// =============================================================================
// On-Disk Layout
// =============================================================================

/// Subdirectory of the root dir holding per-container state.
pub const CONTAINERS_DIR: &str = "containers";

/// Subdirectory of the root dir holding per-sandbox state.
pub const SANDBOXES_DIR: &str = "sandboxes";

/// Subdirectory of a container root holding image-declared volumes.
pub const VOLUMES_DIR: &str = "volumes";

/// Status checkpoint file inside a container root.
pub const STATUS_FILE: &str = "status";

/// Sandbox-managed hosts file (relative to the sandbox root).
pub const SANDBOX_HOSTS_FILE: &str = "hosts";

/// Sandbox-managed resolv.conf (relative to the sandbox root).
pub const SANDBOX_RESOLV_FILE: &str = "resolv.conf";

/// Sandbox-managed shared memory dir (relative to the sandbox root).
pub const SANDBOX_SHM_DIR: &str = "shm";

/// Container path of the hosts file.
pub const ETC_HOSTS: &str = "/etc/hosts";

/// Container path of resolv.conf.
pub const RESOLV_CONF_PATH: &str = "/etc/resolv.conf";

/// Container path (and host path under host IPC) of shared memory.
pub const DEV_SHM: &str = "/dev/shm";

// =============================================================================
// OCI Spec Defaults
// =============================================================================

/// OCI runtime spec version emitted in generated specs.
pub const OCI_RUNTIME_SPEC_VERSION: &str = "1.0.2";

/// Rootfs path relative to the engine's bundle.
pub const RELATIVE_ROOTFS_PATH: &str = "rootfs";

/// PATH applied before image and caller environment.
pub const DEFAULT_PATH_ENV: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Working directory when neither config nor image set one.
pub const DEFAULT_CWD: &str = "/";

/// Namespace tag used in systemd cgroup paths.
pub const CGROUP_SYSTEMD_PREFIX: &str = "magikcri";

/// Paths hidden from non-privileged containers.
pub const DEFAULT_MASKED_PATHS: &[&str] = &[
    "/proc/acpi",
    "/proc/asound",
    "/proc/kcore",
    "/proc/keys",
    "/proc/latency_stats",
    "/proc/timer_list",
    "/proc/timer_stats",
    "/proc/sched_debug",
    "/proc/scsi",
    "/sys/firmware",
];

/// Paths mounted read-only in non-privileged containers.
pub const DEFAULT_READONLY_PATHS: &[&str] = &[
    "/proc/bus",
    "/proc/fs",
    "/proc/irq",
    "/proc/sys",
    "/proc/sysrq-trigger",
];

/// Every Linux capability known to the shim, in kernel order.
pub const ALL_CAPABILITIES: &[&str] = &[
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_DAC_READ_SEARCH",
    "CAP_FOWNER",
    "CAP_FSETID",
    "CAP_KILL",
    "CAP_SETGID",
    "CAP_SETUID",
    "CAP_SETPCAP",
    "CAP_LINUX_IMMUTABLE",
    "CAP_NET_BIND_SERVICE",
    "CAP_NET_BROADCAST",
    "CAP_NET_ADMIN",
    "CAP_NET_RAW",
    "CAP_IPC_LOCK",
    "CAP_IPC_OWNER",
    "CAP_SYS_MODULE",
    "CAP_SYS_RAWIO",
    "CAP_SYS_CHROOT",
    "CAP_SYS_PTRACE",
    "CAP_SYS_PACCT",
    "CAP_SYS_ADMIN",
    "CAP_SYS_BOOT",
    "CAP_SYS_NICE",
    "CAP_SYS_RESOURCE",
    "CAP_SYS_TIME",
    "CAP_SYS_TTY_CONFIG",
    "CAP_MKNOD",
    "CAP_LEASE",
    "CAP_AUDIT_WRITE",
    "CAP_AUDIT_CONTROL",
    "CAP_SETFCAP",
    "CAP_MAC_OVERRIDE",
    "CAP_MAC_ADMIN",
    "CAP_SYSLOG",
    "CAP_WAKE_ALARM",
    "CAP_BLOCK_SUSPEND",
    "CAP_AUDIT_READ",
    "CAP_PERFMON",
    "CAP_BPF",
    "CAP_CHECKPOINT_RESTORE",
];

// =============================================================================
// Security Profile Conventions
// =============================================================================
//
// Profile names follow the kubelet convention:
//   ""                           → unset (policy default applies)
//   "unconfined"                 → explicitly disabled
//   "runtime/default"            → runtime's built-in default profile
//   "docker/default"             → legacy alias of runtime/default (seccomp)
//   "localhost/<name>"           → named profile installed on the node
// =============================================================================

/// Prefix for node-local named profiles.
pub const PROFILE_NAME_PREFIX: &str = "localhost/";

/// Runtime default profile name.
pub const RUNTIME_DEFAULT_PROFILE: &str = "runtime/default";

/// Legacy docker default profile name.
pub const DOCKER_DEFAULT_PROFILE: &str = "docker/default";

/// Explicitly unconfined profile.
pub const UNCONFINED_PROFILE: &str = "unconfined";

/// AppArmor profile applied by default to non-privileged containers.
pub const APPARMOR_DEFAULT_PROFILE: &str = "magikcri-default";

// =============================================================================
// Streaming Protocols
// =============================================================================

/// Remote command protocol v4 (structured exit status).
pub const STREAM_PROTOCOL_V4: &str = "v4.channel.k8s.io";

/// Remote command protocol v3 (terminal resize).
pub const STREAM_PROTOCOL_V3: &str = "v3.channel.k8s.io";

/// Remote command protocol v2 (stdin half-close).
pub const STREAM_PROTOCOL_V2: &str = "v2.channel.k8s.io";

/// Remote command protocol v1.
pub const STREAM_PROTOCOL_V1: &str = "channel.k8s.io";

/// Port-forward protocol.
pub const PORT_FORWARD_PROTOCOL_V1: &str = "portforward.k8s.io";

/// Header carrying the sub-stream purpose.
pub const STREAM_TYPE_HEADER: &str = "streamType";

/// Header carrying the forwarded port.
pub const PORT_HEADER: &str = "port";

/// Header pairing data and error streams of one forwarded connection.
pub const REQUEST_ID_HEADER: &str = "requestID";

/// Maximum bytes buffered while decoding a resize stream.
///
/// A terminal size message is ~30 bytes; anything beyond this is garbage.
pub const MAX_RESIZE_MESSAGE_LEN: usize = 4096;

/// Maximum bytes read from an error stream.
pub const MAX_ERROR_STREAM_LEN: usize = 64 * 1024;

/// How long a server waits for the client to open all expected sub-streams.
pub const STREAM_CREATION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

// =============================================================================
// Identifiers
// =============================================================================

/// Length of generated entity IDs in hex characters.
pub const ID_HEX_LEN: usize = 64;

/// Separator used when deriving container names.
pub const NAME_DELIMITER: &str = "_";

/// Annotation/extension key for container metadata on the engine object.
pub const CONTAINER_METADATA_EXTENSION: &str = "magikcri.container.metadata";

/// Label key recording the entity kind on engine objects.
pub const CONTAINER_KIND_LABEL: &str = "io.magikcri.kind";

/// Label value for workload containers.
pub const CONTAINER_KIND_CONTAINER: &str = "container";

/// Label value for sandbox containers.
pub const CONTAINER_KIND_SANDBOX: &str = "sandbox";
