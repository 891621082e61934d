//! # Execution Spec Compilation
//!
//! Derives the low-level OCI runtime spec for a container from its
//! declarative config.
//!
//! ## Components
//!
//! - [`SpecCompiler`]: the layering pipeline
//! - [`security`]: seccomp / AppArmor / capability resolution
//! - [`mounts`]: propagation behavior table and mountinfo parsing
//! - [`devices`]: device node inspection
//! - [`HostOs`]: the host lookups the compiler is allowed to make

mod compiler;
pub mod devices;
mod host;
pub mod mounts;
pub mod security;
mod types;

pub use compiler::{
    cgroups_path, resolve_args, CompileInput, SpecCompiler, CONTAINER_TYPE_ANNOTATION,
    SANDBOX_ID_ANNOTATION,
};
pub use devices::{DeviceType, HostDevice};
pub use host::{HostOs, RealHost, DEV_DIR, MOUNTINFO_PATH};
pub use mounts::MountInfo;
pub use types::{
    default_mounts, NamespaceType, OciCapabilities, OciCpu, OciDevice, OciDeviceCgroup,
    OciLinux, OciMemory, OciMount, OciNamespace, OciProcess, OciResources, OciRoot, OciSpec,
    OciUser, SeccompProfile,
};
