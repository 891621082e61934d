//! Error types for the runtime shim.

use std::path::PathBuf;

/// Result type alias for shim operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the runtime shim.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Store Errors
    // =========================================================================
    /// Entity not found (or the prefix was ambiguous).
    #[error("not found: {0}")]
    NotFound(String),

    /// Entity with the same full ID already registered.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Name is held by another live or in-flight entity.
    #[error("name {name:?} is reserved for {holder:?}")]
    NameConflict { name: String, holder: String },

    /// Identifier rejected by the truncated index.
    #[error("invalid id {id:?}: {reason}")]
    InvalidId { id: String, reason: String },

    /// Entity is in the wrong state for the operation.
    #[error("container '{id}' is in state '{state}', expected '{expected}'")]
    InvalidState {
        id: String,
        state: String,
        expected: String,
    },

    // =========================================================================
    // Creation Errors
    // =========================================================================
    /// Image is not present locally.
    #[error("image {0:?} not found")]
    ImageNotFound(String),

    /// Spec compilation failed for a container.
    #[error("failed to generate container {id:?} spec: {source}")]
    SpecGeneration {
        id: String,
        #[source]
        source: Box<Error>,
    },

    /// Registering the created container failed.
    #[error("failed to add container {id:?} into store: {source}")]
    StoreInsertion {
        id: String,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // Spec Compilation Errors
    // =========================================================================
    /// No command resolved from config or image.
    #[error("no command specified")]
    NoCommandSpecified,

    /// Malformed image environment entry.
    #[error("invalid environment variable {0:?}")]
    InvalidEnvironment(String),

    /// Host mount does not satisfy the requested propagation.
    #[error("path {path:?} is mounted on {mountpoint:?} but it is not a {expected} mount")]
    InvalidMountPropagation {
        path: PathBuf,
        mountpoint: PathBuf,
        expected: &'static str,
    },

    /// Privileged mode combined with settings it would silently override.
    #[error("invalid privileged configuration: {0}")]
    InvalidPrivilegedConfig(String),

    /// Seccomp profile requested while seccomp is disabled.
    #[error("seccomp is not supported, cannot apply profile {0:?}")]
    UnsupportedSeccompProfile(String),

    /// AppArmor profile requested while apparmor is disabled.
    #[error("apparmor is not supported, cannot apply profile {0:?}")]
    UnsupportedApparmorProfile(String),

    /// Profile name lacks the required namespace prefix.
    #[error("invalid {kind} profile {name:?}")]
    InvalidProfileName { kind: &'static str, name: String },

    /// Device node could not be mapped.
    #[error("invalid device {path:?}: {reason}")]
    InvalidDevice { path: PathBuf, reason: String },

    // =========================================================================
    // Streaming Errors
    // =========================================================================
    /// Port outside 1..=65535.
    #[error("invalid port {0}")]
    InvalidPort(i64),

    /// No common streaming protocol.
    #[error("protocol negotiation failed: {0}")]
    ProtocolNegotiation(String),

    /// Command ran and exited non-zero.
    #[error("command terminated with non-zero exit code {code}")]
    NonZeroExit { code: i32 },

    /// Failure message reported by the remote end on the error stream.
    #[error("remote command failed: {0}")]
    RemoteCommand(String),

    /// Transport or sub-stream failure.
    #[error("stream transport error: {0}")]
    Transport(String),

    // =========================================================================
    // Engine Errors
    // =========================================================================
    /// Execution engine rejected an operation.
    #[error("engine {operation} failed for {id:?}: {reason}")]
    Engine {
        operation: &'static str,
        id: String,
        reason: String,
    },

    /// Operation not supported by this engine.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the exit code when the error is a non-zero process exit.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::NonZeroExit { code } => Some(*code),
            _ => None,
        }
    }

    /// Returns true for `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Self::Io(std::io::Error::from(e))
    }
}
