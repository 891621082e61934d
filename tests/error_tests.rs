//! Tests for error types.
//!
//! Validates display formatting, source chaining and the helper accessors.

use magikcri::Error;
use std::error::Error as _;
use std::path::PathBuf;

// =============================================================================
// Store Error Tests
// =============================================================================

#[test]
fn test_not_found_display() {
    let err = Error::NotFound("abc123".to_string());
    let msg = err.to_string();

    assert!(msg.contains("abc123"), "should include the id");
    assert!(msg.contains("not found"), "should indicate not found");
    assert!(err.is_not_found());
}

#[test]
fn test_name_conflict_display() {
    let err = Error::NameConflict {
        name: "web_pod_default_uid_0".to_string(),
        holder: "c0ffee".to_string(),
    };
    let msg = err.to_string();

    assert!(msg.contains("web_pod_default_uid_0"), "should include the name");
    assert!(msg.contains("c0ffee"), "should include the holder");
    assert!(!err.is_not_found());
}

#[test]
fn test_invalid_state_display() {
    let err = Error::InvalidState {
        id: "c0ffee".to_string(),
        state: "created".to_string(),
        expected: "running".to_string(),
    };
    assert_eq!(
        err.to_string(),
        "container 'c0ffee' is in state 'created', expected 'running'"
    );
}

// =============================================================================
// Creation Error Tests
// =============================================================================

#[test]
fn test_spec_generation_chains_source() {
    let err = Error::SpecGeneration {
        id: "c0ffee".to_string(),
        source: Box::new(Error::NoCommandSpecified),
    };
    let msg = err.to_string();

    assert!(msg.contains("c0ffee"), "should include the id");
    assert!(msg.contains("no command specified"), "should include the cause");
    let source = err.source().expect("source should be chained");
    assert_eq!(source.to_string(), "no command specified");
}

#[test]
fn test_store_insertion_chains_source() {
    let err = Error::StoreInsertion {
        id: "c0ffee".to_string(),
        source: Box::new(Error::AlreadyExists("c0ffee".to_string())),
    };
    assert!(err.to_string().contains("into store"));
    assert!(err.source().is_some());
}

#[test]
fn test_image_not_found_display() {
    let err = Error::ImageNotFound("nginx:missing".to_string());
    assert!(err.to_string().contains("nginx:missing"));
}

// =============================================================================
// Spec Compilation Error Tests
// =============================================================================

#[test]
fn test_mount_propagation_display() {
    let err = Error::InvalidMountPropagation {
        path: PathBuf::from("/mnt/data/vol"),
        mountpoint: PathBuf::from("/mnt/data"),
        expected: "shared",
    };
    let msg = err.to_string();

    assert!(msg.contains("/mnt/data/vol"));
    assert!(msg.contains("not a shared mount"));
}

#[test]
fn test_profile_errors_display() {
    let err = Error::InvalidProfileName {
        kind: "seccomp",
        name: "strict.json".to_string(),
    };
    assert!(err.to_string().contains("seccomp"));
    assert!(err.to_string().contains("strict.json"));

    let err = Error::UnsupportedApparmorProfile("localhost/p".to_string());
    assert!(err.to_string().contains("apparmor is not supported"));
}

// =============================================================================
// Streaming Error Tests
// =============================================================================

#[test]
fn test_non_zero_exit() {
    let err = Error::NonZeroExit { code: 42 };

    assert_eq!(err.exit_code(), Some(42));
    assert_eq!(err.to_string(), "command terminated with non-zero exit code 42");
    assert_eq!(Error::RemoteCommand("boom".to_string()).exit_code(), None);
}

#[test]
fn test_invalid_port_display() {
    assert_eq!(Error::InvalidPort(70000).to_string(), "invalid port 70000");
    assert_eq!(Error::InvalidPort(-1).to_string(), "invalid port -1");
}

// =============================================================================
// Conversion Tests
// =============================================================================

#[test]
fn test_io_error_conversion() {
    let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let err: Error = io_err.into();

    assert!(matches!(err, Error::Io(_)));
    assert!(err.to_string().contains("denied"));
}

#[test]
fn test_json_error_conversion() {
    let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let err: Error = json_err.into();

    assert!(matches!(err, Error::Serialization(_)));
}

#[test]
fn test_nix_error_conversion() {
    let err: Error = nix::Error::ENOENT.into();
    match err {
        Error::Io(io) => assert_eq!(io.kind(), std::io::ErrorKind::NotFound),
        other => panic!("expected Io, got {other:?}"),
    }
}

#[test]
fn test_error_is_send_sync() {
    fn assert_send_sync<T: Send + Sync + 'static>() {}
    assert_send_sync::<Error>();
}
