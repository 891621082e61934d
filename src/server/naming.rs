//! Entity IDs and derived names.

use crate::constants::{ID_HEX_LEN, NAME_DELIMITER};
use crate::manifest::{ContainerConfig, SandboxConfig};
use uuid::Uuid;

/// Length of the short form of an ID.
const SHORT_ID_LEN: usize = 12;

/// Generates a random 64-hex-character ID.
///
/// IDs whose short form is all digits are regenerated so a truncated ID
/// is never mistaken for a number.
pub fn generate_id() -> String {
    loop {
        let mut bytes = [0u8; ID_HEX_LEN / 2];
        bytes[..16].copy_from_slice(Uuid::new_v4().as_bytes());
        bytes[16..].copy_from_slice(Uuid::new_v4().as_bytes());
        let id = hex::encode(bytes);
        if !id[..SHORT_ID_LEN].bytes().all(|b| b.is_ascii_digit()) {
            return id;
        }
    }
}

/// `<container>_<sandbox>_<namespace>_<uid>_<attempt>`
pub fn make_container_name(config: &ContainerConfig, sandbox: &SandboxConfig) -> String {
    [
        config.name.as_str(),
        sandbox.name.as_str(),
        sandbox.namespace.as_str(),
        sandbox.uid.as_str(),
        &config.attempt.to_string(),
    ]
    .join(NAME_DELIMITER)
}

/// `<sandbox>_<namespace>_<uid>_<attempt>`
pub fn make_sandbox_name(sandbox: &SandboxConfig) -> String {
    [
        sandbox.name.as_str(),
        sandbox.namespace.as_str(),
        sandbox.uid.as_str(),
        &sandbox.attempt.to_string(),
    ]
    .join(NAME_DELIMITER)
}
