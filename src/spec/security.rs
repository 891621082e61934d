//! Security policy resolution.
//!
//! Maps kubelet-style profile names and capability lists onto concrete
//! spec settings, honouring whether seccomp and AppArmor are enabled on
//! the node.
//!
//! ## Profile Names
//!
//! | Name                       | Seccomp                 | AppArmor                    |
//! |----------------------------|-------------------------|-----------------------------|
//! | `""`                       | none                    | default (unless privileged) |
//! | `unconfined`               | none                    | none                        |
//! | `runtime/default`          | runtime default         | default                     |
//! | `docker/default`           | runtime default         | invalid                     |
//! | `localhost/<name>`         | `<name>`                | `<name>`                    |
//! | anything else              | invalid                 | invalid                     |
//!
//! Privileged containers never get a seccomp profile. A disabled facility
//! accepts only `""` and `unconfined`.

use super::types::{OciCapabilities, SeccompProfile};
use crate::constants::{
    ALL_CAPABILITIES, APPARMOR_DEFAULT_PROFILE, DOCKER_DEFAULT_PROFILE, PROFILE_NAME_PREFIX,
    RUNTIME_DEFAULT_PROFILE, UNCONFINED_PROFILE,
};
use crate::error::{Error, Result};
use crate::manifest::Capability;

/// Keyword selecting every capability in add/drop lists.
const ALL_KEYWORD: &str = "ALL";

/// Resolves the seccomp profile for a container.
pub fn resolve_seccomp(
    profile: &str,
    privileged: bool,
    seccomp_enabled: bool,
) -> Result<Option<SeccompProfile>> {
    if privileged {
        return Ok(None);
    }
    if !seccomp_enabled {
        if !profile.is_empty() && profile != UNCONFINED_PROFILE {
            return Err(Error::UnsupportedSeccompProfile(profile.to_string()));
        }
        return Ok(None);
    }
    match profile {
        "" | UNCONFINED_PROFILE => Ok(None),
        RUNTIME_DEFAULT_PROFILE | DOCKER_DEFAULT_PROFILE => Ok(Some(SeccompProfile::RuntimeDefault)),
        other => localhost_profile("seccomp", other).map(|name| Some(SeccompProfile::Localhost(name))),
    }
}

/// Resolves the AppArmor profile for a container.
pub fn resolve_apparmor(
    profile: &str,
    privileged: bool,
    apparmor_enabled: bool,
) -> Result<Option<String>> {
    if !apparmor_enabled {
        if !profile.is_empty() && profile != UNCONFINED_PROFILE {
            return Err(Error::UnsupportedApparmorProfile(profile.to_string()));
        }
        return Ok(None);
    }
    match profile {
        RUNTIME_DEFAULT_PROFILE => Ok(Some(APPARMOR_DEFAULT_PROFILE.to_string())),
        UNCONFINED_PROFILE => Ok(None),
        "" if privileged => Ok(None),
        "" => Ok(Some(APPARMOR_DEFAULT_PROFILE.to_string())),
        other => localhost_profile("apparmor", other).map(Some),
    }
}

fn localhost_profile(kind: &'static str, profile: &str) -> Result<String> {
    match profile.strip_prefix(PROFILE_NAME_PREFIX) {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(Error::InvalidProfileName {
            kind,
            name: profile.to_string(),
        }),
    }
}

/// Upper-cases a capability name and adds the `CAP_` prefix if missing.
pub fn normalize_capability(cap: &str) -> String {
    let upper = cap.to_ascii_uppercase();
    if upper.starts_with("CAP_") {
        upper
    } else {
        format!("CAP_{upper}")
    }
}

/// Applies add/drop lists to `caps`.
///
/// `ALL` in the add list grants everything and `ALL` in the drop list
/// removes everything before the individual entries are processed, so
/// `add: [ALL], drop: [CHOWN]` yields every capability but `CAP_CHOWN`.
pub fn apply_capabilities(caps: &mut OciCapabilities, requested: Option<&Capability>) {
    let Some(requested) = requested else {
        return;
    };
    let is_all = |c: &String| c.eq_ignore_ascii_case(ALL_KEYWORD);

    if requested.add_capabilities.iter().any(is_all) {
        grant_all(caps);
    }
    if requested.drop_capabilities.iter().any(is_all) {
        caps.clear();
    }
    for cap in requested.add_capabilities.iter().filter(|&c| !is_all(c)) {
        caps.insert(&normalize_capability(cap));
    }
    for cap in requested.drop_capabilities.iter().filter(|&c| !is_all(c)) {
        caps.remove(&normalize_capability(cap));
    }
}

/// Puts every known capability into every set.
pub fn grant_all(caps: &mut OciCapabilities) {
    for cap in ALL_CAPABILITIES {
        caps.insert(cap);
    }
}
