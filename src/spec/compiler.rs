//! Container spec compiler.
//!
//! Turns a [`ContainerConfig`] plus image metadata and sandbox context into
//! a complete [`OciSpec`]. Later layers win over earlier ones:
//!
//! ```text
//! OciSpec::default()
//!   → command / cwd / env      (image, then container config)
//!   → bind mounts              (implicit + image volumes, then caller mounts)
//!   → privileged | devices + capabilities
//!   → identity, resources, cgroups path, namespaces
//!   → seccomp / apparmor
//! ```
//!
//! The only side effects are the host lookups behind [`HostOs`]; given the
//! same host answers the output is deterministic.

use super::devices::HostDevice;
use super::host::HostOs;
use super::mounts::check_peer;
use super::security::{apply_capabilities, grant_all, resolve_apparmor, resolve_seccomp};
use super::types::{
    NamespaceType, OciCpu, OciDeviceCgroup, OciMemory, OciMount, OciSpec,
};
use crate::config::ShimConfig;
use crate::constants::{CGROUP_SYSTEMD_PREFIX, DEFAULT_PATH_ENV};
use crate::error::{Error, Result};
use crate::image::ImageConfig;
use crate::manifest::{ContainerConfig, LinuxResources, Mount, SandboxConfig};
use std::path::Path;
use std::sync::Arc;

/// Annotation recording the entity kind.
pub const CONTAINER_TYPE_ANNOTATION: &str = "io.kubernetes.cri.container-type";

/// Annotation recording the parent sandbox.
pub const SANDBOX_ID_ANNOTATION: &str = "io.kubernetes.cri.sandbox-id";

/// Inputs for one compilation.
#[derive(Debug, Clone, Copy)]
pub struct CompileInput<'a> {
    pub id: &'a str,
    pub sandbox_id: &'a str,
    /// PID of the sandbox's main process, whose namespaces are joined.
    pub sandbox_pid: u32,
    /// Network namespace the sandbox was set up with, if it has its own.
    pub sandbox_netns: Option<&'a Path>,
    pub config: &'a ContainerConfig,
    pub sandbox_config: &'a SandboxConfig,
    pub image: &'a ImageConfig,
    /// Implicit and image-volume mounts, applied before the caller's.
    pub extra_mounts: &'a [Mount],
}

/// Compiles container configs into OCI specs.
#[derive(Clone)]
pub struct SpecCompiler {
    host: Arc<dyn HostOs>,
    seccomp_enabled: bool,
    apparmor_enabled: bool,
    systemd_cgroup: bool,
}

impl std::fmt::Debug for SpecCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpecCompiler")
            .field("seccomp_enabled", &self.seccomp_enabled)
            .field("apparmor_enabled", &self.apparmor_enabled)
            .field("systemd_cgroup", &self.systemd_cgroup)
            .finish()
    }
}

impl SpecCompiler {
    pub fn new(host: Arc<dyn HostOs>, config: &ShimConfig) -> Self {
        Self {
            host,
            seccomp_enabled: config.seccomp_enabled,
            apparmor_enabled: config.apparmor_enabled,
            systemd_cgroup: config.systemd_cgroup,
        }
    }

    /// Builds the spec for one container.
    pub fn compile(&self, input: &CompileInput<'_>) -> Result<OciSpec> {
        let config = input.config;
        let security = config.security_context();
        let mut spec = OciSpec::default();

        spec.process.args = resolve_args(config, input.image)?;
        spec.process.cwd = resolve_cwd(config, input.image, &spec.process.cwd);
        spec.process.terminal = config.tty;
        apply_env(&mut spec, config, input.image)?;

        let label = security.selinux_options.as_ref().and_then(|o| o.label());
        spec.process.selinux_label = label.clone();
        spec.linux.mount_label = label;

        self.add_bind_mounts(&mut spec, input.extra_mounts.iter().chain(&config.mounts))?;

        spec.root.readonly = security.readonly_rootfs;

        if security.privileged {
            self.apply_privileged(&mut spec, config)?;
        } else {
            self.add_devices(&mut spec, config)?;
            apply_capabilities(
                &mut spec.process.capabilities,
                security.capabilities.as_ref(),
            );
        }

        spec.process.no_new_privileges = security.no_new_privs;
        if let Some(uid) = security.run_as_user {
            spec.process.user.uid = to_id("run_as_user", uid)?;
        }
        if !security.run_as_username.is_empty() {
            spec.process.user.username = Some(security.run_as_username.clone());
        }
        for group in &security.supplemental_groups {
            spec.process
                .user
                .additional_gids
                .push(to_id("supplemental_groups", *group)?);
        }

        if let Some(resources) = &config.linux.resources {
            apply_resources(&mut spec, resources);
        }

        let cgroup_parent = &input.sandbox_config.linux.cgroup_parent;
        if !cgroup_parent.is_empty() {
            spec.linux.cgroups_path =
                Some(cgroups_path(cgroup_parent, input.id, self.systemd_cgroup));
        }

        apply_namespaces(&mut spec, input);

        spec.linux.seccomp = resolve_seccomp(
            &security.seccomp_profile_path,
            security.privileged,
            self.seccomp_enabled,
        )?;
        spec.process.apparmor_profile = resolve_apparmor(
            &security.apparmor_profile,
            security.privileged,
            self.apparmor_enabled,
        )?;

        spec.annotations
            .insert(CONTAINER_TYPE_ANNOTATION.to_string(), "container".to_string());
        spec.annotations
            .insert(SANDBOX_ID_ANNOTATION.to_string(), input.sandbox_id.to_string());

        tracing::debug!(
            container = %input.id,
            args = ?spec.process.args,
            mounts = spec.mounts.len(),
            devices = spec.linux.devices.len(),
            "Generated container spec"
        );
        Ok(spec)
    }

    fn add_bind_mounts<'m>(
        &self,
        spec: &mut OciSpec,
        mounts: impl Iterator<Item = &'m Mount>,
    ) -> Result<()> {
        for mount in mounts {
            let source = Path::new(&mount.host_path);
            self.host.ensure_dir(source)?;
            let source = self.host.resolve_symlinks(source)?;

            let behavior = mount.propagation.behavior();
            if let Some(requirement) = behavior.requires {
                let info = self.host.lookup_mount(&source)?;
                check_peer(&source, &info, requirement)?;
            }
            if mount.propagation == crate::manifest::MountPropagation::Unknown {
                tracing::warn!(host_path = %mount.host_path, "Unknown propagation mode, using private");
            }
            behavior.root.apply(&mut spec.linux.rootfs_propagation);

            let access = if mount.readonly { "ro" } else { "rw" };
            // A caller mount replaces any earlier mount at the same destination.
            spec.mounts.retain(|m| m.destination != mount.container_path);
            spec.mounts.push(OciMount {
                destination: mount.container_path.clone(),
                mount_type: "bind".to_string(),
                source: source.to_string_lossy().into_owned(),
                options: vec![
                    "rbind".to_string(),
                    behavior.option.to_string(),
                    access.to_string(),
                ],
            });
        }
        Ok(())
    }

    fn apply_privileged(&self, spec: &mut OciSpec, config: &ContainerConfig) -> Result<()> {
        let security = config.security_context();
        if !config.devices.is_empty() {
            return Err(Error::InvalidPrivilegedConfig(
                "explicit devices cannot be combined with privileged mode".to_string(),
            ));
        }
        if security
            .capabilities
            .as_ref()
            .is_some_and(|c| !c.drop_capabilities.is_empty())
        {
            return Err(Error::InvalidPrivilegedConfig(
                "dropped capabilities cannot be combined with privileged mode".to_string(),
            ));
        }

        grant_all(&mut spec.process.capabilities);

        let rootfs_writable = !spec.root.readonly;
        for mount in &mut spec.mounts {
            if (mount.destination == "/sys" && rootfs_writable) || mount.mount_type == "cgroup" {
                mount.clear_readonly();
            }
        }
        spec.linux.masked_paths.clear();
        spec.linux.readonly_paths.clear();

        let devices = self.host.host_devices()?;
        spec.linux.devices = devices
            .iter()
            .map(|d: &HostDevice| d.to_oci(&d.path.to_string_lossy()))
            .collect();
        spec.linux.resources.devices = vec![OciDeviceCgroup::allow_all()];
        Ok(())
    }

    fn add_devices(&self, spec: &mut OciSpec, config: &ContainerConfig) -> Result<()> {
        for device in &config.devices {
            let path = self.host.resolve_symlinks(Path::new(&device.host_path))?;
            let host_device = self.host.device(&path, &device.permissions)?;
            spec.linux.devices.push(host_device.to_oci(&device.container_path));
            spec.linux
                .resources
                .devices
                .push(host_device.to_cgroup_rule());
        }
        Ok(())
    }
}

/// Resolves argv from the explicit command/args and the image.
///
/// Image cmd only applies when the caller gave neither command nor args;
/// an explicit (even empty) command suppresses the image entrypoint.
pub fn resolve_args(config: &ContainerConfig, image: &ImageConfig) -> Result<Vec<String>> {
    let (command, args) = match &config.command {
        Some(command) if !command.is_empty() => (command.clone(), config.args.clone()),
        explicit => {
            let args = if config.args.is_empty() {
                image.cmd.clone()
            } else {
                config.args.clone()
            };
            let command = if explicit.is_none() {
                image.entrypoint.clone()
            } else {
                Vec::new()
            };
            (command, args)
        }
    };

    let argv: Vec<String> = command.into_iter().chain(args).collect();
    if argv.is_empty() {
        return Err(Error::NoCommandSpecified);
    }
    Ok(argv)
}

fn resolve_cwd(config: &ContainerConfig, image: &ImageConfig, default: &str) -> String {
    if !config.working_dir.is_empty() {
        config.working_dir.clone()
    } else if !image.working_dir.is_empty() {
        image.working_dir.clone()
    } else {
        default.to_string()
    }
}

/// Default PATH and `TERM` for ttys, then image env, then caller env.
fn apply_env(spec: &mut OciSpec, config: &ContainerConfig, image: &ImageConfig) -> Result<()> {
    spec.set_env("PATH", DEFAULT_PATH_ENV);
    if config.tty {
        spec.set_env("TERM", "xterm");
    }
    for entry in &image.env {
        let Some((key, value)) = entry.split_once('=') else {
            return Err(Error::InvalidEnvironment(entry.clone()));
        };
        spec.set_env(key, value);
    }
    for kv in &config.envs {
        spec.set_env(&kv.key, &kv.value);
    }
    Ok(())
}

fn apply_resources(spec: &mut OciSpec, resources: &LinuxResources) {
    let cpu = OciCpu {
        shares: u64::try_from(resources.cpu_shares).ok().filter(|v| *v > 0),
        quota: Some(resources.cpu_quota).filter(|v| *v != 0),
        period: u64::try_from(resources.cpu_period).ok().filter(|v| *v > 0),
        cpus: Some(resources.cpuset_cpus.clone()).filter(|s| !s.is_empty()),
        mems: Some(resources.cpuset_mems.clone()).filter(|s| !s.is_empty()),
    };
    if cpu != OciCpu::default() {
        spec.linux.resources.cpu = Some(cpu);
    }
    if resources.memory_limit_in_bytes != 0 {
        spec.linux.resources.memory = Some(OciMemory {
            limit: Some(resources.memory_limit_in_bytes),
        });
    }
    if resources.oom_score_adj != 0 {
        spec.process.oom_score_adj = Some(resources.oom_score_adj);
    }
}

/// Cgroups path for a container under `parent`.
///
/// systemd: `<basename(parent)>:magikcri:<id>`; cgroupfs: `<parent>/<id>`.
pub fn cgroups_path(parent: &str, id: &str, systemd: bool) -> String {
    if systemd {
        let slice = Path::new(parent)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| parent.to_string());
        format!("{slice}:{CGROUP_SYSTEMD_PREFIX}:{id}")
    } else {
        Path::new(parent).join(id).to_string_lossy().into_owned()
    }
}

/// Joins the sandbox's network, IPC and UTS namespaces; PID stays
/// isolated unless host PID is requested.
///
/// A sandbox on the host network or host IPC leaves the container in the
/// host's namespace. The network namespace is the sandbox's recorded netns
/// path when it has one.
fn apply_namespaces(spec: &mut OciSpec, input: &CompileInput<'_>) {
    let sandbox = input.sandbox_config.namespace_options();
    let proc_ns = |ns_type: NamespaceType| {
        format!("/proc/{}/ns/{}", input.sandbox_pid, ns_type.proc_name())
    };

    if sandbox.host_network {
        spec.remove_namespace(NamespaceType::Network);
    } else {
        let path = input
            .sandbox_netns
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| proc_ns(NamespaceType::Network));
        spec.set_namespace(NamespaceType::Network, Some(path));
    }

    if sandbox.host_ipc {
        spec.remove_namespace(NamespaceType::Ipc);
    } else {
        spec.set_namespace(NamespaceType::Ipc, Some(proc_ns(NamespaceType::Ipc)));
    }
    spec.set_namespace(NamespaceType::Uts, Some(proc_ns(NamespaceType::Uts)));

    if sandbox.host_pid || input.config.security_context().namespace_options.host_pid {
        spec.remove_namespace(NamespaceType::Pid);
    }
}

fn to_id(field: &str, value: i64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| Error::InvalidConfig(format!("{field} value {value} is not a valid id")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::KeyValue;

    fn image(entrypoint: &[&str], cmd: &[&str]) -> ImageConfig {
        ImageConfig {
            entrypoint: entrypoint.iter().map(|s| s.to_string()).collect(),
            cmd: cmd.iter().map(|s| s.to_string()).collect(),
            ..ImageConfig::default()
        }
    }

    #[test]
    fn test_args_from_image() {
        let config = ContainerConfig::default();
        let argv = resolve_args(&config, &image(&["/bin/sh"], &["-c", "true"])).unwrap();
        assert_eq!(argv, vec!["/bin/sh", "-c", "true"]);
    }

    #[test]
    fn test_explicit_command_ignores_image() {
        let config = ContainerConfig {
            command: Some(vec!["/bin/echo".to_string()]),
            ..ContainerConfig::default()
        };
        let argv = resolve_args(&config, &image(&["/bin/sh"], &["-c", "true"])).unwrap();
        assert_eq!(argv, vec!["/bin/echo"]);
    }

    #[test]
    fn test_explicit_args_keep_entrypoint() {
        let config = ContainerConfig {
            args: vec!["hello".to_string()],
            ..ContainerConfig::default()
        };
        let argv = resolve_args(&config, &image(&["/bin/echo"], &["default"])).unwrap();
        assert_eq!(argv, vec!["/bin/echo", "hello"]);
    }

    #[test]
    fn test_empty_command_suppresses_entrypoint() {
        let config = ContainerConfig {
            command: Some(Vec::new()),
            ..ContainerConfig::default()
        };
        let argv = resolve_args(&config, &image(&["/entry"], &["run"])).unwrap();
        assert_eq!(argv, vec!["run"]);
    }

    #[test]
    fn test_no_command() {
        let err = resolve_args(&ContainerConfig::default(), &ImageConfig::default()).unwrap_err();
        assert!(matches!(err, Error::NoCommandSpecified));
    }

    #[test]
    fn test_env_layering() {
        let mut spec = OciSpec::default();
        let config = ContainerConfig {
            envs: vec![KeyValue::new("A", "2"), KeyValue::new("B", "3")],
            tty: true,
            ..ContainerConfig::default()
        };
        let image = ImageConfig {
            env: vec!["A=1".to_string(), "PATH=/custom".to_string()],
            ..ImageConfig::default()
        };
        apply_env(&mut spec, &config, &image).unwrap();
        assert_eq!(spec.process.env, vec!["PATH=/custom", "TERM=xterm", "A=2", "B=3"]);
    }

    #[test]
    fn test_malformed_image_env() {
        let mut spec = OciSpec::default();
        let image = ImageConfig {
            env: vec!["NOEQUALS".to_string()],
            ..ImageConfig::default()
        };
        let err = apply_env(&mut spec, &ContainerConfig::default(), &image).unwrap_err();
        assert!(matches!(err, Error::InvalidEnvironment(e) if e == "NOEQUALS"));
    }

    #[test]
    fn test_cgroups_path() {
        assert_eq!(
            cgroups_path("/kubepods/burstable/pod123", "abc", false),
            "/kubepods/burstable/pod123/abc"
        );
        assert_eq!(
            cgroups_path("kubepods.slice/kubepods-burstable.slice", "abc", true),
            "kubepods-burstable.slice:magikcri:abc"
        );
    }

    #[test]
    fn test_resources_copied_when_set() {
        let mut spec = OciSpec::default();
        apply_resources(
            &mut spec,
            &LinuxResources {
                cpu_period: 100_000,
                cpu_quota: 50_000,
                cpu_shares: 512,
                memory_limit_in_bytes: 1 << 30,
                oom_score_adj: 500,
                cpuset_cpus: "0-1".to_string(),
                cpuset_mems: String::new(),
            },
        );
        let cpu = spec.linux.resources.cpu.unwrap();
        assert_eq!(cpu.period, Some(100_000));
        assert_eq!(cpu.quota, Some(50_000));
        assert_eq!(cpu.shares, Some(512));
        assert_eq!(cpu.cpus.as_deref(), Some("0-1"));
        assert_eq!(cpu.mems, None);
        assert_eq!(spec.linux.resources.memory.unwrap().limit, Some(1 << 30));
        assert_eq!(spec.process.oom_score_adj, Some(500));
    }
}
