// src/sandbox/namespaces.rs

//! Linux namespace isolation for build commands
//!
//! The child unshares the namespaces the profile asks for right before
//! exec. When not running as root a user namespace is created first, with
//! the caller's uid/gid mapped to themselves so build outputs stay owned by
//! the invoking user. No PID namespace is created: the command would not be
//! its own namespace's init, and forks inside it would fail.

use super::{
    CommandRunner, DirectRunner, Invocation, RunOutput, SandboxProfile, apply_resource_limits,
    isolation_available, spawn_and_wait,
};
use crate::error::{Error, Result};
use nix::mount::{MsFlags, mount};
use nix::sched::{CloneFlags, unshare};
use nix::unistd::{getgid, getuid};
use std::fs;
use std::os::unix::process::CommandExt;
use tracing::warn;

/// Runs commands in fresh Linux namespaces
#[derive(Debug, Clone, Copy, Default)]
pub struct NamespaceRunner;

impl NamespaceRunner {
    fn clone_flags(profile: &SandboxProfile, as_root: bool) -> CloneFlags {
        let mut flags = CloneFlags::empty();
        if !as_root {
            flags |= CloneFlags::CLONE_NEWUSER;
        }
        if profile.network {
            flags |= CloneFlags::CLONE_NEWNET;
        }
        if profile.ipc {
            flags |= CloneFlags::CLONE_NEWIPC;
        }
        if profile.uts {
            flags |= CloneFlags::CLONE_NEWUTS;
        }
        if profile.mount {
            flags |= CloneFlags::CLONE_NEWNS;
        }
        flags
    }
}

/// `/proc/<pid>/{uid,gid}_map` line mapping `id` to itself
fn identity_map(id: u32) -> String {
    format!("{} {} 1", id, id)
}

impl CommandRunner for NamespaceRunner {
    fn name(&self) -> &'static str {
        "namespaces"
    }

    fn run(&self, invocation: &Invocation, profile: &SandboxProfile) -> Result<RunOutput> {
        if !profile.wants_namespaces() {
            return DirectRunner.run(invocation, profile);
        }

        if !isolation_available() {
            // Never silently build with network access when the profile forbids it
            if profile.network {
                return Err(Error::Sandbox(
                    "network isolation requires Linux namespaces, which are not available \
                     (root privileges or unprivileged user namespaces required)"
                        .to_string(),
                ));
            }
            warn!("Namespace isolation not available, falling back to resource limits only");
            return DirectRunner.run(invocation, profile);
        }

        let mut cmd = invocation.command()?;

        let uid = getuid();
        let gid = getgid();
        let as_root = uid.is_root();
        let flags = Self::clone_flags(profile, as_root);
        let private_mounts = profile.mount;
        let uid_map = identity_map(uid.as_raw());
        let gid_map = identity_map(gid.as_raw());
        let (memory, cpu, nproc) = (
            profile.memory_limit,
            profile.cpu_time_limit,
            profile.nproc_limit,
        );

        // SAFETY: runs in the forked child before exec. Everything it needs
        // is allocated beforehand; it only issues syscalls and writes to
        // /proc/self
        unsafe {
            cmd.pre_exec(move || {
                unshare(flags)?;

                if !as_root {
                    fs::write("/proc/self/setgroups", "deny")?;
                    fs::write("/proc/self/uid_map", &uid_map)?;
                    fs::write("/proc/self/gid_map", &gid_map)?;
                }

                if private_mounts {
                    mount(
                        None::<&str>,
                        "/",
                        None::<&str>,
                        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
                        None::<&str>,
                    )?;
                }

                apply_resource_limits(memory, cpu, nproc)
            });
        }

        spawn_and_wait(cmd, invocation, profile.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_flags_follow_profile() {
        let profile = SandboxProfile::default();
        let flags = NamespaceRunner::clone_flags(&profile, false);
        assert!(flags.contains(CloneFlags::CLONE_NEWUSER));
        assert!(flags.contains(CloneFlags::CLONE_NEWNET));
        assert!(flags.contains(CloneFlags::CLONE_NEWNS));
        assert!(!flags.contains(CloneFlags::CLONE_NEWPID));
    }

    #[test]
    fn test_clone_flags_as_root_skip_userns() {
        let profile = SandboxProfile::default().toggle("network", false).unwrap();
        let flags = NamespaceRunner::clone_flags(&profile, true);
        assert!(!flags.contains(CloneFlags::CLONE_NEWUSER));
        assert!(!flags.contains(CloneFlags::CLONE_NEWNET));
        assert!(flags.contains(CloneFlags::CLONE_NEWIPC));
    }

    #[test]
    fn test_identity_map() {
        assert_eq!(identity_map(1000), "1000 1000 1");
        assert_eq!(identity_map(0), "0 0 1");
    }

    #[test]
    fn test_permissive_profile_runs_directly() {
        let dir = tempfile::TempDir::new().unwrap();
        let inv = Invocation::new("true", dir.path());
        let out = NamespaceRunner
            .run(&inv, &SandboxProfile::permissive())
            .unwrap();
        assert!(out.success());
    }
}
