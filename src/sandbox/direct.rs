// src/sandbox/direct.rs

//! Resource-limited execution without namespace isolation

use super::{CommandRunner, Invocation, RunOutput, SandboxProfile, apply_resource_limits, spawn_and_wait};
use crate::error::Result;
use std::os::unix::process::CommandExt;

/// Runs commands on the host with rlimits and a wall-clock timeout
///
/// Isolation toggles in the profile are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectRunner;

impl CommandRunner for DirectRunner {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn run(&self, invocation: &Invocation, profile: &SandboxProfile) -> Result<RunOutput> {
        let mut cmd = invocation.command()?;

        let (memory, cpu, nproc) = (
            profile.memory_limit,
            profile.cpu_time_limit,
            profile.nproc_limit,
        );
        // SAFETY: the hook only calls setrlimit, which is async-signal-safe
        unsafe {
            cmd.pre_exec(move || apply_resource_limits(memory, cpu, nproc));
        }

        spawn_and_wait(cmd, invocation, profile.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_direct_runner_success_and_log() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("logs/step.log");
        let inv = Invocation::new("sh", dir.path())
            .args(["-c", "echo hello; echo oops >&2"])
            .log_to(&log);

        let out = DirectRunner.run(&inv, &SandboxProfile::permissive()).unwrap();
        assert!(out.success());
        let logged = fs::read_to_string(&log).unwrap();
        assert!(logged.contains("hello"));
        assert!(logged.contains("oops"));
    }

    #[test]
    fn test_direct_runner_failure_code() {
        let dir = TempDir::new().unwrap();
        let inv = Invocation::new("sh", dir.path())
            .args(["-c", "echo failing; exit 3"])
            .log_to(dir.path().join("fail.log"));

        let out = DirectRunner.run(&inv, &SandboxProfile::permissive()).unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.tail, "failing");
    }

    #[test]
    fn test_direct_runner_timeout() {
        let dir = TempDir::new().unwrap();
        let inv = Invocation::new("sleep", dir.path()).arg("5");
        let profile = SandboxProfile::permissive().with_timeout(Duration::from_millis(200));

        let out = DirectRunner.run(&inv, &profile).unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
    }

    #[test]
    fn test_timeout_kills_background_children() {
        let dir = TempDir::new().unwrap();
        let inv = Invocation::new("sh", dir.path()).args(["-c", "(sleep 1; touch marker) & wait"]);
        let profile = SandboxProfile::permissive().with_timeout(Duration::from_millis(200));

        let out = DirectRunner.run(&inv, &profile).unwrap();
        assert!(out.timed_out);

        std::thread::sleep(Duration::from_millis(1500));
        assert!(!dir.path().join("marker").exists());
    }

    #[test]
    fn test_direct_runner_missing_program() {
        let dir = TempDir::new().unwrap();
        let inv = Invocation::new("/nonexistent/prebuilder-test-tool", dir.path());
        assert!(DirectRunner.run(&inv, &SandboxProfile::permissive()).is_err());
    }
}
