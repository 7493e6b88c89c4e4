// src/sandbox/firejail.rs

//! Isolation through the `firejail` sandbox program

use super::{CommandRunner, Invocation, RunOutput, SandboxProfile, spawn_and_wait};
use crate::error::{Error, Result};
use std::ffi::OsString;
use std::path::PathBuf;

/// Hostname set inside the sandbox when UTS isolation is on
const SANDBOX_HOSTNAME: &str = "prebuilder";

/// Wraps each command in `firejail` with flags derived from the profile
#[derive(Debug, Clone)]
pub struct FirejailRunner {
    program: PathBuf,
}

impl Default for FirejailRunner {
    fn default() -> Self {
        Self {
            program: PathBuf::from("firejail"),
        }
    }
}

impl FirejailRunner {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Firejail arguments for a profile, not including the wrapped command
    pub fn sandbox_args(profile: &SandboxProfile) -> Vec<String> {
        let mut args = vec!["--noprofile".to_string(), "--quiet".to_string()];
        if profile.network {
            args.push("--net=none".to_string());
        }
        if profile.ipc {
            args.push("--ipc-namespace".to_string());
        }
        if profile.uts {
            args.push(format!("--hostname={}", SANDBOX_HOSTNAME));
        }
        if profile.apparmor {
            args.push("--apparmor".to_string());
        }
        if profile.memory_limit > 0 {
            args.push(format!("--rlimit-as={}", profile.memory_limit));
        }
        if profile.cpu_time_limit > 0 {
            args.push(format!("--rlimit-cpu={}", profile.cpu_time_limit));
        }
        if profile.nproc_limit > 0 {
            args.push(format!("--rlimit-nproc={}", profile.nproc_limit));
        }
        args
    }
}

impl CommandRunner for FirejailRunner {
    fn name(&self) -> &'static str {
        "firejail"
    }

    fn run(&self, invocation: &Invocation, profile: &SandboxProfile) -> Result<RunOutput> {
        let firejail = which::which(&self.program).map_err(|e| {
            Error::Sandbox(format!(
                "firejail isolation requested but {} is unavailable: {}",
                self.program.display(),
                e
            ))
        })?;

        let mut args: Vec<OsString> = Self::sandbox_args(profile)
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(OsString::from("--"));
        args.push(invocation.program().to_os_string());
        args.extend(invocation.get_args().iter().cloned());

        let cmd = invocation.command_with_program(firejail.as_os_str(), &args)?;
        spawn_and_wait(cmd, invocation, profile.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_args() {
        let args = FirejailRunner::sandbox_args(&SandboxProfile::default());
        assert_eq!(args[0], "--noprofile");
        assert!(args.contains(&"--net=none".to_string()));
        assert!(args.contains(&"--apparmor".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--rlimit-as=")));
    }

    #[test]
    fn test_apparmor_off() {
        let profile = SandboxProfile::default().toggle("apparmor", false).unwrap();
        let args = FirejailRunner::sandbox_args(&profile);
        assert!(!args.contains(&"--apparmor".to_string()));
        assert!(args.contains(&"--net=none".to_string()));
    }

    #[test]
    fn test_missing_firejail_is_sandbox_error() {
        let runner = FirejailRunner::with_program("/nonexistent/firejail");
        let inv = Invocation::new("true", "/tmp");
        let err = runner.run(&inv, &SandboxProfile::default()).unwrap_err();
        assert!(matches!(err, Error::Sandbox(_)));
    }
}
