// src/sandbox/mod.rs

//! Sandboxed execution of build commands
//!
//! A [`SandboxProfile`] describes what a build is allowed to see and use.
//! It is built once per recipe and never mutated; changing a toggle yields
//! a new profile. The profile is handed to a [`CommandRunner`], the
//! mechanism that actually isolates the process:
//!
//! - [`DirectRunner`]: resource limits and wall-clock timeout only
//! - [`NamespaceRunner`]: Linux user/net/ipc/uts/mount namespaces
//! - [`FirejailRunner`]: wraps the command with `firejail`
//!
//! Command output is never captured in memory. Both streams go to a log
//! file, and the last lines of that file are attached to failures.

mod direct;
mod firejail;
mod namespaces;

pub use direct::DirectRunner;
pub use firejail::FirejailRunner;
pub use namespaces::NamespaceRunner;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ffi::{OsStr, OsString};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Default resource limits for sandboxed builds
pub const DEFAULT_MEMORY_LIMIT: u64 = 8 * 1024 * 1024 * 1024; // 8 GB
pub const DEFAULT_CPU_TIME_LIMIT: u64 = 4 * 60 * 60; // 4 hours CPU time
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// Number of trailing log lines attached to a failed command
pub const LOG_TAIL_LINES: usize = 20;

/// Immutable isolation configuration for one recipe's build
///
/// Each toggle enables one isolation feature; `false` turns it off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxProfile {
    /// Isolate the network (no access beyond loopback)
    pub network: bool,
    /// Isolate System V IPC and POSIX message queues
    pub ipc: bool,
    /// Isolate hostname and domain name
    pub uts: bool,
    /// Private mount namespace
    pub mount: bool,
    /// Confine the build with the AppArmor profile (firejail only)
    pub apparmor: bool,
    /// Address space limit in bytes (0 = no limit)
    pub memory_limit: u64,
    /// CPU time limit in seconds (0 = no limit)
    pub cpu_time_limit: u64,
    /// Max number of processes (0 = no limit)
    ///
    /// Enforced with `RLIMIT_NPROC`, which counts every process of the
    /// invoking user, not only the build's. Off by default; when set it
    /// must leave room for everything else the user runs, including other
    /// pipelines of the same run.
    pub nproc_limit: u64,
    /// Wall-clock timeout per command
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for SandboxProfile {
    fn default() -> Self {
        Self {
            network: true,
            ipc: true,
            uts: true,
            mount: true,
            apparmor: true,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            cpu_time_limit: DEFAULT_CPU_TIME_LIMIT,
            nproc_limit: 0,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SandboxProfile {
    /// Names accepted by [`SandboxProfile::toggle`]
    pub const TOGGLES: &'static [&'static str] = &["network", "ipc", "uts", "mount", "apparmor"];

    /// A profile with every isolation feature and limit turned off
    pub fn permissive() -> Self {
        Self {
            network: false,
            ipc: false,
            uts: false,
            mount: false,
            apparmor: false,
            memory_limit: 0,
            cpu_time_limit: 0,
            nproc_limit: 0,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Return a copy with the named toggle set
    pub fn toggle(&self, name: &str, enabled: bool) -> Result<Self> {
        let mut next = self.clone();
        match name {
            "network" => next.network = enabled,
            "ipc" => next.ipc = enabled,
            "uts" => next.uts = enabled,
            "mount" => next.mount = enabled,
            "apparmor" => next.apparmor = enabled,
            _ => {
                return Err(Error::InvalidRecipe(format!(
                    "unknown sandbox toggle '{}' (expected one of: {})",
                    name,
                    Self::TOGGLES.join(", ")
                )));
            }
        }
        Ok(next)
    }

    /// Return a copy with a different wall-clock timeout
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }

    /// Return a copy with different resource limits
    pub fn with_limits(&self, memory_limit: u64, cpu_time_limit: u64, nproc_limit: u64) -> Self {
        Self {
            memory_limit,
            cpu_time_limit,
            nproc_limit,
            ..self.clone()
        }
    }

    /// Whether any namespace-level isolation is requested
    pub fn wants_namespaces(&self) -> bool {
        self.network || self.ipc || self.uts || self.mount
    }
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// A command to run under a sandbox
#[derive(Debug, Clone)]
pub struct Invocation {
    program: OsString,
    args: Vec<OsString>,
    cwd: PathBuf,
    env: Vec<(OsString, OsString)>,
    log_file: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl AsRef<OsStr>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
            log_file: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Append stdout and stderr to `path`
    pub fn log_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Extra environment variables, lossily converted for display
    pub fn get_env(&self) -> Vec<(String, String)> {
        self.env
            .iter()
            .map(|(k, v)| (k.to_string_lossy().into_owned(), v.to_string_lossy().into_owned()))
            .collect()
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    /// Human-readable command line for logs and errors
    pub fn describe(&self) -> String {
        let mut line = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    /// Build a [`Command`] with the working directory, environment and
    /// output redirection applied
    pub(crate) fn command(&self) -> Result<Command> {
        self.command_with_program(&self.program, &self.args)
    }

    /// Same as [`Invocation::command`] but with the program replaced,
    /// used by runners that wrap the real command
    pub(crate) fn command_with_program(&self, program: &OsStr, args: &[OsString]) -> Result<Command> {
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.cwd).stdin(Stdio::null());
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        match &self.log_file {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let log = fs::OpenOptions::new().create(true).append(true).open(path)?;
                let log_err = log.try_clone()?;
                cmd.stdout(log).stderr(log_err);
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }
        Ok(cmd)
    }
}

/// How a sandboxed command ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    /// Whether the wall-clock timeout killed the command
    pub timed_out: bool,
    /// Last lines of the command's log
    pub tail: String,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }

    /// One-line reason for a failed run
    pub fn failure_reason(&self, timeout: Duration) -> String {
        if self.timed_out {
            format!("timed out after {:?}", timeout)
        } else {
            match self.code {
                Some(code) => format!("exited with status {}", code),
                None => "killed by signal".to_string(),
            }
        }
    }
}

/// Mechanism that executes build commands under a [`SandboxProfile`]
pub trait CommandRunner: Send + Sync {
    /// Short identifier used in logs and configuration
    fn name(&self) -> &'static str;

    /// Run the command to completion
    ///
    /// A command that starts and exits non-zero is `Ok` with an unsuccessful
    /// [`RunOutput`]; `Err` is reserved for sandbox setup failures.
    fn run(&self, invocation: &Invocation, profile: &SandboxProfile) -> Result<RunOutput>;
}

/// Selectable command runner backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationKind {
    Direct,
    #[default]
    Namespaces,
    Firejail,
}

impl IsolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationKind::Direct => "direct",
            IsolationKind::Namespaces => "namespaces",
            IsolationKind::Firejail => "firejail",
        }
    }

    /// Instantiate the runner for this backend
    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        match self {
            IsolationKind::Direct => Arc::new(DirectRunner),
            IsolationKind::Namespaces => Arc::new(NamespaceRunner),
            IsolationKind::Firejail => Arc::new(FirejailRunner::default()),
        }
    }
}

impl FromStr for IsolationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "direct" => Ok(IsolationKind::Direct),
            "namespaces" => Ok(IsolationKind::Namespaces),
            "firejail" => Ok(IsolationKind::Firejail),
            _ => Err(Error::Config(format!(
                "unknown isolation '{}' (expected direct, namespaces or firejail)",
                s
            ))),
        }
    }
}

/// Spawn a prepared command and wait for it, killing it on timeout
///
/// The command leads its own process group, so a timeout kills every
/// process it started (compilers under `make`, background jobs), not just
/// the direct child.
pub(crate) fn spawn_and_wait(
    mut cmd: Command,
    invocation: &Invocation,
    timeout: Duration,
) -> Result<RunOutput> {
    debug!("Running: {}", invocation.describe());
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| {
        Error::Sandbox(format!(
            "failed to spawn {}: {}",
            invocation.program().to_string_lossy(),
            e
        ))
    })?;

    let (code, timed_out) = match child.wait_timeout(timeout)? {
        Some(status) => (status.code(), false),
        None => {
            warn!(
                "Command timed out after {:?}, killing: {}",
                timeout,
                invocation.describe()
            );
            kill_process_group(&mut child);
            let status = child.wait()?;
            (status.code(), true)
        }
    };

    let tail = match invocation.log_file() {
        Some(path) => read_tail(path, LOG_TAIL_LINES),
        None => String::new(),
    };

    Ok(RunOutput {
        code,
        timed_out,
        tail,
    })
}

fn kill_process_group(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = Pid::from_raw(child.id() as i32);
    if let Err(e) = killpg(pgid, Signal::SIGKILL) {
        warn!("Cannot kill process group {}: {}", pgid, e);
        let _ = child.kill();
    }
}

/// Last `lines` lines of a log file, empty if it cannot be read
pub fn read_tail(path: &Path, lines: usize) -> String {
    let Ok(file) = File::open(path) else {
        return String::new();
    };

    let mut ring: std::collections::VecDeque<String> = std::collections::VecDeque::with_capacity(lines);
    for line in BufReader::new(file).lines().map_while(std::result::Result::ok) {
        if ring.len() == lines {
            ring.pop_front();
        }
        ring.push_back(line);
    }
    ring.into_iter().collect::<Vec<_>>().join("\n")
}

/// Apply the profile's resource limits in the child before exec
///
/// Must only be called from a `pre_exec` hook.
pub(crate) fn apply_resource_limits(
    memory_limit: u64,
    cpu_time_limit: u64,
    nproc_limit: u64,
) -> std::io::Result<()> {
    use nix::sys::resource::{Resource, setrlimit};

    for (resource, value) in [
        (Resource::RLIMIT_AS, memory_limit),
        (Resource::RLIMIT_CPU, cpu_time_limit),
        (Resource::RLIMIT_NPROC, nproc_limit),
    ] {
        if value > 0 {
            setrlimit(resource, value, value)?;
        }
    }
    Ok(())
}

/// Check if unprivileged namespace isolation is available
pub fn isolation_available() -> bool {
    if nix::unistd::geteuid().is_root() {
        return true;
    }

    // Debian/Ubuntu kernels gate unprivileged user namespaces behind a sysctl
    let path = Path::new("/proc/sys/kernel/unprivileged_userns_clone");
    if path.exists() {
        return fs::read_to_string(path)
            .map(|content| content.trim() == "1")
            .unwrap_or(false);
    }

    Path::new("/proc/self/ns/user").exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_profile_default_isolates() {
        let profile = SandboxProfile::default();
        assert!(profile.network);
        assert!(profile.apparmor);
        assert!(profile.wants_namespaces());
        assert_eq!(profile.memory_limit, DEFAULT_MEMORY_LIMIT);
        assert_eq!(profile.nproc_limit, 0);
    }

    #[test]
    fn test_toggle_returns_new_profile() {
        let base = SandboxProfile::default();
        let relaxed = base.toggle("apparmor", false).unwrap();
        assert!(base.apparmor);
        assert!(!relaxed.apparmor);
        assert!(relaxed.network);
    }

    #[test]
    fn test_toggle_unknown_name() {
        let err = SandboxProfile::default().toggle("seccomp", false).unwrap_err();
        assert!(err.to_string().contains("seccomp"));
    }

    #[test]
    fn test_permissive_profile() {
        let profile = SandboxProfile::permissive();
        assert!(!profile.wants_namespaces());
        assert_eq!(profile.nproc_limit, 0);
    }

    #[test]
    fn test_profile_toml_roundtrip_partial() {
        let profile: SandboxProfile = toml::from_str("apparmor = false\ntimeout = 30\n").unwrap();
        assert!(!profile.apparmor);
        assert!(profile.network);
        assert_eq!(profile.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_isolation_kind_parse() {
        assert_eq!("firejail".parse::<IsolationKind>().unwrap(), IsolationKind::Firejail);
        assert!("docker".parse::<IsolationKind>().is_err());
        assert_eq!(IsolationKind::default().as_str(), "namespaces");
    }

    #[test]
    fn test_invocation_describe() {
        let inv = Invocation::new("make", "/tmp").args(["-j4", "all"]);
        assert_eq!(inv.describe(), "make -j4 all");
    }

    #[test]
    fn test_read_tail_keeps_last_lines() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("build.log");
        let content: String = (1..=30).map(|i| format!("line {}\n", i)).collect();
        fs::write(&log, content).unwrap();

        let tail = read_tail(&log, 3);
        assert_eq!(tail, "line 28\nline 29\nline 30");
        assert_eq!(read_tail(&dir.path().join("missing.log"), 3), "");
    }

    #[test]
    fn test_run_output_reason() {
        let out = RunOutput {
            code: Some(2),
            timed_out: false,
            tail: String::new(),
        };
        assert!(!out.success());
        assert!(out.failure_reason(DEFAULT_TIMEOUT).contains("status 2"));
    }
}
