// src/build_system/mod.rs

//! Build system adapters
//!
//! An adapter knows how to drive one native toolchain family (make, CMake)
//! through configure, build and optionally install. Every command goes
//! through the [`BuildEnv`], which runs it under the recipe's sandbox
//! profile and turns failures into [`Error::Build`] naming the step.

mod cmake;
mod make;

pub use cmake::CMake;
pub use make::Make;

use crate::error::{Error, Result};
use crate::hash::Fingerprint;
use crate::sandbox::{CommandRunner, Invocation, SandboxProfile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// A typed build option value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{}", b),
            OptionValue::Int(i) => write!(f, "{}", i),
            OptionValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Str(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Str(value)
    }
}

/// Build options by name, ordered so rendering is deterministic
pub type BuildOptions = BTreeMap<String, OptionValue>;

/// Everything a build step needs to know about where and how to run
pub struct BuildEnv<'a> {
    /// Directory containing the project's build description
    pub source_dir: PathBuf,
    /// Directory build outputs go to (same as `source_dir` for in-tree builds)
    pub build_dir: PathBuf,
    /// Install prefix, e.g. `/usr`
    pub prefix: PathBuf,
    /// Parallel jobs
    pub jobs: usize,
    /// Recipe build options, visible to every step
    pub options: &'a BuildOptions,
    /// Value of `SOURCE_DATE_EPOCH` for reproducible builds
    pub source_date_epoch: u64,
    pub runner: &'a dyn CommandRunner,
    pub profile: &'a SandboxProfile,
    /// Directory receiving one log file per step
    pub log_dir: PathBuf,
}

impl BuildEnv<'_> {
    /// Log file of a step
    pub fn log_path(&self, step: &str) -> PathBuf {
        self.log_dir.join(format!("{}.log", step))
    }

    /// Run one command of `step` in the sandbox
    pub fn run(&self, step: &str, invocation: Invocation) -> Result<()> {
        let invocation = invocation
            .env("SOURCE_DATE_EPOCH", self.source_date_epoch.to_string())
            .log_to(self.log_path(step));

        info!("[{}] {}", step, invocation.describe());
        let output = self.runner.run(&invocation, self.profile)?;

        if output.success() {
            return Ok(());
        }

        let mut reason = format!(
            "`{}` {}",
            invocation.describe(),
            output.failure_reason(self.profile.timeout)
        );
        if !output.tail.is_empty() {
            reason.push('\n');
            reason.push_str(&output.tail);
        }
        Err(Error::build(step, reason))
    }
}

/// Drives configure/build/install of one native toolchain family
pub trait BuildSystem: Send + Sync {
    /// Short name, e.g. `make` or `cmake`
    fn name(&self) -> &str;

    /// Feed the adapter's identity and settings into a fingerprint
    fn fingerprint(&self, fp: &mut Fingerprint) {
        fp.field("build_system", self.name());
    }

    /// Whether the build happens inside the source tree
    fn in_tree(&self) -> bool {
        false
    }

    fn configure(&self, env: &BuildEnv<'_>, options: &BuildOptions) -> Result<()>;

    fn build(&self, env: &BuildEnv<'_>, extra_args: &[String]) -> Result<()>;

    /// Install the build outputs under `dest` (a DESTDIR)
    fn install(&self, env: &BuildEnv<'_>, dest: &Path) -> Result<()> {
        let _ = (env, dest);
        Err(Error::build(
            "install",
            format!("{} has no install step", self.name()),
        ))
    }
}

/// Default job count: the number of available CPUs
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::sandbox::RunOutput;
    use std::sync::Mutex;

    /// Runner that records invocations instead of executing them
    #[derive(Default)]
    pub struct RecordingRunner {
        pub calls: Mutex<Vec<(String, Vec<(String, String)>)>>,
        pub fail: bool,
    }

    impl CommandRunner for RecordingRunner {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn run(&self, invocation: &Invocation, _profile: &SandboxProfile) -> Result<RunOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((invocation.describe(), invocation.get_env()));
            Ok(RunOutput {
                code: Some(if self.fail { 1 } else { 0 }),
                timed_out: false,
                tail: if self.fail { "error: boom".to_string() } else { String::new() },
            })
        }
    }

    impl RecordingRunner {
        pub fn commands(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
        }
    }

    pub fn env<'a>(
        runner: &'a RecordingRunner,
        profile: &'a SandboxProfile,
        options: &'a BuildOptions,
    ) -> BuildEnv<'a> {
        BuildEnv {
            source_dir: PathBuf::from("/work/src"),
            build_dir: PathBuf::from("/work/build"),
            prefix: PathBuf::from("/usr"),
            jobs: 4,
            options,
            source_date_epoch: 0,
            runner,
            profile,
            log_dir: PathBuf::from("/work/logs"),
        }
    }
}
