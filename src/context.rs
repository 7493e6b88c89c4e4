// src/context.rs

//! Run context shared by every pipeline of one repository build

use crate::build_system::default_jobs;
use crate::cache::BuildCache;
use crate::distro::DEFAULT_MAINTAINER;
use crate::fetch::RetryPolicy;
use crate::sandbox::{CommandRunner, IsolationKind};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Directories, shared services and knobs for one run
///
/// Pipelines get everything that depends on where and how the run happens
/// from here instead of the process environment.
#[derive(Clone)]
pub struct RunContext {
    /// Base directory relative patch locations are resolved against
    pub patch_dir: PathBuf,
    /// Artifacts go to `<output_dir>/<distribution>/`
    pub output_dir: PathBuf,
    /// Scratch space for fetched trees, builds, staging and logs
    pub work_dir: PathBuf,
    pub cache: Option<Arc<BuildCache>>,
    /// Parallel jobs passed to build systems
    pub jobs: usize,
    /// Pipelines run concurrently
    pub parallel_pipelines: usize,
    /// Whether targets of one pipeline may be packaged concurrently
    pub parallel_targets: bool,
    pub fetch_retry: RetryPolicy,
    pub runner: Arc<dyn CommandRunner>,
    /// `Name <email>` written into packages
    pub maintainer: String,
    /// Machine architecture packages are built for
    pub arch: String,
}

impl RunContext {
    /// Context rooted at `base`: `patches/`, `packages/` and `work/` below it
    pub fn new(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            patch_dir: base.join("patches"),
            output_dir: base.join("packages"),
            work_dir: base.join("work"),
            cache: None,
            jobs: default_jobs(),
            parallel_pipelines: 1,
            parallel_targets: false,
            fetch_retry: RetryPolicy::default(),
            runner: IsolationKind::default().runner(),
            maintainer: DEFAULT_MAINTAINER.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    pub fn with_patch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.patch_dir = dir.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn with_cache(mut self, cache: Arc<BuildCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_parallelism(mut self, pipelines: usize, targets: bool) -> Self {
        self.parallel_pipelines = pipelines.max(1);
        self.parallel_targets = targets;
        self
    }

    pub fn with_fetch_retry(mut self, policy: RetryPolicy) -> Self {
        self.fetch_retry = policy;
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_maintainer(mut self, maintainer: impl Into<String>) -> Self {
        self.maintainer = maintainer.into();
        self
    }

    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    /// Directory holding the per-step build logs of one pipeline
    pub fn log_dir(&self, pipeline: &str) -> PathBuf {
        self.work_dir.join("logs").join(pipeline)
    }

    /// Scratch directory one pipeline fetches and builds in
    ///
    /// The path only depends on the pipeline name, so a tree restored from
    /// the build cache sits where it was built and absolute paths recorded
    /// by configure steps stay valid.
    pub fn workspace_dir(&self, pipeline: &str) -> PathBuf {
        self.work_dir.join("pipelines").join(pipeline)
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("patch_dir", &self.patch_dir)
            .field("output_dir", &self.output_dir)
            .field("work_dir", &self.work_dir)
            .field("cache", &self.cache.as_ref().map(|c| &c.config().cache_dir))
            .field("jobs", &self.jobs)
            .field("parallel_pipelines", &self.parallel_pipelines)
            .field("parallel_targets", &self.parallel_targets)
            .field("fetch_retry", &self.fetch_retry)
            .field("runner", &self.runner.name())
            .field("maintainer", &self.maintainer)
            .field("arch", &self.arch)
            .finish()
    }
}
