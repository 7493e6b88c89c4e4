// src/config.rs

//! `prebuilder.toml` configuration
//!
//! Every section and field is optional; missing values fall back to the
//! defaults below. Command line flags override individual fields after
//! loading, and the result is turned into a [`RunContext`].
//!
//! ```toml
//! maintainer = "Jane Doe <jane@example.com>"
//!
//! [paths]
//! patch_dir = "patches"
//! output_dir = "packages"
//!
//! [build]
//! jobs = 8
//! parallel_pipelines = 2
//!
//! [isolation]
//! kind = "firejail"
//!
//! [fetch]
//! attempts = 3
//! delay_secs = 5
//!
//! [cache]
//! enabled = true
//! max_size = 21474836480
//! ```

use crate::cache::{BuildCache, CacheConfig};
use crate::context::RunContext;
use crate::distro::DEFAULT_MAINTAINER;
use crate::error::{Error, Result};
use crate::fetch::RetryPolicy;
use crate::sandbox::IsolationKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Name of the configuration file looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "prebuilder.toml";

/// Directory settings; relative paths are relative to the base directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub patch_dir: PathBuf,
    pub output_dir: PathBuf,
    pub work_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            patch_dir: PathBuf::from("patches"),
            output_dir: PathBuf::from("packages"),
            work_dir: PathBuf::from("work"),
        }
    }
}

/// Build parallelism and target settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Jobs per build (defaults to the CPU count)
    pub jobs: Option<usize>,
    pub parallel_pipelines: usize,
    pub parallel_targets: bool,
    /// Target machine architecture (defaults to the host's)
    pub arch: Option<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            jobs: None,
            parallel_pipelines: 1,
            parallel_targets: false,
            arch: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationConfig {
    pub kind: IsolationKind,
}

/// Build cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub enabled: bool,
    #[serde(flatten)]
    pub config: CacheConfig,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            config: CacheConfig::default(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub maintainer: String,
    pub paths: PathsConfig,
    pub build: BuildConfig,
    pub isolation: IsolationConfig,
    pub fetch: RetryPolicy,
    pub cache: CacheSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            maintainer: DEFAULT_MAINTAINER.to_string(),
            paths: PathsConfig::default(),
            build: BuildConfig::default(),
            isolation: IsolationConfig::default(),
            fetch: RetryPolicy::default(),
            cache: CacheSection::default(),
        }
    }
}

impl Config {
    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::parse(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Load `path`, or `prebuilder.toml` in `base` if it exists, or defaults
    pub fn discover(path: Option<&Path>, base: &Path) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let default_path = base.join(CONFIG_FILE_NAME);
        if default_path.is_file() {
            debug!("Using configuration {}", default_path.display());
            Self::load(&default_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Build the run context, resolving relative paths against `base`
    ///
    /// A cache directory that cannot be created disables the cache with a
    /// warning instead of failing the run.
    pub fn into_context(self, base: &Path) -> RunContext {
        let mut ctx = RunContext::new(base)
            .with_patch_dir(base.join(&self.paths.patch_dir))
            .with_output_dir(base.join(&self.paths.output_dir))
            .with_work_dir(base.join(&self.paths.work_dir))
            .with_parallelism(self.build.parallel_pipelines, self.build.parallel_targets)
            .with_fetch_retry(self.fetch)
            .with_runner(self.isolation.kind.runner())
            .with_maintainer(self.maintainer);

        if let Some(jobs) = self.build.jobs {
            ctx = ctx.with_jobs(jobs);
        }
        if let Some(arch) = self.build.arch {
            ctx = ctx.with_arch(arch);
        }

        if self.cache.enabled {
            match BuildCache::new(self.cache.config) {
                Ok(cache) => ctx = ctx.with_cache(Arc::new(cache)),
                Err(e) => warn!("Build cache disabled: {}", e),
            }
        }

        ctx
    }
}
