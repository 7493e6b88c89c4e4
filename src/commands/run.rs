// src/commands/run.rs

//! Run command - build every pipeline of a definitions set

use super::{base_dir, load_config};
use anyhow::{Context, Result};
use prebuilder::config::Config;
use prebuilder::definitions;
use prebuilder::sandbox::IsolationKind;
use std::path::{Path, PathBuf};
use tracing::info;

/// Command line overrides for one run
#[derive(Debug, Default)]
pub struct RunOptions {
    pub definitions: String,
    pub only: Vec<String>,
    pub output_dir: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub patch_dir: Option<PathBuf>,
    pub jobs: Option<usize>,
    pub parallel: Option<usize>,
    pub parallel_targets: bool,
    pub no_cache: bool,
    pub isolation: Option<IsolationKind>,
    pub arch: Option<String>,
    pub fetch_attempts: Option<u32>,
    pub report: Option<PathBuf>,
}

impl RunOptions {
    /// Override configuration fields given on the command line
    fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.output_dir {
            config.paths.output_dir = dir.clone();
        }
        if let Some(dir) = &self.work_dir {
            config.paths.work_dir = dir.clone();
        }
        if let Some(dir) = &self.patch_dir {
            config.paths.patch_dir = dir.clone();
        }
        if let Some(jobs) = self.jobs {
            config.build.jobs = Some(jobs);
        }
        if let Some(parallel) = self.parallel {
            config.build.parallel_pipelines = parallel;
        }
        if self.parallel_targets {
            config.build.parallel_targets = true;
        }
        if self.no_cache {
            config.cache.enabled = false;
        }
        if let Some(kind) = self.isolation {
            config.isolation.kind = kind;
        }
        if let Some(arch) = &self.arch {
            config.build.arch = Some(arch.clone());
        }
        if let Some(attempts) = self.fetch_attempts {
            config.fetch.attempts = attempts;
        }
    }
}

/// Run the pipelines and print a summary to stderr
///
/// Returns whether every pipeline succeeded.
pub fn cmd_run(config_path: Option<&Path>, opts: RunOptions) -> Result<bool> {
    let base = base_dir()?;
    let mut config = load_config(config_path, &base)?;
    opts.apply(&mut config);

    let registry = definitions::load(&opts.definitions)
        .with_context(|| format!("Failed to load definitions '{}'", opts.definitions))?;
    let ctx = config.into_context(&base);
    info!(
        "Loaded {} pipelines from {}, writing packages to {}",
        registry.len(),
        opts.definitions,
        ctx.output_dir.display()
    );

    let report = if opts.only.is_empty() {
        registry.run_all(&ctx)
    } else {
        registry
            .run_selected(&ctx, &opts.only)
            .context("Invalid pipeline selection")?
    };

    if let Some(path) = &opts.report {
        report
            .write_json(path)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        info!("Wrote run report to {}", path.display());
    }

    eprint!("{}", report.summary());
    Ok(report.is_success())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        let opts = RunOptions {
            output_dir: Some(PathBuf::from("/srv/out")),
            jobs: Some(3),
            parallel: Some(2),
            no_cache: true,
            isolation: Some(IsolationKind::Direct),
            fetch_attempts: Some(5),
            ..Default::default()
        };
        opts.apply(&mut config);

        assert_eq!(config.paths.output_dir, PathBuf::from("/srv/out"));
        assert_eq!(config.paths.work_dir, PathBuf::from("work"));
        assert_eq!(config.build.jobs, Some(3));
        assert_eq!(config.build.parallel_pipelines, 2);
        assert!(!config.cache.enabled);
        assert_eq!(config.isolation.kind, IsolationKind::Direct);
        assert_eq!(config.fetch.attempts, 5);
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let mut config = Config::default();
        config.build.parallel_targets = true;
        RunOptions::default().apply(&mut config);
        assert!(config.build.parallel_targets);
        assert!(config.cache.enabled);
    }
}
