// src/registry.rs

//! Pipeline registry and run reports
//!
//! The registry maps pipeline names to factories. A run constructs and
//! executes every (or every selected) pipeline independently: a pipeline
//! that fails, or panics, is recorded under its name and the others carry
//! on. The resulting [`RunReport`] always covers every pipeline that was
//! asked to run.

use crate::context::RunContext;
use crate::error::{Error, PipelineError, Result, Stage};
use crate::pipeline::{Artifact, BuildPipeline, PipelineOutcome};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Zero-argument constructor of one pipeline
pub type PipelineFactory = dyn Fn() -> Result<BuildPipeline> + Send + Sync;

/// Named pipelines making up one repository build
#[derive(Default)]
pub struct PipelineRegistry {
    pipelines: Vec<(String, Arc<PipelineFactory>)>,
}

impl std::fmt::Debug for PipelineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.pipelines.iter().map(|(name, _)| name)).finish()
    }
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pipeline factory under a unique name
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn() -> Result<BuildPipeline> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.contains(&name) {
            return Err(Error::DuplicatePipeline(name));
        }
        self.pipelines.push((name, Arc::new(factory)));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pipelines.iter().any(|(n, _)| n == name)
    }

    /// Registered names, in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pipelines.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Construct the named pipeline without running it
    pub fn construct(&self, name: &str) -> Result<BuildPipeline> {
        let (name, factory) = self
            .pipelines
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| Error::UnknownPipeline(name.to_string()))?;
        Ok(factory()?.with_name(name.as_str()))
    }

    /// Run every registered pipeline
    pub fn run_all(&self, ctx: &RunContext) -> RunReport {
        let selected: Vec<_> = self.pipelines.iter().collect();
        self.run(ctx, &selected)
    }

    /// Run only the named pipelines
    ///
    /// Every name must be registered; nothing runs otherwise.
    pub fn run_selected(&self, ctx: &RunContext, only: &[String]) -> Result<RunReport> {
        if let Some(unknown) = only.iter().find(|name| !self.contains(name)) {
            return Err(Error::UnknownPipeline(unknown.clone()));
        }

        let wanted: HashSet<&str> = only.iter().map(String::as_str).collect();
        let selected: Vec<_> = self
            .pipelines
            .iter()
            .filter(|(name, _)| wanted.contains(name.as_str()))
            .collect();
        Ok(self.run(ctx, &selected))
    }

    fn run(&self, ctx: &RunContext, selected: &[&(String, Arc<PipelineFactory>)]) -> RunReport {
        info!(
            "Running {} pipelines ({} at a time)",
            selected.len(),
            ctx.parallel_pipelines
        );

        let run_one = |entry: &&(String, Arc<PipelineFactory>)| {
            let (name, factory) = *entry;
            (name.clone(), run_pipeline(name, factory.as_ref(), ctx))
        };

        let results: Vec<_> = if ctx.parallel_pipelines > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(ctx.parallel_pipelines)
                .thread_name(|i| format!("pipeline-{}", i))
                .build()
            {
                Ok(pool) => pool.install(|| selected.par_iter().map(run_one).collect()),
                Err(e) => {
                    warn!("Cannot start pipeline thread pool, running sequentially: {}", e);
                    selected.iter().map(run_one).collect()
                }
            }
        } else {
            selected.iter().map(run_one).collect()
        };

        let mut report = RunReport::default();
        for (name, result) in results {
            report.record(name, result);
        }
        report
    }
}

/// Construct and execute one pipeline, containing panics
///
/// A panicking factory is reported under [`Stage::Construct`]; a panic
/// while the pipeline runs under [`Stage::Execute`].
fn run_pipeline(
    name: &str,
    factory: &PipelineFactory,
    ctx: &RunContext,
) -> std::result::Result<PipelineOutcome, PipelineError> {
    let pipeline = catch_panic(name, Stage::Construct, || {
        factory().map_err(|e| PipelineError::new(name, Stage::Construct, e))
    })?
    .with_name(name);

    catch_panic(name, Stage::Execute, || pipeline.execute(ctx))
}

fn catch_panic<T>(
    name: &str,
    stage: Stage,
    f: impl FnOnce() -> std::result::Result<T, PipelineError>,
) -> std::result::Result<T, PipelineError> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(PipelineError::new(name, stage, Error::Panic(message)))
    })
}

/// Why one pipeline did not fully succeed
#[derive(Debug, Clone, Serialize)]
pub struct PipelineFailure {
    /// Step that failed; `package` when only targets failed
    pub stage: Stage,
    pub error: String,
    /// Artifacts produced by targets that did succeed
    pub artifacts: Vec<Artifact>,
    /// Per-target errors, `distribution/package` -> message
    pub target_errors: BTreeMap<String, String>,
}

/// Outcome of every pipeline of one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub succeeded: BTreeMap<String, Vec<Artifact>>,
    pub failed: BTreeMap<String, PipelineFailure>,
}

impl RunReport {
    /// Record one pipeline's result
    pub fn record(
        &mut self,
        name: String,
        result: std::result::Result<PipelineOutcome, PipelineError>,
    ) {
        match result {
            Ok(outcome) if outcome.is_complete() => {
                info!("Pipeline {} succeeded", name);
                self.succeeded.insert(name, outcome.artifacts);
            }
            Ok(outcome) => {
                let target_errors: BTreeMap<_, _> = outcome
                    .failures
                    .into_iter()
                    .map(|f| (f.target, f.error.to_string()))
                    .collect();
                error!(
                    "Pipeline {} failed for {} targets",
                    name,
                    target_errors.len()
                );
                self.failed.insert(
                    name,
                    PipelineFailure {
                        stage: Stage::Package,
                        error: format!("{} of its targets failed", target_errors.len()),
                        artifacts: outcome.artifacts,
                        target_errors,
                    },
                );
            }
            Err(e) => {
                error!("{}", e);
                self.failed.insert(
                    name,
                    PipelineFailure {
                        stage: e.stage,
                        error: e.source.to_string(),
                        artifacts: Vec::new(),
                        target_errors: BTreeMap::new(),
                    },
                );
            }
        }
    }

    /// Whether every pipeline succeeded
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Every produced artifact, including those of partially failed pipelines
    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.succeeded
            .values()
            .flatten()
            .chain(self.failed.values().flat_map(|f| f.artifacts.iter()))
    }

    /// Human-readable per-pipeline summary
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for (name, artifacts) in &self.succeeded {
            let _ = writeln!(out, "ok      {} ({} packages)", name, artifacts.len());
        }
        for (name, failure) in &self.failed {
            let _ = writeln!(out, "FAILED  {} [{}]: {}", name, failure.stage, failure.error);
            for (target, error) in &failure.target_errors {
                let _ = writeln!(out, "          {}: {}", target, error);
            }
        }
        let _ = writeln!(
            out,
            "{} succeeded, {} failed",
            self.succeeded.len(),
            self.failed.len()
        );
        out
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("cannot serialize report: {}", e)))
    }

    /// Write the JSON report to `path`
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
