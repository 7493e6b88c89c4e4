// src/pipeline.rs

//! Build pipelines
//!
//! A [`BuildPipeline`] runs one recipe and packages the result for each of
//! its targets:
//!
//! 1. fetch the source (retrying transient failures)
//! 2. apply patches, all-or-nothing per patch
//! 3. configure and build in the sandbox, once
//! 4. per target: stage with the install rule, then package
//!
//! Steps 1-3 are fatal to the pipeline. Step 4 failures are recorded per
//! target and never stop sibling targets. With a build cache, a hit after
//! step 1 restores the built tree and skips steps 2 and 3.

use crate::build_system::BuildEnv;
use crate::cache::BuildCache;
use crate::context::RunContext;
use crate::distro::{Distribution, PackagingEnv};
use crate::error::{Error, PipelineError, Result, Stage};
use crate::fetch::FetchedSource;
use crate::layout::PlatformLayout;
use crate::package::PackageMetadata;
use crate::patch::PatchSet;
use crate::recipe::BuildRecipe;
use crate::staging::{InstallContext, StagingPackage};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One packaging target: a distribution and the package produced for it
#[derive(Clone)]
pub struct Target {
    pub distribution: Arc<dyn Distribution>,
    pub metadata: PackageMetadata,
}

impl Target {
    pub fn new(distribution: Arc<dyn Distribution>, metadata: PackageMetadata) -> Self {
        Self {
            distribution,
            metadata,
        }
    }

    /// `distribution/package`, used in errors and reports
    pub fn label(&self) -> String {
        format!("{}/{}", self.distribution.name(), self.metadata.name())
    }
}

/// A produced package file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub distribution: String,
    pub package: String,
    pub path: PathBuf,
}

/// A target that failed to stage or package
#[derive(Debug)]
pub struct TargetFailure {
    pub target: String,
    pub error: Error,
}

/// Result of a pipeline whose fetch, patch and build steps succeeded
#[derive(Debug)]
pub struct PipelineOutcome {
    pub pipeline: String,
    /// Resolved source revision
    pub revision: String,
    /// Whether the built tree came from the cache
    pub cache_hit: bool,
    pub artifacts: Vec<Artifact>,
    pub failures: Vec<TargetFailure>,
}

impl PipelineOutcome {
    /// Whether every target produced an artifact
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One recipe bound to its packaging targets
pub struct BuildPipeline {
    name: String,
    recipe: BuildRecipe,
    targets: Vec<Target>,
}

impl std::fmt::Debug for BuildPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildPipeline").field("name", &self.name).finish_non_exhaustive()
    }
}

impl BuildPipeline {
    /// Bind a recipe to its targets
    ///
    /// There must be at least one target, and a package name may appear
    /// only once per distribution.
    pub fn new(recipe: BuildRecipe, targets: Vec<Target>) -> Result<Self> {
        let Some(first) = targets.first() else {
            return Err(Error::InvalidRecipe(
                "pipeline has no packaging targets".to_string(),
            ));
        };
        let name = first.metadata.name().to_string();

        let mut seen = HashSet::new();
        for target in &targets {
            if !seen.insert(target.label()) {
                return Err(Error::InvalidRecipe(format!(
                    "target {} is bound twice",
                    target.label()
                )));
            }
        }

        Ok(Self {
            name,
            recipe,
            targets,
        })
    }

    /// Name used in logs, errors and the log directory
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn recipe(&self) -> &BuildRecipe {
        &self.recipe
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Run the pipeline
    ///
    /// All scratch directories are removed when this returns, including on
    /// failure and unwind.
    pub fn execute(&self, ctx: &RunContext) -> std::result::Result<PipelineOutcome, PipelineError> {
        let fail = |stage: Stage| move |e: Error| PipelineError::new(&self.name, stage, e);

        info!("Running pipeline {}", self.name);

        let patches = self
            .recipe
            .resolve_patches(&ctx.patch_dir)
            .map_err(fail(Stage::Construct))?;

        let workspace = Workspace::create(ctx.workspace_dir(&self.name)).map_err(fail(Stage::Fetch))?;
        let log_dir = ctx.log_dir(&self.name);
        reset_dir(&log_dir).map_err(fail(Stage::Fetch))?;

        let fetched = ctx
            .fetch_retry
            .fetch(self.recipe.fetcher(), &workspace.source())
            .map_err(fail(Stage::Fetch))?;
        info!(
            "Fetched {} at {}",
            self.recipe.fetcher().locator(),
            fetched.revision
        );

        let cache_key = self.cache_key(ctx, &fetched, &patches);
        let cache_hit = match &cache_key {
            Some(key) => self.restore_cached(ctx, key, &workspace),
            None => false,
        };

        let source_dir = match self.recipe.subdir() {
            Some(subdir) => fetched.root.join(subdir),
            None => fetched.root.clone(),
        };
        let build_dir = if self.recipe.build_system().in_tree() {
            source_dir.clone()
        } else {
            workspace.build()
        };
        let timestamp = fetched.timestamp.unwrap_or(0);

        let env = BuildEnv {
            source_dir,
            build_dir,
            prefix: build_prefix(),
            jobs: ctx.jobs,
            options: self.recipe.options(),
            source_date_epoch: timestamp,
            runner: ctx.runner.as_ref(),
            profile: self.recipe.sandbox(),
            log_dir,
        };

        if !cache_hit {
            patches.apply(&fetched.root).map_err(fail(Stage::Patch))?;
            self.build(&env).map_err(fail(Stage::Build))?;

            if let (Some(cache), Some(key)) = (&ctx.cache, &cache_key)
                && let Err(e) = cache.put(key, &workspace.tree(), &self.name)
            {
                warn!("Failed to cache build of {}: {}", self.name, e);
            }
        }

        let stage_parent = workspace.stage();
        let package = |target: &Target| self.package_target(target, ctx, &env, &fetched, &stage_parent);

        let parallel = ctx.parallel_targets && !self.recipe.install_rule().uses_build_tree();
        let results: Vec<(String, Result<Artifact>)> = if parallel {
            self.targets
                .par_iter()
                .map(|t| (t.label(), package(t)))
                .collect()
        } else {
            self.targets.iter().map(|t| (t.label(), package(t))).collect()
        };

        let mut outcome = PipelineOutcome {
            pipeline: self.name.clone(),
            revision: fetched.revision.clone(),
            cache_hit,
            artifacts: Vec::new(),
            failures: Vec::new(),
        };
        for (target, result) in results {
            match result {
                Ok(artifact) => outcome.artifacts.push(artifact),
                Err(error) => {
                    warn!("Target {} of {} failed: {}", target, self.name, error);
                    outcome.failures.push(TargetFailure { target, error });
                }
            }
        }

        info!(
            "Pipeline {} produced {} of {} packages",
            self.name,
            outcome.artifacts.len(),
            self.targets.len()
        );
        Ok(outcome)
    }

    fn build(&self, env: &BuildEnv<'_>) -> Result<()> {
        fs::create_dir_all(&env.build_dir)?;
        if !env.source_dir.is_dir() {
            return Err(Error::build(
                "configure",
                format!("source directory {} does not exist", env.source_dir.display()),
            ));
        }

        let system = self.recipe.build_system();
        info!("Building {} with {}", self.name, system.name());
        system.configure(env, self.recipe.options())?;
        system.build(env, self.recipe.extra_args())
    }

    fn cache_key(&self, ctx: &RunContext, fetched: &FetchedSource, patches: &PatchSet) -> Option<String> {
        ctx.cache.as_ref()?;
        match self.recipe.fingerprint(patches) {
            Ok(fingerprint) => Some(BuildCache::cache_key(
                self.recipe.fetcher().locator(),
                &fetched.revision,
                &fingerprint,
            )),
            Err(e) => {
                warn!("Cannot fingerprint {}, not using the cache: {}", self.name, e);
                None
            }
        }
    }

    /// Replace the fetched tree with a cached built tree, if there is one
    fn restore_cached(&self, ctx: &RunContext, key: &str, workspace: &Workspace) -> bool {
        let Some(cache) = &ctx.cache else {
            return false;
        };

        let entry = match cache.get(key) {
            Ok(Some(entry)) => entry,
            Ok(None) => return false,
            Err(e) => {
                warn!("Cache lookup for {} failed: {}", self.name, e);
                return false;
            }
        };

        let restored = workspace.root().join("restored");
        let swapped = cache.restore(&entry, &restored).and_then(|()| {
            fs::remove_dir_all(workspace.tree())?;
            fs::rename(&restored, workspace.tree())?;
            Ok(())
        });

        match swapped {
            Ok(()) => {
                info!("Reusing cached build of {}", self.name);
                true
            }
            Err(e) => {
                warn!("Cannot restore cached build of {}: {}", self.name, e);
                let _ = fs::remove_dir_all(&restored);
                false
            }
        }
    }

    fn package_target(
        &self,
        target: &Target,
        ctx: &RunContext,
        env: &BuildEnv<'_>,
        fetched: &FetchedSource,
        stage_parent: &Path,
    ) -> Result<Artifact> {
        let label = target.label();
        let distro = target.distribution.as_ref();
        let layout = distro.layout(&ctx.arch);
        debug!("Staging {}", label);

        let staging = StagingPackage::new_in(stage_parent)?;
        let install = |dest: &Path| self.recipe.build_system().install(env, dest);
        let install_ctx = InstallContext {
            source_dir: &env.source_dir,
            build_dir: &env.build_dir,
            package: &staging,
            metadata: &target.metadata,
            layout: &layout,
            build_system_install: &install,
        };

        self.recipe
            .install_rule()
            .apply(&install_ctx)
            .map_err(|e| install_rule_error(&label, e))?;
        if staging.is_empty() {
            return Err(Error::InstallRule {
                target: label,
                reason: "install rule staged no files".to_string(),
            });
        }

        let packaging_env = PackagingEnv {
            output_dir: ctx.output_dir.join(distro.name()),
            version: target
                .metadata
                .package()
                .resolve_version(fetched.version_hint.as_deref()),
            arch: ctx.arch.clone(),
            maintainer: ctx.maintainer.clone(),
            timestamp: fetched.timestamp.unwrap_or(0),
        };

        let path = distro
            .package(staging.root(), &target.metadata, &packaging_env)
            .map_err(|e| match e {
                Error::Packaging { .. } => e,
                other => Error::Packaging {
                    target: label.clone(),
                    reason: other.to_string(),
                },
            })?;

        info!("Built {}", path.display());
        Ok(Artifact {
            distribution: distro.name().to_string(),
            package: target.metadata.name().to_string(),
            path,
        })
    }
}

/// Install prefix builds are configured with
fn build_prefix() -> PathBuf {
    PlatformLayout::default().prefix().to_path_buf()
}

fn install_rule_error(label: &str, e: Error) -> Error {
    let reason = match e {
        Error::InstallRule { reason, .. } => reason,
        other => other.to_string(),
    };
    Error::InstallRule {
        target: label.to_string(),
        reason,
    }
}

fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Scratch directory of one pipeline run
///
/// ```text
/// <dir>/tree/src     fetched source
/// <dir>/tree/build   out-of-tree build directory
/// <dir>/stage/       one staging root per target
/// ```
///
/// `tree` is what the build cache stores. Leftovers of an earlier run are
/// removed on creation and the directory is removed again on drop,
/// including on unwind.
struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    fn create(dir: PathBuf) -> Result<Self> {
        reset_dir(&dir)?;
        let workspace = Self { dir };
        fs::create_dir_all(workspace.source())?;
        fs::create_dir_all(workspace.build())?;
        fs::create_dir_all(workspace.stage())?;
        Ok(workspace)
    }

    fn root(&self) -> &Path {
        &self.dir
    }

    fn tree(&self) -> PathBuf {
        self.root().join("tree")
    }

    fn source(&self) -> PathBuf {
        self.tree().join("src")
    }

    fn build(&self) -> PathBuf {
        self.tree().join("build")
    }

    fn stage(&self) -> PathBuf {
        self.root().join("stage")
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.dir)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("Cannot remove workspace {}: {}", self.dir.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use crate::build_system::Make;
    use crate::distro::Debian;
    use crate::fetch::LocalFetcher;

    fn recipe(dir: &Path) -> BuildRecipe {
        BuildRecipe::builder()
            .build_system(Make::new())
            .fetcher(LocalFetcher::new(dir))
            .build()
            .unwrap()
    }

    fn target(name: &str) -> Target {
        Target::new(Arc::new(Debian), PackageMetadata::new(name).unwrap())
    }

    #[test]
    fn test_pipeline_needs_targets() {
        let dir = TempDir::new().unwrap();
        let err = BuildPipeline::new(recipe(dir.path()), vec![]).err().unwrap();
        assert!(matches!(err, Error::InvalidRecipe(_)));
    }

    #[test]
    fn test_pipeline_rejects_duplicate_target() {
        let dir = TempDir::new().unwrap();
        let result = BuildPipeline::new(recipe(dir.path()), vec![target("tool"), target("tool")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_pipeline_name_defaults_to_first_package() {
        let dir = TempDir::new().unwrap();
        let pipeline = BuildPipeline::new(recipe(dir.path()), vec![target("tool"), target("tool-dev")]).unwrap();
        assert_eq!(pipeline.name(), "tool");
        assert_eq!(pipeline.with_name("bake").name(), "bake");
    }

    #[test]
    fn test_install_rule_error_relabels() {
        let err = install_rule_error(
            "debian/tool",
            Error::InstallRule {
                target: String::new(),
                reason: "x does not exist".to_string(),
            },
        );
        assert_eq!(err.to_string(), "install rule for debian/tool failed: x does not exist");

        let wrapped = install_rule_error("debian/tool", Error::build("install", "exit 2"));
        assert!(matches!(wrapped, Error::InstallRule { .. }));
    }

    #[test]
    fn test_workspace_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let root = {
            let ws = Workspace::create(dir.path().join("tool")).unwrap();
            assert!(ws.source().is_dir());
            assert!(ws.stage().is_dir());
            ws.root().to_path_buf()
        };
        assert!(!root.exists());
    }
}
