// tests/pipeline.rs

//! Integration tests for single pipeline runs.
//!
//! These tests verify that:
//! 1. One build serves every packaging target
//! 2. Identical inputs give byte-identical artifacts
//! 3. Fetch, patch and build failures abort the pipeline, target failures don't
//! 4. The build cache skips rebuilding and never stores failed runs
//! 5. Transient fetch failures are retried per the retry policy

mod common;

use common::*;
use prebuilder::distro::{Arch, Debian, Distribution, PackagingEnv};
use prebuilder::fetch::RetryPolicy;
use prebuilder::staging::{InstallRule, copy_tree};
use prebuilder::{BuildPipeline, BuildRecipe, Error, PackageMetadata, Stage, Target};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tempfile::TempDir;

fn debian(name: &str) -> Target {
    Target::new(Arc::new(Debian), PackageMetadata::new(name).unwrap())
}

fn arch(name: &str) -> Target {
    Target::new(Arc::new(Arch), PackageMetadata::new(name).unwrap())
}

/// Backend that always fails, for target isolation tests
struct BrokenDistribution;

impl Distribution for BrokenDistribution {
    fn name(&self) -> &str {
        "broken"
    }

    fn package(&self, _staging: &Path, metadata: &PackageMetadata, _env: &PackagingEnv) -> prebuilder::Result<PathBuf> {
        Err(Error::Packaging {
            target: format!("broken/{}", metadata.name()),
            reason: "no space left on device".to_string(),
        })
    }
}

#[test]
fn test_two_distributions_from_one_build() {
    let dir = TempDir::new().unwrap();
    let system = FakeBuildSystem::new();
    let builds = system.builds();
    let pipeline = BuildPipeline::new(
        tool_recipe(FakeFetcher::new("fake://tool"), system),
        vec![debian("tool"), arch("tool")],
    )
    .unwrap();

    let outcome = pipeline.execute(&context(dir.path())).unwrap();

    assert!(outcome.is_complete());
    assert!(!outcome.cache_hit);
    assert_eq!(outcome.revision, "0123456789abcdef");
    assert_eq!(outcome.artifacts.len(), 2);
    assert_eq!(builds.load(Ordering::SeqCst), 1);

    let deb = &outcome.artifacts[0];
    assert_eq!(deb.distribution, "debian");
    assert_eq!(
        deb.path,
        dir.path().join("packages/debian/tool_1.2.0-0_amd64.deb")
    );
    assert!(deb_paths(&deb.path).contains(&"usr/bin/tool".to_string()));

    let pkg = &outcome.artifacts[1];
    assert_eq!(pkg.distribution, "arch");
    assert_eq!(
        pkg.path,
        dir.path().join("packages/arch/tool-1.2.0-1-x86_64.pkg.tar.zst")
    );
    assert!(arch_paths(&pkg.path).contains(&"usr/bin/tool".to_string()));
}

#[test]
fn test_build_runs_once_for_many_targets() {
    for parallel_targets in [false, true] {
        let dir = TempDir::new().unwrap();
        let system = FakeBuildSystem::new();
        let builds = system.builds();
        let pipeline = BuildPipeline::new(
            tool_recipe(FakeFetcher::new("fake://tool"), system),
            vec![debian("tool"), debian("tool-extra"), arch("tool"), arch("tool-extra")],
        )
        .unwrap();

        let ctx = context(dir.path()).with_parallelism(1, parallel_targets);
        let outcome = pipeline.execute(&ctx).unwrap();

        assert_eq!(outcome.artifacts.len(), 4);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn test_build_system_install_rule() {
    let dir = TempDir::new().unwrap();
    let recipe = BuildRecipe::builder()
        .build_system(FakeBuildSystem::new())
        .fetcher(FakeFetcher::new("fake://tool"))
        .build()
        .unwrap();
    let pipeline = BuildPipeline::new(recipe, vec![debian("tool")]).unwrap();

    let outcome = pipeline.execute(&context(dir.path())).unwrap();
    assert!(deb_paths(&outcome.artifacts[0].path).contains(&"usr/bin/tool".to_string()));
}

#[test]
fn test_artifacts_are_reproducible() {
    let pipeline = BuildPipeline::new(
        tool_recipe(FakeFetcher::new("fake://tool"), FakeBuildSystem::new()),
        vec![debian("tool"), arch("tool")],
    )
    .unwrap();

    let first_dir = TempDir::new().unwrap();
    let second_dir = TempDir::new().unwrap();
    let first = pipeline.execute(&context(first_dir.path())).unwrap();
    let second = pipeline.execute(&context(second_dir.path())).unwrap();

    assert_eq!(first.artifacts.len(), second.artifacts.len());
    for (a, b) in first.artifacts.iter().zip(&second.artifacts) {
        assert_eq!(a.path.file_name(), b.path.file_name());
        assert_eq!(fs::read(&a.path).unwrap(), fs::read(&b.path).unwrap());
    }
}

#[test]
fn test_same_patch_twice_is_conflict() {
    let dir = TempDir::new().unwrap();
    let patch_dir = dir.path().join("patches");
    fs::create_dir_all(&patch_dir).unwrap();
    fs::write(patch_dir.join("fix.patch"), FIX_PATCH).unwrap();

    let system = FakeBuildSystem::new();
    let builds = system.builds();
    let recipe = BuildRecipe::builder()
        .build_system(system)
        .fetcher(FakeFetcher::new("fake://tool"))
        .patch("fix.patch")
        .patch("fix.patch")
        .install_rule(copy_tool_rule())
        .build()
        .unwrap();
    let pipeline = BuildPipeline::new(recipe, vec![debian("tool")]).unwrap();

    let err = pipeline.execute(&context(dir.path())).unwrap_err();
    assert_eq!(err.pipeline, "tool");
    assert_eq!(err.stage, Stage::Patch);
    assert!(matches!(err.source, Error::PatchConflict { .. }));
    assert_eq!(builds.load(Ordering::SeqCst), 0);
    assert!(files_below(&dir.path().join("packages")).is_empty());
}

#[test]
fn test_patch_is_applied_before_build() {
    let dir = TempDir::new().unwrap();
    let patch_dir = dir.path().join("patches/tool");
    fs::create_dir_all(&patch_dir).unwrap();
    fs::write(patch_dir.join("0001-exit-code.patch"), FIX_PATCH).unwrap();

    let recipe = BuildRecipe::builder()
        .build_system(FakeBuildSystem::new())
        .fetcher(FakeFetcher::new("fake://tool"))
        .patch("tool")
        .install_rule(InstallRule::custom(|ctx| {
            let built = fs::read_to_string(ctx.build_dir.join("out/bin/tool"))?;
            assert!(built.contains("return 1;"));
            let dest = ctx.package.nest("/usr/bin/tool");
            fs::create_dir_all(dest.parent().unwrap())?;
            fs::write(dest, built)?;
            Ok(())
        }))
        .build()
        .unwrap();
    let pipeline = BuildPipeline::new(recipe, vec![debian("tool")]).unwrap();

    let outcome = pipeline.execute(&context(dir.path())).unwrap();
    assert_eq!(outcome.artifacts.len(), 1);
}

#[test]
fn test_missing_patch_fails_before_fetch() {
    let dir = TempDir::new().unwrap();
    let fetcher = FakeFetcher::new("fake://tool");
    let attempts = fetcher.attempts();
    let recipe = BuildRecipe::builder()
        .build_system(FakeBuildSystem::new())
        .fetcher(fetcher)
        .patch("no-such-dir")
        .build()
        .unwrap();
    let pipeline = BuildPipeline::new(recipe, vec![debian("tool")]).unwrap();

    let err = pipeline.execute(&context(dir.path())).unwrap_err();
    assert_eq!(err.stage, Stage::Construct);
    assert!(matches!(err.source, Error::InvalidRecipe(_)));
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
}

#[test]
fn test_missing_install_path_fails_every_target_without_artifacts() {
    let dir = TempDir::new().unwrap();
    let recipe = BuildRecipe::builder()
        .build_system(FakeBuildSystem::new())
        .fetcher(FakeFetcher::new("fake://tool"))
        .install_rule(InstallRule::Copy(vec![prebuilder::staging::CopyRule::new(
            "out/bin/missing",
            "bin/missing",
        )]))
        .build()
        .unwrap();
    let pipeline = BuildPipeline::new(recipe, vec![debian("tool"), arch("tool")]).unwrap();

    let outcome = pipeline.execute(&context(dir.path())).unwrap();

    assert!(!outcome.is_complete());
    assert!(outcome.artifacts.is_empty());
    assert_eq!(outcome.failures.len(), 2);
    for failure in &outcome.failures {
        assert!(matches!(failure.error, Error::InstallRule { .. }));
        assert!(failure.error.is_target_scoped());
        assert!(failure.error.to_string().contains("out/bin/missing"));
    }
    assert_eq!(outcome.failures[0].target, "debian/tool");
    assert!(files_below(&dir.path().join("packages")).is_empty());
}

#[test]
fn test_missing_install_path_fails_only_its_target() {
    let dir = TempDir::new().unwrap();
    // Stages out/bin/<package name>; only "tool" is built
    let rule = InstallRule::custom(|ctx| {
        let name = ctx.metadata.name();
        copy_tree(
            &ctx.build_dir.join("out/bin").join(name),
            &ctx.package.nest(ctx.layout.prefix().join("bin").join(name)),
        )
    });
    let recipe = BuildRecipe::builder()
        .build_system(FakeBuildSystem::new())
        .fetcher(FakeFetcher::new("fake://tool"))
        .install_rule(rule)
        .build()
        .unwrap();
    let pipeline = BuildPipeline::new(recipe, vec![debian("tool"), debian("helper")]).unwrap();

    let outcome = pipeline.execute(&context(dir.path())).unwrap();

    assert_eq!(outcome.artifacts.len(), 1);
    assert_eq!(outcome.artifacts[0].package, "tool");
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].target, "debian/helper");
    assert!(matches!(outcome.failures[0].error, Error::InstallRule { .. }));
    assert!(outcome.failures[0].error.to_string().contains("out/bin/helper"));
    assert_eq!(files_below(&dir.path().join("packages")).len(), 1);
}

#[test]
fn test_failing_target_does_not_affect_siblings() {
    let dir = TempDir::new().unwrap();
    let broken = Target::new(
        Arc::new(BrokenDistribution),
        PackageMetadata::new("tool").unwrap(),
    );
    let pipeline = BuildPipeline::new(
        tool_recipe(FakeFetcher::new("fake://tool"), FakeBuildSystem::new()),
        vec![debian("tool"), broken, arch("tool")],
    )
    .unwrap();

    let outcome = pipeline.execute(&context(dir.path())).unwrap();

    assert_eq!(outcome.artifacts.len(), 2);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].target, "broken/tool");
    assert!(matches!(outcome.failures[0].error, Error::Packaging { .. }));
    assert!(outcome.artifacts.iter().all(|a| a.path.is_file()));
}

#[test]
fn test_build_failure_is_fatal() {
    let dir = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    let (ctx, cache) = cached_context(dir.path(), cache_dir.path());
    let pipeline = BuildPipeline::new(
        tool_recipe(FakeFetcher::new("fake://tool"), FakeBuildSystem::failing()),
        vec![debian("tool")],
    )
    .unwrap();

    let err = pipeline.execute(&ctx).unwrap_err();
    assert_eq!(err.stage, Stage::Build);
    assert!(err.to_string().contains("cc exited with status 1"));
    assert_eq!(cache.stats().unwrap().entry_count, 0);
    assert!(files_below(&dir.path().join("packages")).is_empty());
}

#[test]
fn test_unresolvable_reference_creates_no_cache_entry() {
    let dir = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    let (ctx, cache) = cached_context(dir.path(), cache_dir.path());
    let system = FakeBuildSystem::new();
    let builds = system.builds();
    let pipeline = BuildPipeline::new(
        tool_recipe(FakeFetcher::unresolvable("fake://tool"), system),
        vec![debian("tool")],
    )
    .unwrap();

    let err = pipeline.execute(&ctx).unwrap_err();
    assert_eq!(err.stage, Stage::Fetch);
    assert!(matches!(err.source, Error::Fetch { transient: false, .. }));
    assert_eq!(builds.load(Ordering::SeqCst), 0);
    assert_eq!(cache.stats().unwrap().entry_count, 0);
}

#[test]
fn test_warm_cache_skips_build() {
    let cache_dir = TempDir::new().unwrap();
    let system = FakeBuildSystem::new();
    let builds = system.builds();
    let pipeline = BuildPipeline::new(
        tool_recipe(FakeFetcher::new("fake://tool"), system),
        vec![debian("tool"), arch("tool")],
    )
    .unwrap();

    let cold_dir = TempDir::new().unwrap();
    let (cold_ctx, cache) = cached_context(cold_dir.path(), cache_dir.path());
    let cold = pipeline.execute(&cold_ctx).unwrap();
    assert!(!cold.cache_hit);
    assert_eq!(cache.stats().unwrap().entry_count, 1);

    let warm_dir = TempDir::new().unwrap();
    let (warm_ctx, _) = cached_context(warm_dir.path(), cache_dir.path());
    let warm = pipeline.execute(&warm_ctx).unwrap();
    assert!(warm.cache_hit);
    assert_eq!(builds.load(Ordering::SeqCst), 1);

    for (a, b) in cold.artifacts.iter().zip(&warm.artifacts) {
        assert_eq!(fs::read(&a.path).unwrap(), fs::read(&b.path).unwrap());
    }
}

#[test]
fn test_warm_cache_keeps_absolute_build_paths() {
    let dir = TempDir::new().unwrap();
    let (ctx, _cache) = cached_context(dir.path(), &dir.path().join("cache"));
    let system = FakeBuildSystem::absolute_install();
    let builds = system.builds();
    let recipe = BuildRecipe::builder()
        .build_system(system)
        .fetcher(FakeFetcher::new("fake://tool"))
        .build()
        .unwrap();
    let pipeline = BuildPipeline::new(recipe, vec![debian("tool")]).unwrap();

    let cold = pipeline.execute(&ctx).unwrap();
    let warm = pipeline.execute(&ctx).unwrap();

    assert!(!cold.cache_hit);
    assert!(warm.cache_hit);
    assert!(warm.is_complete(), "{:?}", warm.failures);
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert!(deb_paths(&warm.artifacts[0].path).contains(&"usr/bin/tool".to_string()));
}

#[test]
fn test_changed_options_miss_the_cache() {
    let cache_dir = TempDir::new().unwrap();
    let base = TempDir::new().unwrap();
    let (ctx, cache) = cached_context(base.path(), cache_dir.path());

    for level in [1i64, 2] {
        let recipe = BuildRecipe::builder()
            .build_system(FakeBuildSystem::new())
            .fetcher(FakeFetcher::new("fake://tool"))
            .option("LEVEL", level)
            .install_rule(copy_tool_rule())
            .build()
            .unwrap();
        let outcome = BuildPipeline::new(recipe, vec![debian("tool")])
            .unwrap()
            .execute(&ctx)
            .unwrap();
        assert!(!outcome.cache_hit);
    }
    assert_eq!(cache.stats().unwrap().entry_count, 2);
}

#[test]
fn test_transient_fetch_failures_are_retried() {
    let dir = TempDir::new().unwrap();
    let fetcher = FakeFetcher::flaky("fake://tool", 2);
    let attempts = fetcher.attempts();
    let pipeline = BuildPipeline::new(
        tool_recipe(fetcher, FakeBuildSystem::new()),
        vec![debian("tool")],
    )
    .unwrap();

    let ctx = context(dir.path()).with_fetch_retry(RetryPolicy::new(3, Duration::ZERO));
    let outcome = pipeline.execute(&ctx).unwrap();
    assert_eq!(outcome.artifacts.len(), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[test]
fn test_retries_are_bounded_by_policy() {
    let dir = TempDir::new().unwrap();
    let fetcher = FakeFetcher::flaky("fake://tool", 5);
    let attempts = fetcher.attempts();
    let pipeline = BuildPipeline::new(
        tool_recipe(fetcher, FakeBuildSystem::new()),
        vec![debian("tool")],
    )
    .unwrap();

    // Default policy: a single attempt
    let err = pipeline.execute(&context(dir.path())).unwrap_err();
    assert!(err.source.is_transient());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    let ctx = context(dir.path()).with_fetch_retry(RetryPolicy::new(3, Duration::ZERO));
    assert!(pipeline.execute(&ctx).is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
}

#[test]
fn test_permanent_fetch_failure_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let fetcher = FakeFetcher::unresolvable("fake://tool");
    let attempts = fetcher.attempts();
    let pipeline = BuildPipeline::new(
        tool_recipe(fetcher, FakeBuildSystem::new()),
        vec![debian("tool")],
    )
    .unwrap();

    let ctx = context(dir.path()).with_fetch_retry(RetryPolicy::new(5, Duration::ZERO));
    assert!(pipeline.execute(&ctx).is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[test]
fn test_step_logs_directory_is_created() {
    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path());
    let pipeline = BuildPipeline::new(
        tool_recipe(FakeFetcher::new("fake://tool"), FakeBuildSystem::new()),
        vec![debian("tool")],
    )
    .unwrap()
    .with_name("my-tool");

    pipeline.execute(&ctx).unwrap();
    assert!(ctx.log_dir("my-tool").is_dir());
    // The scratch workspace is gone once the run finishes
    assert!(!ctx.workspace_dir("my-tool").exists());
}
