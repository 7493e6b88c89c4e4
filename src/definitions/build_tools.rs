// src/definitions/build_tools.rs

//! The `build-tools` set: Debian packages of build tooling
//!
//! Every pipeline builds from its upstream's `master` branch. Relative
//! patch directories (`CLI11`, `kati`, `ninja`) are looked up in the run's
//! patch directory.

use crate::build_system::{CMake, Make};
use crate::distro::Debian;
use crate::error::Result;
use crate::fetch::GitFetcher;
use crate::package::{MetadataTemplate, PackageMetadata, PackageRef, VersionedPackageRef};
use crate::pipeline::{BuildPipeline, Target};
use crate::recipe::BuildRecipe;
use crate::registry::PipelineRegistry;
use crate::sandbox::SandboxProfile;
use crate::staging::{CopyRule, InstallRule};
use std::sync::Arc;

const BRANCH: &str = "master";

/// Register every pipeline of the set
pub fn register(registry: &mut PipelineRegistry) -> Result<()> {
    registry.register("bake", bake)?;
    registry.register("CLI11", cli11)?;
    registry.register("kati", kati)?;
    registry.register("premake_bootstrap", premake_bootstrap)?;
    registry.register("ninja", ninja)?;
    Ok(())
}

fn debian(metadata: PackageMetadata) -> Vec<Target> {
    vec![Target::new(Arc::new(Debian), metadata)]
}

/// Shared by every premake flavour
fn premake_template() -> MetadataTemplate {
    MetadataTemplate::default()
        .description_short("cross-platform build script generator")
        .description_long(
            "premake allows you to manage your project configuration in one place and still \
             support those pesky IDE-addicted Windows coders and/or cranky Linux command-line \
             junkies. It allows you to generate project files for tools that you do not own. It \
             saves the time that would otherwise be spent manually keeping several different \
             toolsets in sync. And it provides an easy upgrade path as new versions of your \
             favorite tools are released.",
        )
        .license("BSD-3-Clause")
        .section("devel")
}

fn bake() -> Result<BuildPipeline> {
    let uri = "https://github.com/SanderMertens/bake";

    // The build runs in build-Linux; the binary and headers land next to it
    let recipe = BuildRecipe::builder()
        .build_system(Make::new().with_kati(true))
        .fetcher(GitFetcher::new(uri).with_ref(BRANCH))
        .subdir("build-Linux")
        .install_rule(InstallRule::Copy(vec![
            CopyRule::new("../bake", "bin/bake"),
            CopyRule::new("../include", "include"),
        ]))
        .build()?;

    let template = MetadataTemplate::default()
        .description_short(
            "A build system that lets you clone, build and run C/C++ projects with a single command",
        )
        .description_long(
            "To that end, bake is a build tool, build system, package manager and environment \
             manager in one. Bake automates building code, especially for highly interdependent \
             projects. Currently, Bake's focus is C/C++.\n\
             \n\
             Bake's main features are:\n\
             \tdiscover all projects in current directory & build them in the correct order\n\
             \tclone, build and run a project and its dependencies with a single command using bake bundles\n\
             \tautomatically include header files from dependencies\n\
             \tuse logical (hierarchical) identifiers to specify dependencies on any project built on the machine\n\
             \tprogrammable C API for interacting with package management\n\
             \tmanage and automatically export environment variables used for builds\n\
             \n\
             Bake depends on git for its package management features, and does not have a server \
             infrastructure for hosting a package repository. Bake does not collect any \
             information when you clone, build or publish projects.",
        )
        .license("MIT")
        .section("devel")
        .homepage(uri);

    BuildPipeline::new(recipe, debian(PackageMetadata::from_template("bake", &template)?))
}

fn cli11() -> Result<BuildPipeline> {
    let recipe = BuildRecipe::builder()
        .build_system(CMake::new())
        .fetcher(GitFetcher::new("https://github.com/CLIUtils/CLI11").with_ref(BRANCH))
        .option("CLI11_BUILD_DOCS", false)
        .option("CLI11_BUILD_EXAMPLES", false)
        .option("CLI11_INSTALL", true)
        .option("BUILD_TESTING", false)
        .patch("CLI11")
        .build()?;

    BuildPipeline::new(recipe, debian(PackageMetadata::new("cli11")?))
}

fn kati() -> Result<BuildPipeline> {
    let uri = "https://github.com/google/kati";

    let recipe = BuildRecipe::builder()
        .build_system(Make::new().with_kati(true))
        .fetcher(GitFetcher::new(uri).with_ref(BRANCH))
        .patch("kati")
        .install_rule(InstallRule::Copy(vec![CopyRule::new("ckati", "bin/ckati")]))
        .build()?;

    let template = MetadataTemplate::default()
        .description_short("An experimental GNU make clone")
        .description_long(
            "kati is an experimental GNU make clone. The main goal of this tool is to speed-up \
             incremental build of Android. Currently, kati does not offer a faster build by \
             itself. It instead converts your Makefile to a ninja file.",
        )
        .recommends(["ninja-build"])
        .section("devel")
        .homepage(uri);

    // No usable upstream tags
    let package = VersionedPackageRef::new("kati", "0.0-git");
    BuildPipeline::new(recipe, debian(PackageMetadata::from_template(package, &template)?))
}

fn premake_bootstrap() -> Result<BuildPipeline> {
    let uri = "https://github.com/premake/premake-core";

    let recipe = BuildRecipe::builder()
        .build_system(Make::new())
        .fetcher(GitFetcher::new(uri).with_ref(BRANCH))
        .extra_args(["-f", "Bootstrap.mak", "linux"])
        .sandbox(SandboxProfile::default().toggle("apparmor", false)?)
        .install_rule(InstallRule::Copy(vec![CopyRule::new(
            "bin/release/premake5",
            "bin/premake5",
        )]))
        .build()?;

    let template = premake_template().overlay(&MetadataTemplate::default().homepage(uri));
    let package = PackageRef::new("premake").with_postfix(1);
    BuildPipeline::new(recipe, debian(PackageMetadata::from_template(package, &template)?))
}

fn ninja() -> Result<BuildPipeline> {
    let recipe = BuildRecipe::builder()
        .build_system(CMake::new())
        .fetcher(GitFetcher::new("https://github.com/ninja-build/ninja").with_ref(BRANCH))
        .option("CMAKE_UNITY_BUILD", false)
        .patch("ninja")
        .build()?;

    BuildPipeline::new(recipe, debian(PackageMetadata::new("ninja-build")?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_system::OptionValue;

    fn registry() -> PipelineRegistry {
        let mut registry = PipelineRegistry::new();
        register(&mut registry).unwrap();
        registry
    }

    #[test]
    fn test_set_contents() {
        let registry = registry();
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["bake", "CLI11", "kati", "premake_bootstrap", "ninja"]
        );
    }

    #[test]
    fn test_every_pipeline_constructs() {
        for factory in [bake, cli11, kati, premake_bootstrap, ninja] {
            let pipeline = factory().unwrap();
            assert_eq!(pipeline.targets().len(), 1);
            assert_eq!(pipeline.targets()[0].distribution.name(), "debian");
        }
    }

    #[test]
    fn test_bake_copies_from_parent_of_subdir() {
        let pipeline = bake().unwrap();
        let recipe = pipeline.recipe();
        assert_eq!(recipe.build_system().name(), "ckati");
        assert_eq!(recipe.subdir().unwrap().to_str(), Some("build-Linux"));
        assert_eq!(recipe.install_rule().describe(), "../bake->bin/bake,../include->include");
        assert_eq!(recipe.fetcher().refspec(), Some("master"));
        let meta = &pipeline.targets()[0].metadata;
        assert_eq!(meta.license(), Some("MIT"));
        assert!(meta.description_long().unwrap().starts_with("To that end"));
    }

    #[test]
    fn test_cli11_options_and_patches() {
        let pipeline = cli11().unwrap();
        let recipe = pipeline.recipe();
        assert_eq!(recipe.build_system().name(), "cmake");
        assert_eq!(recipe.options()["CLI11_INSTALL"], OptionValue::Bool(true));
        assert_eq!(recipe.options()["BUILD_TESTING"], OptionValue::Bool(false));
        assert_eq!(recipe.patches()[0].location.to_str(), Some("CLI11"));
        assert!(recipe.install_rule().uses_build_tree());
        assert_eq!(pipeline.targets()[0].metadata.name(), "cli11");
    }

    #[test]
    fn test_kati_metadata() {
        let pipeline = kati().unwrap();
        let meta = &pipeline.targets()[0].metadata;
        assert_eq!(meta.package().version(), Some("0.0-git"));
        assert_eq!(meta.recommends().iter().next().unwrap().name(), "ninja-build");
        assert_eq!(meta.license(), None);
        assert_eq!(meta.section(), "devel");
    }

    #[test]
    fn test_premake_bootstrap() {
        let pipeline = premake_bootstrap().unwrap();
        let recipe = pipeline.recipe();
        assert_eq!(recipe.build_system().name(), "make");
        assert_eq!(recipe.extra_args(), ["-f", "Bootstrap.mak", "linux"]);
        assert!(!recipe.sandbox().apparmor);
        assert!(recipe.sandbox().network);

        let meta = &pipeline.targets()[0].metadata;
        assert_eq!(meta.package().release(), 1);
        assert_eq!(meta.homepage(), Some("https://github.com/premake/premake-core"));
        assert_eq!(meta.license(), Some("BSD-3-Clause"));
    }

    #[test]
    fn test_ninja_package_name() {
        let pipeline = ninja().unwrap();
        assert_eq!(pipeline.targets()[0].metadata.name(), "ninja-build");
        assert_eq!(
            pipeline.recipe().options()["CMAKE_UNITY_BUILD"],
            OptionValue::Bool(false)
        );
    }
}
