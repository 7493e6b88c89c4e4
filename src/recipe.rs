// src/recipe.rs

//! Build recipes
//!
//! A [`BuildRecipe`] binds everything needed to produce one built tree: a
//! fetcher, patches, a build system adapter with its options, a sandbox
//! profile and the install rule used to stage outputs later. Recipes are
//! assembled with [`RecipeBuilder`] and immutable afterwards.

use crate::build_system::{BuildOptions, BuildSystem, OptionValue};
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::hash::Fingerprint;
use crate::patch::{PatchSet, PatchSpec};
use crate::sandbox::SandboxProfile;
use crate::staging::InstallRule;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// One upstream project's fetch and build description
#[derive(Clone)]
pub struct BuildRecipe {
    build_system: Arc<dyn BuildSystem>,
    fetcher: Arc<dyn Fetcher>,
    options: BuildOptions,
    patches: Vec<PatchSpec>,
    install_rule: InstallRule,
    sandbox: SandboxProfile,
    subdir: Option<PathBuf>,
    extra_args: Vec<String>,
}

impl BuildRecipe {
    pub fn builder() -> RecipeBuilder {
        RecipeBuilder::default()
    }

    pub fn build_system(&self) -> &dyn BuildSystem {
        self.build_system.as_ref()
    }

    pub fn fetcher(&self) -> &dyn Fetcher {
        self.fetcher.as_ref()
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    pub fn patches(&self) -> &[PatchSpec] {
        &self.patches
    }

    pub fn install_rule(&self) -> &InstallRule {
        &self.install_rule
    }

    pub fn sandbox(&self) -> &SandboxProfile {
        &self.sandbox
    }

    /// Directory inside the fetched tree the build system operates in
    pub fn subdir(&self) -> Option<&Path> {
        self.subdir.as_deref()
    }

    pub fn extra_args(&self) -> &[String] {
        &self.extra_args
    }

    /// Resolve patch locations, relative ones against `patch_dir`
    pub fn resolve_patches(&self, patch_dir: &Path) -> Result<PatchSet> {
        PatchSet::resolve(&self.patches, patch_dir)
    }

    /// Fingerprint of everything that shapes the built tree
    ///
    /// Together with the source locator and revision this forms the build
    /// cache key.
    pub fn fingerprint(&self, patches: &PatchSet) -> Result<String> {
        let mut fp = Fingerprint::new();
        self.build_system.fingerprint(&mut fp);
        for (name, value) in &self.options {
            fp.field("option", format!("{}={}", name, render_option(value)));
        }
        patches.fingerprint(&mut fp)?;
        let subdir = self
            .subdir
            .as_ref()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        fp.field("subdir", subdir);
        for arg in &self.extra_args {
            fp.field("extra_arg", arg);
        }
        Ok(fp.finish())
    }
}

impl fmt::Debug for BuildRecipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildRecipe")
            .field("build_system", &self.build_system.name())
            .field("fetcher", &self.fetcher.locator())
            .field("options", &self.options)
            .field("patches", &self.patches)
            .field("install_rule", &self.install_rule)
            .field("sandbox", &self.sandbox)
            .field("subdir", &self.subdir)
            .field("extra_args", &self.extra_args)
            .finish()
    }
}

// Typed so that `true` and `"true"` fingerprint differently
fn render_option(value: &OptionValue) -> String {
    match value {
        OptionValue::Bool(b) => format!("bool:{}", b),
        OptionValue::Int(i) => format!("int:{}", i),
        OptionValue::Str(s) => format!("str:{}", s),
    }
}

/// Builder for [`BuildRecipe`]
#[derive(Default)]
pub struct RecipeBuilder {
    build_system: Option<Arc<dyn BuildSystem>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    options: BuildOptions,
    patches: Vec<PatchSpec>,
    install_rule: InstallRule,
    sandbox: SandboxProfile,
    subdir: Option<PathBuf>,
    extra_args: Vec<String>,
}

impl RecipeBuilder {
    pub fn build_system(mut self, system: impl BuildSystem + 'static) -> Self {
        self.build_system = Some(Arc::new(system));
        self
    }

    pub fn shared_build_system(mut self, system: Arc<dyn BuildSystem>) -> Self {
        self.build_system = Some(system);
        self
    }

    pub fn fetcher(mut self, fetcher: impl Fetcher + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    pub fn shared_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn option(mut self, name: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    pub fn options(mut self, options: BuildOptions) -> Self {
        self.options.extend(options);
        self
    }

    /// Append a patch file or directory
    pub fn patch(mut self, patch: impl Into<PatchSpec>) -> Self {
        self.patches.push(patch.into());
        self
    }

    pub fn patches<I, P>(mut self, patches: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PatchSpec>,
    {
        self.patches.extend(patches.into_iter().map(Into::into));
        self
    }

    pub fn install_rule(mut self, rule: InstallRule) -> Self {
        self.install_rule = rule;
        self
    }

    pub fn sandbox(mut self, profile: SandboxProfile) -> Self {
        self.sandbox = profile;
        self
    }

    pub fn subdir(mut self, subdir: impl Into<PathBuf>) -> Self {
        self.subdir = Some(subdir.into());
        self
    }

    pub fn extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Validate and build the recipe
    ///
    /// Absolute patch locations must exist now; relative ones are checked
    /// against the run's patch directory when the pipeline starts.
    pub fn build(self) -> Result<BuildRecipe> {
        let build_system = self
            .build_system
            .ok_or_else(|| Error::InvalidRecipe("no build system set".to_string()))?;
        let fetcher = self
            .fetcher
            .ok_or_else(|| Error::InvalidRecipe("no fetcher set".to_string()))?;

        for patch in &self.patches {
            if patch.location.is_absolute() && !patch.location.exists() {
                return Err(Error::InvalidRecipe(format!(
                    "patch {} does not exist",
                    patch.location.display()
                )));
            }
        }

        if let Some(subdir) = &self.subdir
            && !subdir
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(Error::InvalidRecipe(format!(
                "subdir {} must be a relative path inside the source tree",
                subdir.display()
            )));
        }

        Ok(BuildRecipe {
            build_system,
            fetcher,
            options: self.options,
            patches: self.patches,
            install_rule: self.install_rule,
            sandbox: self.sandbox,
            subdir: self.subdir,
            extra_args: self.extra_args,
        })
    }
}
