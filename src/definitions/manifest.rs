// src/definitions/manifest.rs

//! TOML build definition files
//!
//! A definitions file declares reusable metadata templates and pipelines:
//!
//! ```toml
//! [templates.devtool]
//! section = "devel"
//! license = "MIT"
//!
//! [pipelines.kati]
//! build_system = "make"
//! source = { git = "https://github.com/google/kati", ref = "master" }
//! patches = ["kati"]
//! make = { kati = true }
//! sandbox = { apparmor = false }
//! install = [{ from = "ckati", to = "bin/ckati" }]
//!
//! [[pipelines.kati.targets]]
//! distribution = "debian"
//! name = "kati"
//! version = "0.0-git"
//! template = "devtool"
//! metadata = { description_short = "An experimental GNU make clone" }
//! ```
//!
//! The file as a whole must be valid TOML with well-formed templates.
//! Pipeline entries are only checked when their pipeline is constructed,
//! so one broken entry fails that pipeline alone.

use crate::build_system::{BuildOptions, BuildSystem, CMake, Make};
use crate::distro;
use crate::error::{Error, Result};
use crate::fetch::{Fetcher, GitFetcher, LocalFetcher};
use crate::package::{MetadataTemplate, PackageMetadata, PackageRef};
use crate::patch::PatchSpec;
use crate::pipeline::{BuildPipeline, Target};
use crate::recipe::BuildRecipe;
use crate::registry::PipelineRegistry;
use crate::sandbox::SandboxProfile;
use crate::staging::{CopyRule, InstallRule};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A parsed definitions file
#[derive(Debug, Clone)]
pub struct Manifest {
    templates: Arc<BTreeMap<String, MetadataTemplate>>,
    pipelines: BTreeMap<String, toml::Value>,
    /// Relative `path` sources are resolved against this directory
    base_dir: PathBuf,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    #[serde(default)]
    templates: BTreeMap<String, MetadataTemplate>,
    #[serde(default)]
    pipelines: BTreeMap<String, toml::Value>,
}

impl Manifest {
    /// Parse definitions from TOML text
    pub fn parse(content: &str, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let raw: RawManifest = toml::from_str(content)
            .map_err(|e| Error::Config(format!("invalid definitions: {}", e)))?;
        Ok(Self {
            templates: Arc::new(raw.templates),
            pipelines: raw.pipelines,
            base_dir: base_dir.into(),
        })
    }

    /// Load a definitions file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let base_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        Self::parse(&content, base_dir).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Pipeline names, sorted
    pub fn pipeline_names(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }

    /// Register one factory per pipeline entry
    pub fn register(&self, registry: &mut PipelineRegistry) -> Result<()> {
        for (name, value) in &self.pipelines {
            let name_owned = name.clone();
            let value = value.clone();
            let templates = Arc::clone(&self.templates);
            let base_dir = self.base_dir.clone();
            registry.register(name.clone(), move || {
                construct(&name_owned, &value, &templates, &base_dir)
            })?;
        }
        debug!("Registered {} pipelines from definitions", self.pipelines.len());
        Ok(())
    }

    /// Build a registry holding every pipeline of this file
    pub fn into_registry(self) -> Result<PipelineRegistry> {
        let mut registry = PipelineRegistry::new();
        self.register(&mut registry)?;
        Ok(registry)
    }
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum BuildSystemKind {
    Make,
    Cmake,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PipelineEntry {
    build_system: BuildSystemKind,
    source: SourceEntry,
    #[serde(default)]
    options: BuildOptions,
    #[serde(default)]
    patches: Vec<PatchEntry>,
    subdir: Option<PathBuf>,
    #[serde(default)]
    extra_args: Vec<String>,
    make: Option<MakeEntry>,
    cmake: Option<CMakeEntry>,
    #[serde(default)]
    sandbox: BTreeMap<String, bool>,
    /// Absent means the build system's own install step
    install: Option<Vec<CopyRule>>,
    #[serde(default)]
    targets: Vec<TargetEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceEntry {
    git: Option<String>,
    #[serde(rename = "ref")]
    refspec: Option<String>,
    #[serde(default)]
    submodules: bool,
    path: Option<PathBuf>,
    version: Option<String>,
}

/// A patch location, or a location with a strip count
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PatchEntry {
    Location(PathBuf),
    Spec(PatchSpec),
}

impl From<PatchEntry> for PatchSpec {
    fn from(entry: PatchEntry) -> Self {
        match entry {
            PatchEntry::Location(location) => PatchSpec::new(location),
            PatchEntry::Spec(spec) => spec,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct MakeEntry {
    kati: bool,
    configure_script: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CMakeEntry {
    generator: Option<String>,
    build_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetEntry {
    distribution: String,
    name: String,
    version: Option<String>,
    version_postfix: Option<u32>,
    template: Option<String>,
    #[serde(default)]
    metadata: MetadataTemplate,
}

fn invalid(pipeline: &str, reason: impl std::fmt::Display) -> Error {
    Error::InvalidRecipe(format!("pipeline '{}': {}", pipeline, reason))
}

fn construct(
    name: &str,
    value: &toml::Value,
    templates: &BTreeMap<String, MetadataTemplate>,
    base_dir: &Path,
) -> Result<BuildPipeline> {
    let entry: PipelineEntry = value.clone().try_into().map_err(|e| invalid(name, e))?;

    let mut builder = BuildRecipe::builder()
        .shared_build_system(build_system(name, &entry)?)
        .shared_fetcher(fetcher(name, &entry.source, base_dir)?)
        .options(entry.options)
        .patches(entry.patches)
        .extra_args(entry.extra_args)
        .install_rule(match entry.install {
            Some(rules) => InstallRule::Copy(rules),
            None => InstallRule::BuildSystem,
        });

    let mut profile = SandboxProfile::default();
    for (toggle, enabled) in &entry.sandbox {
        profile = profile.toggle(toggle, *enabled)?;
    }
    builder = builder.sandbox(profile);

    if let Some(subdir) = entry.subdir {
        builder = builder.subdir(subdir);
    }
    let recipe = builder.build()?;

    let targets = entry
        .targets
        .into_iter()
        .map(|t| target(name, t, templates))
        .collect::<Result<Vec<_>>>()?;

    BuildPipeline::new(recipe, targets)
}

fn build_system(name: &str, entry: &PipelineEntry) -> Result<Arc<dyn BuildSystem>> {
    match entry.build_system {
        BuildSystemKind::Make => {
            if entry.cmake.is_some() {
                return Err(invalid(name, "cmake settings on a make pipeline"));
            }
            let settings = entry.make.as_ref();
            let mut make = Make::new().with_kati(settings.is_some_and(|m| m.kati));
            if let Some(script) = settings.and_then(|m| m.configure_script.as_deref()) {
                make = make.with_configure_script(script);
            }
            Ok(Arc::new(make))
        }
        BuildSystemKind::Cmake => {
            if entry.make.is_some() {
                return Err(invalid(name, "make settings on a cmake pipeline"));
            }
            let mut cmake = CMake::new();
            if let Some(settings) = &entry.cmake {
                if let Some(generator) = &settings.generator {
                    cmake = cmake.with_generator(generator.as_str());
                }
                if let Some(build_type) = &settings.build_type {
                    cmake = cmake.with_build_type(build_type.as_str());
                }
            }
            Ok(Arc::new(cmake))
        }
    }
}

fn fetcher(name: &str, source: &SourceEntry, base_dir: &Path) -> Result<Arc<dyn Fetcher>> {
    match (&source.git, &source.path) {
        (Some(uri), None) => {
            if source.version.is_some() {
                return Err(invalid(name, "'version' only applies to path sources"));
            }
            let mut git = GitFetcher::new(uri.as_str()).with_submodules(source.submodules);
            if let Some(refspec) = &source.refspec {
                git = git.with_ref(refspec.as_str());
            }
            Ok(Arc::new(git))
        }
        (None, Some(path)) => {
            if source.refspec.is_some() || source.submodules {
                return Err(invalid(name, "'ref' and 'submodules' only apply to git sources"));
            }
            let mut local = LocalFetcher::new(base_dir.join(path));
            if let Some(version) = &source.version {
                local = local.with_version(version.as_str());
            }
            Ok(Arc::new(local))
        }
        _ => Err(invalid(name, "source needs exactly one of 'git' or 'path'")),
    }
}

fn target(
    pipeline: &str,
    entry: TargetEntry,
    templates: &BTreeMap<String, MetadataTemplate>,
) -> Result<Target> {
    let distribution = distro::by_name(&entry.distribution)?;

    let template = match &entry.template {
        Some(t) => templates
            .get(t)
            .ok_or_else(|| invalid(pipeline, format!("unknown template '{}'", t)))?
            .overlay(&entry.metadata),
        None => entry.metadata,
    };

    let mut package = PackageRef::new(entry.name);
    if let Some(version) = entry.version {
        package = package.with_version(version);
    }
    if let Some(postfix) = entry.version_postfix {
        package = package.with_postfix(postfix);
    }

    Ok(Target::new(
        distribution,
        PackageMetadata::from_template(package, &template)?,
    ))
}
