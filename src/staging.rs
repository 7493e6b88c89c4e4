// src/staging.rs

//! Staging directories and install rules
//!
//! After the build, each packaging target gets a fresh, empty staging
//! directory standing in for the target system's root. The recipe's
//! [`InstallRule`] fills it from the source and build directories; the
//! distribution backend then archives it.

use crate::error::{Error, Result};
use crate::fsutil::{copy_dir_all, copy_entry};
use crate::layout::PlatformLayout;
use crate::package::PackageMetadata;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::debug;
use walkdir::WalkDir;

/// Prefix marking a copy source as relative to the build directory
pub const BUILD_DIR_PREFIX: &str = "@build/";

/// A package root under construction
///
/// Removed from disk when dropped, including on unwind.
#[derive(Debug)]
pub struct StagingPackage {
    dir: TempDir,
}

impl StagingPackage {
    /// Create an empty staging directory below `parent`
    pub fn new_in(parent: &Path) -> Result<Self> {
        fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new().prefix("stage-").tempdir_in(parent)?;
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Map an absolute target-system path into the staging root
    pub fn nest(&self, path: impl AsRef<Path>) -> PathBuf {
        let relative: PathBuf = path
            .as_ref()
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        self.root().join(relative)
    }

    /// Whether nothing but directories has been staged
    pub fn is_empty(&self) -> bool {
        !WalkDir::new(self.root())
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .any(|e| !e.file_type().is_dir())
    }
}

/// Copy a file or directory tree for an install rule
///
/// A file is copied to `dst` itself; a directory's contents are copied
/// recursively into `dst`. Parent directories are created as needed.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(src).map_err(|_| Error::InstallRule {
        target: String::new(),
        reason: format!("{} does not exist", src.display()),
    })?;

    let copied = if meta.is_dir() {
        copy_dir_all(src, dst)
    } else {
        copy_entry(src, dst, meta.file_type())
    };
    copied.map_err(|e| Error::InstallRule {
        target: String::new(),
        reason: format!("copying {} to {}: {}", src.display(), dst.display(), e),
    })?;

    debug!("Staged {} -> {}", src.display(), dst.display());
    Ok(())
}

/// One declarative copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyRule {
    /// Path relative to the source directory, or to the build directory
    /// when prefixed with `@build/`
    pub from: String,
    /// Destination; relative paths are under the layout prefix
    pub to: PathBuf,
}

impl CopyRule {
    pub fn new(from: impl Into<String>, to: impl Into<PathBuf>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    fn apply(&self, ctx: &InstallContext<'_>) -> Result<()> {
        let src = match self.from.strip_prefix(BUILD_DIR_PREFIX) {
            Some(rest) => ctx.build_dir.join(rest),
            None => ctx.source_dir.join(&self.from),
        };
        let dst = if self.to.is_absolute() {
            ctx.package.nest(&self.to)
        } else {
            ctx.package.nest(ctx.layout.prefix().join(&self.to))
        };
        copy_tree(&src, &dst)
    }
}

/// Callback signature of custom install rules
pub type InstallFn = dyn Fn(&InstallContext<'_>) -> Result<()> + Send + Sync;

/// What an install rule gets to work with
pub struct InstallContext<'a> {
    /// Project directory (fetched tree plus the recipe's subdir)
    pub source_dir: &'a Path,
    pub build_dir: &'a Path,
    pub package: &'a StagingPackage,
    /// Package being staged, for rules that differ per target
    pub metadata: &'a PackageMetadata,
    pub layout: &'a PlatformLayout,
    pub(crate) build_system_install: &'a (dyn Fn(&Path) -> Result<()> + 'a),
}

impl InstallContext<'_> {
    /// Run the build system's own install step into the staging root
    pub fn build_system_install(&self) -> Result<()> {
        (self.build_system_install)(self.package.root())
    }
}

/// How build outputs are staged into a package
#[derive(Clone, Default)]
pub enum InstallRule {
    /// `make install`, `cmake --install`, ... with DESTDIR set to the staging root
    #[default]
    BuildSystem,
    /// Declarative copies, applied in order
    Copy(Vec<CopyRule>),
    /// Arbitrary callback
    Custom(Arc<InstallFn>),
}

impl InstallRule {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&InstallContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        InstallRule::Custom(Arc::new(f))
    }

    /// Whether staging runs the build system inside the shared build tree
    pub fn uses_build_tree(&self) -> bool {
        matches!(self, InstallRule::BuildSystem)
    }

    /// Stage into `ctx.package`
    pub fn apply(&self, ctx: &InstallContext<'_>) -> Result<()> {
        match self {
            InstallRule::BuildSystem => ctx.build_system_install(),
            InstallRule::Copy(rules) => rules.iter().try_for_each(|rule| rule.apply(ctx)),
            InstallRule::Custom(f) => f(ctx),
        }
    }

    /// Stable description for fingerprints and logs
    pub fn describe(&self) -> String {
        match self {
            InstallRule::BuildSystem => "build-system".to_string(),
            InstallRule::Copy(rules) => rules
                .iter()
                .map(|r| format!("{}->{}", r.from, r.to.display()))
                .collect::<Vec<_>>()
                .join(","),
            InstallRule::Custom(_) => "custom".to_string(),
        }
    }
}

impl fmt::Debug for InstallRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallRule::BuildSystem => f.write_str("BuildSystem"),
            InstallRule::Copy(rules) => f.debug_tuple("Copy").field(rules).finish(),
            InstallRule::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
