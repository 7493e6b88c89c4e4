// src/fetch/local.rs

//! Fetcher for source trees already on disk

use super::{FetchedSource, Fetcher};
use crate::error::{Error, Result};
use crate::fsutil::{copy_dir_filtered, tree_digest};
use std::path::{Path, PathBuf};
use tracing::info;

/// Copies a local directory
///
/// The revision is a digest of the tree's paths and contents, so editing
/// any file yields a new revision. VCS metadata directories are skipped.
#[derive(Debug, Clone)]
pub struct LocalFetcher {
    path: PathBuf,
    locator: String,
    version: Option<String>,
}

impl LocalFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            locator: path.display().to_string(),
            path,
            version: None,
        }
    }

    /// Report a version hint for the copied tree
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

fn is_vcs_dir(rel: &Path) -> bool {
    matches!(
        rel.to_str(),
        Some(".git") | Some(".hg") | Some(".svn")
    )
}

impl Fetcher for LocalFetcher {
    fn locator(&self) -> &str {
        &self.locator
    }

    fn fetch(&self, dest: &Path) -> Result<FetchedSource> {
        if !self.path.is_dir() {
            return Err(Error::fetch(&self.locator, "not a directory"));
        }

        info!("Copying {}", self.path.display());
        copy_dir_filtered(&self.path, dest, is_vcs_dir)
            .map_err(|e| Error::fetch(&self.locator, format!("copy failed: {}", e)))?;
        let revision = tree_digest(dest, is_vcs_dir)
            .map_err(|e| Error::fetch(&self.locator, format!("cannot hash tree: {}", e)))?;

        Ok(FetchedSource {
            root: dest.to_path_buf(),
            revision,
            version_hint: self.version.clone(),
            timestamp: None,
        })
    }
}
