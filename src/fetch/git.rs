// src/fetch/git.rs

//! Git repository fetcher

use super::{FetchedSource, Fetcher};
use crate::error::{Error, Result};
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{DescribeFormatOptions, DescribeOptions, ErrorClass, FetchOptions, Oid, Repository};
use std::path::Path;
use tracing::{debug, info};

/// Clones a git repository and checks out a branch, tag or commit
#[derive(Debug, Clone)]
pub struct GitFetcher {
    uri: String,
    refspec: Option<String>,
    submodules: bool,
}

impl GitFetcher {
    /// Fetch the remote's default branch
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            refspec: None,
            submodules: false,
        }
    }

    /// Pin a branch name, tag or commit id
    pub fn with_ref(mut self, refspec: impl Into<String>) -> Self {
        self.refspec = Some(refspec.into());
        self
    }

    /// Also check out submodules recursively
    pub fn with_submodules(mut self, enabled: bool) -> Self {
        self.submodules = enabled;
        self
    }

    fn error(&self, context: &str, e: git2::Error) -> Error {
        let transient = matches!(
            e.class(),
            ErrorClass::Net | ErrorClass::Ssl | ErrorClass::Ssh | ErrorClass::Http
        );
        Error::Fetch {
            locator: self.uri.clone(),
            reason: format!("{}: {}", context, e.message()),
            transient,
        }
    }

    /// Resolve the pinned reference to a commit id
    fn resolve(&self, repo: &Repository) -> Result<Oid> {
        let Some(refspec) = &self.refspec else {
            let head = repo.head().map_err(|e| self.error("repository has no HEAD", e))?;
            return head
                .peel_to_commit()
                .map(|c| c.id())
                .map_err(|e| self.error("HEAD is not a commit", e));
        };

        // Remote branches first, so "master" means origin's master
        let candidates = [
            format!("origin/{}", refspec),
            format!("refs/tags/{}", refspec),
            refspec.clone(),
        ];
        for candidate in &candidates {
            if let Ok(object) = repo.revparse_single(candidate)
                && let Ok(commit) = object.peel_to_commit()
            {
                debug!("Resolved {} to {}", candidate, commit.id());
                return Ok(commit.id());
            }
        }

        Err(Error::fetch(
            &self.uri,
            format!("cannot resolve reference '{}'", refspec),
        ))
    }

    fn update_submodules(&self, repo: &Repository) -> Result<()> {
        let submodules = repo
            .submodules()
            .map_err(|e| self.error("cannot list submodules", e))?;
        for mut submodule in submodules {
            debug!("Updating submodule {}", submodule.path().display());
            submodule
                .update(true, None)
                .map_err(|e| self.error("submodule update failed", e))?;
            let sub_repo = submodule
                .open()
                .map_err(|e| self.error("cannot open submodule", e))?;
            self.update_submodules(&sub_repo)?;
        }
        Ok(())
    }
}

impl Fetcher for GitFetcher {
    fn locator(&self) -> &str {
        &self.uri
    }

    fn refspec(&self) -> Option<&str> {
        self.refspec.as_deref()
    }

    fn fetch(&self, dest: &Path) -> Result<FetchedSource> {
        info!(
            "Cloning {} ({})",
            self.uri,
            self.refspec.as_deref().unwrap_or("default branch")
        );

        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(git2::RemoteCallbacks::new());
        fetch_options.download_tags(git2::AutotagOption::All);

        let repo = RepoBuilder::new()
            .fetch_options(fetch_options)
            .clone(&self.uri, dest)
            .map_err(|e| self.error("clone failed", e))?;

        let oid = self.resolve(&repo)?;
        let commit = repo
            .find_commit(oid)
            .map_err(|e| self.error("cannot load commit", e))?;

        repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))
            .map_err(|e| self.error("checkout failed", e))?;
        repo.set_head_detached(oid)
            .map_err(|e| self.error("cannot detach HEAD", e))?;

        if self.submodules {
            self.update_submodules(&repo)?;
        }

        let version_hint = commit
            .as_object()
            .describe(DescribeOptions::new().describe_tags())
            .and_then(|d| d.format(Some(&DescribeFormatOptions::new())))
            .ok();
        let timestamp = u64::try_from(commit.time().seconds()).ok();

        info!(
            "Fetched {} at {}{}",
            self.uri,
            oid,
            version_hint
                .as_deref()
                .map(|v| format!(" ({})", v))
                .unwrap_or_default()
        );

        Ok(FetchedSource {
            root: dest.to_path_buf(),
            revision: oid.to_string(),
            version_hint,
            timestamp,
        })
    }
}
