// src/fetch/mod.rs

//! Source fetchers
//!
//! A fetcher turns a (locator, reference) pair into a pinned source tree on
//! disk and reports exactly which revision it got. Fetch failures carry a
//! transient flag; [`RetryPolicy`] retries only those.

mod git;
mod local;

pub use git::GitFetcher;
pub use local::LocalFetcher;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// A fetched, pinned source tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedSource {
    /// Root of the source tree
    pub root: PathBuf,
    /// Resolved revision (commit id, content digest, ...)
    pub revision: String,
    /// Version suggested by the source, e.g. the nearest tag
    pub version_hint: Option<String>,
    /// Commit time in seconds since the epoch, when known
    pub timestamp: Option<u64>,
}

/// Obtains a pinned source tree for one project
pub trait Fetcher: Send + Sync {
    /// Where the source comes from (URI or path)
    fn locator(&self) -> &str;

    /// Which reference is fetched, if the fetcher has such a notion
    fn refspec(&self) -> Option<&str> {
        None
    }

    /// Fetch into `dest`, which exists and is empty
    fn fetch(&self, dest: &Path) -> Result<FetchedSource>;
}

/// How often transient fetch failures are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Pause between attempts, in seconds
    pub delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            delay_secs: 0,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay_secs: delay.as_secs(),
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    /// Fetch into `dest`, retrying transient failures
    ///
    /// `dest` is emptied before every retry.
    pub fn fetch(&self, fetcher: &dyn Fetcher, dest: &Path) -> Result<FetchedSource> {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;

        loop {
            match fetcher.fetch(dest) {
                Ok(source) => return Ok(source),
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(
                        "Fetch of {} failed (attempt {}/{}), retrying: {}",
                        fetcher.locator(),
                        attempt,
                        attempts,
                        e
                    );
                    reset_dir(dest)?;
                    if self.delay_secs > 0 {
                        thread::sleep(self.delay());
                    }
                    attempt += 1;
                    info!("Retrying fetch of {}", fetcher.locator());
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(|e| {
            Error::fetch(dir.display().to_string(), format!("cannot clean fetch directory: {}", e))
        })?;
    }
    fs::create_dir_all(dir)?;
    Ok(())
}
