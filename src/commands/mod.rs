// src/commands/mod.rs
//! Command handlers for the prebuilder CLI

mod cache;
mod list;
mod run;

pub use cache::{cmd_cache_clear, cmd_cache_stats};
pub use list::cmd_list;
pub use run::{cmd_run, RunOptions};

use anyhow::{Context, Result};
use prebuilder::config::Config;
use std::path::{Path, PathBuf};

/// Directory relative configuration paths are resolved against
fn base_dir() -> Result<PathBuf> {
    std::env::current_dir().context("Cannot determine the current directory")
}

/// Load the configuration file given on the command line, or discover one
fn load_config(path: Option<&Path>, base: &Path) -> Result<Config> {
    Config::discover(path, base).context("Failed to load configuration")
}
