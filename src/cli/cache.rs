// src/cli/cache.rs
//! Build cache commands

use clap::Subcommand;

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show cache size and entry counts
    Stats,

    /// Remove every cached build tree
    Clear,
}
