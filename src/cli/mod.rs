// src/cli/mod.rs
//! CLI definitions for prebuilder
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations live in the `commands` module.

use clap::{ArgAction, Parser, Subcommand};
use prebuilder::sandbox::IsolationKind;
use std::path::PathBuf;

mod cache;

pub use cache::CacheCommands;

#[derive(Parser)]
#[command(name = "prebuilder")]
#[command(version)]
#[command(about = "Build upstream projects into distribution packages", long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (default: ./prebuilder.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipelines of a definitions set or file
    Run {
        /// Built-in set name or path to a TOML definitions file
        #[arg(default_value = "build-tools")]
        definitions: String,

        /// Only run these pipelines (comma separated or repeated)
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,

        /// Directory packages are written to
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Scratch directory for sources, builds and logs
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Directory relative patch locations are resolved against
        #[arg(long)]
        patch_dir: Option<PathBuf>,

        /// Parallel jobs per build (default: CPU count)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Pipelines to run concurrently
        #[arg(short, long)]
        parallel: Option<usize>,

        /// Package the targets of one pipeline concurrently
        #[arg(long)]
        parallel_targets: bool,

        /// Disable the build cache
        #[arg(long)]
        no_cache: bool,

        /// Command runner: direct, namespaces or firejail
        #[arg(long)]
        isolation: Option<IsolationKind>,

        /// Target machine architecture (default: host)
        #[arg(long)]
        arch: Option<String>,

        /// Attempts for transient fetch failures
        #[arg(long)]
        fetch_attempts: Option<u32>,

        /// Write a JSON run report to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// List the pipelines of a definitions set or file
    List {
        /// Built-in set name or path to a TOML definitions file
        #[arg(default_value = "build-tools")]
        definitions: String,
    },

    /// Build cache management
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}
