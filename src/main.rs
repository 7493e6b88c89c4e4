// src/main.rs

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{CacheCommands, Cli, Commands};

fn init_tracing(verbose: u8) {
    // -v wins over RUST_LOG; otherwise RUST_LOG, then info
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Run {
            definitions,
            only,
            output_dir,
            work_dir,
            patch_dir,
            jobs,
            parallel,
            parallel_targets,
            no_cache,
            isolation,
            arch,
            fetch_attempts,
            report,
        } => {
            let opts = commands::RunOptions {
                definitions,
                only,
                output_dir,
                work_dir,
                patch_dir,
                jobs,
                parallel,
                parallel_targets,
                no_cache,
                isolation,
                arch,
                fetch_attempts,
                report,
            };
            if !commands::cmd_run(config, opts)? {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::List { definitions } => commands::cmd_list(&definitions),
        Commands::Cache { command } => match command {
            CacheCommands::Stats => commands::cmd_cache_stats(config),
            CacheCommands::Clear => commands::cmd_cache_clear(config),
        },
    }
}
