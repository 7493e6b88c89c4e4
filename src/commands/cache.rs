// src/commands/cache.rs

//! Cache commands - inspect and clear the build cache

use super::{base_dir, load_config};
use anyhow::{Context, Result};
use prebuilder::cache::BuildCache;
use std::path::Path;
use std::time::SystemTime;

fn open_cache(config_path: Option<&Path>) -> Result<BuildCache> {
    let config = load_config(config_path, &base_dir()?)?;
    BuildCache::new(config.cache.config).context("Failed to open build cache")
}

fn age(time: Option<SystemTime>) -> String {
    time.and_then(|t| t.elapsed().ok())
        .map(|d| format!("{}h ago", d.as_secs() / 3600))
        .unwrap_or_else(|| "-".to_string())
}

/// Show cache statistics
pub fn cmd_cache_stats(config_path: Option<&Path>) -> Result<()> {
    let cache = open_cache(config_path)?;
    let stats = cache.stats().context("Failed to read cache statistics")?;

    println!("Cache directory: {}", cache.config().cache_dir.display());
    println!("Entries:         {}", stats.entry_count);
    println!(
        "Size:            {:.1} MiB of {:.1} MiB ({:.0}%)",
        stats.total_size as f64 / (1024.0 * 1024.0),
        stats.max_size as f64 / (1024.0 * 1024.0),
        stats.utilization()
    );
    println!("Oldest entry:    {}", age(stats.oldest));
    println!("Newest entry:    {}", age(stats.newest));
    Ok(())
}

/// Remove every cache entry
pub fn cmd_cache_clear(config_path: Option<&Path>) -> Result<()> {
    let cache = open_cache(config_path)?;
    let removed = cache.clear().context("Failed to clear build cache")?;
    println!("Removed {} cache entries", removed);
    Ok(())
}
