// src/cache.rs

//! Build tree caching
//!
//! Caches the configured and built tree of a pipeline based on a hash of:
//! - Source locator
//! - Resolved source revision
//! - Recipe option fingerprint (build system, options, patches, subdir)
//!
//! This allows skipping patching and building when nothing has changed.
//! Entries are zstd-compressed tarballs sharded by the first two key
//! characters, with a small metadata file next to each.

use crate::error::{Error, Result};
use crate::hash::Fingerprint;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const ENTRY_EXTENSION: &str = "tar.zst";
const ZSTD_LEVEL: i32 = 3;
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Location and limits of the build cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory for cached trees
    pub cache_dir: PathBuf,
    /// Size bound in bytes, enforced after each store (0 disables eviction)
    pub max_size: u64,
    /// Entries older than this are discarded on lookup (0 disables expiry)
    #[serde(with = "crate::sandbox::duration_secs")]
    pub max_age: Duration,
    /// Whether to verify cached entries before use
    pub verify_integrity: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("prebuilder/builds"),
            max_size: 10 * 1024 * 1024 * 1024, // 10 GB
            max_age: Duration::from_secs(30 * 24 * 60 * 60), // 30 days
            verify_integrity: true,
        }
    }
}

/// A cached built tree
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Path to the compressed tree
    pub archive_path: PathBuf,
    pub cache_key: String,
    pub created: SystemTime,
    pub size: u64,
}

/// Build cache
#[derive(Debug)]
pub struct BuildCache {
    config: CacheConfig,
}

impl BuildCache {
    /// Create a cache, creating its directory if needed
    pub fn new(config: CacheConfig) -> Result<Self> {
        fs::create_dir_all(&config.cache_dir).map_err(|e| {
            Error::Cache(format!(
                "cannot create cache directory {}: {}",
                config.cache_dir.display(),
                e
            ))
        })?;
        Ok(Self { config })
    }

    /// Create a cache with default configuration
    pub fn with_defaults() -> Result<Self> {
        Self::new(CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Key for a source revision built with a given option fingerprint
    pub fn cache_key(locator: &str, revision: &str, fingerprint: &str) -> String {
        let mut fp = Fingerprint::new();
        fp.field("locator", locator)
            .field("revision", revision)
            .field("options", fingerprint);
        fp.finish()
    }

    /// Archive path of `key`
    fn cache_path(&self, key: &str) -> PathBuf {
        self.shard_dir(key).join(format!("{}.{}", key, ENTRY_EXTENSION))
    }

    /// Metadata path of `key`
    fn metadata_path(&self, key: &str) -> PathBuf {
        self.shard_dir(key).join(format!("{}.meta", key))
    }

    fn shard_dir(&self, key: &str) -> PathBuf {
        // Shard by the first two key characters
        let shard = key.get(..2).unwrap_or("00");
        self.config.cache_dir.join(shard)
    }

    fn remove_entry(&self, key: &str) {
        let _ = fs::remove_file(self.cache_path(key));
        let _ = fs::remove_file(self.metadata_path(key));
    }

    /// Look up a cached tree by key
    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let cache_path = self.cache_path(key);
        let short = short_key(key);

        let metadata = match fs::metadata(&cache_path) {
            Ok(metadata) => metadata,
            Err(_) => {
                debug!("Cache miss: {}", short);
                return Ok(None);
            }
        };
        let created = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let size = metadata.len();

        // A zero max_age disables expiry
        if !self.config.max_age.is_zero() {
            let age = SystemTime::now()
                .duration_since(created)
                .unwrap_or(Duration::ZERO);
            if age > self.config.max_age {
                debug!("Cache expired: {} (age: {:?})", short, age);
                self.remove_entry(key);
                return Ok(None);
            }
        }

        if self.config.verify_integrity && !verify_entry(&cache_path) {
            warn!("Cache corruption detected: {}", short);
            self.remove_entry(key);
            return Ok(None);
        }

        info!("Cache hit: {} ({} bytes)", short, size);

        Ok(Some(CacheEntry {
            archive_path: cache_path,
            cache_key: key.to_string(),
            created,
            size,
        }))
    }

    /// Unpack a cached tree into `dest`, which must not exist yet
    pub fn restore(&self, entry: &CacheEntry, dest: &Path) -> Result<()> {
        let unpack = || -> std::io::Result<()> {
            fs::create_dir_all(dest)?;
            let decoder = zstd::stream::read::Decoder::new(File::open(&entry.archive_path)?)?;
            let mut archive = tar::Archive::new(decoder);
            archive.set_preserve_permissions(true);
            archive.set_preserve_mtime(true);
            archive.unpack(dest)
        };

        unpack().map_err(|e| {
            // A tree that cannot be unpacked is as good as absent
            self.remove_entry(&entry.cache_key);
            Error::Cache(format!(
                "restoring {} failed: {}",
                short_key(&entry.cache_key),
                e
            ))
        })?;

        // Touch so LRU eviction sees the entry as recently used
        if let Ok(file) = File::options().append(true).open(&entry.archive_path) {
            let _ = file.set_modified(SystemTime::now());
        }
        Ok(())
    }

    /// Store the tree rooted at `tree` under `key`
    ///
    /// `label` is recorded in the metadata file for humans.
    pub fn put(&self, key: &str, tree: &Path, label: &str) -> Result<CacheEntry> {
        let cache_path = self.cache_path(key);
        let shard = self.shard_dir(key);
        fs::create_dir_all(&shard)?;

        // Write to a temporary file then rename, so concurrent writers of
        // one key each publish a complete entry.
        let mut tmp = NamedTempFile::new_in(&shard)?;
        {
            let encoder = zstd::stream::write::Encoder::new(tmp.as_file_mut(), ZSTD_LEVEL)?;
            let mut builder = tar::Builder::new(encoder);
            builder.follow_symlinks(false);
            builder.append_dir_all(".", tree)?;
            builder.into_inner()?.finish()?;
        }
        tmp.persist(&cache_path).map_err(|e| Error::Cache(e.to_string()))?;

        let metadata = format!("label={}\nkey={}\n", label, key);
        fs::write(self.metadata_path(key), metadata)?;

        let file_metadata = fs::metadata(&cache_path)?;
        let created = file_metadata.modified().unwrap_or(SystemTime::now());
        let size = file_metadata.len();

        info!("Cached: {} as {} ({} bytes)", label, short_key(key), size);

        self.enforce_limits()?;

        Ok(CacheEntry {
            archive_path: cache_path,
            cache_key: key.to_string(),
            created,
            size,
        })
    }

    /// All entries with their modification time and size
    fn entries(&self) -> Result<Vec<(PathBuf, SystemTime, u64)>> {
        let mut entries = Vec::new();

        for shard_entry in fs::read_dir(&self.config.cache_dir)? {
            let shard_entry = shard_entry?;
            if !shard_entry.file_type()?.is_dir() {
                continue;
            }

            for file_entry in fs::read_dir(shard_entry.path())? {
                let path = file_entry?.path();
                let is_entry = path
                    .file_name()
                    .is_some_and(|n| n.to_string_lossy().ends_with(ENTRY_EXTENSION));
                if is_entry && let Ok(metadata) = fs::metadata(&path) {
                    let mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                    entries.push((path, mtime, metadata.len()));
                }
            }
        }

        Ok(entries)
    }

    /// Remove least recently written entries until the cache fits `max_size`
    fn enforce_limits(&self) -> Result<()> {
        if self.config.max_size == 0 {
            return Ok(());
        }

        let mut entries = self.entries()?;
        let mut total_size: u64 = entries.iter().map(|(_, _, size)| size).sum();
        if total_size <= self.config.max_size {
            return Ok(());
        }

        // Oldest first
        entries.sort_by_key(|(_, mtime, _)| *mtime);

        for (path, _, size) in entries {
            if total_size <= self.config.max_size {
                break;
            }

            debug!("Evicting {} ({} bytes)", path.display(), size);
            let _ = fs::remove_file(&path);
            let _ = fs::remove_file(meta_path_for(&path));
            total_size = total_size.saturating_sub(size);
        }

        Ok(())
    }

    /// Clear all cached trees, returning the number of entries removed
    pub fn clear(&self) -> Result<u64> {
        let entries = self.entries()?;
        let removed = entries.len() as u64;

        for entry in fs::read_dir(&self.config.cache_dir)? {
            let path = entry?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            }
        }

        info!("Cleared {} cache entries", removed);
        Ok(removed)
    }

    /// Get cache statistics
    pub fn stats(&self) -> Result<CacheStats> {
        let entries = self.entries()?;

        Ok(CacheStats {
            total_size: entries.iter().map(|(_, _, size)| size).sum(),
            entry_count: entries.len() as u64,
            max_size: self.config.max_size,
            oldest: entries.iter().map(|(_, mtime, _)| *mtime).min(),
            newest: entries.iter().map(|(_, mtime, _)| *mtime).max(),
        })
    }
}

/// Empty or unreadable entries fail verification
fn verify_entry(path: &Path) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    if metadata.len() == 0 {
        return false;
    }

    let mut magic = [0u8; 4];
    File::open(path)
        .and_then(|mut file| file.read_exact(&mut magic))
        .is_ok_and(|_| magic == ZSTD_MAGIC)
}

fn meta_path_for(entry: &Path) -> PathBuf {
    let name = entry
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let key = name.trim_end_matches(ENTRY_EXTENSION).trim_end_matches('.');
    entry.with_file_name(format!("{}.meta", key))
}

fn short_key(key: &str) -> &str {
    key.get(..16).unwrap_or(key)
}

/// Cache statistics
#[derive(Debug)]
pub struct CacheStats {
    /// Total size of cached trees in bytes
    pub total_size: u64,
    /// Cached trees
    pub entry_count: u64,
    /// Configured size bound
    pub max_size: u64,
    /// Oldest cache entry
    pub oldest: Option<SystemTime>,
    /// Newest cache entry
    pub newest: Option<SystemTime>,
}

impl CacheStats {
    /// Share of `max_size` in use, in percent
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            (self.total_size as f64 / self.max_size as f64) * 100.0
        }
    }
}
