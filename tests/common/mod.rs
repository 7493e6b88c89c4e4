// tests/common/mod.rs

//! Shared test utilities for integration tests.
//!
//! Pipelines run against in-process fakes: a fetcher that writes a tiny
//! source tree and a build system that "compiles" it into `out/bin/tool`,
//! so no network access or native toolchain is needed.

#![allow(dead_code)]

use prebuilder::build_system::{BuildEnv, BuildOptions, BuildSystem};
use prebuilder::cache::{BuildCache, CacheConfig};
use prebuilder::fetch::{FetchedSource, Fetcher};
use prebuilder::sandbox::IsolationKind;
use prebuilder::staging::{CopyRule, InstallRule};
use prebuilder::{BuildRecipe, Error, Result, RunContext};
use std::fs::{self, File};
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Commit time reported by the fake fetcher
pub const TIMESTAMP: u64 = 1_700_000_000;

pub const MAIN_C: &str = "int main(void) { return 0; }\n";

/// Patch turning the exit code of main.c into 1
pub const FIX_PATCH: &str = "--- a/main.c\n+++ b/main.c\n@@ -1 +1 @@\n\
                             -int main(void) { return 0; }\n\
                             +int main(void) { return 1; }\n";

#[derive(Debug, Clone, Copy)]
enum Behavior {
    Succeed,
    /// The reference does not exist upstream (permanent)
    Unresolvable,
    /// The first `n` attempts hit a network error (transient)
    Flaky(usize),
}

/// In-process fetcher writing a fixed source tree
#[derive(Debug, Clone)]
pub struct FakeFetcher {
    locator: String,
    behavior: Behavior,
    attempts: Arc<AtomicUsize>,
}

impl FakeFetcher {
    pub fn new(locator: &str) -> Self {
        Self {
            locator: locator.to_string(),
            behavior: Behavior::Succeed,
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn unresolvable(locator: &str) -> Self {
        Self {
            behavior: Behavior::Unresolvable,
            ..Self::new(locator)
        }
    }

    pub fn flaky(locator: &str, failures: usize) -> Self {
        Self {
            behavior: Behavior::Flaky(failures),
            ..Self::new(locator)
        }
    }

    /// Shared counter of fetch attempts
    pub fn attempts(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.attempts)
    }
}

impl Fetcher for FakeFetcher {
    fn locator(&self) -> &str {
        &self.locator
    }

    fn refspec(&self) -> Option<&str> {
        Some("main")
    }

    fn fetch(&self, dest: &Path) -> Result<FetchedSource> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        match self.behavior {
            Behavior::Unresolvable => {
                return Err(Error::fetch(
                    &self.locator,
                    "cannot resolve reference 'no-such-branch'",
                ));
            }
            Behavior::Flaky(failures) if attempt <= failures => {
                return Err(Error::Fetch {
                    locator: self.locator.clone(),
                    reason: "connection reset by peer".to_string(),
                    transient: true,
                });
            }
            _ => {}
        }

        fs::write(dest.join("main.c"), MAIN_C)?;
        fs::write(dest.join("README"), "A tool.\n")?;

        Ok(FetchedSource {
            root: dest.to_path_buf(),
            revision: "0123456789abcdef".to_string(),
            version_hint: Some("1.2.0".to_string()),
            timestamp: Some(TIMESTAMP),
        })
    }
}

/// In-tree build system producing `out/bin/tool`
#[derive(Debug, Clone, Default)]
pub struct FakeBuildSystem {
    builds: Arc<AtomicUsize>,
    fail: bool,
    absolute_install: bool,
}

impl FakeBuildSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// A build system whose build step always fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// A build system whose configure step records the absolute path of
    /// the built tool and whose install step copies from that path, the way
    /// generated CMake and autotools install scripts do
    pub fn absolute_install() -> Self {
        Self {
            absolute_install: true,
            ..Self::default()
        }
    }

    /// Shared counter of build step runs
    pub fn builds(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.builds)
    }
}

impl BuildSystem for FakeBuildSystem {
    fn name(&self) -> &str {
        "fake"
    }

    fn in_tree(&self) -> bool {
        true
    }

    fn configure(&self, env: &BuildEnv<'_>, _options: &BuildOptions) -> Result<()> {
        if !env.source_dir.join("main.c").is_file() {
            return Err(Error::build("configure", "main.c not found"));
        }
        if self.absolute_install {
            let tool = env.build_dir.join("out/bin/tool");
            fs::write(env.build_dir.join("install.path"), tool.display().to_string())?;
        }
        Ok(())
    }

    fn build(&self, env: &BuildEnv<'_>, _extra_args: &[String]) -> Result<()> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::build("build", "cc exited with status 1"));
        }

        let source = fs::read_to_string(env.source_dir.join("main.c"))?;
        let bin_dir = env.build_dir.join("out/bin");
        fs::create_dir_all(&bin_dir)?;
        let tool = bin_dir.join("tool");
        fs::write(&tool, format!("#!/bin/sh\n# built from: {}", source))?;
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755))?;
        Ok(())
    }

    fn install(&self, env: &BuildEnv<'_>, dest: &Path) -> Result<()> {
        let bin_dir = dest.join("usr/bin");
        fs::create_dir_all(&bin_dir)?;
        let tool: PathBuf = if self.absolute_install {
            fs::read_to_string(env.build_dir.join("install.path"))?.into()
        } else {
            env.build_dir.join("out/bin/tool")
        };
        fs::copy(&tool, bin_dir.join("tool")).map_err(|e| {
            Error::build("install", format!("cannot copy {}: {}", tool.display(), e))
        })?;
        Ok(())
    }
}

/// Install rule copying the built tool to `<prefix>/bin/tool`
pub fn copy_tool_rule() -> InstallRule {
    InstallRule::Copy(vec![CopyRule::new("out/bin/tool", "bin/tool")])
}

/// Recipe for the fake project
pub fn tool_recipe(fetcher: FakeFetcher, system: FakeBuildSystem) -> BuildRecipe {
    BuildRecipe::builder()
        .build_system(system)
        .fetcher(fetcher)
        .install_rule(copy_tool_rule())
        .build()
        .unwrap()
}

/// Run context below `base`, without cache
pub fn context(base: &Path) -> RunContext {
    RunContext::new(base)
        .with_runner(IsolationKind::Direct.runner())
        .with_jobs(1)
        .with_arch("x86_64")
}

/// Run context below `base` with a build cache in `cache_dir`
pub fn cached_context(base: &Path, cache_dir: &Path) -> (RunContext, Arc<BuildCache>) {
    let cache = Arc::new(
        BuildCache::new(CacheConfig {
            cache_dir: cache_dir.to_path_buf(),
            ..Default::default()
        })
        .unwrap(),
    );
    (context(base).with_cache(Arc::clone(&cache)), cache)
}

/// Member paths of a tar stream, without leading `./`
fn tar_paths<R: Read>(reader: R) -> Vec<String> {
    let mut archive = tar::Archive::new(reader);
    archive
        .entries()
        .unwrap()
        .map(|e| {
            let entry = e.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            path.trim_start_matches("./").to_string()
        })
        .collect()
}

/// Paths in the data archive of a `.deb`
pub fn deb_paths(path: &Path) -> Vec<String> {
    let mut archive = ar::Archive::new(File::open(path).unwrap());
    while let Some(entry) = archive.next_entry() {
        let entry = entry.unwrap();
        if entry.header().identifier() == b"data.tar.gz" {
            return tar_paths(flate2::read::GzDecoder::new(entry));
        }
    }
    panic!("{} has no data.tar.gz", path.display());
}

/// Paths in an Arch `.pkg.tar.zst`
pub fn arch_paths(path: &Path) -> Vec<String> {
    tar_paths(zstd::stream::read::Decoder::new(File::open(path).unwrap()).unwrap())
}

/// Every file below `dir`, recursively
pub fn files_below(dir: &Path) -> Vec<PathBuf> {
    if !dir.exists() {
        return Vec::new();
    }
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}
