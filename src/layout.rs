// src/layout.rs

//! Platform install layout conventions
//!
//! The canonical directories packages install into. Install rules resolve
//! their destinations through a [`PlatformLayout`] instead of hard-coding
//! `/usr/...` so that distribution quirks (Debian's multiarch libdir, for
//! instance) live in one place.

use std::path::{Path, PathBuf};

/// Read-only set of GNU-style install directories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformLayout {
    prefix: PathBuf,
    bin: PathBuf,
    sbin: PathBuf,
    lib: PathBuf,
    libexec: PathBuf,
    include: PathBuf,
    share: PathBuf,
    doc: PathBuf,
    man: PathBuf,
    sysconf: PathBuf,
}

impl PlatformLayout {
    /// Standard layout under `prefix`
    pub fn with_prefix(prefix: impl Into<PathBuf>) -> Self {
        let prefix = prefix.into();
        let share = prefix.join("share");
        Self {
            bin: prefix.join("bin"),
            sbin: prefix.join("sbin"),
            lib: prefix.join("lib"),
            libexec: prefix.join("libexec"),
            include: prefix.join("include"),
            doc: share.join("doc"),
            man: share.join("man"),
            sysconf: PathBuf::from("/etc"),
            share,
            prefix,
        }
    }

    /// Replace the library directory (e.g. a multiarch triplet directory)
    pub fn with_lib(mut self, lib: impl Into<PathBuf>) -> Self {
        self.lib = lib.into();
        self
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn bin(&self) -> &Path {
        &self.bin
    }

    pub fn sbin(&self) -> &Path {
        &self.sbin
    }

    pub fn lib(&self) -> &Path {
        &self.lib
    }

    pub fn libexec(&self) -> &Path {
        &self.libexec
    }

    pub fn include(&self) -> &Path {
        &self.include
    }

    pub fn share(&self) -> &Path {
        &self.share
    }

    pub fn doc(&self) -> &Path {
        &self.doc
    }

    pub fn man(&self) -> &Path {
        &self.man
    }

    pub fn sysconf(&self) -> &Path {
        &self.sysconf
    }

    /// Documentation directory of one package
    pub fn doc_for(&self, package: &str) -> PathBuf {
        self.doc.join(package)
    }

    /// Look up a directory by its conventional name (`bin`, `lib`, ...)
    pub fn dir(&self, name: &str) -> Option<&Path> {
        let dir = match name {
            "prefix" => &self.prefix,
            "bin" => &self.bin,
            "sbin" => &self.sbin,
            "lib" => &self.lib,
            "libexec" => &self.libexec,
            "include" => &self.include,
            "share" => &self.share,
            "doc" => &self.doc,
            "man" => &self.man,
            "sysconf" => &self.sysconf,
            _ => return None,
        };
        Some(dir)
    }
}

impl Default for PlatformLayout {
    fn default() -> Self {
        Self::with_prefix("/usr")
    }
}

/// Debian multiarch triplet for a Debian architecture name
pub fn debian_multiarch(arch: &str) -> &'static str {
    match arch {
        "amd64" => "x86_64-linux-gnu",
        "arm64" => "aarch64-linux-gnu",
        "armhf" => "arm-linux-gnueabihf",
        "i386" => "i386-linux-gnu",
        "riscv64" => "riscv64-linux-gnu",
        "ppc64el" => "powerpc64le-linux-gnu",
        "s390x" => "s390x-linux-gnu",
        _ => "x86_64-linux-gnu",
    }
}
