// src/distro/mod.rs

//! Distribution packaging backends
//!
//! A [`Distribution`] knows the layout conventions of one Linux
//! distribution family and how to turn a staged package root plus
//! [`PackageMetadata`] into an installable artifact. The set of
//! distributions is closed in the sense that definitions refer to them by
//! name ([`by_name`]), and open to library users who implement the trait.

mod arch;
pub mod archive;
mod debian;

pub use arch::Arch;
pub use debian::Debian;

use crate::error::{Error, Result};
use crate::layout::PlatformLayout;
use crate::package::{PackageMetadata, ResolvedVersion};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Fallback maintainer identity for generated packages
pub const DEFAULT_MAINTAINER: &str = "prebuilder <prebuilder@localhost>";

/// Inputs to a packaging backend besides the staged tree and metadata
#[derive(Debug, Clone)]
pub struct PackagingEnv {
    /// Directory the artifact is written to
    pub output_dir: PathBuf,
    /// Resolved upstream version and release
    pub version: ResolvedVersion,
    /// Machine architecture, e.g. `x86_64`
    pub arch: String,
    /// `Name <email>` of the packager
    pub maintainer: String,
    /// Modification time for every archive member and the build date
    pub timestamp: u64,
}

/// A packaging target family
pub trait Distribution: Send + Sync {
    /// Short name used for output subdirectories and definitions
    fn name(&self) -> &str;

    /// Install layout for the given machine architecture
    fn layout(&self, arch: &str) -> PlatformLayout {
        let _ = arch;
        PlatformLayout::default()
    }

    /// Package the staged tree, returning the artifact path
    fn package(&self, staging: &Path, metadata: &PackageMetadata, env: &PackagingEnv) -> Result<PathBuf>;
}

/// Look up a built-in distribution by name
pub fn by_name(name: &str) -> Result<Arc<dyn Distribution>> {
    match name {
        "debian" | "deb" => Ok(Arc::new(Debian)),
        "arch" | "archlinux" => Ok(Arc::new(Arch)),
        _ => Err(Error::InvalidRecipe(format!(
            "unknown distribution '{}' (expected debian or arch)",
            name
        ))),
    }
}

/// Map a machine architecture to a packaging format's name for it
pub fn arch_for_format(arch: &str, format: &str) -> String {
    match format {
        "deb" => match arch {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "i686" | "i386" => "i386",
            "armv7l" | "armhf" => "armhf",
            "powerpc64le" => "ppc64el",
            _ => arch,
        },
        "arch" => match arch {
            "amd64" => "x86_64",
            "arm64" => "aarch64",
            _ => arch,
        },
        _ => arch,
    }
    .to_string()
}

/// Replace characters a version syntax does not allow
pub(crate) fn sanitize_version(version: &str, allowed: impl Fn(char) -> bool, replacement: char) -> String {
    version
        .chars()
        .map(|c| if allowed(c) { c } else { replacement })
        .collect()
}

pub(crate) fn packaging_error(distro: &str, metadata: &PackageMetadata, e: Error) -> Error {
    match e {
        Error::Packaging { .. } => e,
        other => Error::Packaging {
            target: format!("{}/{}", distro, metadata.name()),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_mapping() {
        assert_eq!(arch_for_format("x86_64", "deb"), "amd64");
        assert_eq!(arch_for_format("aarch64", "deb"), "arm64");
        assert_eq!(arch_for_format("amd64", "arch"), "x86_64");
        assert_eq!(arch_for_format("riscv64", "deb"), "riscv64");
    }

    #[test]
    fn test_by_name() {
        assert_eq!(by_name("debian").unwrap().name(), "debian");
        assert_eq!(by_name("arch").unwrap().name(), "arch");
        assert!(by_name("gentoo").is_err());
    }

    #[test]
    fn test_sanitize_version() {
        let v = sanitize_version("1.2_rc1", |c| c != '_', '~');
        assert_eq!(v, "1.2~rc1");
    }
}
