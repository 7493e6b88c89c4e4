// src/distro/arch.rs
//! Arch Linux package backend
//!
//! Arch packages are zstd-compressed tarballs containing:
//! - .PKGINFO: package metadata
//! - Actual files at their install paths

use super::archive::{append_bytes, append_tree, write_atomically};
use super::{Distribution, PackagingEnv, arch_for_format, packaging_error, sanitize_version};
use crate::error::Result;
use crate::fsutil::dir_size;
use crate::package::{PackageMetadata, ResolvedVersion};
use std::path::{Path, PathBuf};
use tar::Builder as TarBuilder;
use tracing::info;

/// zstd level used for package payloads
const ZSTD_LEVEL: i32 = 19;

/// Arch Linux and derivatives
#[derive(Debug, Clone, Copy, Default)]
pub struct Arch;

impl Arch {
    /// `pkgver-pkgrel`
    ///
    /// pkgver may not contain `-` or `:`; pkgrel counts from 1, so release
    /// 0 maps to pkgrel 1.
    pub fn version_string(version: &ResolvedVersion) -> String {
        let pkgver = sanitize_version(&version.upstream, |c| !matches!(c, '-' | ':' | '/'), '_');
        format!("{}-{}", pkgver, version.release + 1)
    }

    /// `name-pkgver-pkgrel-arch.pkg.tar.zst`
    pub fn file_name(metadata: &PackageMetadata, env: &PackagingEnv) -> String {
        format!(
            "{}-{}-{}.pkg.tar.zst",
            metadata.name(),
            Self::version_string(&env.version),
            arch_for_format(&env.arch, "arch")
        )
    }

    /// Render .PKGINFO
    pub fn pkginfo(metadata: &PackageMetadata, env: &PackagingEnv, installed_size: u64) -> String {
        let mut pkginfo = String::new();
        pkginfo.push_str(&format!("pkgname = {}\n", metadata.name()));
        pkginfo.push_str(&format!("pkgbase = {}\n", metadata.name()));
        pkginfo.push_str(&format!("pkgver = {}\n", Self::version_string(&env.version)));
        pkginfo.push_str(&format!("pkgdesc = {}\n", metadata.description_short()));
        if let Some(url) = metadata.homepage() {
            pkginfo.push_str(&format!("url = {}\n", url));
        }
        pkginfo.push_str(&format!("builddate = {}\n", env.timestamp));
        pkginfo.push_str(&format!("packager = {}\n", env.maintainer));
        pkginfo.push_str(&format!("size = {}\n", installed_size));
        pkginfo.push_str(&format!("arch = {}\n", arch_for_format(&env.arch, "arch")));
        if let Some(license) = metadata.license() {
            pkginfo.push_str(&format!("license = {}\n", license));
        }

        for dep in metadata.depends() {
            match dep.version() {
                Some(ver) => pkginfo.push_str(&format!("depend = {}>={}\n", dep.name(), ver)),
                None => pkginfo.push_str(&format!("depend = {}\n", dep.name())),
            }
        }
        for dep in metadata.recommends() {
            pkginfo.push_str(&format!("optdepend = {}\n", dep.name()));
        }

        pkginfo
    }

    fn write_pkg(
        &self,
        staging: &Path,
        metadata: &PackageMetadata,
        env: &PackagingEnv,
        dest: &Path,
    ) -> Result<()> {
        let pkginfo = Self::pkginfo(metadata, env, dir_size(staging));

        write_atomically(dest, |file| {
            let encoder = zstd::stream::write::Encoder::new(file, ZSTD_LEVEL)?;
            let mut builder = TarBuilder::new(encoder);
            append_bytes(&mut builder, ".PKGINFO", pkginfo.as_bytes(), 0o644, env.timestamp)?;
            append_tree(&mut builder, staging, false, env.timestamp)?;
            let encoder = builder.into_inner()?;
            encoder.finish()?;
            Ok(())
        })
    }
}

impl Distribution for Arch {
    fn name(&self) -> &str {
        "arch"
    }

    fn package(&self, staging: &Path, metadata: &PackageMetadata, env: &PackagingEnv) -> Result<PathBuf> {
        let dest = env.output_dir.join(Self::file_name(metadata, env));
        info!("Packaging {}", dest.display());

        self.write_pkg(staging, metadata, env, &dest)
            .map_err(|e| packaging_error(self.name(), metadata, e))?;
        Ok(dest)
    }
}
