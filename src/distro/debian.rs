// src/distro/debian.rs
//! Debian package backend
//!
//! `.deb` files are ar archives containing, in this order:
//! - debian-binary: version string "2.0\n"
//! - control.tar.gz: control file and md5sums
//! - data.tar.gz: the staged tree

use super::archive::{append_bytes, append_tree, regular_files, write_atomically};
use super::{Distribution, PackagingEnv, arch_for_format, packaging_error, sanitize_version};
use crate::error::Result;
use crate::fsutil::dir_size;
use crate::layout::{PlatformLayout, debian_multiarch};
use crate::package::{PackageMetadata, PackageRef, ResolvedVersion};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tar::Builder as TarBuilder;
use tracing::info;

/// Debian and derivatives
#[derive(Debug, Clone, Copy, Default)]
pub struct Debian;

impl Debian {
    /// `upstream-release`, with characters dpkg rejects replaced by `~`
    pub fn version_string(version: &ResolvedVersion) -> String {
        let upstream = sanitize_version(
            &version.upstream,
            |c| c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '~' | '-'),
            '~',
        );
        format!("{}-{}", upstream, version.release)
    }

    /// `name_version-release_arch.deb`
    pub fn file_name(metadata: &PackageMetadata, env: &PackagingEnv) -> String {
        format!(
            "{}_{}_{}.deb",
            metadata.name(),
            Self::version_string(&env.version),
            arch_for_format(&env.arch, "deb")
        )
    }

    /// Render the control file
    pub fn control(metadata: &PackageMetadata, env: &PackagingEnv, installed_size: u64) -> String {
        let mut control = format!(
            "Package: {}\n\
             Version: {}\n\
             Architecture: {}\n\
             Maintainer: {}\n\
             Installed-Size: {}\n\
             Section: {}\n\
             Priority: optional\n",
            metadata.name(),
            Self::version_string(&env.version),
            arch_for_format(&env.arch, "deb"),
            env.maintainer,
            installed_size.div_ceil(1024),
            metadata.section(),
        );

        if let Some(homepage) = metadata.homepage() {
            control.push_str(&format!("Homepage: {}\n", homepage));
        }
        if !metadata.depends().is_empty() {
            control.push_str(&format!("Depends: {}\n", relation_list(metadata.depends())));
        }
        if !metadata.recommends().is_empty() {
            control.push_str(&format!(
                "Recommends: {}\n",
                relation_list(metadata.recommends())
            ));
        }

        control.push_str(&format!("Description: {}\n", metadata.description_short()));
        if let Some(long) = metadata.description_long() {
            for line in long.lines() {
                if line.trim().is_empty() {
                    control.push_str(" .\n");
                } else {
                    control.push(' ');
                    control.push_str(line.trim_end());
                    control.push('\n');
                }
            }
        }

        control
    }

    fn write_deb(
        &self,
        staging: &Path,
        metadata: &PackageMetadata,
        env: &PackagingEnv,
        dest: &Path,
    ) -> Result<()> {
        let mtime = env.timestamp;

        let mut md5sums = String::new();
        for (rel, path) in regular_files(staging)? {
            md5sums.push_str(&format!("{}  {}\n", md5_file(&path)?, rel));
        }

        let control = Self::control(metadata, env, dir_size(staging));

        let control_tar = gzip_tar(|builder| {
            append_bytes(builder, "./", &[], 0o755, mtime)?;
            append_bytes(builder, "control", control.as_bytes(), 0o644, mtime)?;
            if !md5sums.is_empty() {
                append_bytes(builder, "md5sums", md5sums.as_bytes(), 0o644, mtime)?;
            }
            Ok(())
        })?;
        let data_tar = gzip_tar(|builder| append_tree(builder, staging, true, mtime))?;

        write_atomically(dest, |file| {
            let mut archive = ar::Builder::new(file);
            for (name, data) in [
                ("debian-binary", &b"2.0\n"[..]),
                ("control.tar.gz", &control_tar[..]),
                ("data.tar.gz", &data_tar[..]),
            ] {
                let mut header = ar::Header::new(name.as_bytes().to_vec(), data.len() as u64);
                header.set_mtime(mtime);
                header.set_uid(0);
                header.set_gid(0);
                header.set_mode(0o100644);
                archive.append(&header, data)?;
            }
            Ok(())
        })
    }
}

impl Distribution for Debian {
    fn name(&self) -> &str {
        "debian"
    }

    fn layout(&self, arch: &str) -> PlatformLayout {
        let multiarch = debian_multiarch(&arch_for_format(arch, "deb"));
        PlatformLayout::default().with_lib(Path::new("/usr/lib").join(multiarch))
    }

    fn package(&self, staging: &Path, metadata: &PackageMetadata, env: &PackagingEnv) -> Result<PathBuf> {
        let dest = env.output_dir.join(Self::file_name(metadata, env));
        info!("Packaging {}", dest.display());

        self.write_deb(staging, metadata, env, &dest)
            .map_err(|e| packaging_error(self.name(), metadata, e))?;
        Ok(dest)
    }
}

fn relation_list<'a>(refs: impl IntoIterator<Item = &'a PackageRef>) -> String {
    refs.into_iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build a tar stream in memory and gzip it at a fixed level
fn gzip_tar<F>(fill: F) -> Result<Vec<u8>>
where
    F: FnOnce(&mut TarBuilder<GzEncoder<Vec<u8>>>) -> io::Result<()>,
{
    let encoder = GzEncoder::new(Vec::new(), Compression::best());
    let mut builder = TarBuilder::new(encoder);
    fill(&mut builder)?;
    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

/// Compute MD5 hash of a file (for md5sums)
fn md5_file(path: &Path) -> io::Result<String> {
    use md5::{Digest, Md5};

    let mut hasher = Md5::new();
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 8192];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::MetadataTemplate;
    use flate2::read::GzDecoder;
    use std::fs;
    use tempfile::TempDir;

    fn env(output: &Path) -> PackagingEnv {
        PackagingEnv {
            output_dir: output.to_path_buf(),
            version: ResolvedVersion {
                upstream: "1.12.1".to_string(),
                release: 0,
            },
            arch: "x86_64".to_string(),
            maintainer: "Test <test@example.com>".to_string(),
            timestamp: 1_600_000_000,
        }
    }

    fn kati_metadata() -> PackageMetadata {
        let template = MetadataTemplate::default()
            .description_short("An experimental GNU make clone")
            .description_long("kati is an experimental GNU make clone.\n\nIt converts Makefiles to ninja files.")
            .section("devel")
            .homepage("https://github.com/google/kati")
            .recommends(["ninja-build"]);
        PackageMetadata::from_template("kati", &template).unwrap()
    }

    #[test]
    fn test_version_and_file_name() {
        let dir = TempDir::new().unwrap();
        let mut env = env(dir.path());
        env.version.upstream = "0.0_git".to_string();
        assert_eq!(Debian::version_string(&env.version), "0.0~git-0");
        assert_eq!(
            Debian::file_name(&kati_metadata(), &env),
            "kati_0.0~git-0_amd64.deb"
        );
    }

    #[test]
    fn test_control_fields() {
        let dir = TempDir::new().unwrap();
        let control = Debian::control(&kati_metadata(), &env(dir.path()), 2048);
        assert!(control.contains("Package: kati\n"));
        assert!(control.contains("Version: 1.12.1-0\n"));
        assert!(control.contains("Architecture: amd64\n"));
        assert!(control.contains("Installed-Size: 2\n"));
        assert!(control.contains("Section: devel\n"));
        assert!(control.contains("Recommends: ninja-build\n"));
        assert!(!control.contains("Depends:"));
        assert!(control.ends_with(
            "Description: An experimental GNU make clone\n \
             kati is an experimental GNU make clone.\n .\n \
             It converts Makefiles to ninja files.\n"
        ));
    }

    #[test]
    fn test_multiarch_layout() {
        let layout = Debian.layout("aarch64");
        assert_eq!(layout.lib(), Path::new("/usr/lib/aarch64-linux-gnu"));
    }

    #[test]
    fn test_package_contents() {
        let stage = TempDir::new().unwrap();
        fs::create_dir_all(stage.path().join("usr/bin")).unwrap();
        fs::write(stage.path().join("usr/bin/ckati"), "binary").unwrap();
        let out = TempDir::new().unwrap();

        let path = Debian
            .package(stage.path(), &kati_metadata(), &env(out.path()))
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "kati_1.12.1-0_amd64.deb");

        let mut archive = ar::Archive::new(File::open(&path).unwrap());
        let mut members = Vec::new();
        let mut data_names = Vec::new();
        let mut md5sums = String::new();
        while let Some(entry) = archive.next_entry() {
            let mut entry = entry.unwrap();
            let name = String::from_utf8(entry.header().identifier().to_vec()).unwrap();
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).unwrap();
            if name == "data.tar.gz" {
                let mut tar = tar::Archive::new(GzDecoder::new(&bytes[..]));
                for e in tar.entries().unwrap() {
                    data_names.push(e.unwrap().path().unwrap().to_string_lossy().into_owned());
                }
            } else if name == "control.tar.gz" {
                let mut tar = tar::Archive::new(GzDecoder::new(&bytes[..]));
                for e in tar.entries().unwrap() {
                    let mut e = e.unwrap();
                    if e.path().unwrap().to_string_lossy() == "md5sums" {
                        e.read_to_string(&mut md5sums).unwrap();
                    }
                }
            }
            members.push(name);
        }

        assert_eq!(members, vec!["debian-binary", "control.tar.gz", "data.tar.gz"]);
        assert!(data_names.contains(&"usr/bin/ckati".to_string()));
        assert!(md5sums.ends_with("  usr/bin/ckati\n"));
    }

    #[test]
    fn test_md5_known_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, "hello world\n").unwrap();
        assert_eq!(md5_file(&path).unwrap(), "6f5902ac237024bdd0c176cb93063dc4");
    }
}
