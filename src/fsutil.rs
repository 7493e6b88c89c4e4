// src/fsutil.rs

//! Filesystem helpers shared by fetchers, staging and the build cache

use crate::hash::Fingerprint;
use std::fs;
use std::io;
use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::Path;
use walkdir::WalkDir;

/// Recursively copy `src` into `dst`, preserving symlinks and modes
///
/// `dst` is created if missing. Entries for which `skip` returns true
/// (given the path relative to `src`) are not copied, nor is anything
/// below them.
pub fn copy_dir_filtered(src: &Path, dst: &Path, skip: impl Fn(&Path) -> bool) -> io::Result<()> {
    fs::create_dir_all(dst)?;

    let walker = WalkDir::new(src)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.path()
                .strip_prefix(src)
                .map(|rel| !skip(rel))
                .unwrap_or(true)
        });

    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(rel);
        copy_entry(entry.path(), &target, entry.file_type())?;
    }

    Ok(())
}

/// Recursively copy `src` into `dst`
pub fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
    copy_dir_filtered(src, dst, |_| false)
}

/// Copy one file, symlink or directory node (not its children)
pub fn copy_entry(src: &Path, dst: &Path, file_type: fs::FileType) -> io::Result<()> {
    if file_type.is_dir() {
        fs::create_dir_all(dst)?;
        let mode = fs::metadata(src)?.permissions().mode();
        fs::set_permissions(dst, fs::Permissions::from_mode(mode))?;
    } else if file_type.is_symlink() {
        let link = fs::read_link(src)?;
        if fs::symlink_metadata(dst).is_ok() {
            fs::remove_file(dst)?;
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        symlink(link, dst)?;
    } else {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst)?;
    }
    Ok(())
}

/// Total size in bytes of the regular files under `root`
pub fn dir_size(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Content digest of a directory tree
///
/// Covers relative paths, file contents, executable bits and symlink
/// targets in sorted order. Entries matching `skip` are ignored.
pub fn tree_digest(root: &Path, skip: impl Fn(&Path) -> bool) -> io::Result<String> {
    let mut fp = Fingerprint::new();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.path()
                .strip_prefix(root)
                .map(|rel| !skip(rel))
                .unwrap_or(true)
        });

    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(io::Error::other)?
            .to_string_lossy()
            .into_owned();

        if entry.file_type().is_symlink() {
            let link = fs::read_link(entry.path())?;
            fp.field("symlink", rel.as_bytes());
            fp.field("target", link.to_string_lossy().as_bytes());
        } else if entry.file_type().is_file() {
            let mode = entry.metadata().map_err(io::Error::other)?.permissions().mode();
            fp.field("file", rel.as_bytes());
            fp.field("exec", if mode & 0o111 != 0 { "1" } else { "0" });
            fp.field("content", fs::read(entry.path())?);
        } else {
            fp.field("dir", rel.as_bytes());
        }
    }

    Ok(fp.finish())
}
