// src/distro/archive.rs

//! Deterministic archive helpers shared by the packaging backends
//!
//! Tar members are written in lexical order with uid/gid 0, no owner
//! names and one fixed modification time, so identical staging trees
//! always produce identical bytes.

use crate::error::Result;
use std::fs::{self, File};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tar::{Builder as TarBuilder, EntryType, Header};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

fn base_header(entry_type: EntryType, mode: u32, size: u64, mtime: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(size);
    header.set_mtime(mtime);
    header.set_uid(0);
    header.set_gid(0);
    header
}

/// Append an in-memory file
pub fn append_bytes<W: Write>(
    builder: &mut TarBuilder<W>,
    path: &str,
    data: &[u8],
    mode: u32,
    mtime: u64,
) -> io::Result<()> {
    let mut header = base_header(EntryType::Regular, mode, data.len() as u64, mtime);
    builder.append_data(&mut header, path, data)
}

/// Append every entry below `root`, sorted
///
/// With `include_root` a leading `./` directory member is written, as
/// Debian data archives have.
pub fn append_tree<W: Write>(
    builder: &mut TarBuilder<W>,
    root: &Path,
    include_root: bool,
    mtime: u64,
) -> io::Result<()> {
    if include_root {
        let mut header = base_header(EntryType::Directory, 0o755, 0, mtime);
        builder.append_data(&mut header, "./", io::empty())?;
    }

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(io::Error::other)?;
        let name = rel.to_string_lossy().into_owned();
        let meta = fs::symlink_metadata(entry.path())?;
        let mode = meta.permissions().mode() & 0o7777;

        if meta.file_type().is_symlink() {
            let target = fs::read_link(entry.path())?;
            let mut header = base_header(EntryType::Symlink, 0o777, 0, mtime);
            builder.append_link(&mut header, &name, &target)?;
        } else if meta.is_dir() {
            let mut header = base_header(EntryType::Directory, mode, 0, mtime);
            builder.append_data(&mut header, format!("{}/", name), io::empty())?;
        } else {
            let mut header = base_header(EntryType::Regular, mode, meta.len(), mtime);
            let file = File::open(entry.path())?;
            builder.append_data(&mut header, &name, file)?;
        }
    }

    Ok(())
}

/// Regular files below `root` with their paths relative to it, sorted
pub fn regular_files(root: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_file() {
            let rel = entry
                .path()
                .strip_prefix(root)
                .map_err(io::Error::other)?
                .to_string_lossy()
                .into_owned();
            files.push((rel, entry.path().to_path_buf()));
        }
    }
    Ok(files)
}

/// Write an artifact through a temporary file renamed into place
///
/// When `write` fails the temporary file is removed and `dest` is left
/// untouched.
pub fn write_atomically<F>(dest: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    write(tmp.as_file_mut())?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}
