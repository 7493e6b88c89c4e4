// src/patch.rs

//! Patch sets applied to a fetched source tree
//!
//! Patches are unified diffs, possibly touching several files, applied
//! in-process with `diffy`. Each patch is all-or-nothing: every file it
//! touches is patched in memory first and the tree is only written once
//! all hunks of all files applied. A patch whose changes are already
//! present in the tree is reported as a conflict.

use crate::error::{Error, Result};
use crate::hash::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Default number of leading path components removed (like `patch -p1`)
pub const DEFAULT_STRIP: u32 = 1;

/// A patch location as written in a recipe
///
/// The location may be a single patch file or a directory of patches, and
/// may be relative to the run's patch directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSpec {
    pub location: PathBuf,
    #[serde(default = "default_strip")]
    pub strip: u32,
}

fn default_strip() -> u32 {
    DEFAULT_STRIP
}

impl PatchSpec {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            strip: DEFAULT_STRIP,
        }
    }

    pub fn with_strip(mut self, strip: u32) -> Self {
        self.strip = strip;
        self
    }
}

impl From<&str> for PatchSpec {
    fn from(location: &str) -> Self {
        Self::new(location)
    }
}

impl From<PathBuf> for PatchSpec {
    fn from(location: PathBuf) -> Self {
        Self::new(location)
    }
}

/// One concrete patch file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchFile {
    pub path: PathBuf,
    pub strip: u32,
}

/// Ordered list of resolved patch files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSet {
    patches: Vec<PatchFile>,
}

impl PatchSet {
    /// Resolve recipe patch locations into concrete files
    ///
    /// Relative locations are joined onto `patch_dir`. Directories expand to
    /// their `*.patch` and `*.diff` files in lexical order.
    pub fn resolve(specs: &[PatchSpec], patch_dir: &Path) -> Result<Self> {
        let mut patches = Vec::new();

        for spec in specs {
            let location = if spec.location.is_absolute() {
                spec.location.clone()
            } else {
                patch_dir.join(&spec.location)
            };

            if location.is_dir() {
                let files = list_patch_files(&location)?;
                if files.is_empty() {
                    return Err(Error::InvalidRecipe(format!(
                        "patch directory {} contains no *.patch or *.diff files",
                        location.display()
                    )));
                }
                patches.extend(files.into_iter().map(|path| PatchFile {
                    path,
                    strip: spec.strip,
                }));
            } else if location.is_file() {
                patches.push(PatchFile {
                    path: location,
                    strip: spec.strip,
                });
            } else {
                return Err(Error::InvalidRecipe(format!(
                    "patch {} does not exist",
                    location.display()
                )));
            }
        }

        Ok(Self { patches })
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PatchFile> {
        self.patches.iter()
    }

    /// Apply every patch in order to the tree at `root`
    pub fn apply(&self, root: &Path) -> Result<()> {
        for patch in &self.patches {
            info!("Applying patch {}", patch.path.display());
            apply_patch_file(root, &patch.path, patch.strip)?;
        }
        Ok(())
    }

    /// Feed the content of every patch into a fingerprint
    pub fn fingerprint(&self, fp: &mut Fingerprint) -> Result<()> {
        for patch in &self.patches {
            let content = fs::read(&patch.path)?;
            fp.field("patch.strip", patch.strip.to_string());
            fp.field("patch", content);
        }
        Ok(())
    }
}

fn list_patch_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_patch = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "patch" || e == "diff");
        if is_patch && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Apply a single patch file to `root`, all-or-nothing
pub fn apply_patch_file(root: &Path, patch_path: &Path, strip: u32) -> Result<()> {
    let conflict = |reason: String| Error::PatchConflict {
        patch: patch_path.to_path_buf(),
        reason,
    };

    let text = fs::read_to_string(patch_path)
        .map_err(|e| conflict(format!("cannot read patch: {}", e)))?;
    let sections = split_file_sections(&text);
    if sections.is_empty() {
        return Err(conflict("no file changes found".to_string()));
    }

    // Target path -> new content (None = delete)
    let mut staged: BTreeMap<PathBuf, Option<String>> = BTreeMap::new();

    for section in &sections {
        let old = section
            .old_path
            .as_deref()
            .map(|p| strip_path(p, strip))
            .transpose()
            .map_err(&conflict)?;
        let new = section
            .new_path
            .as_deref()
            .map(|p| strip_path(p, strip))
            .transpose()
            .map_err(&conflict)?;

        let base = match &old {
            Some(old) => match staged.get(old) {
                Some(Some(content)) => content.clone(),
                Some(None) => {
                    return Err(conflict(format!("{} was deleted earlier in this patch", old.display())));
                }
                None => read_tree_file(root, old).map_err(&conflict)?,
            },
            None => {
                let target = new.as_ref().ok_or_else(|| conflict("patch section names no file".to_string()))?;
                if root.join(target).exists() {
                    return Err(conflict(format!(
                        "{} already exists (patch already applied?)",
                        target.display()
                    )));
                }
                String::new()
            }
        };

        let forward = parse_hunks(&section.hunks).map_err(&conflict)?;
        let patched = match diffy::apply(&base, &forward) {
            Ok(patched) => patched,
            Err(e) => {
                let reversed_text = reverse_hunks(&section.hunks);
                let already_applied = parse_hunks(&reversed_text)
                    .ok()
                    .is_some_and(|reverse| diffy::apply(&base, &reverse).is_ok());
                let file = new.as_ref().or(old.as_ref()).map(|p| p.display().to_string()).unwrap_or_default();
                return Err(conflict(if already_applied {
                    format!("changes to {} are already present (patch already applied)", file)
                } else {
                    format!("{} does not match: {}", file, e)
                }));
            }
        };

        match (&old, &new) {
            (Some(old), None) => {
                if !patched.is_empty() {
                    return Err(conflict(format!(
                        "deleting {} leaves content behind",
                        old.display()
                    )));
                }
                staged.insert(old.clone(), None);
            }
            (Some(old), Some(new)) => {
                if old != new {
                    staged.insert(old.clone(), None);
                }
                staged.insert(new.clone(), Some(patched));
            }
            (None, Some(new)) => {
                staged.insert(new.clone(), Some(patched));
            }
            (None, None) => return Err(conflict("patch section names no file".to_string())),
        }
    }

    for (path, content) in &staged {
        let full = root.join(path);
        match content {
            Some(content) => {
                if let Some(parent) = full.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&full, content)?;
                debug!("Patched {}", path.display());
            }
            None => {
                if full.exists() {
                    fs::remove_file(&full)?;
                }
                debug!("Removed {}", path.display());
            }
        }
    }

    Ok(())
}

fn read_tree_file(root: &Path, rel: &Path) -> std::result::Result<String, String> {
    let full = root.join(rel);
    fs::read(&full)
        .map_err(|e| format!("cannot read {}: {}", rel.display(), e))
        .and_then(|bytes| {
            String::from_utf8(bytes).map_err(|_| format!("{} is not valid UTF-8", rel.display()))
        })
}

fn parse_hunks(hunks: &str) -> std::result::Result<diffy::Patch<'_, str>, String> {
    diffy::Patch::from_str(hunks).map_err(|e| format!("malformed patch: {}", e))
}

/// The diff of one file inside a (possibly multi-file) patch
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileSection {
    /// Path from the `---` header, `None` for /dev/null
    old_path: Option<String>,
    /// Path from the `+++` header, `None` for /dev/null
    new_path: Option<String>,
    /// Normalized `---`/`+++` header plus hunk lines
    hunks: String,
}

/// Split patch text into per-file sections
///
/// Header pairs are only recognized outside of hunks, so a removed line
/// starting with `-- ` inside a hunk never starts a new file.
fn split_file_sections(text: &str) -> Vec<FileSection> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let mut sections: Vec<FileSection> = Vec::new();
    let mut old_remaining = 0u64;
    let mut new_remaining = 0u64;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if old_remaining == 0 && new_remaining == 0 {
            if line.starts_with("--- ")
                && lines.get(i + 1).is_some_and(|next| next.starts_with("+++ "))
            {
                sections.push(FileSection {
                    old_path: header_path(&line[4..]),
                    new_path: header_path(&lines[i + 1][4..]),
                    hunks: "--- original\n+++ modified\n".to_string(),
                });
                i += 2;
                continue;
            }

            if line.starts_with("@@ ")
                && let Some(section) = sections.last_mut()
                && let Some((old_len, new_len)) = hunk_lengths(line)
            {
                old_remaining = old_len;
                new_remaining = new_len;
                section.hunks.push_str(line);
            }
            // Anything else between hunks (diff --git, index, mode lines) is ignored
            i += 1;
            continue;
        }

        if let Some(section) = sections.last_mut() {
            match line.as_bytes().first() {
                Some(b'+') => new_remaining = new_remaining.saturating_sub(1),
                Some(b'-') => old_remaining = old_remaining.saturating_sub(1),
                Some(b'\\') => {}
                // Context line, possibly with its trailing space stripped
                _ => {
                    old_remaining = old_remaining.saturating_sub(1);
                    new_remaining = new_remaining.saturating_sub(1);
                }
            }
            if line.trim_end_matches(['\r', '\n']).is_empty() {
                section.hunks.push_str(" \n");
            } else {
                section.hunks.push_str(line);
            }
        }
        i += 1;
    }

    sections
}

fn header_path(rest: &str) -> Option<String> {
    let path = rest
        .trim_end_matches(['\r', '\n'])
        .split('\t')
        .next()
        .unwrap_or("")
        .trim();
    if path == "/dev/null" || path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

/// Old and new line counts from a `@@ -a,b +c,d @@` header
fn hunk_lengths(header: &str) -> Option<(u64, u64)> {
    let ranges = header.strip_prefix("@@ ")?;
    let end = ranges.find(" @@")?;
    let mut parts = ranges[..end].split(' ');
    let old = parts.next()?.strip_prefix('-')?;
    let new = parts.next()?.strip_prefix('+')?;
    let len = |range: &str| -> Option<u64> {
        match range.split_once(',') {
            Some((_, len)) => len.parse().ok(),
            None => Some(1),
        }
    };
    Some((len(old)?, len(new)?))
}

/// Swap additions and removals of a normalized section
fn reverse_hunks(hunks: &str) -> String {
    let mut out = String::with_capacity(hunks.len());
    for line in hunks.split_inclusive('\n') {
        if line.starts_with("--- ") || line.starts_with("+++ ") {
            out.push_str(line);
        } else if let Some(rest) = line.strip_prefix("@@ ") {
            match rest.find(" @@") {
                Some(end) => {
                    let mut parts = rest[..end].split(' ');
                    let old = parts.next().unwrap_or("").trim_start_matches('-');
                    let new = parts.next().unwrap_or("").trim_start_matches('+');
                    out.push_str(&format!("@@ -{} +{}{}", new, old, &rest[end..]));
                }
                None => out.push_str(line),
            }
        } else if let Some(rest) = line.strip_prefix('+') {
            out.push('-');
            out.push_str(rest);
        } else if let Some(rest) = line.strip_prefix('-') {
            out.push('+');
            out.push_str(rest);
        } else {
            out.push_str(line);
        }
    }
    out
}

/// Remove `strip` leading components and reject paths leaving the tree
fn strip_path(path: &str, strip: u32) -> std::result::Result<PathBuf, String> {
    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty() && *c != ".").collect();
    if components.len() <= strip as usize {
        return Err(format!("cannot strip {} components from '{}'", strip, path));
    }

    let stripped: PathBuf = components[strip as usize..].iter().collect();
    if stripped
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(format!("'{}' points outside the source tree", path));
    }
    Ok(stripped)
}
