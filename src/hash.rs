// src/hash.rs

//! SHA-256 helpers for content addressing
//!
//! Used for build cache keys, recipe option fingerprints and the revision
//! identifiers of locally fetched trees.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Compute the hex SHA-256 of a byte slice
pub fn sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Compute the hex SHA-256 of everything a reader yields
pub fn hash_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute the hex SHA-256 of a file's contents
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    hash_reader(&mut file)
}

/// Incremental fingerprint over labelled fields
///
/// Each field is written as `label` + length-prefixed value so that
/// adjacent fields can never run together and collide.
pub struct Fingerprint {
    hasher: Sha256,
}

impl Fingerprint {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    /// Add a labelled value
    pub fn field(&mut self, label: &str, value: impl AsRef<[u8]>) -> &mut Self {
        let value = value.as_ref();
        self.hasher.update(label.as_bytes());
        self.hasher.update([0u8]);
        self.hasher.update((value.len() as u64).to_le_bytes());
        self.hasher.update(value);
        self
    }

    /// Finish and return the hex digest
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self::new()
    }
}
