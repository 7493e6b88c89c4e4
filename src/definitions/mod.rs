// src/definitions/mod.rs

//! Build definitions: which pipelines a run registers
//!
//! Definitions come either from a built-in set compiled into the binary
//! or from a TOML definitions file (see [`manifest`]).

pub mod build_tools;
pub mod manifest;

pub use manifest::Manifest;

use crate::error::{Error, Result};
use crate::registry::PipelineRegistry;
use std::path::Path;

/// Names of the built-in definition sets
pub const BUILTIN_SETS: &[&str] = &["build-tools"];

/// Registry for a built-in set name or a definitions file path
///
/// Built-in names take precedence over files of the same name.
pub fn load(set_or_file: &str) -> Result<PipelineRegistry> {
    let mut registry = PipelineRegistry::new();
    match set_or_file {
        "build-tools" => build_tools::register(&mut registry)?,
        other => {
            let path = Path::new(other);
            if !path.is_file() {
                return Err(Error::Config(format!(
                    "'{}' is neither a built-in definitions set ({}) nor a file",
                    other,
                    BUILTIN_SETS.join(", ")
                )));
            }
            Manifest::load(path)?.register(&mut registry)?;
        }
    }
    Ok(registry)
}
