// src/error.rs

//! Error types for the build-and-package engine
//!
//! Errors fall into three groups according to how far they propagate:
//!
//! - **Construction-time**: [`Error::InvalidRecipe`], [`Error::InvalidMetadata`].
//!   Raised while a recipe, metadata or pipeline is assembled.
//! - **Pipeline-fatal**: [`Error::Fetch`], [`Error::PatchConflict`],
//!   [`Error::Build`], [`Error::Sandbox`]. Abort the remaining steps of one
//!   pipeline.
//! - **Target-scoped**: [`Error::InstallRule`], [`Error::Packaging`]. Abort a
//!   single (distribution, metadata) target; sibling targets keep going.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by recipes, pipelines and their collaborators
#[derive(Error, Debug)]
pub enum Error {
    /// Recipe could not be assembled (missing adapter, missing patch, ...)
    #[error("invalid recipe: {0}")]
    InvalidRecipe(String),

    /// Package metadata failed validation
    #[error("invalid package metadata: {0}")]
    InvalidMetadata(String),

    /// Source could not be obtained
    #[error("failed to fetch {locator}: {reason}")]
    Fetch {
        locator: String,
        reason: String,
        /// Whether retrying may succeed (network timeouts and the like)
        transient: bool,
    },

    /// A patch did not apply to the tree left by the previous patch
    #[error("patch {} does not apply: {reason}", patch.display())]
    PatchConflict { patch: PathBuf, reason: String },

    /// A configure/build/install step of the build system failed
    #[error("{step} step failed: {reason}")]
    Build { step: String, reason: String },

    /// The sandbox could not be set up for a build command
    #[error("sandbox error: {0}")]
    Sandbox(String),

    /// An install rule failed for one target
    #[error("install rule for {target} failed: {reason}")]
    InstallRule { target: String, reason: String },

    /// A distribution backend failed to produce an artifact
    #[error("packaging {target} failed: {reason}")]
    Packaging { target: String, reason: String },

    /// Build cache failure (never fatal to a pipeline)
    #[error("build cache error: {0}")]
    Cache(String),

    /// Configuration or definitions file error
    #[error("configuration error: {0}")]
    Config(String),

    /// Pipeline name registered twice
    #[error("pipeline '{0}' is already registered")]
    DuplicatePipeline(String),

    /// Pipeline name not present in the registry
    #[error("no pipeline named '{0}'")]
    UnknownPipeline(String),

    /// Code run by a pipeline panicked
    #[error("panicked: {0}")]
    Panic(String),

        /// Underlying I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a non-transient fetch failure
    pub fn fetch(locator: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Fetch {
            locator: locator.into(),
            reason: reason.to_string(),
            transient: false,
        }
    }

    /// Shorthand for a build failure in `step`
    pub fn build(step: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Build {
            step: step.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error is worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Fetch { transient: true, .. })
    }

    /// Whether this error only affects a single packaging target
    pub fn is_target_scoped(&self) -> bool {
        matches!(self, Self::InstallRule { .. } | Self::Packaging { .. })
    }
}

/// The pipeline step an error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Building the pipeline from its factory, or resolving its patches
    Construct,
    Fetch,
    Patch,
    Build,
    /// Staging and packaging one target
    Package,
    /// Running the pipeline, when the failing step is not known (a panic)
    Execute,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Construct => "construct",
            Stage::Fetch => "fetch",
            Stage::Patch => "patch",
            Stage::Build => "build",
            Stage::Package => "package",
            Stage::Execute => "execute",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pipeline-fatal error attributed to a pipeline and the step that failed
#[derive(Error, Debug)]
#[error("pipeline '{pipeline}' failed during {stage}: {source}")]
pub struct PipelineError {
    pub pipeline: String,
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl PipelineError {
    pub fn new(pipeline: impl Into<String>, stage: Stage, source: Error) -> Self {
        Self {
            pipeline: pipeline.into(),
            stage,
            source,
        }
    }
}
