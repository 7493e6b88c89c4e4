// src/lib.rs

//! prebuilder: declarative build-and-package orchestration
//!
//! Turns upstream source repositories into installable distribution
//! packages. Each project is described once as a recipe (where to fetch
//! it, which patches to apply, how to build and stage it) plus a list of
//! packaging targets; the pipeline fetches and builds once and packages
//! the result for every target.
//!
//! # Architecture
//!
//! - [`recipe::BuildRecipe`]: immutable description of one project build
//! - [`pipeline::BuildPipeline`]: fetch, patch, build, then package per target
//! - [`registry::PipelineRegistry`]: named pipeline factories run as one batch
//! - [`cache::BuildCache`]: built trees keyed by source revision and recipe
//! - [`context::RunContext`]: directories and shared services of one run

pub mod build_system;
pub mod cache;
pub mod config;
pub mod context;
pub mod definitions;
pub mod distro;
mod error;
pub mod fetch;
pub mod fsutil;
pub mod hash;
pub mod layout;
pub mod package;
pub mod patch;
pub mod pipeline;
pub mod recipe;
pub mod registry;
pub mod sandbox;
pub mod staging;

pub use context::RunContext;
pub use error::{Error, PipelineError, Result, Stage};
pub use package::{MetadataTemplate, PackageMetadata, PackageRef, VersionedPackageRef};
pub use pipeline::{Artifact, BuildPipeline, PipelineOutcome, Target};
pub use recipe::{BuildRecipe, RecipeBuilder};
pub use registry::{PipelineRegistry, RunReport};
