// src/package.rs

//! Package identity and metadata
//!
//! A [`PackageRef`] names a packaging target; [`PackageMetadata`] carries
//! everything a distribution backend writes into the package's control
//! data. Metadata is assembled from a [`MetadataTemplate`], a bag of
//! optional fields that can be overlaid on a shared base template.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Version used when neither the ref nor the fetcher knows one
pub const FALLBACK_VERSION: &str = "0.0";

/// Identifies a package target
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PackageRef {
    name: String,
    version: Option<String>,
    version_postfix: Option<u32>,
}

impl PackageRef {
    /// A ref whose version is taken from the fetched source
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            version_postfix: None,
        }
    }

    /// Pin an explicit upstream version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set the rebuild postfix (release number) for the same upstream version
    pub fn with_postfix(mut self, postfix: u32) -> Self {
        self.version_postfix = Some(postfix);
        self
    }

    /// Parse a dependency string: `name`, `name>=1.2` or `name (>= 1.2)`
    pub fn parse_dependency(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        let (name, version) = match spec.split_once(">=") {
            Some((name, version)) => {
                let name = name.trim().trim_end_matches('(').trim();
                let version = version.trim().trim_end_matches(')').trim();
                (name, Some(version))
            }
            None => (spec, None),
        };

        validate_name(name)?;
        let mut package = Self::new(name);
        if let Some(version) = version {
            if version.is_empty() {
                return Err(Error::InvalidMetadata(format!(
                    "empty version constraint in dependency '{}'",
                    spec
                )));
            }
            package = package.with_version(version);
        }
        Ok(package)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn version_postfix(&self) -> Option<u32> {
        self.version_postfix
    }

    /// Release number of the package built for this ref
    pub fn release(&self) -> u32 {
        self.version_postfix.unwrap_or(0)
    }

    /// Resolve the effective version given the fetcher's hint
    pub fn resolve_version(&self, hint: Option<&str>) -> ResolvedVersion {
        let upstream = self
            .version
            .clone()
            .or_else(|| hint.map(normalize_version_hint))
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| FALLBACK_VERSION.to_string());

        ResolvedVersion {
            upstream,
            release: self.release(),
        }
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{} (>= {})", self.name, v),
            None => write!(f, "{}", self.name),
        }
    }
}

impl From<VersionedPackageRef> for PackageRef {
    fn from(versioned: VersionedPackageRef) -> Self {
        versioned.0
    }
}

impl From<&str> for PackageRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A [`PackageRef`] whose version is always explicit
///
/// For projects without usable upstream tags, e.g. ones built from a
/// rolling branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedPackageRef(PackageRef);

impl VersionedPackageRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self(PackageRef::new(name).with_version(version))
    }

    pub fn with_postfix(self, postfix: u32) -> Self {
        Self(self.0.with_postfix(postfix))
    }

    pub fn version(&self) -> &str {
        self.0.version().unwrap_or(FALLBACK_VERSION)
    }
}

/// Upstream version plus release number, before backend-specific mangling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    pub upstream: String,
    pub release: u32,
}

/// Turn a `git describe` style hint into an upstream version
///
/// `v1.11.1` becomes `1.11.1`; `v1.11.1-5-gdeadbee` becomes
/// `1.11.1+5.gdeadbee`.
fn normalize_version_hint(hint: &str) -> String {
    let hint = hint.trim();
    let hint = hint
        .strip_prefix('v')
        .filter(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
        .unwrap_or(hint);

    let mut parts = hint.rsplitn(3, '-');
    let last = parts.next();
    let middle = parts.next();
    let head = parts.next();
    match (head, middle, last) {
        (Some(tag), Some(count), Some(commit))
            if count.chars().all(|c| c.is_ascii_digit()) && commit.starts_with('g') =>
        {
            format!("{}+{}.{}", tag, count, commit)
        }
        _ => hint.to_string(),
    }
}

fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_first = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    let valid_rest = chars.all(|c| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '-' | '.')
    });

    if name.len() < 2 || !valid_first || !valid_rest {
        return Err(Error::InvalidMetadata(format!(
            "'{}' is not a valid package name (lower-case letters, digits, '+', '-', '.'; at least 2 characters)",
            name
        )));
    }
    Ok(())
}

/// Metadata fields that can be shared and overridden
///
/// Every field is optional so that templates can be layered with
/// [`MetadataTemplate::overlay`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetadataTemplate {
    pub description_short: Option<String>,
    pub description_long: Option<String>,
    pub license: Option<String>,
    pub section: Option<String>,
    pub homepage: Option<String>,
    pub depends: Option<Vec<String>>,
    pub recommends: Option<Vec<String>>,
}

impl MetadataTemplate {
    /// Return a template where every field set in `over` replaces ours
    pub fn overlay(&self, over: &MetadataTemplate) -> MetadataTemplate {
        MetadataTemplate {
            description_short: over
                .description_short
                .clone()
                .or_else(|| self.description_short.clone()),
            description_long: over
                .description_long
                .clone()
                .or_else(|| self.description_long.clone()),
            license: over.license.clone().or_else(|| self.license.clone()),
            section: over.section.clone().or_else(|| self.section.clone()),
            homepage: over.homepage.clone().or_else(|| self.homepage.clone()),
            depends: over.depends.clone().or_else(|| self.depends.clone()),
            recommends: over.recommends.clone().or_else(|| self.recommends.clone()),
        }
    }

    pub fn description_short(mut self, value: impl Into<String>) -> Self {
        self.description_short = Some(value.into());
        self
    }

    pub fn description_long(mut self, value: impl Into<String>) -> Self {
        self.description_long = Some(value.into());
        self
    }

    pub fn license(mut self, value: impl Into<String>) -> Self {
        self.license = Some(value.into());
        self
    }

    pub fn section(mut self, value: impl Into<String>) -> Self {
        self.section = Some(value.into());
        self
    }

    pub fn homepage(mut self, value: impl Into<String>) -> Self {
        self.homepage = Some(value.into());
        self
    }

    pub fn depends<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends = Some(deps.into_iter().map(Into::into).collect());
        self
    }

    pub fn recommends<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recommends = Some(deps.into_iter().map(Into::into).collect());
        self
    }
}

/// Descriptive and dependency information for one packaging target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageMetadata {
    package: PackageRef,
    description_short: String,
    description_long: Option<String>,
    license: Option<String>,
    section: String,
    homepage: Option<String>,
    depends: BTreeSet<PackageRef>,
    recommends: BTreeSet<PackageRef>,
}

impl PackageMetadata {
    /// Metadata with only defaults filled in
    pub fn new(package: impl Into<PackageRef>) -> Result<Self> {
        Self::from_template(package, &MetadataTemplate::default())
    }

    /// Validate a template and build metadata for `package`
    pub fn from_template(package: impl Into<PackageRef>, template: &MetadataTemplate) -> Result<Self> {
        let package = package.into();
        validate_name(package.name())?;

        let description_short = template
            .description_short
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(package.name())
            .to_string();
        if description_short.contains('\n') {
            return Err(Error::InvalidMetadata(format!(
                "short description of {} must be a single line",
                package.name()
            )));
        }

        let description_long = template
            .description_long
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let depends = parse_dependencies(template.depends.as_deref())?;
        let recommends = parse_dependencies(template.recommends.as_deref())?;

        Ok(Self {
            description_short,
            description_long,
            license: template.license.clone().filter(|s| !s.is_empty()),
            section: template
                .section
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "misc".to_string()),
            homepage: template.homepage.clone().filter(|s| !s.is_empty()),
            depends,
            recommends,
            package,
        })
    }

    pub fn package(&self) -> &PackageRef {
        &self.package
    }

    pub fn name(&self) -> &str {
        self.package.name()
    }

    pub fn description_short(&self) -> &str {
        &self.description_short
    }

    pub fn description_long(&self) -> Option<&str> {
        self.description_long.as_deref()
    }

    pub fn license(&self) -> Option<&str> {
        self.license.as_deref()
    }

    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn homepage(&self) -> Option<&str> {
        self.homepage.as_deref()
    }

    pub fn depends(&self) -> &BTreeSet<PackageRef> {
        &self.depends
    }

    pub fn recommends(&self) -> &BTreeSet<PackageRef> {
        &self.recommends
    }
}

fn parse_dependencies(specs: Option<&[String]>) -> Result<BTreeSet<PackageRef>> {
    specs
        .unwrap_or_default()
        .iter()
        .map(|s| PackageRef::parse_dependency(s))
        .collect()
}
