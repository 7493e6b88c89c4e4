// src/build_system/make.rs

//! Make (and kati) adapter

use super::{BuildEnv, BuildOptions, BuildSystem, OptionValue};
use crate::error::Result;
use crate::hash::Fingerprint;
use crate::sandbox::Invocation;
use std::path::Path;

/// In-tree make build
///
/// Options are passed on the command line as `NAME=value` variable
/// overrides. With `use_kati` the build runs `ckati`, a GNU make clone,
/// instead of `make`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Make {
    use_kati: bool,
    configure_script: Option<String>,
}

impl Make {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kati(mut self, use_kati: bool) -> Self {
        self.use_kati = use_kati;
        self
    }

    /// Run this script (relative to the source dir) before building
    pub fn with_configure_script(mut self, script: impl Into<String>) -> Self {
        self.configure_script = Some(script.into());
        self
    }

    fn program(&self) -> &'static str {
        if self.use_kati { "ckati" } else { "make" }
    }

    fn variable_args(options: &BuildOptions) -> Vec<String> {
        options
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    OptionValue::Bool(true) => "1".to_string(),
                    OptionValue::Bool(false) => "0".to_string(),
                    other => other.to_string(),
                };
                format!("{}={}", name, value)
            })
            .collect()
    }
}

impl BuildSystem for Make {
    fn name(&self) -> &str {
        self.program()
    }

    fn fingerprint(&self, fp: &mut Fingerprint) {
        fp.field("build_system", "make");
        fp.field("make.kati", if self.use_kati { "1" } else { "0" });
        fp.field("make.configure", self.configure_script.as_deref().unwrap_or(""));
    }

    fn in_tree(&self) -> bool {
        true
    }

    fn configure(&self, env: &BuildEnv<'_>, options: &BuildOptions) -> Result<()> {
        let Some(script) = &self.configure_script else {
            return Ok(());
        };

        let script = if script.contains('/') {
            script.clone()
        } else {
            format!("./{}", script)
        };
        env.run(
            "configure",
            Invocation::new(script, &env.source_dir)
                .arg(format!("--prefix={}", env.prefix.display()))
                .args(Self::variable_args(options)),
        )
    }

    fn build(&self, env: &BuildEnv<'_>, extra_args: &[String]) -> Result<()> {
        env.run(
            "build",
            Invocation::new(self.program(), &env.build_dir)
                .arg(format!("-j{}", env.jobs))
                .args(Self::variable_args(env.options))
                .args(extra_args),
        )
    }

    fn install(&self, env: &BuildEnv<'_>, dest: &Path) -> Result<()> {
        env.run(
            "install",
            Invocation::new(self.program(), &env.build_dir)
                .arg("install")
                .arg(format!("DESTDIR={}", dest.display()))
                .arg(format!("PREFIX={}", env.prefix.display()))
                .args(Self::variable_args(env.options)),
        )
    }
}
