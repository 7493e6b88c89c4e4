// src/build_system/cmake.rs

//! CMake adapter

use super::{BuildEnv, BuildOptions, BuildSystem, OptionValue};
use crate::error::Result;
use crate::hash::Fingerprint;
use crate::sandbox::Invocation;
use std::path::Path;

/// Out-of-tree CMake build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CMake {
    generator: String,
    build_type: String,
}

impl Default for CMake {
    fn default() -> Self {
        Self {
            generator: "Ninja".to_string(),
            build_type: "Release".to_string(),
        }
    }
}

impl CMake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_generator(mut self, generator: impl Into<String>) -> Self {
        self.generator = generator.into();
        self
    }

    pub fn with_build_type(mut self, build_type: impl Into<String>) -> Self {
        self.build_type = build_type.into();
        self
    }

    fn define_args(options: &BuildOptions) -> Vec<String> {
        options
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    OptionValue::Bool(true) => "ON".to_string(),
                    OptionValue::Bool(false) => "OFF".to_string(),
                    other => other.to_string(),
                };
                format!("-D{}={}", name, value)
            })
            .collect()
    }
}

impl BuildSystem for CMake {
    fn name(&self) -> &str {
        "cmake"
    }

    fn fingerprint(&self, fp: &mut Fingerprint) {
        fp.field("build_system", "cmake");
        fp.field("cmake.generator", &self.generator);
        fp.field("cmake.build_type", &self.build_type);
    }

    fn configure(&self, env: &BuildEnv<'_>, options: &BuildOptions) -> Result<()> {
        env.run(
            "configure",
            Invocation::new("cmake", &env.build_dir)
                .arg("-S")
                .arg(&env.source_dir)
                .arg("-B")
                .arg(&env.build_dir)
                .arg("-G")
                .arg(&self.generator)
                .arg(format!("-DCMAKE_BUILD_TYPE={}", self.build_type))
                .arg(format!("-DCMAKE_INSTALL_PREFIX={}", env.prefix.display()))
                .args(Self::define_args(options)),
        )
    }

    fn build(&self, env: &BuildEnv<'_>, extra_args: &[String]) -> Result<()> {
        let mut invocation = Invocation::new("cmake", &env.build_dir)
            .arg("--build")
            .arg(&env.build_dir)
            .arg("--parallel")
            .arg(env.jobs.to_string());
        if !extra_args.is_empty() {
            invocation = invocation.arg("--").args(extra_args);
        }
        env.run("build", invocation)
    }

    fn install(&self, env: &BuildEnv<'_>, dest: &Path) -> Result<()> {
        env.run(
            "install",
            Invocation::new("cmake", &env.build_dir)
                .arg("--install")
                .arg(&env.build_dir)
                .env("DESTDIR", dest),
        )
    }
}
