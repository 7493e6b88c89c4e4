// src/commands/list.rs

//! List command - show the pipelines of a definitions set

use anyhow::{Context, Result};
use prebuilder::definitions;
use prebuilder::pipeline::Target;

/// Print every pipeline with its targets, or why it cannot be constructed
pub fn cmd_list(set_or_file: &str) -> Result<()> {
    let registry = definitions::load(set_or_file)
        .with_context(|| format!("Failed to load definitions '{}'", set_or_file))?;

    if registry.is_empty() {
        println!("No pipelines defined in {}", set_or_file);
        return Ok(());
    }

    let width = registry.names().map(str::len).max().unwrap_or(0);
    for name in registry.names() {
        match registry.construct(name) {
            Ok(pipeline) => {
                let targets: Vec<_> = pipeline.targets().iter().map(Target::label).collect();
                println!(
                    "{:width$}  {:6}  {}",
                    name,
                    pipeline.recipe().build_system().name(),
                    targets.join(", "),
                    width = width
                );
            }
            Err(e) => println!("{:width$}  invalid: {}", name, e, width = width),
        }
    }
    println!("{} pipelines", registry.len());
    Ok(())
}
