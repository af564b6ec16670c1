//! CLI command implementations.

pub mod compile;

use anyhow::{Context, Result};

/// Configuration file read when none is given.
pub const DEFAULT_CONFIG: &str = "bitbucket-pipelines.yml";

pub fn validate(path: &str) -> Result<()> {
    let config = bitbucketc_config::parse_file(path)
        .with_context(|| format!("Configuration error in {}", path))?;

    let pipelines = &config.pipelines;
    println!("Configuration is valid");
    println!("  default steps: {}", pipelines.default.steps.len());
    println!("  tag pipelines: {}", pipelines.tags.len());
    println!("  branch pipelines: {}", pipelines.branches.len());
    Ok(())
}
