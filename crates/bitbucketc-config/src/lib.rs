//! Bitbucket Pipelines configuration parsing for bitbucketc.
//!
//! This crate handles:
//! - Parsing `bitbucket-pipelines.yml` into a typed [`Config`]
//! - Selecting the pipeline for a commit ref and branch

pub mod error;
pub mod pipeline;
pub mod select;

pub use error::{ConfigError, ConfigResult};
pub use pipeline::{
    CloneConfig, Config, Pipelines, Stage, Step, parse_bytes, parse_file, parse_reader, parse_str,
};
pub use select::select;
