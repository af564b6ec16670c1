//! Compiles Bitbucket Pipelines configuration into an engine-ready
//! [`ExecutionPlan`](bitbucketc_core::ExecutionPlan).
//!
//! This crate contains:
//! - The [`Compiler`] and its [`CompilerBuilder`]
//! - Script encoding for step commands
//! - Container image reference normalization

pub mod compiler;
pub mod image;
pub mod script;

pub use compiler::{Compiler, CompilerBuilder};
pub use image::expand_image;
pub use script::encode_script;
