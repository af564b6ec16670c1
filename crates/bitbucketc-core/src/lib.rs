//! Core domain types for bitbucketc.
//!
//! This crate contains:
//! - The engine-ready execution plan (volumes, stages, steps)
//! - Run metadata and its environment variable projection

pub mod metadata;
pub mod plan;

pub use metadata::Metadata;
pub use plan::ExecutionPlan;
