//! Engine-ready execution plan.
//!
//! A plan is a list of volumes plus an ordered list of stages. Every stage
//! produced by the compiler holds exactly one step; the runner executes the
//! stages in order and consults each step's `on_success` / `on_failure` flags
//! to decide whether it runs after the previous step's outcome.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The compiled pipeline handed to the execution engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Volumes the engine creates before running any stage.
    pub volumes: Vec<Volume>,
    /// Stages in execution order.
    pub stages: Vec<Stage>,
}

impl ExecutionPlan {
    /// Iterate over every step of the plan in execution order.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.stages.iter().flat_map(|s| s.steps.iter())
    }
}

/// Volume driver understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum VolumeDriver {
    #[display("local")]
    Local,
}

/// A named volume created at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub driver: VolumeDriver,
    pub name: String,
}

impl Volume {
    /// A local volume with the given name.
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            driver: VolumeDriver::Local,
            name: name.into(),
        }
    }

    /// Bind spec mounting this volume at `target` (`name:target`).
    pub fn bind(&self, target: &str) -> String {
        format!("{}:{}", self.name, target)
    }
}

/// A group of steps executed together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Runtime name, namespaced by the compiler prefix.
    pub name: String,
    /// Short name without the prefix.
    pub alias: String,
    pub steps: Vec<Step>,
}

impl Stage {
    /// A stage wrapping exactly one step.
    pub fn single(name: impl Into<String>, alias: impl Into<String>, step: Step) -> Self {
        Self {
            name: name.into(),
            alias: alias.into(),
            steps: vec![step],
        }
    }
}

/// A single container execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Runtime container name, namespaced by the compiler prefix.
    pub name: String,
    /// Short name without the prefix.
    pub alias: String,
    /// Fully tagged image reference.
    pub image: String,
    /// Container environment. Ordered so serialized plans are reproducible.
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Bind specs in `source:target` form.
    pub volumes: Vec<String>,
    pub working_dir: String,
    /// Run when the previous step succeeded.
    pub on_success: bool,
    /// Run when the previous step failed.
    pub on_failure: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: &str) -> Step {
        Step {
            name: format!("test_{}", name),
            alias: name.to_string(),
            image: "alpine:latest".to_string(),
            environment: BTreeMap::from([("HOME".to_string(), "/root".to_string())]),
            entrypoint: Vec::new(),
            command: Vec::new(),
            volumes: vec!["test_workspace:/workspace".to_string()],
            working_dir: "/workspace/src".to_string(),
            on_success: true,
            on_failure: false,
        }
    }

    #[test]
    fn test_volume_bind() {
        let volume = Volume::local("pipeline_workspace");
        assert_eq!(volume.driver.to_string(), "local");
        assert_eq!(volume.bind("/workspace"), "pipeline_workspace:/workspace");
    }

    #[test]
    fn test_steps_iterates_in_order() {
        let plan = ExecutionPlan {
            volumes: vec![Volume::local("test_workspace")],
            stages: vec![
                Stage::single("test_clone", "clone", step("clone")),
                Stage::single("test_stage_0", "stage_0", step("step_0")),
            ],
        };

        let aliases: Vec<&str> = plan.steps().map(|s| s.alias.as_str()).collect();
        assert_eq!(aliases, vec!["clone", "step_0"]);
    }

    #[test]
    fn test_serialized_shape() {
        let plan = ExecutionPlan {
            volumes: vec![Volume::local("test_workspace")],
            stages: vec![Stage::single("test_clone", "clone", step("clone"))],
        };

        let value = serde_json::to_value(&plan).unwrap();
        assert_eq!(value["volumes"][0]["driver"], "local");
        assert_eq!(value["volumes"][0]["name"], "test_workspace");

        let step = &value["stages"][0]["steps"][0];
        assert_eq!(step["working_dir"], "/workspace/src");
        assert_eq!(step["on_success"], true);
        assert_eq!(step["on_failure"], false);
        // empty entrypoint and command are left to the image defaults
        assert!(step.get("entrypoint").is_none());
        assert!(step.get("command").is_none());
    }
}
