//! Pipeline configuration model and parsing.
//!
//! The document format is `bitbucket-pipelines.yml`:
//!
//! ```yaml
//! image: node:latest
//! clone:
//!   depth: 25
//! pipelines:
//!   default:
//!     - step:
//!         script:
//!           - npm test
//!   tags:
//!     release-*:
//!       - step:
//!           script:
//!             - npm run release
//!   branches:
//!     staging:
//!       - step:
//!           image: golang:1.7
//!           script:
//!             - go test
//! ```

use crate::ConfigResult;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// The root pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Image used by steps that don't name their own.
    pub image: String,
    /// Clone settings shared by all pipelines.
    pub clone: CloneConfig,
    /// Default, tag and branch pipelines.
    pub pipelines: Pipelines,
}

/// Git clone settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CloneConfig {
    /// Depth of the clone. Zero leaves the choice to the clone plugin.
    pub depth: i64,
}

/// All pipelines declared in the document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Pipelines {
    /// Runs when no tag or branch pipeline matches.
    pub default: Stage,
    /// Pipelines keyed by tag glob.
    pub tags: HashMap<String, Stage>,
    /// Pipelines keyed by branch glob.
    pub branches: HashMap<String, Stage>,
}

/// An ordered list of steps run for a branch, tag or the default pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stage {
    pub steps: Vec<Step>,
}

/// A build execution unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Step {
    /// Image to run the script in. Falls back to [`Config::image`].
    pub image: Option<String>,
    /// Shell commands, run in order.
    pub script: Vec<String>,
}

// Each entry of a pipeline is a `- step: {...}` wrapper.
#[derive(Deserialize)]
struct StepEntry {
    step: Option<Step>,
}

impl<'de> Deserialize<'de> for Stage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let entries = Option::<Vec<StepEntry>>::deserialize(deserializer)?.unwrap_or_default();

        // Wrappers without a step are dropped rather than rejected.
        let steps = entries.into_iter().filter_map(|e| e.step).collect();

        Ok(Stage { steps })
    }
}

/// Parse a configuration from a string.
pub fn parse_str(s: &str) -> ConfigResult<Config> {
    parse_bytes(s.as_bytes())
}

/// Parse a configuration from raw bytes.
pub fn parse_bytes(b: &[u8]) -> ConfigResult<Config> {
    if b.iter().all(u8::is_ascii_whitespace) {
        debug!("empty pipeline document");
        return Ok(Config::default());
    }

    let config: Config = serde_yaml::from_slice(b)?;

    debug!(
        image = %config.image,
        default_steps = config.pipelines.default.steps.len(),
        tags = config.pipelines.tags.len(),
        branches = config.pipelines.branches.len(),
        "parsed pipeline configuration"
    );

    Ok(config)
}

/// Parse a configuration from a reader, consuming it to the end.
pub fn parse_reader<R: Read>(mut reader: R) -> ConfigResult<Config> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    parse_bytes(&buf)
}

/// Parse a configuration from a file path.
pub fn parse_file(path: impl AsRef<Path>) -> ConfigResult<Config> {
    let path = path.as_ref();
    debug!(path = %path.display(), "reading pipeline configuration");
    let file = File::open(path)?;
    parse_reader(file)
}
