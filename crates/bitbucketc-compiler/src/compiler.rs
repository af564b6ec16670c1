//! Pipeline compiler.
//!
//! A [`Compiler`] is assembled once through [`CompilerBuilder`] and is
//! immutable afterwards, so one instance can compile any number of
//! configurations, from any number of threads.

use crate::image::expand_image;
use crate::script::{
    SCRIPT_COMMAND, SCRIPT_ENTRYPOINT, SCRIPT_ENV, SCRIPT_ENV_LEGACY, encode_script,
};
use bitbucketc_config::{Config, Step as ConfigStep};
use bitbucketc_core::Metadata;
use bitbucketc_core::plan::{ExecutionPlan, Stage, Step, Volume};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Image of the synthesized clone step.
pub const CLONE_IMAGE: &str = "plugins/git:latest";

const DEFAULT_WORKSPACE_BASE: &str = "/workspace";
const DEFAULT_WORKSPACE_PATH: &str = "src";

const ENV_PREFIX: &str = "CI_";
const LEGACY_ENV_PREFIX: &str = "DRONE_";

/// Compiles a pipeline [`Config`] into an [`ExecutionPlan`].
#[derive(Debug, Clone)]
pub struct Compiler {
    local: bool,
    prefix: String,
    volumes: Vec<String>,
    env: BTreeMap<String, String>,
    base: String,
    working_dir: String,
    metadata: Metadata,
}

/// Netrc credentials written into every build container.
#[derive(Debug, Clone, Default)]
struct Netrc {
    username: String,
    password: String,
    machine: String,
}

/// Proxy settings exported to every container.
#[derive(Debug, Clone, Default)]
struct Proxy {
    http: String,
    https: String,
    no_proxy: String,
}

/// Builder for creating a [`Compiler`].
///
/// Environment sources are merged in a fixed order when the compiler is
/// built: metadata, netrc, proxy, then [`with_env`](Self::with_env) values.
/// Later sources override earlier ones.
#[derive(Debug, Clone)]
pub struct CompilerBuilder {
    local: bool,
    prefix: String,
    volumes: Vec<String>,
    base: String,
    path: String,
    metadata: Metadata,
    netrc: Option<Netrc>,
    proxy: Option<Proxy>,
    env: BTreeMap<String, String>,
}

impl CompilerBuilder {
    pub fn new() -> Self {
        Self {
            local: false,
            prefix: String::new(),
            volumes: Vec::new(),
            base: DEFAULT_WORKSPACE_BASE.to_string(),
            path: DEFAULT_WORKSPACE_PATH.to_string(),
            metadata: Metadata::default(),
            netrc: None,
            proxy: None,
            env: BTreeMap::new(),
        }
    }

    /// Bind specs (`source:target`) mounted into every container.
    pub fn with_volumes<I, S>(mut self, volumes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.volumes = volumes.into_iter().map(Into::into).collect();
        self
    }

    /// Workspace base and path. The base is backed by a volume created at
    /// runtime; base and path joined are the working directory of every step.
    pub fn with_workspace(mut self, base: impl Into<String>, path: impl Into<String>) -> Self {
        self.base = base.into();
        self.path = path.into();
        self
    }

    /// Repository, build and system metadata. Selects the pipeline and is
    /// exported to every container.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Netrc credentials for authenticated git operations.
    pub fn with_netrc(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        machine: impl Into<String>,
    ) -> Self {
        self.netrc = Some(Netrc {
            username: username.into(),
            password: password.into(),
            machine: machine.into(),
        });
        self
    }

    /// Prefix for container, stage and volume names, avoiding collisions
    /// between concurrently running plans.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Local mode skips the clone step; the caller mounts the working tree.
    pub fn with_local(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    /// HTTP, HTTPS and no-proxy settings.
    pub fn with_proxy(
        mut self,
        http: impl Into<String>,
        https: impl Into<String>,
        no_proxy: impl Into<String>,
    ) -> Self {
        self.proxy = Some(Proxy {
            http: http.into(),
            https: https.into(),
            no_proxy: no_proxy.into(),
        });
        self
    }

    /// Add one environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add several environment variables.
    pub fn with_environ<I, K, V>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env.extend(env.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn build(self) -> Compiler {
        let working_dir = join_path(&self.base, &self.path);

        let mut env = self.metadata.environ();

        if let Some(netrc) = self.netrc {
            env.insert("CI_NETRC_USERNAME".to_string(), netrc.username);
            env.insert("CI_NETRC_PASSWORD".to_string(), netrc.password);
            env.insert("CI_NETRC_MACHINE".to_string(), netrc.machine);
        }

        if let Some(proxy) = self.proxy {
            for key in ["no_proxy", "NO_PROXY"] {
                env.insert(key.to_string(), proxy.no_proxy.clone());
            }
            for key in ["http_proxy", "HTTP_PROXY"] {
                env.insert(key.to_string(), proxy.http.clone());
            }
            for key in ["https_proxy", "HTTPS_PROXY"] {
                env.insert(key.to_string(), proxy.https.clone());
            }
        }

        env.extend(self.env);
        env.insert("CI_WORKSPACE".to_string(), working_dir.clone());

        // Every CI_ variable is also exported under its legacy DRONE_ name.
        let legacy: Vec<(String, String)> = env
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(ENV_PREFIX)
                    .map(|rest| (format!("{}{}", LEGACY_ENV_PREFIX, rest), v.clone()))
            })
            .collect();
        env.extend(legacy);

        debug!(
            prefix = %self.prefix,
            working_dir = %working_dir,
            local = self.local,
            env = env.len(),
            "built compiler"
        );

        Compiler {
            local: self.local,
            prefix: self.prefix,
            volumes: self.volumes,
            env,
            base: self.base,
            working_dir,
            metadata: self.metadata,
        }
    }
}

impl Default for CompilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn builder() -> CompilerBuilder {
        CompilerBuilder::new()
    }

    /// Environment shared by every container.
    pub fn environ(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Working directory of every step.
    pub fn working_dir(&self) -> &str {
        &self.working_dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    /// Extra bind specs mounted into every container.
    pub fn volumes(&self) -> &[String] {
        &self.volumes
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Compile the pipeline selected by the current commit.
    pub fn compile(&self, config: &Config) -> ExecutionPlan {
        let commit = &self.metadata.curr.commit;
        let section = config.pipeline(&commit.ref_name, &commit.branch);

        let workspace = Volume::local(format!("{}_workspace", self.prefix));

        let mut binds = vec![workspace.bind(&self.base)];
        binds.extend(self.volumes.iter().cloned());

        let mut plan = ExecutionPlan {
            volumes: vec![workspace],
            stages: Vec::with_capacity(section.steps.len() + 1),
        };

        if !self.local {
            plan.stages.push(self.clone_stage(config, &binds));
        }

        for (i, step) in section.steps.iter().enumerate() {
            plan.stages.push(self.script_stage(i, step, config, &binds));
        }

        info!(
            git_ref = %commit.ref_name,
            branch = %commit.branch,
            stages = plan.stages.len(),
            local = self.local,
            "compiled pipeline"
        );

        plan
    }

    fn clone_stage(&self, config: &Config, binds: &[String]) -> Stage {
        let mut environment = self.env.clone();
        environment.insert("PLUGIN_DEPTH".to_string(), config.clone.depth.to_string());

        let name = format!("{}_clone", self.prefix);
        let step = Step {
            name: name.clone(),
            alias: "clone".to_string(),
            image: CLONE_IMAGE.to_string(),
            environment,
            entrypoint: Vec::new(),
            command: Vec::new(),
            volumes: binds.to_vec(),
            working_dir: self.working_dir.clone(),
            on_success: true,
            on_failure: false,
        };

        Stage::single(name, "clone", step)
    }

    fn script_stage(
        &self,
        index: usize,
        step: &ConfigStep,
        config: &Config,
        binds: &[String],
    ) -> Stage {
        let image = step
            .image
            .as_deref()
            .filter(|image| !image.is_empty())
            .unwrap_or(&config.image);

        let script = encode_script(step.script.as_slice());

        let mut environment = self.env.clone();
        environment.insert(SCRIPT_ENV.to_string(), script.clone());
        environment.insert(SCRIPT_ENV_LEGACY.to_string(), script);
        environment.insert("HOME".to_string(), "/root".to_string());
        environment.insert("SHELL".to_string(), "/bin/sh".to_string());

        let step = Step {
            name: format!("{}_step_{}", self.prefix, index),
            alias: format!("step_{}", index),
            image: expand_image(image),
            environment,
            entrypoint: SCRIPT_ENTRYPOINT.iter().map(|s| s.to_string()).collect(),
            command: vec![SCRIPT_COMMAND.to_string()],
            volumes: binds.to_vec(),
            working_dir: self.working_dir.clone(),
            on_success: true,
            on_failure: false,
        };

        Stage::single(
            format!("{}_stage_{}", self.prefix, index),
            format!("stage_{}", index),
            step,
        )
    }
}

/// Join two container paths and clean the result lexically: empty and `.`
/// segments are dropped and `..` removes the segment before it.
fn join_path(base: &str, path: &str) -> String {
    let joined = match (base.is_empty(), path.is_empty()) {
        (true, true) => return String::new(),
        (true, false) => path.to_string(),
        (false, true) => base.to_string(),
        (false, false) => format!("{}/{}", base, path),
    };
    clean_path(&joined)
}

fn clean_path(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                // `..` above the root is the root.
                _ if rooted => {}
                _ => parts.push(".."),
            },
            part => parts.push(part),
        }
    }

    let cleaned = parts.join("/");
    match (rooted, cleaned.is_empty()) {
        (true, _) => format!("/{}", cleaned),
        (false, true) => ".".to_string(),
        (false, false) => cleaned,
    }
}
