//! Compile command.

use anyhow::{Context, Result};
use bitbucketc_compiler::Compiler;
use bitbucketc_config::parse_file;
use bitbucketc_core::Metadata;
use bitbucketc_core::metadata::{Author, Build, Commit, Job, Repo, System};
use clap::Args;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::info;

#[derive(Debug, Args)]
pub struct CompileArgs {
    /// Path to the configuration file (overrides --in)
    pub file: Option<String>,

    /// Path to the configuration file
    #[arg(long = "in", default_value = super::DEFAULT_CONFIG)]
    pub input: String,

    /// Output file, or "-" for stdout
    #[arg(long, default_value = "pipeline.json")]
    pub out: String,

    /// Extra volumes mounted into every container (source:target)
    #[arg(long)]
    pub volumes: Vec<String>,

    /// Prefix for container, stage and volume names
    #[arg(long, default_value = "pipeline")]
    pub prefix: String,

    /// Use the directory of the configuration file as the workspace
    #[arg(long)]
    pub local: bool,

    #[arg(long, default_value = "/workspace")]
    pub workspace_base: String,

    #[arg(long, default_value = "src")]
    pub workspace_path: String,

    #[arg(long, env = "CI_NETRC_USERNAME", default_value = "")]
    pub netrc_username: String,

    #[arg(long, env = "CI_NETRC_PASSWORD", default_value = "", hide_env_values = true)]
    pub netrc_password: String,

    #[arg(long, env = "CI_NETRC_MACHINE", default_value = "")]
    pub netrc_machine: String,

    #[command(flatten)]
    pub metadata: MetadataArgs,
}

/// Run metadata flags, each with a `CI_*` environment fallback.
#[derive(Debug, Args)]
pub struct MetadataArgs {
    #[arg(long, env = "CI_SYSTEM_ARCH", default_value = "linux/amd64")]
    pub system_arch: String,
    #[arg(long, env = "CI_SYSTEM_NAME", default_value = "pipec")]
    pub system_name: String,
    #[arg(long, env = "CI_SYSTEM_LINK", default_value = "https://github.com/cncd/pipec")]
    pub system_link: String,

    #[arg(long, env = "CI_REPO_NAME", default_value = "")]
    pub repo_name: String,
    #[arg(long, env = "CI_REPO_LINK", default_value = "")]
    pub repo_link: String,
    #[arg(long, env = "CI_REPO_REMOTE", default_value = "")]
    pub repo_remote_url: String,
    #[arg(long, env = "CI_REPO_PRIVATE")]
    pub repo_private: bool,

    #[arg(long, env = "CI_BUILD_NUMBER", default_value_t = 0)]
    pub build_number: i64,
    #[arg(long, env = "CI_BUILD_CREATED", default_value_t = 0)]
    pub build_created: i64,
    #[arg(long, env = "CI_BUILD_STARTED", default_value_t = 0)]
    pub build_started: i64,
    #[arg(long, env = "CI_BUILD_FINISHED", default_value_t = 0)]
    pub build_finished: i64,
    #[arg(long, env = "CI_BUILD_STATUS", default_value = "")]
    pub build_status: String,
    #[arg(long, env = "CI_BUILD_EVENT", default_value = "")]
    pub build_event: String,
    #[arg(long, env = "CI_BUILD_LINK", default_value = "")]
    pub build_link: String,
    #[arg(long, env = "CI_BUILD_TARGET", default_value = "")]
    pub build_target: String,

    #[arg(long, env = "CI_COMMIT_SHA", default_value = "")]
    pub commit_sha: String,
    #[arg(long, env = "CI_COMMIT_REF", default_value = "")]
    pub commit_ref: String,
    #[arg(long, env = "CI_COMMIT_REFSPEC", default_value = "")]
    pub commit_refspec: String,
    #[arg(long, env = "CI_COMMIT_BRANCH", default_value = "")]
    pub commit_branch: String,
    #[arg(long, env = "CI_COMMIT_MESSAGE", default_value = "")]
    pub commit_message: String,
    #[arg(long, env = "CI_COMMIT_AUTHOR_NAME", default_value = "")]
    pub commit_author_name: String,
    #[arg(long, env = "CI_COMMIT_AUTHOR_EMAIL", default_value = "")]
    pub commit_author_email: String,
    #[arg(long, env = "CI_COMMIT_AUTHOR_AVATAR", default_value = "")]
    pub commit_author_avatar: String,

    #[arg(long, env = "CI_PREV_BUILD_NUMBER", default_value_t = 0)]
    pub prev_build_number: i64,
    #[arg(long, env = "CI_PREV_BUILD_CREATED", default_value_t = 0)]
    pub prev_build_created: i64,
    #[arg(long, env = "CI_PREV_BUILD_STARTED", default_value_t = 0)]
    pub prev_build_started: i64,
    #[arg(long, env = "CI_PREV_BUILD_FINISHED", default_value_t = 0)]
    pub prev_build_finished: i64,
    #[arg(long, env = "CI_PREV_BUILD_STATUS", default_value = "")]
    pub prev_build_status: String,
    #[arg(long, env = "CI_PREV_BUILD_EVENT", default_value = "")]
    pub prev_build_event: String,
    #[arg(long, env = "CI_PREV_BUILD_LINK", default_value = "")]
    pub prev_build_link: String,

    #[arg(long, env = "CI_PREV_COMMIT_SHA", default_value = "")]
    pub prev_commit_sha: String,
    #[arg(long, env = "CI_PREV_COMMIT_REF", default_value = "")]
    pub prev_commit_ref: String,
    #[arg(long, env = "CI_PREV_COMMIT_REFSPEC", default_value = "")]
    pub prev_commit_refspec: String,
    #[arg(long, env = "CI_PREV_COMMIT_BRANCH", default_value = "")]
    pub prev_commit_branch: String,
    #[arg(long, env = "CI_PREV_COMMIT_MESSAGE", default_value = "")]
    pub prev_commit_message: String,
    #[arg(long, env = "CI_PREV_COMMIT_AUTHOR_NAME", default_value = "")]
    pub prev_commit_author_name: String,
    #[arg(long, env = "CI_PREV_COMMIT_AUTHOR_EMAIL", default_value = "")]
    pub prev_commit_author_email: String,
    #[arg(long, env = "CI_PREV_COMMIT_AUTHOR_AVATAR", default_value = "")]
    pub prev_commit_author_avatar: String,

    #[arg(long, env = "CI_JOB_NUMBER", default_value_t = 0)]
    pub job_number: i64,
}

impl MetadataArgs {
    pub fn to_metadata(&self) -> Metadata {
        Metadata {
            repo: Repo {
                name: self.repo_name.clone(),
                link: self.repo_link.clone(),
                remote: self.repo_remote_url.clone(),
                private: self.repo_private,
            },
            curr: Build {
                number: self.build_number,
                created: self.build_created,
                started: self.build_started,
                finished: self.build_finished,
                status: self.build_status.clone(),
                event: self.build_event.clone(),
                link: self.build_link.clone(),
                target: self.build_target.clone(),
                commit: Commit {
                    sha: self.commit_sha.clone(),
                    ref_name: self.commit_ref.clone(),
                    refspec: self.commit_refspec.clone(),
                    branch: self.commit_branch.clone(),
                    message: self.commit_message.clone(),
                    author: Author {
                        name: self.commit_author_name.clone(),
                        email: self.commit_author_email.clone(),
                        avatar: self.commit_author_avatar.clone(),
                    },
                },
            },
            prev: Build {
                number: self.prev_build_number,
                created: self.prev_build_created,
                started: self.prev_build_started,
                finished: self.prev_build_finished,
                status: self.prev_build_status.clone(),
                event: self.prev_build_event.clone(),
                link: self.prev_build_link.clone(),
                target: String::new(),
                commit: Commit {
                    sha: self.prev_commit_sha.clone(),
                    ref_name: self.prev_commit_ref.clone(),
                    refspec: self.prev_commit_refspec.clone(),
                    branch: self.prev_commit_branch.clone(),
                    message: self.prev_commit_message.clone(),
                    author: Author {
                        name: self.prev_commit_author_name.clone(),
                        email: self.prev_commit_author_email.clone(),
                        avatar: self.prev_commit_author_avatar.clone(),
                    },
                },
            },
            job: Job {
                number: self.job_number,
                ..Default::default()
            },
            sys: System {
                name: self.system_name.clone(),
                link: self.system_link.clone(),
                arch: self.system_arch.clone(),
            },
        }
    }
}

impl CompileArgs {
    /// The configuration file to compile.
    pub fn config_path(&self) -> &str {
        self.file.as_deref().unwrap_or(&self.input)
    }

    /// Build the compiler for `config_path`.
    pub fn compiler(&self, config_path: &Path) -> Result<Compiler> {
        let mut volumes = self.volumes.clone();

        // Mount the directory holding the configuration as the workspace.
        if self.local {
            let dir = config_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."))
                .canonicalize()
                .context("Failed to resolve working directory")?;
            let workspace = Path::new(&self.workspace_base).join(&self.workspace_path);
            volumes.push(format!("{}:{}", dir.display(), workspace.display()));
        }

        Ok(Compiler::builder()
            .with_volumes(volumes)
            .with_workspace(&self.workspace_base, &self.workspace_path)
            .with_prefix(&self.prefix)
            .with_local(self.local)
            .with_netrc(
                &self.netrc_username,
                &self.netrc_password,
                &self.netrc_machine,
            )
            .with_metadata(self.metadata.to_metadata())
            .build())
    }
}

/// Compile the configuration and write the plan as pretty JSON.
pub fn run(args: &CompileArgs) -> Result<()> {
    let file = args.config_path();
    let path = Path::new(file);

    let config =
        parse_file(path).with_context(|| format!("Failed to parse pipeline config: {}", file))?;

    let compiler = args.compiler(path)?;
    let plan = compiler.compile(&config);

    let mut out = serde_json::to_vec_pretty(&plan).context("Failed to serialize plan")?;
    out.push(b'\n');

    if args.out == "-" {
        std::io::stdout()
            .write_all(&out)
            .context("Failed to write plan to stdout")?;
        return Ok(());
    }

    let mut writer = File::create(&args.out)
        .with_context(|| format!("Failed to create output file: {}", args.out))?;
    writer
        .write_all(&out)
        .with_context(|| format!("Failed to write output file: {}", args.out))?;

    info!(input = %file, output = %args.out, stages = plan.stages.len(), "wrote plan");
    println!("Successfully compiled {} to {}", file, args.out);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: CompileArgs,
    }

    fn parse(args: &[&str]) -> CompileArgs {
        let mut argv = vec!["bitbucketc"];
        argv.extend_from_slice(args);
        TestCli::try_parse_from(argv).unwrap().args
    }

    const PIPELINE: &str = r#"
image: node
pipelines:
  default:
    - step:
        script:
          - npm test
  branches:
    staging:
      - step:
          script:
            - npm run deploy
"#;

    #[test]
    fn test_config_path() {
        assert_eq!(parse(&[]).config_path(), "bitbucket-pipelines.yml");
        assert_eq!(parse(&["--in", "ci.yml"]).config_path(), "ci.yml");
        assert_eq!(
            parse(&["--in", "ci.yml", "other.yml"]).config_path(),
            "other.yml"
        );
    }

    #[test]
    fn test_metadata_flags() {
        let args = parse(&[
            "--repo-name",
            "octocat/hello-world",
            "--commit-branch",
            "staging",
            "--commit-ref",
            "refs/heads/staging",
            "--build-number",
            "7",
            "--job-number",
            "2",
        ]);
        let metadata = args.metadata.to_metadata();

        assert_eq!(metadata.repo.name, "octocat/hello-world");
        assert_eq!(metadata.curr.commit.branch, "staging");
        assert_eq!(metadata.curr.commit.ref_name, "refs/heads/staging");
        assert_eq!(metadata.curr.number, 7);
        assert_eq!(metadata.job.number, 2);
        assert_eq!(metadata.sys.arch, "linux/amd64");
    }

    #[test]
    fn test_local_mounts_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("bitbucket-pipelines.yml");
        std::fs::write(&config, PIPELINE).unwrap();

        let args = parse(&["--local", "--volumes", "/tmp:/tmp"]);
        let compiler = args.compiler(&config).unwrap();

        let expected_dir = dir.path().canonicalize().unwrap();
        assert!(compiler.is_local());
        assert_eq!(
            compiler.volumes(),
            [
                "/tmp:/tmp".to_string(),
                format!("{}:/workspace/src", expected_dir.display())
            ]
        );
    }

    #[test]
    fn test_run_writes_plan() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("bitbucket-pipelines.yml");
        let output = dir.path().join("pipeline.json");
        std::fs::write(&config, PIPELINE).unwrap();

        let args = parse(&[
            "--in",
            config.to_str().unwrap(),
            "--out",
            output.to_str().unwrap(),
            "--commit-branch",
            "staging",
        ]);
        run(&args).unwrap();

        let plan: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&output).unwrap()).unwrap();
        assert_eq!(plan["volumes"][0]["name"], "pipeline_workspace");
        assert_eq!(plan["stages"][0]["alias"], "clone");
        assert_eq!(plan["stages"][1]["steps"][0]["image"], "node:latest");
        assert_eq!(
            plan["stages"][1]["steps"][0]["environment"]["CI_COMMIT_BRANCH"],
            "staging"
        );
    }

    #[test]
    fn test_run_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yml");
        let args = parse(&["--in", missing.to_str().unwrap(), "--out", "-"]);
        assert!(run(&args).is_err());
    }
}
