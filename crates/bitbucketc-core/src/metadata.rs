//! Runtime metadata for a pipeline run.
//!
//! Metadata describes the repository, the current and previous builds, the
//! job and the CI system. The compiler reads the current commit to choose a
//! pipeline and exposes the whole tree to every container through
//! [`Metadata::environ`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Event name for tag builds.
pub const EVENT_TAG: &str = "tag";
/// Event name for pull request builds.
pub const EVENT_PULL: &str = "pull_request";
/// Event name for push builds.
pub const EVENT_PUSH: &str = "push";
/// Event name for deployment builds.
pub const EVENT_DEPLOY: &str = "deployment";

/// Ref prefix identifying a tag.
pub const TAG_REF_PREFIX: &str = "refs/tags/";

// First run of digits in a pull request ref, e.g. refs/pull/42/head
static PULL_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// Runtime metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub repo: Repo,
    /// The build being compiled.
    pub curr: Build,
    /// The previous build of the same repository.
    pub prev: Build,
    pub job: Job,
    pub sys: System,
}

/// Repository metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    pub name: String,
    pub link: String,
    pub remote: String,
    pub private: bool,
}

/// Build metadata. Timestamps are unix seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub number: i64,
    pub created: i64,
    pub started: i64,
    pub finished: i64,
    pub status: String,
    pub event: String,
    pub link: String,
    pub target: String,
    pub commit: Commit,
}

/// Commit metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub refspec: String,
    pub branch: String,
    pub message: String,
    pub author: Author,
}

/// Commit author metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
    pub avatar: String,
}

/// Job metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub number: i64,
    /// Matrix axis values for this job, if the build is a matrix build.
    pub matrix: BTreeMap<String, String>,
}

/// CI system metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct System {
    pub name: String,
    pub link: String,
    /// Platform, e.g. `linux/amd64`.
    pub arch: String,
}

impl Commit {
    /// The tag name if the ref points at a tag.
    pub fn tag(&self) -> Option<&str> {
        self.ref_name.strip_prefix(TAG_REF_PREFIX)
    }
}

impl Metadata {
    /// Flatten the metadata into `CI_*` environment variables.
    pub fn environ(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();

        let mut set = |key: &str, value: String| {
            env.insert(key.to_string(), value);
        };

        set("CI", self.sys.name.clone());
        set("CI_REPO", self.repo.name.clone());
        set("CI_REPO_NAME", self.repo.name.clone());
        set("CI_REPO_LINK", self.repo.link.clone());
        set("CI_REPO_REMOTE", self.repo.remote.clone());
        set("CI_REMOTE_URL", self.repo.remote.clone());
        set("CI_REPO_PRIVATE", self.repo.private.to_string());

        set("CI_JOB_NUMBER", self.job.number.to_string());

        set("CI_SYSTEM", self.sys.name.clone());
        set("CI_SYSTEM_NAME", self.sys.name.clone());
        set("CI_SYSTEM_LINK", self.sys.link.clone());
        set("CI_SYSTEM_ARCH", self.sys.arch.clone());

        build_environ(&mut env, "CI_", &self.curr);
        build_environ(&mut env, "CI_PREV_", &self.prev);

        if self.curr.event == EVENT_TAG {
            let tag = self.curr.commit.tag().unwrap_or(&self.curr.commit.ref_name);
            env.insert("CI_TAG".to_string(), tag.to_string());
        }
        if self.curr.event == EVENT_PULL {
            let pull = PULL_REGEX
                .find(&self.curr.commit.ref_name)
                .map(|m| m.as_str())
                .unwrap_or_default();
            env.insert("CI_PULL_REQUEST".to_string(), pull.to_string());
        }

        env
    }
}

fn build_environ(env: &mut BTreeMap<String, String>, prefix: &str, build: &Build) {
    let commit = &build.commit;
    let vars = [
        ("BUILD_NUMBER", build.number.to_string()),
        ("BUILD_CREATED", build.created.to_string()),
        ("BUILD_STARTED", build.started.to_string()),
        ("BUILD_FINISHED", build.finished.to_string()),
        ("BUILD_STATUS", build.status.clone()),
        ("BUILD_EVENT", build.event.clone()),
        ("BUILD_LINK", build.link.clone()),
        ("BUILD_TARGET", build.target.clone()),
        ("COMMIT_SHA", commit.sha.clone()),
        ("COMMIT_REF", commit.ref_name.clone()),
        ("COMMIT_REFSPEC", commit.refspec.clone()),
        ("COMMIT_BRANCH", commit.branch.clone()),
        ("COMMIT_MESSAGE", commit.message.clone()),
        ("COMMIT_AUTHOR", commit.author.name.clone()),
        ("COMMIT_AUTHOR_NAME", commit.author.name.clone()),
        ("COMMIT_AUTHOR_EMAIL", commit.author.email.clone()),
        ("COMMIT_AUTHOR_AVATAR", commit.author.avatar.clone()),
    ];
    for (key, value) in vars {
        env.insert(format!("{}{}", prefix, key), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Metadata {
        Metadata {
            repo: Repo {
                name: "octocat/hello-world".to_string(),
                link: "https://github.com/octocat/hello-world".to_string(),
                remote: "https://github.com/octocat/hello-world.git".to_string(),
                private: true,
            },
            curr: Build {
                number: 42,
                event: EVENT_PUSH.to_string(),
                commit: Commit {
                    sha: "abc123".to_string(),
                    ref_name: "refs/heads/master".to_string(),
                    branch: "master".to_string(),
                    author: Author {
                        name: "octocat".to_string(),
                        ..Default::default()
                    },
                    ..Default::default()
                },
                ..Default::default()
            },
            prev: Build {
                number: 41,
                status: "success".to_string(),
                ..Default::default()
            },
            sys: System {
                name: "pipec".to_string(),
                link: "https://github.com/cncd/pipec".to_string(),
                arch: "linux/amd64".to_string(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_repo_environ() {
        let env = sample().environ();
        assert_eq!(env["CI_REPO_NAME"], "octocat/hello-world");
        assert_eq!(env["CI_REPO_LINK"], "https://github.com/octocat/hello-world");
        assert_eq!(
            env["CI_REPO_REMOTE"],
            "https://github.com/octocat/hello-world.git"
        );
        assert_eq!(env["CI_REPO_PRIVATE"], "true");
    }

    #[test]
    fn test_build_environ() {
        let env = sample().environ();
        assert_eq!(env["CI_BUILD_NUMBER"], "42");
        assert_eq!(env["CI_COMMIT_SHA"], "abc123");
        assert_eq!(env["CI_COMMIT_BRANCH"], "master");
        assert_eq!(env["CI_COMMIT_AUTHOR"], "octocat");
        assert_eq!(env["CI_PREV_BUILD_NUMBER"], "41");
        assert_eq!(env["CI_PREV_BUILD_STATUS"], "success");
        assert_eq!(env["CI_SYSTEM_ARCH"], "linux/amd64");
        assert_eq!(env["CI"], "pipec");
    }

    #[test]
    fn test_tag_only_for_tag_events() {
        let mut meta = sample();
        assert!(!meta.environ().contains_key("CI_TAG"));

        meta.curr.event = EVENT_TAG.to_string();
        meta.curr.commit.ref_name = "refs/tags/v1.2.0".to_string();
        assert_eq!(meta.environ()["CI_TAG"], "v1.2.0");
    }

    #[test]
    fn test_pull_request_number() {
        let mut meta = sample();
        meta.curr.event = EVENT_PULL.to_string();
        meta.curr.commit.ref_name = "refs/pull/17/head".to_string();
        assert_eq!(meta.environ()["CI_PULL_REQUEST"], "17");
    }

    #[test]
    fn test_commit_tag() {
        let mut commit = Commit::default();
        assert_eq!(commit.tag(), None);
        commit.ref_name = "refs/tags/release-1.0".to_string();
        assert_eq!(commit.tag(), Some("release-1.0"));
    }
}
