//! Container image reference normalization.
//!
//! References follow the docker grammar `[domain/]path[:tag][@digest]`.
//! Images on the default registry are shortened (`docker.io/library/node`
//! becomes `node`) and a missing tag defaults to `latest`. A digest pins the
//! image, so any tag written next to it is dropped.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use tracing::warn;

/// Tag applied to references that carry neither a tag nor a digest.
pub const DEFAULT_TAG: &str = "latest";

const DEFAULT_DOMAINS: [&str; 2] = ["docker.io", "index.docker.io"];
const OFFICIAL_REPO_PREFIX: &str = "library/";

static PATH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*$")
        .unwrap()
});

static DOMAIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])(?:\.(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]))*(?::[0-9]+)?$",
    )
    .unwrap()
});

static TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").unwrap());

static DIGEST_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}$").unwrap()
});

/// A parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Registry domain, absent for the default registry.
    pub domain: Option<String>,
    /// Repository path, e.g. `node` or `plugins/git`.
    pub path: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageRef {
    /// Parse and normalize a reference. Returns `None` if it is malformed.
    pub fn parse(reference: &str) -> Option<Self> {
        let (rest, digest) = match reference.split_once('@') {
            Some((rest, digest)) => (rest, Some(digest)),
            None => (reference, None),
        };

        // A colon after the last slash starts the tag; earlier ones belong to a port.
        let (name, tag) = match rest.rfind(':') {
            Some(i) if rest.rfind('/').is_none_or(|slash| i > slash) => {
                (&rest[..i], Some(&rest[i + 1..]))
            }
            _ => (rest, None),
        };

        let (domain, mut path) = split_domain(name);

        if let Some(domain) = domain {
            if !DOMAIN_REGEX.is_match(domain) {
                return None;
            }
        }
        if !PATH_REGEX.is_match(path) {
            return None;
        }
        if tag.is_some_and(|t| !TAG_REGEX.is_match(t)) {
            return None;
        }
        if digest.is_some_and(|d| !DIGEST_REGEX.is_match(d)) {
            return None;
        }

        let tag = tag.filter(|_| digest.is_none());
        let domain = domain.filter(|d| !DEFAULT_DOMAINS.contains(d));
        if domain.is_none() {
            path = path.strip_prefix(OFFICIAL_REPO_PREFIX).unwrap_or(path);
        }

        Some(Self {
            domain: domain.map(str::to_string),
            path: path.to_string(),
            tag: tag.map(str::to_string),
            digest: digest.map(str::to_string),
        })
    }

    /// Apply [`DEFAULT_TAG`] if the reference has neither tag nor digest.
    pub fn with_default_tag(mut self) -> Self {
        if self.tag.is_none() && self.digest.is_none() {
            self.tag = Some(DEFAULT_TAG.to_string());
        }
        self
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(domain) = &self.domain {
            write!(f, "{}/", domain)?;
        }
        f.write_str(&self.path)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

// The first component is a domain only if it looks like a host.
fn split_domain(name: &str) -> (Option<&str>, &str) {
    match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (Some(first), rest)
        }
        _ => (None, name),
    }
}

/// Normalize an image reference to carry an explicit tag.
///
/// Malformed references are returned unchanged.
pub fn expand_image(name: &str) -> String {
    match ImageRef::parse(name) {
        Some(image) => image.with_default_tag().to_string(),
        None => {
            warn!(image = %name, "unable to parse image reference");
            name.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tag() {
        assert_eq!(expand_image("node"), "node:latest");
        assert_eq!(expand_image("plugins/git"), "plugins/git:latest");
    }

    #[test]
    fn test_explicit_tag_kept() {
        assert_eq!(expand_image("golang:1.7"), "golang:1.7");
        assert_eq!(expand_image("node:latest"), "node:latest");
    }

    #[test]
    fn test_default_registry_shortened() {
        assert_eq!(expand_image("docker.io/library/node"), "node:latest");
        assert_eq!(expand_image("index.docker.io/library/node:6"), "node:6");
        assert_eq!(expand_image("docker.io/octocat/app"), "octocat/app:latest");
        assert_eq!(expand_image("library/alpine:3.4"), "alpine:3.4");
    }

    #[test]
    fn test_private_registry() {
        assert_eq!(
            expand_image("localhost:5000/octocat/app"),
            "localhost:5000/octocat/app:latest"
        );
        assert_eq!(expand_image("gcr.io/project/app:v2"), "gcr.io/project/app:v2");
        assert_eq!(
            expand_image("quay.io/library/app"),
            "quay.io/library/app:latest"
        );
    }

    #[test]
    fn test_digest_gets_no_tag() {
        let digest = "sha256:7cc4b5aefd1d0cadf8d97d4350462ba51c694ebca145b08d7d41b41acc8db5aa";
        let image = format!("alpine@{}", digest);
        assert_eq!(expand_image(&image), image);
    }

    #[test]
    fn test_digest_drops_tag() {
        let digest = "sha256:7cc4b5aefd1d0cadf8d97d4350462ba51c694ebca145b08d7d41b41acc8db5aa";
        assert_eq!(
            expand_image(&format!("node:6@{}", digest)),
            format!("node@{}", digest)
        );
        assert_eq!(
            expand_image(&format!("docker.io/library/node:6@{}", digest)),
            format!("node@{}", digest)
        );

        let image = ImageRef::parse(&format!("gcr.io/app:v1@{}", digest)).unwrap();
        assert_eq!(image.tag, None);
        assert_eq!(image.digest.as_deref(), Some(digest));
    }

    #[test]
    fn test_non_ascii_tag_passes_through() {
        assert_eq!(expand_image("node:café"), "node:café");
        assert_eq!(expand_image("node:版本"), "node:版本");
    }

    #[test]
    fn test_malformed_passes_through() {
        assert_eq!(expand_image(""), "");
        assert_eq!(expand_image("Node:latest"), "Node:latest");
        assert_eq!(expand_image("node:"), "node:");
        assert_eq!(expand_image("node:6@sha256:abc"), "node:6@sha256:abc");
        assert_eq!(expand_image("a b"), "a b");
    }

    #[test]
    fn test_parse_parts() {
        let image = ImageRef::parse("registry.example.com:8443/team/app:1.0").unwrap();
        assert_eq!(image.domain.as_deref(), Some("registry.example.com:8443"));
        assert_eq!(image.path, "team/app");
        assert_eq!(image.tag.as_deref(), Some("1.0"));
        assert_eq!(image.digest, None);
    }
}
